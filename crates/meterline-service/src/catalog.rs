//! Catalog writes and the "exactly one initial" invariants.
//!
//! Every write that can introduce a second `is_initial` flag clears the
//! competitors in the same transaction before persisting. Every write that can
//! remove the last initial package-plan of a package promotes a replacement
//! before committing, so a package with plans always has exactly one initial
//! plan.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use meterline_core::{
    first_initial_wins, promotion_candidate, BillingError, Package, PackageId, PackagePlan,
    PackagePlanId, Result,
};
use meterline_store::{Store, Txn};

/// Writes packages and package-plans.
pub struct CatalogService {
    store: Arc<dyn Store>,
}

impl CatalogService {
    /// Create a catalog service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create or update a package.
    ///
    /// A package saved with `is_initial` takes the flag from every other
    /// package.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn upsert_package(&self, mut package: Package) -> Result<Package> {
        let mut txn = Txn::begin(self.store.as_ref())?;

        if let Some(existing) = txn.package(&package.id)? {
            package.created_at = existing.created_at;
        }
        package.updated_at = Utc::now();

        if package.is_initial {
            txn.lock_initial_packages()?;
            let cleared = txn.clear_initial_packages(Some(&package.id))?;
            if !cleared.is_empty() {
                tracing::info!(
                    package_id = %package.id,
                    cleared = cleared.len(),
                    "Initial flag moved to package"
                );
            }
        }
        txn.put_package(&package)?;
        txn.commit()?;

        tracing::info!(package_id = %package.id, is_initial = package.is_initial, "Package saved");
        Ok(package)
    }

    /// Create or update a single package-plan.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::NotFound`] if the package or plan does not
    /// exist.
    pub fn upsert_package_plan(&self, mut package_plan: PackagePlan) -> Result<PackagePlan> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        ensure_package(&mut txn, &package_plan.package)?;
        ensure_plan(&mut txn, &package_plan)?;
        txn.lock_package(&package_plan.package)?;

        let moved_from = match txn.package_plan(&package_plan.id)? {
            Some(existing) => {
                package_plan.created_at = existing.created_at;
                (existing.package != package_plan.package).then_some(existing.package)
            }
            None => None,
        };
        if let Some(old_package) = &moved_from {
            txn.lock_package(old_package)?;
        }
        package_plan.updated_at = Utc::now();

        if package_plan.is_initial {
            clear_competitors(&mut txn, &package_plan.package, &package_plan.id)?;
        }
        txn.put_package_plan(&package_plan)?;

        converge(&mut txn, &package_plan.package)?;
        if let Some(old_package) = &moved_from {
            converge(&mut txn, old_package)?;
        }

        let saved = txn
            .package_plan(&package_plan.id)?
            .ok_or_else(|| BillingError::not_found("package plan", package_plan.id))?;
        txn.commit()?;

        tracing::info!(
            package_plan_id = %saved.id,
            package_id = %saved.package,
            is_initial = saved.is_initial,
            "Package plan saved"
        );
        Ok(saved)
    }

    /// Add several plans to a package at once.
    ///
    /// When more than one plan of the batch requests `is_initial`, the first
    /// one keeps it and the others are saved without it.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::NotFound`] if the package or any plan does not
    /// exist.
    pub fn create_package_plans(
        &self,
        package: &PackageId,
        plans: Vec<PackagePlan>,
    ) -> Result<Vec<PackagePlan>> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        ensure_package(&mut txn, package)?;
        txn.lock_package(package)?;

        write_batch(&mut txn, package, plans)?;
        converge(&mut txn, package)?;

        let saved = txn.package_plans_for_package(package)?;
        txn.commit()?;
        Ok(saved)
    }

    /// Replace a package's plan list with `plans`.
    ///
    /// Plans of the package missing from `plans` are removed. If no plan
    /// ends up initial, the first active one (or the first at all) is
    /// promoted.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::NotFound`] if the package or any plan does not
    /// exist.
    pub fn reconcile_package_plans(
        &self,
        package: &PackageId,
        plans: Vec<PackagePlan>,
    ) -> Result<Vec<PackagePlan>> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        ensure_package(&mut txn, package)?;
        txn.lock_package(package)?;

        let keep: HashSet<PackagePlanId> = plans.iter().map(|pp| pp.id).collect();
        let mut removed = 0usize;
        for existing in txn.package_plans_for_package(package)? {
            if !keep.contains(&existing.id) {
                txn.delete_package_plan(&existing.id)?;
                removed += 1;
            }
        }

        write_batch(&mut txn, package, plans)?;
        converge(&mut txn, package)?;

        let saved = txn.package_plans_for_package(package)?;
        txn.commit()?;

        tracing::info!(package_id = %package, plans = saved.len(), removed, "Package plans reconciled");
        Ok(saved)
    }
}

fn ensure_package(txn: &mut Txn<'_>, package: &PackageId) -> Result<()> {
    match txn.package(package)? {
        Some(p) if !p.is_deleted => Ok(()),
        _ => Err(BillingError::not_found("package", package)),
    }
}

fn ensure_plan(txn: &mut Txn<'_>, package_plan: &PackagePlan) -> Result<()> {
    if txn.plan(&package_plan.plan)?.is_none() {
        return Err(BillingError::not_found("plan", package_plan.plan));
    }
    Ok(())
}

/// Write `plans` into `package`, honoring only the first `is_initial`.
fn write_batch(txn: &mut Txn<'_>, package: &PackageId, mut plans: Vec<PackagePlan>) -> Result<()> {
    let now = Utc::now();
    for plan in &mut plans {
        ensure_plan(txn, plan)?;
        plan.package = *package;
        plan.updated_at = now;
        if let Some(existing) = txn.package_plan(&plan.id)? {
            if existing.package != *package {
                return Err(BillingError::Conflict(format!(
                    "package plan {} belongs to package {}",
                    plan.id, existing.package
                )));
            }
            plan.created_at = existing.created_at;
        }
    }

    if let Some(winner) = first_initial_wins(&mut plans, |pp| &mut pp.is_initial) {
        clear_competitors(txn, package, &plans[winner].id)?;
    }
    for plan in &plans {
        txn.put_package_plan(plan)?;
    }
    Ok(())
}

fn clear_competitors(txn: &mut Txn<'_>, package: &PackageId, keep: &PackagePlanId) -> Result<()> {
    let cleared = txn.clear_initial_package_plans(package, Some(keep))?;
    if !cleared.is_empty() {
        tracing::info!(
            package_id = %package,
            package_plan_id = %keep,
            cleared = cleared.len(),
            "Initial flag moved to package plan"
        );
    }
    Ok(())
}

/// Promote a package-plan if the package has plans but none is initial.
fn converge(txn: &mut Txn<'_>, package: &PackageId) -> Result<()> {
    let plans = txn.package_plans_for_package(package)?;
    let Some(candidate) = promotion_candidate(&plans) else {
        return Ok(());
    };
    let Some(mut promoted) = plans.into_iter().find(|pp| pp.id == candidate) else {
        return Ok(());
    };
    promoted.is_initial = true;
    promoted.updated_at = Utc::now();
    txn.put_package_plan(&promoted)?;

    tracing::info!(
        package_id = %package,
        package_plan_id = %promoted.id,
        "Promoted package plan to initial"
    );
    Ok(())
}
