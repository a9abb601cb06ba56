//! Catalog operations: features, endpoints, packages, plans, package-plans
//! and profit rules.
//!
//! The `clear_initial_*` operations are the "clear competitors" half of the
//! clear-then-set pattern; callers run them in the same transaction as the
//! write that sets the flag, after taking the matching lock.

use meterline_core::{
    Feature, FeatureEndpoint, FeatureEndpointId, FeatureId, Package, PackageId, PackagePlan,
    PackagePlanId, Plan, PlanId, ProfitRule,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::Txn;

impl Txn<'_> {
    // =========================================================================
    // Features
    // =========================================================================

    /// Get a feature by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn feature(&mut self, feature_id: &FeatureId) -> Result<Option<Feature>> {
        self.read(cf::FEATURES, &keys::feature_key(feature_id))
    }

    /// Insert or update a feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_feature(&mut self, feature: &Feature) -> Result<()> {
        self.write(cf::FEATURES, &keys::feature_key(&feature.id), feature)
    }

    /// Get a feature endpoint by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn feature_endpoint(
        &mut self,
        endpoint_id: &FeatureEndpointId,
    ) -> Result<Option<FeatureEndpoint>> {
        self.read(cf::FEATURE_ENDPOINTS, &keys::feature_endpoint_key(endpoint_id))
    }

    /// Insert or update a feature endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_feature_endpoint(&mut self, endpoint: &FeatureEndpoint) -> Result<()> {
        self.write(
            cf::FEATURE_ENDPOINTS,
            &keys::feature_endpoint_key(&endpoint.id),
            endpoint,
        )
    }

    // =========================================================================
    // Plans and profit rules
    // =========================================================================

    /// Get a plan by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn plan(&mut self, plan_id: &PlanId) -> Result<Option<Plan>> {
        self.read(cf::PLANS, &keys::plan_key(plan_id))
    }

    /// Insert or update a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_plan(&mut self, plan: &Plan) -> Result<()> {
        self.write(cf::PLANS, &keys::plan_key(&plan.id), plan)
    }

    /// Insert or update a profit rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_profit_rule(&mut self, rule: &ProfitRule) -> Result<()> {
        self.write(cf::PROFIT_RULES, &keys::profit_rule_key(&rule.id), rule)
    }

    /// All active profit rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn active_profit_rules(&mut self) -> Result<Vec<ProfitRule>> {
        let rules: Vec<ProfitRule> = self.scan_records(cf::PROFIT_RULES, &[])?;
        Ok(rules.into_iter().filter(|rule| rule.is_active).collect())
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Get a package by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn package(&mut self, package_id: &PackageId) -> Result<Option<Package>> {
        self.read(cf::PACKAGES, &keys::package_key(package_id))
    }

    /// Write a package as-is. Flag invariants are the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_package(&mut self, package: &Package) -> Result<()> {
        self.write(cf::PACKAGES, &keys::package_key(&package.id), package)
    }

    /// All packages that are not deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn packages(&mut self) -> Result<Vec<Package>> {
        let packages: Vec<Package> = self.scan_records(cf::PACKAGES, &[])?;
        Ok(packages.into_iter().filter(|p| !p.is_deleted).collect())
    }

    /// The active onboarding package, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn initial_package(&mut self) -> Result<Option<Package>> {
        Ok(self
            .packages()?
            .into_iter()
            .find(|p| p.is_initial && p.is_active))
    }

    /// Serialize writers of the package-level `is_initial` flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the lock cannot be acquired.
    pub fn lock_initial_packages(&mut self) -> Result<()> {
        self.lock(keys::INITIAL_PACKAGE_LOCK)
    }

    /// Serialize writers of one package's plan list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the lock cannot be acquired.
    pub fn lock_package(&mut self, package_id: &PackageId) -> Result<()> {
        self.lock(&keys::package_key(package_id))
    }

    /// Unset `is_initial` on every package except `except`.
    ///
    /// Returns the packages that were changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_initial_packages(&mut self, except: Option<&PackageId>) -> Result<Vec<PackageId>> {
        let mut cleared = Vec::new();
        let packages: Vec<Package> = self.scan_records(cf::PACKAGES, &[])?;
        for mut package in packages {
            if package.is_initial && Some(&package.id) != except {
                package.is_initial = false;
                package.updated_at = chrono::Utc::now();
                self.put_package(&package)?;
                cleared.push(package.id);
            }
        }
        Ok(cleared)
    }

    // =========================================================================
    // Package-plans
    // =========================================================================

    /// Get a package-plan by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn package_plan(&mut self, package_plan_id: &PackagePlanId) -> Result<Option<PackagePlan>> {
        self.read(cf::PACKAGE_PLANS, &keys::package_plan_key(package_plan_id))
    }

    /// Write a package-plan as-is and maintain the package index.
    /// Flag invariants are the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_package_plan(&mut self, package_plan: &PackagePlan) -> Result<()> {
        let key = keys::package_plan_key(&package_plan.id);
        if let Some(previous) = self.read::<PackagePlan>(cf::PACKAGE_PLANS, &key)? {
            if previous.package != package_plan.package {
                self.remove(
                    cf::PACKAGE_PLANS_BY_PACKAGE,
                    &keys::package_plan_index_key(&previous.package, &previous.id),
                )?;
            }
        }
        self.write(cf::PACKAGE_PLANS, &key, package_plan)?;
        self.write_raw(
            cf::PACKAGE_PLANS_BY_PACKAGE,
            &keys::package_plan_index_key(&package_plan.package, &package_plan.id),
            Vec::new(),
        )
    }

    /// Remove a package-plan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the package-plan does not exist.
    pub fn delete_package_plan(&mut self, package_plan_id: &PackagePlanId) -> Result<PackagePlan> {
        let key = keys::package_plan_key(package_plan_id);
        let package_plan: PackagePlan = self
            .read(cf::PACKAGE_PLANS, &key)?
            .ok_or_else(|| StoreError::not_found("package plan", package_plan_id))?;
        self.remove(cf::PACKAGE_PLANS, &key)?;
        self.remove(
            cf::PACKAGE_PLANS_BY_PACKAGE,
            &keys::package_plan_index_key(&package_plan.package, &package_plan.id),
        )?;
        Ok(package_plan)
    }

    /// A package's plans ordered by position.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn package_plans_for_package(&mut self, package_id: &PackageId) -> Result<Vec<PackagePlan>> {
        let index = self.scan_keys(cf::PACKAGE_PLANS_BY_PACKAGE, &keys::package_key(package_id))?;
        let mut plans = Vec::with_capacity(index.len());
        for key in index {
            let Some(id) = keys::extract_package_plan_id(&key) else {
                continue;
            };
            if let Some(plan) = self.package_plan(&id)? {
                plans.push(plan);
            }
        }
        plans.sort_by_key(|plan| (plan.position, plan.created_at, plan.id));
        Ok(plans)
    }

    /// The package-plan selling `plan` within `package`, preferring active ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_package_plan(
        &mut self,
        package_id: &PackageId,
        plan_id: &PlanId,
    ) -> Result<Option<PackagePlan>> {
        let candidates: Vec<PackagePlan> = self
            .package_plans_for_package(package_id)?
            .into_iter()
            .filter(|pp| &pp.plan == plan_id)
            .collect();
        let active = candidates.iter().position(|pp| pp.is_active);
        Ok(candidates.into_iter().nth(active.unwrap_or(0)))
    }

    /// The initial package-plan of a package.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn initial_package_plan(&mut self, package_id: &PackageId) -> Result<Option<PackagePlan>> {
        Ok(self
            .package_plans_for_package(package_id)?
            .into_iter()
            .find(|pp| pp.is_initial))
    }

    /// Unset `is_initial` on every plan of `package` except `except`.
    ///
    /// Returns the package-plans that were changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_initial_package_plans(
        &mut self,
        package_id: &PackageId,
        except: Option<&PackagePlanId>,
    ) -> Result<Vec<PackagePlanId>> {
        let mut cleared = Vec::new();
        for mut package_plan in self.package_plans_for_package(package_id)? {
            if package_plan.is_initial && Some(&package_plan.id) != except {
                package_plan.is_initial = false;
                package_plan.updated_at = chrono::Utc::now();
                self.put_package_plan(&package_plan)?;
                cleared.push(package_plan.id);
            }
        }
        Ok(cleared)
    }
}
