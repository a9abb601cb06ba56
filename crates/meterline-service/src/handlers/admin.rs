//! Admin catalog handlers.
//!
//! Every write runs through [`crate::catalog::CatalogService`], which keeps
//! the initial-package and initial-plan flags consistent.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use meterline_core::{
    Currency, FeatureId, Package, PackageId, PackagePlan, PackagePlanId, PlanId,
};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

const fn default_true() -> bool {
    true
}

/// Create-or-update request for a package.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRequest {
    /// Existing package to update; a new one is created when absent.
    #[serde(default)]
    pub id: Option<PackageId>,
    /// Display name.
    pub name: String,
    /// Included features.
    #[serde(default)]
    pub features: Vec<FeatureId>,
    /// Make this the onboarding package.
    #[serde(default)]
    pub is_initial: bool,
    /// Whether the package is offered.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// A package-plan inside a package's plan list.
#[derive(Debug, Deserialize)]
pub struct PackagePlanItem {
    /// Existing package-plan to update; a new one is created when absent.
    #[serde(default)]
    pub id: Option<PackagePlanId>,
    /// Offered plan.
    pub plan_id: PlanId,
    /// Price per currency, in minor units.
    #[serde(default)]
    pub prices: BTreeMap<Currency, i64>,
    /// Credits granted on purchase.
    pub credits: i64,
    /// Make this the package's onboarding plan.
    #[serde(default)]
    pub is_initial: bool,
    /// Whether the package-plan is offered.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Order within the package.
    #[serde(default)]
    pub position: u32,
}

impl PackagePlanItem {
    fn into_package_plan(self, package: PackageId) -> Result<PackagePlan, ApiError> {
        if self.credits < 0 {
            return Err(ApiError::BadRequest("credits must not be negative".into()));
        }
        if let Some((currency, _)) = self.prices.iter().find(|(_, amount)| **amount < 0) {
            return Err(ApiError::BadRequest(format!(
                "price in {currency} must not be negative"
            )));
        }

        let mut package_plan = PackagePlan::new(package, self.plan_id, self.credits);
        if let Some(id) = self.id {
            package_plan.id = id;
        }
        package_plan.prices = self.prices;
        package_plan.is_initial = self.is_initial;
        package_plan.is_active = self.is_active;
        package_plan.position = self.position;
        Ok(package_plan)
    }
}

/// Create-or-update request for a single package-plan.
#[derive(Debug, Deserialize)]
pub struct PackagePlanRequest {
    /// Owning package.
    pub package_id: PackageId,
    /// The package-plan.
    #[serde(flatten)]
    pub plan: PackagePlanItem,
}

/// A package's plan list.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagePlansRequest {
    /// The plans.
    pub plans: Vec<PackagePlanItem>,
}

/// A package's plans after a write.
#[derive(Debug, Serialize)]
pub struct PackagePlansResponse {
    /// Package.
    pub package_id: PackageId,
    /// Plans ordered by position.
    pub plans: Vec<PackagePlan>,
}

/// `PUT /v1/admin/packages`
pub async fn upsert_package(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    payload: Result<Json<PackageRequest>, JsonRejection>,
) -> Result<Json<Package>, ApiError> {
    let Json(request) = payload?;
    let mut package = Package::new(request.name, request.features);
    if let Some(id) = request.id {
        package.id = id;
    }
    package.is_initial = request.is_initial;
    package.is_active = request.is_active;

    let saved = state.catalog.upsert_package(package)?;
    tracing::info!(admin_id = %admin.admin_id, package_id = %saved.id, "Admin saved package");
    Ok(Json(saved))
}

/// `PUT /v1/admin/package-plans`
pub async fn upsert_package_plan(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    payload: Result<Json<PackagePlanRequest>, JsonRejection>,
) -> Result<Json<PackagePlan>, ApiError> {
    let Json(request) = payload?;
    let package_plan = request.plan.into_package_plan(request.package_id)?;

    let saved = state.catalog.upsert_package_plan(package_plan)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        package_plan_id = %saved.id,
        "Admin saved package plan"
    );
    Ok(Json(saved))
}

/// `POST /v1/admin/packages/:id/plans`
pub async fn create_package_plans(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(package_id): Path<PackageId>,
    payload: Result<Json<PackagePlansRequest>, JsonRejection>,
) -> Result<Json<PackagePlansResponse>, ApiError> {
    let Json(request) = payload?;
    let plans = into_package_plans(request, package_id)?;

    let saved = state.catalog.create_package_plans(&package_id, plans)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        package_id = %package_id,
        plans = saved.len(),
        "Admin created package plans"
    );
    Ok(Json(PackagePlansResponse {
        package_id,
        plans: saved,
    }))
}

/// `PUT /v1/admin/packages/:id/plans`
pub async fn reconcile_package_plans(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(package_id): Path<PackageId>,
    payload: Result<Json<PackagePlansRequest>, JsonRejection>,
) -> Result<Json<PackagePlansResponse>, ApiError> {
    let Json(request) = payload?;
    let plans = into_package_plans(request, package_id)?;

    let saved = state.catalog.reconcile_package_plans(&package_id, plans)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        package_id = %package_id,
        plans = saved.len(),
        "Admin reconciled package plans"
    );
    Ok(Json(PackagePlansResponse {
        package_id,
        plans: saved,
    }))
}

fn into_package_plans(
    request: PackagePlansRequest,
    package: PackageId,
) -> Result<Vec<PackagePlan>, ApiError> {
    request
        .plans
        .into_iter()
        .map(|item| item.into_package_plan(package))
        .collect()
}
