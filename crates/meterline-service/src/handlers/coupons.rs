//! Coupon validation handler.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use meterline_core::{Currency, PackageId, PlanId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Coupon validation request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateCouponRequest {
    /// Redemption code (case-insensitive).
    pub code: String,
    /// Package being bought.
    pub package_id: String,
    /// Plan being bought.
    pub plan_id: String,
    /// Purchase currency.
    pub currency: String,
}

/// A coupon that applies.
#[derive(Debug, Serialize)]
pub struct CouponQuoteResponse {
    /// Coupon ID.
    pub coupon_id: String,
    /// Normalized code.
    pub code: String,
    /// Purchase currency.
    pub currency: Currency,
    /// Price before discount, in minor units.
    pub price: i64,
    /// Discount, in minor units.
    pub discount_amount: i64,
    /// Price to charge, in minor units.
    pub final_amount: i64,
}

/// `POST /v1/coupons/validate`
///
/// Answers 422 with a `reason` when the coupon does not apply.
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    payload: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> Result<Json<CouponQuoteResponse>, ApiError> {
    let Json(request) = payload?;
    let package: PackageId = request
        .package_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid package_id".into()))?;
    let plan: PlanId = request
        .plan_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid plan_id".into()))?;
    let currency = Currency::new(&request.currency);

    let quote = state
        .coupons
        .validate(&request.code, &package, &plan, &currency)?
        .map_err(ApiError::CouponRejected)?;

    tracing::debug!(
        user_id = %auth.user_id,
        coupon_id = %quote.coupon.id,
        final_amount = quote.final_amount,
        "Coupon validated"
    );
    Ok(Json(CouponQuoteResponse {
        coupon_id: quote.coupon.id.to_string(),
        code: quote.coupon.code,
        currency: quote.currency,
        price: quote.price,
        discount_amount: quote.discount_amount,
        final_amount: quote.final_amount,
    }))
}
