//! Coupon validation for purchase initiation.
//!
//! Validation is a dry run: it never writes. A coupon's usage count only
//! moves when the payment it was applied to settles.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use meterline_core::{Coupon, CouponQuote, CouponRejection, Currency, PackageId, PlanId, Result};
use meterline_store::{Store, Txn};

/// Outcome of a coupon validation.
pub type CouponValidation = std::result::Result<CouponQuote, CouponRejection>;

/// Validates coupons against package-plan prices.
pub struct CouponEngine {
    store: Arc<dyn Store>,
}

impl CouponEngine {
    /// Create a coupon engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Quote the discount `code` gives on the package-plan selling `plan`
    /// within `package`, in `currency`.
    ///
    /// The outer `Result` carries storage failures; the inner one the
    /// business outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub fn validate(
        &self,
        code: &str,
        package: &PackageId,
        plan: &PlanId,
        currency: &Currency,
    ) -> Result<CouponValidation> {
        let mut txn = Txn::begin(self.store.as_ref())?;

        let Some(coupon) = txn.coupon_by_code(code)? else {
            return Ok(Err(CouponRejection::NotFound));
        };
        let now = Utc::now();
        let validation = match coupon.check_redeemable(now) {
            Ok(()) => Self::price(&mut txn, &coupon, package, plan, currency, now)?,
            Err(rejection) => Err(rejection),
        };
        txn.rollback();

        log_validation(&coupon, &validation);
        Ok(validation)
    }

    fn price(
        txn: &mut Txn<'_>,
        coupon: &Coupon,
        package: &PackageId,
        plan: &PlanId,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<CouponValidation> {
        let package_plan = match txn.find_package_plan(package, plan)? {
            Some(pp) if pp.is_active => pp,
            _ => return Ok(Err(CouponRejection::PackagePlanUnavailable)),
        };
        let live_package = txn.package(package)?.is_some_and(|p| p.is_active && !p.is_deleted);
        if !live_package {
            return Ok(Err(CouponRejection::PackagePlanUnavailable));
        }
        Ok(coupon.evaluate(&package_plan, currency, now))
    }
}

fn log_validation(coupon: &Coupon, validation: &CouponValidation) {
    match validation {
        Ok(quote) => tracing::debug!(
            coupon_id = %coupon.id,
            price = quote.price,
            discount = quote.discount_amount,
            "Coupon quoted"
        ),
        Err(rejection) => tracing::debug!(
            coupon_id = %coupon.id,
            reason = rejection.reason(),
            "Coupon rejected"
        ),
    }
}
