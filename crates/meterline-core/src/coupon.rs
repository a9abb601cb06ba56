//! Coupons and the pure discount evaluation.
//!
//! Evaluation is a dry run: it never touches `usage_count`. Redemption is
//! recorded only when the payment that used the coupon settles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CouponId, Currency, PackageId, PackagePlan};

/// How a coupon reduces the price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discount {
    /// A whole-percent reduction, rounded down.
    Percentage {
        /// Percent off, `0..=100`.
        percent: u8,
    },
    /// A fixed reduction per currency, in minor units.
    Fixed {
        /// Amount off per currency.
        amounts: BTreeMap<Currency, i64>,
    },
}

/// A discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Coupon ID.
    pub id: CouponId,
    /// Redemption code, stored upper-case.
    pub code: String,
    /// Discount rule.
    pub discount: Discount,
    /// Minimum price per currency for the coupon to apply.
    #[serde(default)]
    pub min_purchase_amount: BTreeMap<Currency, i64>,
    /// Cap on percentage discounts per currency. Zero means no cap.
    #[serde(default)]
    pub max_discount_amount: BTreeMap<Currency, i64>,
    /// Start of the validity window.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of the validity window (inclusive).
    pub valid_until: Option<DateTime<Utc>>,
    /// Maximum redemptions. Zero means unlimited.
    pub usage_limit: u32,
    /// Redemptions so far.
    pub usage_count: u32,
    /// Packages the coupon applies to. Empty means all.
    #[serde(default)]
    pub packages: Vec<PackageId>,
    /// Whether the coupon can be redeemed.
    pub is_active: bool,
    /// When the coupon was created.
    pub created_at: DateTime<Utc>,
    /// When the coupon was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Create an active, unlimited coupon valid from now on.
    #[must_use]
    pub fn new(code: &str, discount: Discount) -> Self {
        let now = Utc::now();
        Self {
            id: CouponId::generate(),
            code: normalize_code(code),
            discount,
            min_purchase_amount: BTreeMap::new(),
            max_discount_amount: BTreeMap::new(),
            valid_from: None,
            valid_until: None,
            usage_limit: 0,
            usage_count: 0,
            packages: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether every allowed redemption has been used.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.usage_limit != 0 && self.usage_count >= self.usage_limit
    }

    /// Checks that depend only on the coupon: active flag, validity window,
    /// usage limit.
    ///
    /// # Errors
    ///
    /// Returns the [`CouponRejection`] of the first failed check.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(CouponRejection::NotYetValid);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(CouponRejection::Expired);
        }
        if self.is_exhausted() {
            return Err(CouponRejection::UsageLimitReached {
                limit: self.usage_limit,
            });
        }
        Ok(())
    }

    /// Validate the coupon against a purchase and compute the discount.
    ///
    /// Checks run in order: active flag, validity window, usage limit, package
    /// allow-list, price availability, minimum purchase. The first failing
    /// check is reported.
    ///
    /// # Errors
    ///
    /// Returns the [`CouponRejection`] of the first failed check.
    pub fn evaluate(
        &self,
        package_plan: &PackagePlan,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, CouponRejection> {
        self.check_redeemable(now)?;
        if !self.packages.is_empty() && !self.packages.contains(&package_plan.package) {
            return Err(CouponRejection::NotApplicableToPackage);
        }

        let price = package_plan
            .price_in(currency)
            .ok_or_else(|| CouponRejection::PriceUnavailable {
                currency: currency.clone(),
            })?;
        if let Some(&minimum) = self.min_purchase_amount.get(currency) {
            if price < minimum {
                return Err(CouponRejection::BelowMinimumPurchase { minimum, price });
            }
        }

        let discount = match &self.discount {
            Discount::Percentage { percent } => {
                let raw = i128::from(price) * i128::from((*percent).min(100)) / 100;
                let raw = i64::try_from(raw).unwrap_or(i64::MAX);
                match self.max_discount_amount.get(currency) {
                    Some(&cap) if cap > 0 => raw.min(cap),
                    _ => raw,
                }
            }
            Discount::Fixed { amounts } => *amounts.get(currency).ok_or_else(|| {
                CouponRejection::UnsupportedCurrency {
                    currency: currency.clone(),
                }
            })?,
        };
        let discount_amount = discount.clamp(0, price.max(0));

        Ok(CouponQuote {
            coupon: self.clone(),
            currency: currency.clone(),
            price,
            discount_amount,
            final_amount: price - discount_amount,
        })
    }
}

/// Normalize a redemption code for storage and lookup.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// A successful coupon evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponQuote {
    /// The evaluated coupon.
    pub coupon: Coupon,
    /// Purchase currency.
    pub currency: Currency,
    /// Undiscounted price.
    pub price: i64,
    /// Discount, never more than `price`.
    pub discount_amount: i64,
    /// `price - discount_amount`.
    pub final_amount: i64,
}

/// Why a coupon does not apply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    /// No coupon has the code.
    #[error("coupon not found")]
    NotFound,
    /// The coupon is disabled.
    #[error("coupon is not active")]
    Inactive,
    /// The validity window has not started.
    #[error("coupon is not valid yet")]
    NotYetValid,
    /// The validity window has ended.
    #[error("coupon has expired")]
    Expired,
    /// All redemptions are used.
    #[error("coupon usage limit of {limit} reached")]
    UsageLimitReached {
        /// The configured limit.
        limit: u32,
    },
    /// The purchased package-plan does not exist or is not offered.
    #[error("package plan is not available")]
    PackagePlanUnavailable,
    /// The package is not in the coupon's allow-list.
    #[error("coupon does not apply to this package")]
    NotApplicableToPackage,
    /// The price is below the coupon's minimum.
    #[error("purchase of {price} is below the minimum of {minimum}")]
    BelowMinimumPurchase {
        /// Required minimum.
        minimum: i64,
        /// Actual price.
        price: i64,
    },
    /// The package-plan is not sold in the currency.
    #[error("package plan has no price in {currency}")]
    PriceUnavailable {
        /// Requested currency.
        currency: Currency,
    },
    /// A fixed coupon has no amount for the currency.
    #[error("coupon has no discount in {currency}")]
    UnsupportedCurrency {
        /// Requested currency.
        currency: Currency,
    },
}

impl CouponRejection {
    /// Machine-readable reason code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::UsageLimitReached { .. } => "usage_limit_reached",
            Self::PackagePlanUnavailable => "package_plan_unavailable",
            Self::NotApplicableToPackage => "not_applicable_to_package",
            Self::BelowMinimumPurchase { .. } => "below_minimum_purchase",
            Self::PriceUnavailable { .. } => "price_unavailable",
            Self::UnsupportedCurrency { .. } => "unsupported_currency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlanId;
    use chrono::Duration;

    fn usd() -> Currency {
        Currency::new("USD")
    }

    fn plan_priced(amount: i64) -> PackagePlan {
        PackagePlan::new(PackageId::generate(), PlanId::generate(), 1000).with_price("USD", amount)
    }

    fn percent(percent: u8) -> Coupon {
        Coupon::new("save", Discount::Percentage { percent })
    }

    #[test]
    fn percentage_discount_rounds_down() {
        let quote = percent(15).evaluate(&plan_priced(999), &usd(), Utc::now()).unwrap();
        assert_eq!(quote.discount_amount, 149);
        assert_eq!(quote.final_amount, 850);
    }

    #[test]
    fn percentage_discount_respects_cap() {
        let mut coupon = percent(50);
        coupon.max_discount_amount.insert(usd(), 200);
        let quote = coupon.evaluate(&plan_priced(1000), &usd(), Utc::now()).unwrap();
        assert_eq!(quote.discount_amount, 200);

        coupon.max_discount_amount.insert(usd(), 0);
        let quote = coupon.evaluate(&plan_priced(1000), &usd(), Utc::now()).unwrap();
        assert_eq!(quote.discount_amount, 500);
    }

    #[test]
    fn fixed_discount_is_clamped_to_price() {
        let mut amounts = BTreeMap::new();
        amounts.insert(usd(), 5000);
        let coupon = Coupon::new("big", Discount::Fixed { amounts });
        let quote = coupon.evaluate(&plan_priced(1200), &usd(), Utc::now()).unwrap();
        assert_eq!(quote.discount_amount, 1200);
        assert_eq!(quote.final_amount, 0);
    }

    #[test]
    fn fixed_discount_requires_currency() {
        let mut amounts = BTreeMap::new();
        amounts.insert(Currency::new("EUR"), 100);
        let coupon = Coupon::new("eur-only", Discount::Fixed { amounts });
        let plan = plan_priced(1000);
        assert!(matches!(
            coupon.evaluate(&plan, &usd(), Utc::now()),
            Err(CouponRejection::UnsupportedCurrency { .. })
        ));
    }

    #[test]
    fn exhausted_coupon_is_rejected() {
        let mut coupon = percent(10);
        coupon.usage_limit = 10;
        coupon.usage_count = 10;
        let result = coupon.evaluate(&plan_priced(1000), &usd(), Utc::now());
        assert_eq!(result, Err(CouponRejection::UsageLimitReached { limit: 10 }));
    }

    #[test]
    fn zero_usage_limit_is_unlimited() {
        let mut coupon = percent(10);
        coupon.usage_count = 1_000_000;
        assert!(coupon.evaluate(&plan_priced(1000), &usd(), Utc::now()).is_ok());
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let mut coupon = percent(10);
        coupon.valid_from = Some(now + Duration::days(1));
        assert_eq!(
            coupon.evaluate(&plan_priced(1000), &usd(), now),
            Err(CouponRejection::NotYetValid)
        );

        coupon.valid_from = Some(now - Duration::days(2));
        coupon.valid_until = Some(now - Duration::days(1));
        assert_eq!(
            coupon.evaluate(&plan_priced(1000), &usd(), now),
            Err(CouponRejection::Expired)
        );

        coupon.valid_until = Some(now);
        assert!(coupon.evaluate(&plan_priced(1000), &usd(), now).is_ok());
    }

    #[test]
    fn package_allow_list() {
        let plan = plan_priced(1000);
        let mut coupon = percent(10);
        coupon.packages = vec![PackageId::generate()];
        assert_eq!(
            coupon.evaluate(&plan, &usd(), Utc::now()),
            Err(CouponRejection::NotApplicableToPackage)
        );
        coupon.packages.push(plan.package);
        assert!(coupon.evaluate(&plan, &usd(), Utc::now()).is_ok());
    }

    #[test]
    fn minimum_purchase() {
        let mut coupon = percent(10);
        coupon.min_purchase_amount.insert(usd(), 2000);
        assert_eq!(
            coupon.evaluate(&plan_priced(1999), &usd(), Utc::now()),
            Err(CouponRejection::BelowMinimumPurchase {
                minimum: 2000,
                price: 1999
            })
        );
        assert!(coupon.evaluate(&plan_priced(2000), &usd(), Utc::now()).is_ok());
    }

    #[test]
    fn inactive_coupon_and_missing_price() {
        let mut coupon = percent(10);
        assert!(matches!(
            coupon.evaluate(&plan_priced(1000), &Currency::new("GBP"), Utc::now()),
            Err(CouponRejection::PriceUnavailable { .. })
        ));
        coupon.is_active = false;
        assert_eq!(
            coupon.evaluate(&plan_priced(1000), &usd(), Utc::now()),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn discount_never_exceeds_price_or_cap() {
        let now = Utc::now();
        for price in [0, 1, 7, 99, 100, 1001, 123_456] {
            for pct in [0u8, 1, 33, 50, 99, 100, 250] {
                for cap in [0, 1, 50, 10_000] {
                    let mut coupon = percent(pct);
                    coupon.max_discount_amount.insert(usd(), cap);
                    let quote = coupon.evaluate(&plan_priced(price), &usd(), now).unwrap();
                    assert!(quote.discount_amount <= price);
                    assert!(quote.discount_amount >= 0);
                    if cap > 0 {
                        assert!(quote.discount_amount <= cap);
                    }
                    assert_eq!(quote.final_amount, price - quote.discount_amount);
                }
            }
        }
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(percent(10).code, "SAVE");
        assert_eq!(normalize_code("  spring-24 "), "SPRING-24");
    }

    #[test]
    fn rejection_reasons() {
        assert_eq!(CouponRejection::Expired.reason(), "expired");
        assert_eq!(
            CouponRejection::UsageLimitReached { limit: 1 }.reason(),
            "usage_limit_reached"
        );
    }
}
