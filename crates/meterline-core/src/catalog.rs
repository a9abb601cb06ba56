//! Catalog reference data: features, packages, plans and profit rules.
//!
//! A [`Package`] groups features and offers plans through [`PackagePlan`]
//! join records, which carry the per-currency price, the credit grant and the
//! `is_initial` flag used for onboarding.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    BillingError, FeatureEndpointId, FeatureId, PackageId, PackagePlanId, PlanId, ProfitRuleId,
    Result,
};

/// An ISO-4217 style currency code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a currency code.
    #[must_use]
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_ascii_uppercase())
    }

    /// The upper-case code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Currency {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A product capability that packages can include.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature ID.
    pub id: FeatureId,
    /// Display name.
    pub name: String,
    /// Whether the feature is offered.
    pub is_active: bool,
}

/// A metered endpoint of a feature (e.g. one model behind an AI feature).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureEndpoint {
    /// Endpoint ID.
    pub id: FeatureEndpointId,
    /// Owning feature.
    pub feature: FeatureId,
    /// Display name.
    pub name: String,
    /// Minimum balance a wallet must hold to start a call.
    pub min_credits: i64,
    /// Whether the endpoint accepts calls.
    pub is_active: bool,
}

/// A sellable bundle of features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package ID.
    pub id: PackageId,
    /// Display name.
    pub name: String,
    /// Features the package entitles its holders to.
    pub features: Vec<FeatureId>,
    /// Whether this is the default onboarding package. At most one package
    /// has this set.
    pub is_initial: bool,
    /// Whether the package is offered.
    pub is_active: bool,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// When the package was created.
    pub created_at: DateTime<Utc>,
    /// When the package was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Package {
    /// Create an active, non-initial package.
    #[must_use]
    pub fn new(name: impl Into<String>, features: Vec<FeatureId>) -> Self {
        let now = Utc::now();
        Self {
            id: PackageId::generate(),
            name: name.into(),
            features,
            is_initial: false,
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the package entitles its holders to `feature`.
    #[must_use]
    pub fn includes(&self, feature: &FeatureId) -> bool {
        self.features.contains(feature)
    }
}

/// A plan: the entitlement duration that package-plans attach a price to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan ID.
    pub id: PlanId,
    /// Display name.
    pub name: String,
    /// Entitlement length in days. `None` means the entitlement never lapses.
    pub duration_days: Option<u32>,
    /// Whether the plan is offered.
    pub is_active: bool,
}

impl Plan {
    /// Expiry of an entitlement that starts at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::DataIntegrity`] if the duration runs past the
    /// representable date range.
    pub fn expiry_from(&self, start: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(days) = self.duration_days else {
            return Ok(None);
        };
        Duration::try_days(i64::from(days))
            .and_then(|duration| start.checked_add_signed(duration))
            .map(Some)
            .ok_or_else(|| {
                BillingError::DataIntegrity(format!(
                    "plan {} duration of {days} days overflows the expiry date",
                    self.id
                ))
            })
    }
}

/// A plan offered within a package, with its price and credit grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePlan {
    /// Package-plan ID.
    pub id: PackagePlanId,
    /// Owning package.
    pub package: PackageId,
    /// Offered plan.
    pub plan: PlanId,
    /// Price per currency, in minor units.
    pub prices: BTreeMap<Currency, i64>,
    /// Credits granted on purchase.
    pub credits: i64,
    /// Whether this is the package's onboarding plan. Exactly one package-plan
    /// per non-empty package has this set.
    pub is_initial: bool,
    /// Whether the package-plan is offered.
    pub is_active: bool,
    /// Order within the package; the lowest position is "first".
    pub position: u32,
    /// When the package-plan was created.
    pub created_at: DateTime<Utc>,
    /// When the package-plan was last updated.
    pub updated_at: DateTime<Utc>,
}

impl PackagePlan {
    /// Create an active, non-initial package-plan at position 0.
    #[must_use]
    pub fn new(package: PackageId, plan: PlanId, credits: i64) -> Self {
        let now = Utc::now();
        Self {
            id: PackagePlanId::generate(),
            package,
            plan,
            prices: BTreeMap::new(),
            credits,
            is_initial: false,
            is_active: true,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a price in `currency`.
    #[must_use]
    pub fn with_price(mut self, currency: &str, amount: i64) -> Self {
        self.prices.insert(Currency::new(currency), amount);
        self
    }

    /// Price in `currency`, if offered in it.
    #[must_use]
    pub fn price_in(&self, currency: &Currency) -> Option<i64> {
        self.prices.get(currency).copied()
    }
}

/// A stacked profit margin applied on top of the base usage cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitRule {
    /// Rule ID.
    pub id: ProfitRuleId,
    /// Display name.
    pub name: String,
    /// Margin in basis points (`2000` = 20%).
    pub percentage_bps: u32,
    /// Whether the rule currently applies.
    pub is_active: bool,
}

impl ProfitRule {
    /// Sum of the margins of all active rules, in basis points.
    #[must_use]
    pub fn total_active_bps<'a>(rules: impl IntoIterator<Item = &'a ProfitRule>) -> u64 {
        rules
            .into_iter()
            .filter(|rule| rule.is_active)
            .map(|rule| u64::from(rule.percentage_bps))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_normalized() {
        assert_eq!(Currency::new(" usd "), Currency::new("USD"));
        let parsed: Currency = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(parsed.as_str(), "EUR");
    }

    #[test]
    fn plan_expiry() {
        let start = Utc::now();
        let monthly = Plan {
            id: PlanId::generate(),
            name: "monthly".into(),
            duration_days: Some(30),
            is_active: true,
        };
        assert_eq!(
            monthly.expiry_from(start).unwrap(),
            Some(start + Duration::days(30))
        );

        let lifetime = Plan {
            duration_days: None,
            ..monthly.clone()
        };
        assert_eq!(lifetime.expiry_from(start).unwrap(), None);

        let endless = Plan {
            duration_days: Some(u32::MAX),
            ..monthly
        };
        assert!(matches!(
            endless.expiry_from(start),
            Err(BillingError::DataIntegrity(_))
        ));
    }

    #[test]
    fn package_plan_prices_by_currency() {
        let pp = PackagePlan::new(PackageId::generate(), PlanId::generate(), 1000)
            .with_price("usd", 999)
            .with_price("EUR", 899);
        assert_eq!(pp.price_in(&Currency::new("USD")), Some(999));
        assert_eq!(pp.price_in(&Currency::new("eur")), Some(899));
        assert_eq!(pp.price_in(&Currency::new("GBP")), None);
    }

    #[test]
    fn only_active_profit_rules_are_summed() {
        let rule = |bps, is_active| ProfitRule {
            id: ProfitRuleId::generate(),
            name: "margin".into(),
            percentage_bps: bps,
            is_active,
        };
        let rules = vec![rule(1500, true), rule(500, true), rule(9000, false)];
        assert_eq!(ProfitRule::total_active_bps(&rules), 2000);
    }

    #[test]
    fn package_feature_membership() {
        let feature = FeatureId::generate();
        let package = Package::new("starter", vec![feature]);
        assert!(package.includes(&feature));
        assert!(!package.includes(&FeatureId::generate()));
    }
}
