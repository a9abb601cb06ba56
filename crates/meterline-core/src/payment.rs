//! Payment records and the settlement event that credits them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    CouponId, Currency, PackageId, PackagePlanId, PackageTransactionId, PaymentTransactionId,
    PlanId, UserId, WalletId,
};

/// Gateway status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, not yet confirmed by the gateway.
    Pending,
    /// Confirmed by the gateway.
    Success,
    /// Declined or abandoned.
    Failed,
}

impl PaymentStatus {
    /// Whether the status can no longer change.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// A purchase of a package-plan, created when checkout starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Payment ID.
    pub id: PaymentTransactionId,
    /// Buyer.
    pub user: UserId,
    /// Purchased package.
    pub package: PackageId,
    /// Purchased plan.
    pub plan: PlanId,
    /// Amount charged after discount, in minor units.
    pub amount: i64,
    /// Currency of `amount`.
    pub currency: Currency,
    /// Gateway status.
    pub status: PaymentStatus,
    /// Coupon applied at checkout.
    pub coupon: Option<CouponId>,
    /// Discount granted by the coupon, in minor units.
    pub discount_amount: i64,
    /// When checkout started.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// Create a pending payment.
    #[must_use]
    pub fn pending(
        user: UserId,
        package: PackageId,
        plan: PlanId,
        amount: i64,
        currency: Currency,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentTransactionId::generate(),
            user,
            package,
            plan,
            amount,
            currency,
            status: PaymentStatus::Pending,
            coupon: None,
            discount_amount: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the coupon used at checkout.
    #[must_use]
    pub fn with_coupon(mut self, coupon: CouponId, discount_amount: i64) -> Self {
        self.coupon = Some(coupon);
        self.discount_amount = discount_amount;
        self
    }
}

/// Audit record of a package purchase, written when its payment settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTransaction {
    /// Record ID (ULID).
    pub id: PackageTransactionId,
    /// Buyer.
    pub user: UserId,
    /// Credited wallet.
    pub wallet: WalletId,
    /// Settled payment.
    pub payment_transaction: PaymentTransactionId,
    /// Purchased package.
    pub package: PackageId,
    /// Purchased plan.
    pub plan: PlanId,
    /// Package-plan whose grant was applied.
    pub package_plan: PackagePlanId,
    /// Credits granted.
    pub credits: i64,
    /// Amount paid, in minor units.
    pub amount: i64,
    /// Currency of `amount`.
    pub currency: Currency,
    /// Entitlement expiry set by the purchase.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the settlement committed.
    pub created_at: DateTime<Utc>,
}

/// Message asking the settlement consumer to credit a successful payment.
///
/// Accepts both `snake_case` and the gateway's `camelCase` field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// The payment to settle.
    #[serde(alias = "transactionId")]
    pub transaction_id: PaymentTransactionId,
    /// Buyer as reported by the gateway.
    #[serde(alias = "userId")]
    pub user_id: UserId,
    /// Amount as reported by the gateway, in minor units.
    pub amount: i64,
    /// Currency as reported by the gateway.
    pub currency: Currency,
    /// Purchased package.
    #[serde(alias = "packageId")]
    pub package_id: PackageId,
    /// Purchased plan.
    #[serde(alias = "planId")]
    pub plan_id: PlanId,
}

impl From<&PaymentTransaction> for SettlementEvent {
    fn from(payment: &PaymentTransaction) -> Self {
        Self {
            transaction_id: payment.id,
            user_id: payment.user,
            amount: payment.amount,
            currency: payment.currency.clone(),
            package_id: payment.package,
            plan_id: payment.plan,
        }
    }
}
