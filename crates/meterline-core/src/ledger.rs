//! Ledger entry types for meterline.
//!
//! Every balance mutation is paired with exactly one immutable ledger entry.
//! The source of an entry is a tagged union so that an increase always names
//! why credits were added and a decrease always names the feature endpoint
//! that consumed them; the two can never be populated together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FeatureEndpointId, LedgerEntryId, PaymentTransactionId, UserId, WalletId};

/// An immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (ULID, time-ordered).
    pub id: LedgerEntryId,

    /// The user whose balance changed.
    pub user: UserId,

    /// The wallet that changed.
    pub wallet: WalletId,

    /// Magnitude of the change. Always non-negative; the direction comes from
    /// [`LedgerEntry::entry_type`].
    pub amount: i64,

    /// Why the balance changed.
    pub source: LedgerSource,

    /// Balance after this entry was applied.
    pub balance_after: i64,

    /// Administrative hiding. Entries are never updated otherwise.
    pub is_deleted: bool,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(
        user: UserId,
        wallet: WalletId,
        amount: i64,
        balance_after: i64,
        source: LedgerSource,
    ) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            user,
            wallet,
            amount: amount.abs(),
            source,
            balance_after,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }

    /// Credits bought through a settled payment.
    #[must_use]
    pub fn payment_credit(
        user: UserId,
        wallet: WalletId,
        amount: i64,
        balance_after: i64,
        payment_transaction: PaymentTransactionId,
    ) -> Self {
        Self::new(
            user,
            wallet,
            amount,
            balance_after,
            LedgerSource::Increase(IncreaseSource::Payment {
                payment_transaction,
            }),
        )
    }

    /// Credits granted without payment (onboarding, promotions).
    #[must_use]
    pub fn bonus_credit(user: UserId, wallet: WalletId, amount: i64, balance_after: i64) -> Self {
        Self::new(
            user,
            wallet,
            amount,
            balance_after,
            LedgerSource::Increase(IncreaseSource::Bonus),
        )
    }

    /// Credits consumed by a feature endpoint.
    #[must_use]
    pub fn usage_debit(
        user: UserId,
        wallet: WalletId,
        amount: i64,
        balance_after: i64,
        feature_endpoint: FeatureEndpointId,
    ) -> Self {
        Self::new(
            user,
            wallet,
            amount,
            balance_after,
            LedgerSource::Decrease { feature_endpoint },
        )
    }

    /// Direction of the entry.
    #[must_use]
    pub const fn entry_type(&self) -> EntryType {
        match self.source {
            LedgerSource::Increase(_) => EntryType::Increase,
            LedgerSource::Decrease { .. } => EntryType::Decrease,
        }
    }

    /// Signed effect on the balance.
    #[must_use]
    pub const fn signed_amount(&self) -> i64 {
        match self.entry_type() {
            EntryType::Increase => self.amount,
            EntryType::Decrease => -self.amount,
        }
    }

    /// The payment this entry settles, if it is a payment credit.
    #[must_use]
    pub const fn payment_transaction(&self) -> Option<PaymentTransactionId> {
        match self.source {
            LedgerSource::Increase(IncreaseSource::Payment {
                payment_transaction,
            }) => Some(payment_transaction),
            _ => None,
        }
    }
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Credits were added.
    Increase,
    /// Credits were removed.
    Decrease,
}

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerSource {
    /// Credits were added.
    Increase(IncreaseSource),
    /// Credits were consumed by a feature endpoint.
    Decrease {
        /// The consuming endpoint.
        feature_endpoint: FeatureEndpointId,
    },
}

/// Why credits were added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "increase_source", rename_all = "snake_case")]
pub enum IncreaseSource {
    /// A settled payment.
    Payment {
        /// Back-reference to the settled payment.
        payment_transaction: PaymentTransactionId,
    },
    /// A grant that was not paid for.
    Bonus,
}
