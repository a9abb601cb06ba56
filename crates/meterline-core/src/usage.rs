//! Usage records produced by metered calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingError, FeatureEndpointId, UsageRecordId, UserId, WalletId};

/// Longest accepted usage key.
pub const MAX_USAGE_KEY_LEN: usize = 128;

/// Validated token counts of one metered call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens sent to the endpoint.
    pub input_tokens: u64,
    /// Tokens produced by the endpoint.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Add another usage item to this one.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidUsage`] if either count overflows.
    pub fn checked_add(self, other: Self) -> crate::Result<Self> {
        let overflow = || BillingError::InvalidUsage("token count overflow".into());
        Ok(Self {
            input_tokens: self
                .input_tokens
                .checked_add(other.input_tokens)
                .ok_or_else(overflow)?,
            output_tokens: self
                .output_tokens
                .checked_add(other.output_tokens)
                .ok_or_else(overflow)?,
        })
    }
}

/// How a usage cost was derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Ratio-derived base cost.
    pub cost_credits: i64,
    /// Whole credits of margin on top of the base.
    pub profit_credits: i64,
    /// Credits added by rounding the final cost up.
    pub rounding_credits: i64,
    /// Total margin that was applied, in basis points.
    pub profit_bps: u64,
    /// Final charged credits: base + profit + rounding.
    pub credits: i64,
}

/// One metered call, written when its debit commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record ID (ULID).
    pub id: UsageRecordId,
    /// Caller.
    pub user: UserId,
    /// Debited wallet.
    pub wallet: WalletId,
    /// Endpoint that was used.
    pub feature_endpoint: FeatureEndpointId,
    /// Caller-supplied correlation key, unique when present.
    pub usage_key: Option<String>,
    /// Token counts.
    pub usage: TokenUsage,
    /// Cost charged.
    pub cost: CostBreakdown,
    /// Balance after the debit.
    pub balance_after: i64,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// When the debit committed.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a record for a debit that is about to commit.
    #[must_use]
    pub fn new(
        user: UserId,
        wallet: WalletId,
        feature_endpoint: FeatureEndpointId,
        usage_key: Option<String>,
        usage: TokenUsage,
        cost: CostBreakdown,
        balance_after: i64,
    ) -> Self {
        Self {
            id: UsageRecordId::generate(),
            user,
            wallet,
            feature_endpoint,
            usage_key,
            usage,
            cost,
            balance_after,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }
}

/// Validate a caller-supplied usage key.
///
/// # Errors
///
/// Returns [`BillingError::InvalidUsage`] for an empty, overlong or
/// non-printable key.
pub fn validate_usage_key(key: &str) -> crate::Result<()> {
    if key.is_empty() || key.len() > MAX_USAGE_KEY_LEN {
        return Err(BillingError::InvalidUsage(format!(
            "usage_key must be 1..={MAX_USAGE_KEY_LEN} bytes"
        )));
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(BillingError::InvalidUsage(
            "usage_key must be printable ASCII without spaces".into(),
        ));
    }
    Ok(())
}
