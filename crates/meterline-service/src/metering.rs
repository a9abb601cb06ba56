//! Usage metering: the start/end pair around a metered call.
//!
//! `start` is a pre-flight check. It never fails for a business reason; it
//! answers [`Access::NotAccessible`] with the reason instead. `end` prices the
//! usage and debits it together with its ledger entry and usage record in one
//! transaction. The debit is unconditional: a wallet may go negative, and the
//! shortfall is absorbed by the next purchase.
//!
//! `end` is not idempotent unless the caller supplies a `usage_key`. With a
//! key, a repeated call returns the original outcome without debiting again.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use meterline_core::{
    validate_usage_key, BillingError, CostBreakdown, FeatureEndpointId, LedgerEntry, ProfitRule,
    Result, TokenCostCalculator, TokenUsage, UsageRecord, UsageRecordId, UserId, Wallet,
    WalletAdjustment, WalletTarget,
};
use meterline_store::{Store, Txn};

/// Why a call may not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenialReason {
    /// The endpoint does not exist.
    #[error("feature endpoint not found")]
    EndpointNotFound,
    /// The endpoint is switched off.
    #[error("feature endpoint is not active")]
    EndpointInactive,
    /// The endpoint's feature is missing or switched off.
    #[error("feature is not active")]
    FeatureInactive,
    /// The wallet's package entitlement has lapsed.
    #[error("package entitlement has expired")]
    PackageExpired,
    /// The wallet's package is switched off or deleted.
    #[error("package is not active")]
    PackageInactive,
    /// The wallet's package does not include the endpoint's feature.
    #[error("feature is not included in the current package")]
    FeatureNotEntitled,
    /// The balance is below the endpoint's minimum.
    #[error("insufficient balance: {required} credits required, {available} available")]
    InsufficientBalance {
        /// The endpoint's minimum.
        required: i64,
        /// The wallet's balance.
        available: i64,
    },
}

impl DenialReason {
    /// Machine-readable reason code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EndpointNotFound => "endpoint_not_found",
            Self::EndpointInactive => "endpoint_inactive",
            Self::FeatureInactive => "feature_inactive",
            Self::PackageExpired => "package_expired",
            Self::PackageInactive => "package_inactive",
            Self::FeatureNotEntitled => "feature_not_entitled",
            Self::InsufficientBalance { .. } => "insufficient_balance",
        }
    }
}

/// Outcome of the pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The call may proceed.
    Accessible,
    /// The call must not proceed.
    NotAccessible(DenialReason),
}

/// Result of [`MeteringService::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    /// Balance at the time of the check.
    pub balance: i64,
    /// Whether the call may proceed.
    pub access: Access,
}

/// A completed call to debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndRequest {
    /// The caller.
    pub user: UserId,
    /// The endpoint that was used.
    pub feature_endpoint: FeatureEndpointId,
    /// Validated token counts.
    pub usage: TokenUsage,
    /// Optional correlation key making the debit idempotent.
    pub usage_key: Option<String>,
}

/// Result of [`MeteringService::end`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOutcome {
    /// Balance after the debit.
    pub balance: i64,
    /// Cost that was charged.
    pub cost: CostBreakdown,
    /// The usage record of the debit.
    pub usage_record: UsageRecordId,
    /// Whether this call replayed an earlier debit with the same key.
    pub replayed: bool,
}

/// One item of a usage payload as received at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum UsageItem {
    /// Model token usage.
    Tokens {
        /// Tokens sent.
        input_tokens: u64,
        /// Tokens produced.
        output_tokens: u64,
    },
}

/// Project a usage payload onto the token counts the engine prices.
///
/// # Errors
///
/// Returns [`BillingError::InvalidUsage`] for an empty payload or if the
/// counts overflow.
pub fn total_usage(items: &[UsageItem]) -> Result<TokenUsage> {
    if items.is_empty() {
        return Err(BillingError::InvalidUsage("usages must not be empty".into()));
    }
    items.iter().try_fold(TokenUsage::default(), |total, item| match *item {
        UsageItem::Tokens {
            input_tokens,
            output_tokens,
        } => total.checked_add(TokenUsage {
            input_tokens,
            output_tokens,
        }),
    })
}

/// The start/end metering flow.
pub struct MeteringService {
    store: Arc<dyn Store>,
    calculator: TokenCostCalculator,
}

impl MeteringService {
    /// Create a metering service pricing with `calculator`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, calculator: TokenCostCalculator) -> Self {
        Self { store, calculator }
    }

    /// Check whether `user` may call `feature_endpoint`.
    ///
    /// Creates the user's wallet if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub fn start(&self, user: &UserId, feature_endpoint: &FeatureEndpointId) -> Result<StartOutcome> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        let (wallet, created) = txn.get_or_create_wallet(user)?;
        let access = check_access(&mut txn, &wallet, feature_endpoint)?;
        if created {
            txn.commit()?;
        }

        if let Access::NotAccessible(reason) = &access {
            tracing::debug!(
                user_id = %user,
                feature_endpoint_id = %feature_endpoint,
                reason = reason.code(),
                balance = wallet.credits,
                "Call not accessible"
            );
        }
        Ok(StartOutcome {
            balance: wallet.credits,
            access,
        })
    }

    /// Debit a completed call.
    ///
    /// # Errors
    ///
    /// - [`BillingError::InvalidUsage`] for a malformed usage key.
    /// - [`BillingError::NotFound`] if the endpoint does not exist.
    /// - [`BillingError::Conflict`] if the usage key was used by a different
    ///   user or endpoint.
    /// - A storage error; nothing is debited in that case.
    pub fn end(&self, request: &EndRequest) -> Result<EndOutcome> {
        if let Some(key) = &request.usage_key {
            validate_usage_key(key)?;
        }

        let mut txn = Txn::begin(self.store.as_ref())?;

        if let Some(key) = &request.usage_key {
            if let Some(record) = txn.usage_record_by_key(key)? {
                return replay(request, &record);
            }
        }

        let endpoint = txn
            .feature_endpoint(&request.feature_endpoint)?
            .ok_or_else(|| BillingError::not_found("feature endpoint", request.feature_endpoint))?;
        let rules = txn.active_profit_rules()?;
        let cost = self
            .calculator
            .calculate(request.usage, ProfitRule::total_active_bps(&rules))?;

        let (wallet, _) = txn.get_or_create_wallet(&request.user)?;
        let debited = txn.adjust_wallet(
            WalletTarget::Wallet(wallet.id),
            &WalletAdjustment::delta(-cost.credits),
        )?;
        let balance = debited.wallet().credits;

        txn.append_ledger_entry(&LedgerEntry::usage_debit(
            request.user,
            wallet.id,
            cost.credits,
            balance,
            endpoint.id,
        ))?;
        let record = UsageRecord::new(
            request.user,
            wallet.id,
            endpoint.id,
            request.usage_key.clone(),
            request.usage,
            cost,
            balance,
        );
        txn.insert_usage_record(&record)?;
        txn.commit()?;

        tracing::info!(
            user_id = %request.user,
            feature_endpoint_id = %endpoint.id,
            usage_record_id = %record.id,
            credits = cost.credits,
            balance,
            "Usage debited"
        );
        Ok(EndOutcome {
            balance,
            cost,
            usage_record: record.id,
            replayed: false,
        })
    }
}

fn check_access(
    txn: &mut Txn<'_>,
    wallet: &Wallet,
    feature_endpoint: &FeatureEndpointId,
) -> Result<Access> {
    let Some(endpoint) = txn.feature_endpoint(feature_endpoint)? else {
        return Ok(Access::NotAccessible(DenialReason::EndpointNotFound));
    };
    if !endpoint.is_active {
        return Ok(Access::NotAccessible(DenialReason::EndpointInactive));
    }
    if !txn.feature(&endpoint.feature)?.is_some_and(|feature| feature.is_active) {
        return Ok(Access::NotAccessible(DenialReason::FeatureInactive));
    }

    // Wallets without a package are not restricted by entitlement.
    if let Some(package_id) = wallet.package {
        if wallet.is_expired_at(Utc::now()) {
            return Ok(Access::NotAccessible(DenialReason::PackageExpired));
        }
        let Some(package) = txn.package(&package_id)? else {
            return Ok(Access::NotAccessible(DenialReason::PackageInactive));
        };
        if package.is_deleted || !package.is_active {
            return Ok(Access::NotAccessible(DenialReason::PackageInactive));
        }
        if !package.includes(&endpoint.feature) {
            return Ok(Access::NotAccessible(DenialReason::FeatureNotEntitled));
        }
    }

    if !wallet.has_sufficient_credits(endpoint.min_credits) {
        return Ok(Access::NotAccessible(DenialReason::InsufficientBalance {
            required: endpoint.min_credits,
            available: wallet.credits,
        }));
    }
    Ok(Access::Accessible)
}

fn replay(request: &EndRequest, record: &UsageRecord) -> Result<EndOutcome> {
    if record.user != request.user || record.feature_endpoint != request.feature_endpoint {
        return Err(BillingError::Conflict(
            "usage_key was already used for a different call".into(),
        ));
    }
    tracing::warn!(
        user_id = %request.user,
        usage_record_id = %record.id,
        "Usage key already debited, replaying outcome"
    );
    Ok(EndOutcome {
        balance: record.balance_after,
        cost: record.cost,
        usage_record: record.id,
        replayed: true,
    })
}
