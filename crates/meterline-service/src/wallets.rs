//! Wallet reads and the onboarding grant.

use std::sync::Arc;

use meterline_core::{
    BillingError, LedgerEntry, PackageId, PlanId, Result, UserId, Wallet, WalletAdjustment,
    WalletGuard, WalletTarget,
};
use meterline_store::{Store, Txn};

/// Largest ledger page a caller can ask for.
pub const MAX_LEDGER_PAGE: usize = 100;

/// Result of [`WalletService::grant_initial`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialGrantOutcome {
    /// At least one half of the grant was applied by this call.
    Granted {
        /// Wallet after the grant.
        wallet: Wallet,
        /// Credits added by this call (zero if only the entitlement was new).
        credits: i64,
        /// Package the wallet was entitled to.
        package: PackageId,
        /// Plan the wallet was entitled to.
        plan: PlanId,
    },
    /// Both halves were applied earlier.
    AlreadyGranted {
        /// Unchanged wallet.
        wallet: Wallet,
    },
    /// No active initial package (or it has no initial plan).
    NoInitialPackage {
        /// Unchanged wallet.
        wallet: Wallet,
    },
}

impl InitialGrantOutcome {
    /// The wallet after the call.
    #[must_use]
    pub fn wallet(&self) -> &Wallet {
        match self {
            Self::Granted { wallet, .. }
            | Self::AlreadyGranted { wallet }
            | Self::NoInitialPackage { wallet } => wallet,
        }
    }
}

/// Wallet reads and onboarding.
pub struct WalletService {
    store: Arc<dyn Store>,
}

impl WalletService {
    /// Create a wallet service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The user's wallet, created empty on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn wallet(&self, user: &UserId) -> Result<Wallet> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        let (wallet, created) = txn.get_or_create_wallet(user)?;
        if created {
            txn.commit()?;
        }
        Ok(wallet)
    }

    /// A page of the user's visible ledger entries, newest first.
    ///
    /// `limit` is clamped to `1..=MAX_LEDGER_PAGE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn ledger(&self, user: &UserId, limit: usize, offset: usize) -> Result<Vec<LedgerEntry>> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        let entries = txn.ledger_for_user(user, limit.clamp(1, MAX_LEDGER_PAGE), offset)?;
        txn.rollback();
        Ok(entries)
    }

    /// Give a user the onboarding package and its credits, once.
    ///
    /// The entitlement and the credits are guarded separately, so a wallet
    /// that received one of them earlier still receives the other.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::DataIntegrity`] if the initial package-plan
    /// references a missing plan or the plan's duration overflows the expiry
    /// date, or an error if the store fails.
    pub fn grant_initial(&self, user: &UserId) -> Result<InitialGrantOutcome> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        let (wallet, _) = txn.get_or_create_wallet(user)?;

        let Some(package) = txn.initial_package()? else {
            tracing::info!(user_id = %user, "No initial package configured");
            txn.commit()?;
            return Ok(InitialGrantOutcome::NoInitialPackage { wallet });
        };
        let Some(package_plan) = txn.initial_package_plan(&package.id)? else {
            tracing::warn!(
                user_id = %user,
                package_id = %package.id,
                "Initial package has no initial plan"
            );
            txn.commit()?;
            return Ok(InitialGrantOutcome::NoInitialPackage { wallet });
        };
        let plan = txn.plan(&package_plan.plan)?.ok_or_else(|| {
            BillingError::DataIntegrity(format!(
                "package plan {} references missing plan {}",
                package_plan.id, package_plan.plan
            ))
        })?;

        let expires_at = plan.expiry_from(chrono::Utc::now())?;
        let target = WalletTarget::Wallet(wallet.id);
        let entitlement = WalletAdjustment {
            mark_initial_package_given: true,
            ..WalletAdjustment::default()
                .entitle(package.id, plan.id, expires_at)
                .guarded(WalletGuard::InitialPackageNotGiven)
        };
        let entitled = txn.adjust_wallet(target, &entitlement)?;

        let grant = WalletAdjustment {
            mark_initial_token_given: true,
            ..WalletAdjustment::delta(package_plan.credits)
                .guarded(WalletGuard::InitialTokenNotGiven)
        };
        let granted = txn.adjust_wallet(target, &grant)?;

        if granted.was_applied() {
            let after = granted.wallet();
            txn.append_ledger_entry(&LedgerEntry::bonus_credit(
                *user,
                after.id,
                package_plan.credits,
                after.credits,
            ))?;
        }

        let wallet = granted.wallet().clone();
        if !entitled.was_applied() && !granted.was_applied() {
            tracing::debug!(user_id = %user, "Initial grant already applied");
            return Ok(InitialGrantOutcome::AlreadyGranted { wallet });
        }
        txn.commit()?;

        let credits = if granted.was_applied() {
            package_plan.credits
        } else {
            0
        };
        tracing::info!(
            user_id = %user,
            package_id = %package.id,
            plan_id = %plan.id,
            credits,
            balance = wallet.credits,
            "Initial grant applied"
        );
        Ok(InitialGrantOutcome::Granted {
            wallet,
            credits,
            package: package.id,
            plan: plan.id,
        })
    }
}
