//! Wallet types for meterline.
//!
//! A wallet holds a user's spendable credit balance together with the package
//! and plan the user is currently entitled to. Balance changes are described as
//! [`WalletAdjustment`]s and applied by the store as a single conditional
//! update; application code never computes a new balance from a value it read
//! earlier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PackageId, PlanId, UserId, WalletId};

/// A user's credit wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID.
    pub id: WalletId,

    /// The owner.
    pub user: UserId,

    /// Current credit balance.
    ///
    /// May be negative: a debit is never refused once usage has happened, and
    /// the shortfall is absorbed by the next purchase.
    pub credits: i64,

    /// Package the wallet is entitled to, if any.
    pub package: Option<PackageId>,

    /// Plan the wallet is entitled to, if any.
    pub plan: Option<PlanId>,

    /// When the package entitlement lapses. `None` means it does not expire.
    pub expires_at: Option<DateTime<Utc>>,

    /// Whether the onboarding credit grant has been applied.
    pub initial_token_given: bool,

    /// Whether the onboarding package entitlement has been applied.
    pub initial_package_given: bool,

    /// Soft-delete marker.
    pub is_deleted: bool,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet for `user`.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::generate(),
            user,
            credits: 0,
            package: None,
            plan: None,
            expires_at: None,
            initial_token_given: false,
            initial_package_given: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the wallet can cover `amount` credits.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credits >= amount
    }

    /// Whether the package entitlement has lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Which wallet an adjustment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTarget {
    /// The live wallet of a user.
    User(UserId),
    /// A wallet by ID.
    Wallet(WalletId),
}

impl std::fmt::Display for WalletTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user) => write!(f, "user {user}"),
            Self::Wallet(wallet) => write!(f, "wallet {wallet}"),
        }
    }
}

/// Idempotency guard evaluated together with the target match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalletGuard {
    /// Always applies.
    #[default]
    Always,
    /// Applies only while the onboarding credit grant is outstanding.
    InitialTokenNotGiven,
    /// Applies only while the onboarding package entitlement is outstanding.
    InitialPackageNotGiven,
}

impl WalletGuard {
    /// Whether the guard admits an adjustment of `wallet`.
    #[must_use]
    pub const fn admits(self, wallet: &Wallet) -> bool {
        match self {
            Self::Always => true,
            Self::InitialTokenNotGiven => !wallet.initial_token_given,
            Self::InitialPackageNotGiven => !wallet.initial_package_given,
        }
    }
}

/// An increment plus a set of field assignments, applied together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletAdjustment {
    /// Signed credit delta.
    pub delta: i64,
    /// New package reference.
    pub package: Option<PackageId>,
    /// New plan reference.
    pub plan: Option<PlanId>,
    /// New expiry; `Some(None)` clears it.
    pub expires_at: Option<Option<DateTime<Utc>>>,
    /// Marks the onboarding credit grant as applied.
    pub mark_initial_token_given: bool,
    /// Marks the onboarding package entitlement as applied.
    pub mark_initial_package_given: bool,
    /// Guard that must hold for the adjustment to apply.
    pub guard: WalletGuard,
}

impl WalletAdjustment {
    /// A plain credit/debit.
    #[must_use]
    pub fn delta(delta: i64) -> Self {
        Self {
            delta,
            ..Self::default()
        }
    }

    /// Set the guard.
    #[must_use]
    pub fn guarded(mut self, guard: WalletGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Set the package and plan entitlement with its expiry.
    #[must_use]
    pub fn entitle(
        mut self,
        package: PackageId,
        plan: PlanId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.package = Some(package);
        self.plan = Some(plan);
        self.expires_at = Some(expires_at);
        self
    }

    /// Apply the increment and assignments to `wallet`.
    ///
    /// Callers (the store backends) are responsible for doing this under the
    /// same lock that read `wallet`, after checking the guard.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BillingError::InvalidAmount`] if the balance would overflow.
    pub fn apply_to(&self, wallet: &mut Wallet, now: DateTime<Utc>) -> crate::Result<()> {
        wallet.credits = wallet.credits.checked_add(self.delta).ok_or_else(|| {
            crate::BillingError::InvalidAmount(format!(
                "balance overflow applying {} to {}",
                self.delta, wallet.credits
            ))
        })?;
        if let Some(package) = self.package {
            wallet.package = Some(package);
        }
        if let Some(plan) = self.plan {
            wallet.plan = Some(plan);
        }
        if let Some(expires_at) = self.expires_at {
            wallet.expires_at = expires_at;
        }
        if self.mark_initial_token_given {
            wallet.initial_token_given = true;
        }
        if self.mark_initial_package_given {
            wallet.initial_package_given = true;
        }
        wallet.updated_at = now;
        Ok(())
    }
}

/// Result of a conditional wallet adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// The guard held and the adjustment was applied. Carries the new state.
    Applied(Wallet),
    /// The target exists but the guard failed: the adjustment was already
    /// applied earlier. Carries the unchanged state.
    AlreadyApplied(Wallet),
}

impl AdjustOutcome {
    /// The wallet state after the call.
    #[must_use]
    pub fn wallet(&self) -> &Wallet {
        match self {
            Self::Applied(wallet) | Self::AlreadyApplied(wallet) => wallet,
        }
    }

    /// Whether this call changed the wallet.
    #[must_use]
    pub const fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}
