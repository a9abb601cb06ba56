//! Wallet operations.
//!
//! [`Txn::adjust_wallet`] is the only way balances change. It locks the wallet
//! row, checks the guard against the locked state and applies the increment
//! and field assignments in one write, so two concurrent adjustments can never
//! both start from the same balance.

use chrono::Utc;

use meterline_core::{AdjustOutcome, UserId, Wallet, WalletAdjustment, WalletId, WalletTarget};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::Txn;

impl Txn<'_> {
    /// Get a wallet by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn wallet(&mut self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        self.read(cf::WALLETS, &keys::wallet_key(wallet_id))
    }

    /// Get the live wallet of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn wallet_for_user(&mut self, user_id: &UserId) -> Result<Option<Wallet>> {
        let Some(wallet_id) = self.live_wallet_id(user_id, false)? else {
            return Ok(None);
        };
        self.wallet(&wallet_id)
    }

    /// Insert a new wallet and make it the user's live wallet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the user already has a live wallet.
    pub fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        if self.live_wallet_id(&wallet.user, true)?.is_some() {
            return Err(StoreError::duplicate("wallet", wallet.user));
        }
        self.write(cf::WALLETS, &keys::wallet_key(&wallet.id), wallet)?;
        if !wallet.is_deleted {
            self.write_raw(
                cf::WALLETS_BY_USER,
                &keys::user_key(&wallet.user),
                wallet.id.as_bytes().to_vec(),
            )?;
        }
        Ok(())
    }

    /// Get the user's live wallet, creating an empty one if there is none.
    ///
    /// Returns the wallet and whether it was created by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_or_create_wallet(&mut self, user_id: &UserId) -> Result<(Wallet, bool)> {
        // Lock the index key first so two creators for one user serialize.
        if let Some(wallet_id) = self.live_wallet_id(user_id, true)? {
            if let Some(wallet) = self.wallet(&wallet_id)? {
                return Ok((wallet, false));
            }
        }
        let wallet = Wallet::new(*user_id);
        self.insert_wallet(&wallet)?;
        tracing::debug!(user_id = %user_id, wallet_id = %wallet.id, "Created wallet");
        Ok((wallet, true))
    }

    /// Atomically apply a conditional adjustment.
    ///
    /// Returns [`AdjustOutcome::Applied`] with the new state when the guard
    /// holds, or [`AdjustOutcome::AlreadyApplied`] with the unchanged state
    /// when it does not.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the target wallet does not exist or is
    ///   deleted.
    /// - [`StoreError::Database`] if the balance would overflow.
    pub fn adjust_wallet(
        &mut self,
        target: WalletTarget,
        adjustment: &WalletAdjustment,
    ) -> Result<AdjustOutcome> {
        let wallet_id = match target {
            WalletTarget::Wallet(wallet_id) => Some(wallet_id),
            WalletTarget::User(user_id) => self.live_wallet_id(&user_id, true)?,
        };
        let not_found = || StoreError::not_found("wallet", target);
        let wallet_id = wallet_id.ok_or_else(not_found)?;

        let key = keys::wallet_key(&wallet_id);
        let mut wallet: Wallet = self
            .read_for_update(cf::WALLETS, &key)?
            .filter(|wallet: &Wallet| !wallet.is_deleted)
            .ok_or_else(not_found)?;

        if !adjustment.guard.admits(&wallet) {
            return Ok(AdjustOutcome::AlreadyApplied(wallet));
        }

        adjustment
            .apply_to(&mut wallet, Utc::now())
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.write(cf::WALLETS, &key, &wallet)?;
        Ok(AdjustOutcome::Applied(wallet))
    }

    fn live_wallet_id(&mut self, user_id: &UserId, lock: bool) -> Result<Option<WalletId>> {
        let key = keys::user_key(user_id);
        let value = if lock {
            self.read_raw_for_update(cf::WALLETS_BY_USER, &key)?
        } else {
            self.read_raw(cf::WALLETS_BY_USER, &key)?
        };
        Ok(value
            .as_deref()
            .and_then(keys::id_bytes)
            .map(WalletId::from_bytes))
    }
}

#[cfg(test)]
mod tests {
    use meterline_core::{PackageId, PlanId, WalletGuard};

    use super::*;
    use crate::MemoryStore;

    fn store_with_wallet(credits: i64) -> (MemoryStore, UserId) {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let mut txn = Txn::begin(&store).unwrap();
        txn.get_or_create_wallet(&user).unwrap();
        txn.adjust_wallet(WalletTarget::User(user), &WalletAdjustment::delta(credits))
            .unwrap();
        txn.commit().unwrap();
        (store, user)
    }

    #[test]
    fn get_or_create_is_lazy_and_stable() {
        let store = MemoryStore::new();
        let user = UserId::generate();

        let mut txn = Txn::begin(&store).unwrap();
        let (first, created) = txn.get_or_create_wallet(&user).unwrap();
        assert!(created);
        assert_eq!(first.credits, 0);
        let (second, created) = txn.get_or_create_wallet(&user).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn adjust_by_user_and_by_wallet() {
        let (store, user) = store_with_wallet(100);
        let mut txn = Txn::begin(&store).unwrap();
        let wallet = txn.wallet_for_user(&user).unwrap().unwrap();

        let outcome = txn
            .adjust_wallet(WalletTarget::Wallet(wallet.id), &WalletAdjustment::delta(-30))
            .unwrap();
        assert!(outcome.was_applied());
        assert_eq!(outcome.wallet().credits, 70);

        let outcome = txn
            .adjust_wallet(WalletTarget::User(user), &WalletAdjustment::delta(-100))
            .unwrap();
        assert_eq!(outcome.wallet().credits, -30);
    }

    #[test]
    fn failed_guard_is_distinguished_from_missing_target() {
        let (store, user) = store_with_wallet(0);
        let grant = WalletAdjustment {
            delta: 500,
            mark_initial_token_given: true,
            ..WalletAdjustment::default()
        }
        .guarded(WalletGuard::InitialTokenNotGiven);

        let mut txn = Txn::begin(&store).unwrap();
        let first = txn.adjust_wallet(WalletTarget::User(user), &grant).unwrap();
        assert!(first.was_applied());
        let second = txn.adjust_wallet(WalletTarget::User(user), &grant).unwrap();
        assert!(!second.was_applied());
        assert_eq!(second.wallet().credits, 500);

        let missing = txn.adjust_wallet(WalletTarget::User(UserId::generate()), &grant);
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn deleted_wallet_cannot_be_adjusted() {
        let store = MemoryStore::new();
        let mut wallet = Wallet::new(UserId::generate());
        wallet.is_deleted = true;

        let mut txn = Txn::begin(&store).unwrap();
        txn.insert_wallet(&wallet).unwrap();
        let result = txn.adjust_wallet(WalletTarget::Wallet(wallet.id), &WalletAdjustment::delta(1));
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(txn.wallet_for_user(&wallet.user).unwrap().is_none());
    }

    #[test]
    fn second_live_wallet_is_rejected() {
        let (store, user) = store_with_wallet(0);
        let mut txn = Txn::begin(&store).unwrap();
        let result = txn.insert_wallet(&Wallet::new(user));
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[test]
    fn entitlement_fields_are_set_with_the_increment() {
        let (store, user) = store_with_wallet(10);
        let package = PackageId::generate();
        let plan = PlanId::generate();

        let mut txn = Txn::begin(&store).unwrap();
        txn.adjust_wallet(
            WalletTarget::User(user),
            &WalletAdjustment::delta(90).entitle(package, plan, None),
        )
        .unwrap();
        txn.commit().unwrap();

        let mut txn = Txn::begin(&store).unwrap();
        let wallet = txn.wallet_for_user(&user).unwrap().unwrap();
        assert_eq!(wallet.credits, 100);
        assert_eq!(wallet.package, Some(package));
        assert_eq!(wallet.plan, Some(plan));
    }
}
