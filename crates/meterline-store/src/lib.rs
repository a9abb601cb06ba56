//! Transactional storage layer for meterline.
//!
//! The engine needs two things from storage: atomic conditional updates of a
//! single record and multi-record transactions. Both are provided through a
//! [`Store`] that hands out serializable key/value transactions, wrapped in a
//! typed [`Txn`] that speaks in wallets, ledger entries and catalog records.
//!
//! # Architecture
//!
//! Records are CBOR-encoded and grouped in column families (see [`schema`]):
//!
//! - `wallets` + `wallets_by_user`: one live wallet per user
//! - `ledger` + `ledger_by_user` + `ledger_by_payment`: append-only audit trail
//!   with the settlement idempotency index
//! - `usage_records` + `usage_by_key`: metered calls and their correlation keys
//! - catalog families: features, endpoints, packages, plans, package-plans,
//!   profit rules, coupons
//! - `payment_transactions`, `package_transactions`
//!
//! Two backends implement [`Store`]:
//!
//! - [`MemoryStore`]: a single-writer in-memory store, used by tests and by
//!   the service when no data directory is configured
//! - `RocksStore`: a pessimistic `RocksDB` `TransactionDB` (feature
//!   `rocksdb-backend`)
//!
//! # Example
//!
//! ```
//! use meterline_store::{MemoryStore, Txn};
//! use meterline_core::{UserId, WalletAdjustment, WalletTarget};
//!
//! let store = MemoryStore::new();
//! let user = UserId::generate();
//!
//! let mut txn = Txn::begin(&store).unwrap();
//! txn.get_or_create_wallet(&user).unwrap();
//! let outcome = txn
//!     .adjust_wallet(WalletTarget::User(user), &WalletAdjustment::delta(500))
//!     .unwrap();
//! txn.commit().unwrap();
//!
//! assert_eq!(outcome.wallet().credits, 500);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod coupons;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod memory;
pub mod payments;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;
pub mod txn;
pub mod usage;
pub mod wallets;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;
pub use txn::Txn;

/// One serializable key/value transaction.
///
/// Writes become visible to other transactions only on [`commit`]. Dropping
/// a transaction without committing rolls it back.
///
/// [`commit`]: KvTransaction::commit
pub trait KvTransaction {
    /// Read a value without taking a lock on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Read a value and lock its key until the transaction ends.
    ///
    /// The lock is taken even when the key is absent, so two transactions
    /// that both check "does X exist?" before creating X are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the lock cannot be acquired.
    fn get_for_update(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put(&mut self, cf: &str, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Delete a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete(&mut self, cf: &str, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order, including
    /// this transaction's own uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_prefix(&mut self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Make every write of the transaction durable and visible atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// The storage trait: a source of transactions.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    fn begin(&self) -> Result<Box<dyn KvTransaction + '_>>;
}
