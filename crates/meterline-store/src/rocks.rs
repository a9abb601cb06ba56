//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait on
//! top of a pessimistic `TransactionDB`. Locked reads use `get_for_update`, so
//! concurrent read-modify-write cycles on the same key are serialized by the
//! database; lock waits that exceed the timeout surface as
//! [`StoreError::Conflict`].

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    Options, Transaction, TransactionDB, TransactionDBOptions,
};

use crate::error::{Result, StoreError};
use crate::schema::all_column_families;
use crate::{KvTransaction, Store};

/// How long a transaction waits for a row lock before giving up.
const LOCK_TIMEOUT_MS: i64 = 2_000;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<TransactionDB<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::info!("Opened RocksDB store");
        Ok(Self { db: Arc::new(db) })
    }
}

impl Store for RocksStore {
    fn begin(&self) -> Result<Box<dyn KvTransaction + '_>> {
        Ok(Box::new(RocksTxn {
            db: &self.db,
            txn: self.db.transaction(),
        }))
    }
}

struct RocksTxn<'a> {
    db: &'a TransactionDB<MultiThreaded>,
    txn: Transaction<'a, TransactionDB<MultiThreaded>>,
}

impl RocksTxn<'_> {
    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }
}

/// Map a `RocksDB` error, separating lock contention from real failures.
fn map_err(e: &rocksdb::Error) -> StoreError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StoreError::Conflict(e.to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}

impl KvTransaction for RocksTxn<'_> {
    fn get(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.cf(cf)?;
        self.txn.get_cf(&handle, key).map_err(|e| map_err(&e))
    }

    fn get_for_update(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.cf(cf)?;
        self.txn
            .get_for_update_cf(&handle, key, true)
            .map_err(|e| map_err(&e))
    }

    fn put(&mut self, cf: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        let handle = self.cf(cf)?;
        self.txn
            .put_cf(&handle, key, value)
            .map_err(|e| map_err(&e))
    }

    fn delete(&mut self, cf: &str, key: &[u8]) -> Result<()> {
        let handle = self.cf(cf)?;
        self.txn.delete_cf(&handle, key).map_err(|e| map_err(&e))
    }

    fn scan_prefix(&mut self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.cf(cf)?;
        let iter = self
            .txn
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| map_err(&e))?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().map_err(|e| map_err(&e))
    }
}
