//! In-memory storage implementation.
//!
//! A transaction holds the store's mutex from `begin` until it is committed
//! or dropped, so transactions are trivially serializable. Writes are applied
//! in place and recorded in an undo log that is replayed backwards when a
//! transaction is dropped without committing.
//!
//! Beginning a second transaction on the same thread while one is open
//! deadlocks; engine code passes the open [`crate::Txn`] down instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, StoreError};
use crate::schema::all_column_families;
use crate::{KvTransaction, Store};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;
type Tables = HashMap<&'static str, Table>;

/// Memory-backed storage implementation.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store with every column family.
    #[must_use]
    pub fn new() -> Self {
        let tables = all_column_families()
            .into_iter()
            .map(|name| (name, Table::new()))
            .collect();
        Self {
            tables: Mutex::new(tables),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn KvTransaction + '_>> {
        // A panic inside a transaction rolls it back during unwinding before
        // the mutex is poisoned, so the data behind a poisoned lock is intact.
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Box::new(MemoryTxn {
            tables,
            undo: Vec::new(),
            committed: false,
        }))
    }
}

struct MemoryTxn<'a> {
    tables: MutexGuard<'a, Tables>,
    undo: Vec<(String, Vec<u8>, Option<Vec<u8>>)>,
    committed: bool,
}

impl MemoryTxn<'_> {
    fn table(&self, cf: &str) -> Result<&Table> {
        self.tables
            .get(cf)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {cf}")))
    }

    fn table_mut(&mut self, cf: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(cf)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {cf}")))
    }
}

impl KvTransaction for MemoryTxn<'_> {
    fn get(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table(cf)?.get(key).cloned())
    }

    fn get_for_update(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get(cf, key)
    }

    fn put(&mut self, cf: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        let previous = self.table_mut(cf)?.insert(key.to_vec(), value);
        self.undo.push((cf.to_owned(), key.to_vec(), previous));
        Ok(())
    }

    fn delete(&mut self, cf: &str, key: &[u8]) -> Result<()> {
        if let Some(previous) = self.table_mut(cf)?.remove(key) {
            self.undo.push((cf.to_owned(), key.to_vec(), Some(previous)));
        }
        Ok(())
    }

    fn scan_prefix(&mut self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .table(cf)?
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }
        let undo = std::mem::take(&mut self.undo);
        tracing::debug!(writes = undo.len(), "Rolling back in-memory transaction");
        for (cf, key, previous) in undo.into_iter().rev() {
            if let Some(table) = self.tables.get_mut(cf.as_str()) {
                match previous {
                    Some(value) => {
                        table.insert(key, value);
                    }
                    None => {
                        table.remove(&key);
                    }
                }
            }
        }
    }
}
