//! Typed transactions.
//!
//! [`Txn`] wraps a backend [`KvTransaction`] and provides the record-level
//! operations the engine composes. The operations themselves live next to the
//! records they manage (`wallets`, `ledger`, `usage`, `catalog`, `payments`,
//! `coupons`); this module holds the encoding plumbing they share.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::schema::cf;
use crate::{KvTransaction, Store};

/// A typed storage transaction.
///
/// Dropping a `Txn` without calling [`Txn::commit`] rolls it back.
pub struct Txn<'a> {
    kv: Box<dyn KvTransaction + 'a>,
}

impl<'a> Txn<'a> {
    /// Start a transaction on `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    pub fn begin<S: Store + ?Sized>(store: &'a S) -> Result<Self> {
        Ok(Self { kv: store.begin()? })
    }

    /// Commit every write made through this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    pub fn commit(self) -> Result<()> {
        self.kv.commit()
    }

    /// Discard every write made through this transaction.
    pub fn rollback(self) {}

    /// Read and decode a record.
    pub(crate) fn read<T: DeserializeOwned>(&mut self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        self.kv
            .get(cf, key)?
            .map(|data| deserialize(&data))
            .transpose()
    }

    /// Read and decode a record, locking its key.
    pub(crate) fn read_for_update<T: DeserializeOwned>(
        &mut self,
        cf: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        self.kv
            .get_for_update(cf, key)?
            .map(|data| deserialize(&data))
            .transpose()
    }

    /// Encode and write a record.
    pub(crate) fn write<T: Serialize>(&mut self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let value = serialize(value)?;
        self.kv.put(cf, key, value)
    }

    /// Write a raw value (index entries).
    pub(crate) fn write_raw(&mut self, cf: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.kv.put(cf, key, value)
    }

    /// Read a raw value, locking its key.
    pub(crate) fn read_raw_for_update(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.kv.get_for_update(cf, key)
    }

    /// Read a raw value.
    pub(crate) fn read_raw(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.kv.get(cf, key)
    }

    /// Delete a key.
    pub(crate) fn remove(&mut self, cf: &str, key: &[u8]) -> Result<()> {
        self.kv.delete(cf, key)
    }

    /// Keys under `prefix`, in order.
    pub(crate) fn scan_keys(&mut self, cf: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .kv
            .scan_prefix(cf, prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Decoded records under `prefix`, in key order.
    pub(crate) fn scan_records<T: DeserializeOwned>(
        &mut self,
        cf: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        self.kv
            .scan_prefix(cf, prefix)?
            .into_iter()
            .map(|(_, value)| deserialize(&value))
            .collect()
    }

    /// Take a named lock for the rest of the transaction.
    pub(crate) fn lock(&mut self, name: &[u8]) -> Result<()> {
        self.kv.get_for_update(cf::LOCKS, name)?;
        Ok(())
    }
}

/// Serialize a value using CBOR.
fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}
