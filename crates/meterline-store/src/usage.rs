//! Usage record operations.

use meterline_core::{UsageRecord, UsageRecordId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::Txn;

impl Txn<'_> {
    /// Insert a usage record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the record's usage key is taken.
    pub fn insert_usage_record(&mut self, record: &UsageRecord) -> Result<()> {
        if let Some(usage_key) = &record.usage_key {
            let key = keys::usage_key(usage_key);
            if self.read_raw_for_update(cf::USAGE_BY_KEY, &key)?.is_some() {
                return Err(StoreError::duplicate("usage key", usage_key));
            }
            self.write_raw(cf::USAGE_BY_KEY, &key, record.id.to_bytes().to_vec())?;
        }
        self.write(cf::USAGE_RECORDS, &keys::usage_record_key(&record.id), record)
    }

    /// Get a usage record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn usage_record(&mut self, record_id: &UsageRecordId) -> Result<Option<UsageRecord>> {
        self.read(cf::USAGE_RECORDS, &keys::usage_record_key(record_id))
    }

    /// Find the usage record carrying a usage key.
    ///
    /// Locks the key, so a concurrent call with the same key waits for this
    /// transaction to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn usage_record_by_key(&mut self, usage_key: &str) -> Result<Option<UsageRecord>> {
        let Some(value) = self.read_raw_for_update(cf::USAGE_BY_KEY, &keys::usage_key(usage_key))?
        else {
            return Ok(None);
        };
        let record_id = keys::id_bytes(&value)
            .map(UsageRecordId::from_bytes)
            .ok_or_else(|| StoreError::Database("malformed usage index value".into()))?;
        self.usage_record(&record_id)
    }
}

#[cfg(test)]
mod tests {
    use meterline_core::{
        CostBreakdown, FeatureEndpointId, TokenUsage, UserId, WalletId,
    };

    use super::*;
    use crate::MemoryStore;

    fn record(usage_key: Option<&str>) -> UsageRecord {
        UsageRecord::new(
            UserId::generate(),
            WalletId::generate(),
            FeatureEndpointId::generate(),
            usage_key.map(str::to_owned),
            TokenUsage {
                input_tokens: 100,
                output_tokens: 400,
            },
            CostBreakdown {
                cost_credits: 100,
                credits: 100,
                ..CostBreakdown::default()
            },
            -100,
        )
    }

    #[test]
    fn usage_key_lookup() {
        let store = MemoryStore::new();
        let mut txn = Txn::begin(&store).unwrap();
        let keyed = record(Some("call-1"));
        txn.insert_usage_record(&keyed).unwrap();

        let found = txn.usage_record_by_key("call-1").unwrap().unwrap();
        assert_eq!(found.id, keyed.id);
        assert!(txn.usage_record_by_key("call-2").unwrap().is_none());
    }

    #[test]
    fn usage_keys_are_unique() {
        let store = MemoryStore::new();
        let mut txn = Txn::begin(&store).unwrap();
        txn.insert_usage_record(&record(Some("call-1"))).unwrap();
        assert!(matches!(
            txn.insert_usage_record(&record(Some("call-1"))),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn unkeyed_records_can_repeat() {
        let store = MemoryStore::new();
        let mut txn = Txn::begin(&store).unwrap();
        let a = record(None);
        let b = record(None);
        txn.insert_usage_record(&a).unwrap();
        txn.insert_usage_record(&b).unwrap();
        assert!(txn.usage_record(&a.id).unwrap().is_some());
        assert!(txn.usage_record(&b.id).unwrap().is_some());
    }
}
