//! Ledger operations.

use meterline_core::{LedgerEntry, LedgerEntryId, PaymentTransactionId, UserId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::Txn;

impl Txn<'_> {
    /// Append a ledger entry.
    ///
    /// This also maintains the user index and, for payment credits, the
    /// payment index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the entry is a payment credit and
    /// the payment has already been credited.
    pub fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        if let Some(payment) = entry.payment_transaction() {
            let key = keys::payment_key(&payment);
            if self.read_raw_for_update(cf::LEDGER_BY_PAYMENT, &key)?.is_some() {
                return Err(StoreError::duplicate("payment credit", payment));
            }
            self.write_raw(cf::LEDGER_BY_PAYMENT, &key, entry.id.to_bytes().to_vec())?;
        }
        self.write(cf::LEDGER, &keys::ledger_key(&entry.id), entry)?;
        self.write_raw(
            cf::LEDGER_BY_USER,
            &keys::user_ledger_key(&entry.user, &entry.id),
            Vec::new(),
        )
    }

    /// Get a ledger entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn ledger_entry(&mut self, entry_id: &LedgerEntryId) -> Result<Option<LedgerEntry>> {
        self.read(cf::LEDGER, &keys::ledger_key(entry_id))
    }

    /// Find the credit entry of a settled payment.
    ///
    /// Locks the payment's index key, so of two transactions settling the same
    /// payment the second waits for the first and then sees its entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_payment_credit(
        &mut self,
        payment_id: &PaymentTransactionId,
    ) -> Result<Option<LedgerEntry>> {
        let Some(value) =
            self.read_raw_for_update(cf::LEDGER_BY_PAYMENT, &keys::payment_key(payment_id))?
        else {
            return Ok(None);
        };
        let entry_id = keys::id_bytes(&value)
            .map(LedgerEntryId::from_bytes)
            .ok_or_else(|| StoreError::Database("malformed payment index value".into()))?;
        self.ledger_entry(&entry_id)
    }

    /// List a user's visible ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn ledger_for_user(
        &mut self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let mut index = self.scan_keys(cf::LEDGER_BY_USER, &keys::user_prefix(user_id))?;
        // ULIDs are time-ordered; reverse for newest first.
        index.reverse();

        let mut entries = Vec::new();
        let mut skipped = 0;
        for key in index {
            if entries.len() >= limit {
                break;
            }
            let Some(entry_id) = keys::extract_ledger_id(&key) else {
                continue;
            };
            let Some(entry) = self.ledger_entry(&entry_id)? else {
                continue;
            };
            if entry.is_deleted {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Hide a ledger entry from listings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the entry does not exist.
    #[cfg(test)]
    pub(crate) fn hide_ledger_entry(&mut self, entry_id: &LedgerEntryId) -> Result<()> {
        let key = keys::ledger_key(entry_id);
        let mut entry: LedgerEntry = self
            .read_for_update(cf::LEDGER, &key)?
            .ok_or_else(|| StoreError::not_found("ledger entry", entry_id))?;
        entry.is_deleted = true;
        self.write(cf::LEDGER, &key, &entry)
    }
}

#[cfg(test)]
mod tests {
    use meterline_core::{FeatureEndpointId, WalletId};

    use super::*;
    use crate::MemoryStore;

    #[test]
    fn payment_credit_is_indexed_once() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let wallet = WalletId::generate();
        let payment = PaymentTransactionId::generate();

        let mut txn = Txn::begin(&store).unwrap();
        assert!(txn.find_payment_credit(&payment).unwrap().is_none());

        let entry = LedgerEntry::payment_credit(user, wallet, 500, 500, payment);
        txn.append_ledger_entry(&entry).unwrap();
        let found = txn.find_payment_credit(&payment).unwrap().unwrap();
        assert_eq!(found.id, entry.id);

        let again = LedgerEntry::payment_credit(user, wallet, 500, 1000, payment);
        assert!(matches!(
            txn.append_ledger_entry(&again),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn listing_is_newest_first_with_pagination() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let wallet = WalletId::generate();
        let endpoint = FeatureEndpointId::generate();

        let mut txn = Txn::begin(&store).unwrap();
        let first = LedgerEntry::bonus_credit(user, wallet, 100, 100);
        txn.append_ledger_entry(&first).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2)); // Ensure different ULIDs
        let second = LedgerEntry::usage_debit(user, wallet, 30, 70, endpoint);
        txn.append_ledger_entry(&second).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let third = LedgerEntry::usage_debit(user, wallet, 20, 50, endpoint);
        txn.append_ledger_entry(&third).unwrap();

        let all = txn.ledger_for_user(&user, 10, 0).unwrap();
        let ids: Vec<_> = all.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);

        let page = txn.ledger_for_user(&user, 1, 1).unwrap();
        assert_eq!(page[0].id, second.id);

        assert!(txn.ledger_for_user(&UserId::generate(), 10, 0).unwrap().is_empty());
    }

    #[test]
    fn hidden_entries_are_not_listed() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let mut txn = Txn::begin(&store).unwrap();
        let entry = LedgerEntry::bonus_credit(user, WalletId::generate(), 5, 5);
        txn.append_ledger_entry(&entry).unwrap();

        txn.hide_ledger_entry(&entry.id).unwrap();
        assert!(txn.ledger_for_user(&user, 10, 0).unwrap().is_empty());
        assert!(txn.ledger_entry(&entry.id).unwrap().unwrap().is_deleted);
    }
}
