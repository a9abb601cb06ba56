//! Payment and package transaction operations.

use chrono::Utc;

use meterline_core::{PackageTransaction, PaymentStatus, PaymentTransaction, PaymentTransactionId, UserId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::Txn;

impl Txn<'_> {
    /// Get a payment transaction by ID, locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn payment_transaction(
        &mut self,
        payment_id: &PaymentTransactionId,
    ) -> Result<Option<PaymentTransaction>> {
        self.read_for_update(cf::PAYMENT_TRANSACTIONS, &keys::payment_key(payment_id))
    }

    /// Insert or update a payment transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_payment_transaction(&mut self, payment: &PaymentTransaction) -> Result<()> {
        self.write(
            cf::PAYMENT_TRANSACTIONS,
            &keys::payment_key(&payment.id),
            payment,
        )
    }

    /// Set the status of a payment.
    ///
    /// Returns the payment after the update. A payment whose status is final
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the payment does not exist.
    pub fn set_payment_status(
        &mut self,
        payment_id: &PaymentTransactionId,
        status: PaymentStatus,
    ) -> Result<PaymentTransaction> {
        let mut payment = self
            .payment_transaction(payment_id)?
            .ok_or_else(|| StoreError::not_found("payment transaction", payment_id))?;
        if payment.status.is_final() || payment.status == status {
            return Ok(payment);
        }
        payment.status = status;
        payment.updated_at = Utc::now();
        self.put_payment_transaction(&payment)?;
        Ok(payment)
    }

    /// Insert a package transaction audit record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_package_transaction(&mut self, record: &PackageTransaction) -> Result<()> {
        self.write(
            cf::PACKAGE_TRANSACTIONS,
            &keys::package_transaction_key(&record.id),
            record,
        )?;
        self.write_raw(
            cf::PACKAGE_TRANSACTIONS_BY_USER,
            &keys::user_package_transaction_key(&record.user, &record.id),
            Vec::new(),
        )
    }

    /// A user's package transactions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn package_transactions_for_user(
        &mut self,
        user_id: &UserId,
    ) -> Result<Vec<PackageTransaction>> {
        let index = self.scan_keys(cf::PACKAGE_TRANSACTIONS_BY_USER, &keys::user_prefix(user_id))?;
        let mut records = Vec::with_capacity(index.len());
        for key in index {
            let Some(id) = keys::extract_package_transaction_id(&key) else {
                continue;
            };
            if let Some(record) =
                self.read(cf::PACKAGE_TRANSACTIONS, &keys::package_transaction_key(&id))?
            {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use meterline_core::{Currency, PackageId, PlanId};

    use super::*;
    use crate::MemoryStore;

    fn pending() -> PaymentTransaction {
        PaymentTransaction::pending(
            UserId::generate(),
            PackageId::generate(),
            PlanId::generate(),
            1999,
            Currency::new("USD"),
        )
    }

    #[test]
    fn status_moves_forward_only() {
        let store = MemoryStore::new();
        let payment = pending();
        let mut txn = Txn::begin(&store).unwrap();
        txn.put_payment_transaction(&payment).unwrap();

        let updated = txn
            .set_payment_status(&payment.id, PaymentStatus::Success)
            .unwrap();
        assert_eq!(updated.status, PaymentStatus::Success);

        let unchanged = txn
            .set_payment_status(&payment.id, PaymentStatus::Failed)
            .unwrap();
        assert_eq!(unchanged.status, PaymentStatus::Success);
    }

    #[test]
    fn unknown_payment() {
        let store = MemoryStore::new();
        let mut txn = Txn::begin(&store).unwrap();
        let missing = PaymentTransactionId::generate();
        assert!(txn.payment_transaction(&missing).unwrap().is_none());
        assert!(matches!(
            txn.set_payment_status(&missing, PaymentStatus::Success),
            Err(StoreError::NotFound { .. })
        ));
    }
}
