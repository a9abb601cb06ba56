//! Payment settlement: turn a successful payment into credits exactly once.
//!
//! Everything a settlement writes (wallet credit and entitlement, ledger
//! entry, package transaction, coupon redemption) happens in one transaction.
//! The idempotency check reads the payment's ledger index under a lock inside
//! that same transaction, so two deliveries of one event racing each other
//! serialize and the second one sees the first one's entry.
//!
//! The notification is sent after commit and its failure is only logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use meterline_core::{
    BillingError, Currency, LedgerEntry, LedgerEntryId, PackageId, PackageTransaction,
    PackageTransactionId, PaymentStatus, PaymentTransaction, PaymentTransactionId, PlanId, Result,
    SettlementEvent, UserId, WalletAdjustment, WalletId, WalletTarget,
};
use meterline_store::{Store, StoreError, Txn};

use crate::notify::Notifier;

/// What a settled payment produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// The settled payment.
    pub payment: PaymentTransactionId,
    /// The buyer.
    pub user: UserId,
    /// The credited wallet.
    pub wallet: WalletId,
    /// The ledger entry of the credit.
    pub ledger_entry: LedgerEntryId,
    /// The package transaction audit record.
    pub package_transaction: PackageTransactionId,
    /// Purchased package.
    pub package: PackageId,
    /// Purchased plan.
    pub plan: PlanId,
    /// Credits granted.
    pub credits: i64,
    /// Balance after the credit.
    pub balance: i64,
    /// Amount paid, in minor units.
    pub amount: i64,
    /// Currency of `amount`.
    pub currency: Currency,
    /// New entitlement expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

/// How a settlement event was handled. Every variant acknowledges the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The payment was credited by this delivery.
    Credited(SettlementReceipt),
    /// The payment was credited by an earlier delivery.
    AlreadySettled {
        /// The existing credit entry.
        ledger_entry: LedgerEntryId,
    },
    /// No such payment; re-delivery will not make it appear.
    PaymentMissing,
    /// The payment has not succeeded; nothing was credited.
    PaymentNotSuccessful {
        /// The payment's current status.
        status: PaymentStatus,
    },
}

/// Consumes settlement events.
pub struct SettlementConsumer {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl SettlementConsumer {
    /// Create a consumer that notifies through `notifier`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Settle an event, then send the notification.
    ///
    /// An `Ok` acknowledges the event; an `Err` asks for re-delivery.
    ///
    /// # Errors
    ///
    /// Returns the settlement error; notification failures are not errors.
    pub async fn handle(&self, event: &SettlementEvent) -> Result<SettlementOutcome> {
        let outcome = self.settle(event)?;
        if let SettlementOutcome::Credited(receipt) = &outcome {
            if let Err(e) = self.notifier.payment_settled(receipt).await {
                tracing::warn!(
                    error = %e,
                    transaction_id = %receipt.payment,
                    "Settlement notification failed"
                );
            }
        }
        Ok(outcome)
    }

    /// Settle an event in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::DataIntegrity`] if the payment references a
    /// missing package-plan, plan or coupon, or a storage error. Nothing is
    /// written in either case.
    pub fn settle(&self, event: &SettlementEvent) -> Result<SettlementOutcome> {
        let mut txn = Txn::begin(self.store.as_ref())?;
        let outcome = self.settle_in(&mut txn, event)?;
        if matches!(outcome, SettlementOutcome::Credited(_)) {
            txn.commit()?;
        }
        Ok(outcome)
    }

    /// Settle an event inside a caller's transaction.
    ///
    /// The caller commits. On error the caller must drop the transaction.
    ///
    /// # Errors
    ///
    /// See [`SettlementConsumer::settle`].
    pub fn settle_in(
        &self,
        txn: &mut Txn<'_>,
        event: &SettlementEvent,
    ) -> Result<SettlementOutcome> {
        let Some(payment) = txn.payment_transaction(&event.transaction_id)? else {
            tracing::warn!(
                transaction_id = %event.transaction_id,
                "Settlement for unknown payment, acknowledging"
            );
            return Ok(SettlementOutcome::PaymentMissing);
        };

        if payment.status != PaymentStatus::Success {
            tracing::warn!(
                transaction_id = %payment.id,
                status = ?payment.status,
                "Payment has not succeeded, acknowledging without credit"
            );
            return Ok(SettlementOutcome::PaymentNotSuccessful {
                status: payment.status,
            });
        }

        if let Some(entry) = txn.find_payment_credit(&payment.id)? {
            tracing::warn!(
                transaction_id = %payment.id,
                ledger_entry_id = %entry.id,
                "Payment already settled"
            );
            return Ok(SettlementOutcome::AlreadySettled {
                ledger_entry: entry.id,
            });
        }

        warn_on_event_mismatch(event, &payment);
        credit_payment(txn, &payment).map(SettlementOutcome::Credited)
    }
}

fn credit_payment(txn: &mut Txn<'_>, payment: &PaymentTransaction) -> Result<SettlementReceipt> {
    let package_plan = txn
        .find_package_plan(&payment.package, &payment.plan)?
        .ok_or_else(|| {
            BillingError::DataIntegrity(format!(
                "payment {} references package {} without plan {}",
                payment.id, payment.package, payment.plan
            ))
        })?;
    let plan = txn.plan(&payment.plan)?.ok_or_else(|| {
        BillingError::DataIntegrity(format!(
            "payment {} references missing plan {}",
            payment.id, payment.plan
        ))
    })?;

    let now = Utc::now();
    let expires_at = plan.expiry_from(now)?;
    let (wallet, _) = txn.get_or_create_wallet(&payment.user)?;
    let credited = txn.adjust_wallet(
        WalletTarget::Wallet(wallet.id),
        &WalletAdjustment::delta(package_plan.credits).entitle(
            payment.package,
            plan.id,
            expires_at,
        ),
    )?;
    let balance = credited.wallet().credits;

    let entry = LedgerEntry::payment_credit(
        payment.user,
        wallet.id,
        package_plan.credits,
        balance,
        payment.id,
    );
    txn.append_ledger_entry(&entry)?;

    let record = PackageTransaction {
        id: PackageTransactionId::generate(),
        user: payment.user,
        wallet: wallet.id,
        payment_transaction: payment.id,
        package: payment.package,
        plan: plan.id,
        package_plan: package_plan.id,
        credits: package_plan.credits,
        amount: payment.amount,
        currency: payment.currency.clone(),
        expires_at,
        created_at: now,
    };
    txn.insert_package_transaction(&record)?;

    if let Some(coupon_id) = payment.coupon {
        let coupon = txn.increment_coupon_usage(&coupon_id).map_err(|e| match e {
            StoreError::NotFound { .. } => BillingError::DataIntegrity(format!(
                "payment {} references missing coupon {coupon_id}",
                payment.id
            )),
            other => other.into(),
        })?;
        tracing::debug!(
            coupon_id = %coupon.id,
            usage_count = coupon.usage_count,
            "Coupon redeemed"
        );
    }

    tracing::info!(
        transaction_id = %payment.id,
        user_id = %payment.user,
        credits = package_plan.credits,
        balance,
        "Payment settled"
    );
    Ok(SettlementReceipt {
        payment: payment.id,
        user: payment.user,
        wallet: wallet.id,
        ledger_entry: entry.id,
        package_transaction: record.id,
        package: payment.package,
        plan: plan.id,
        credits: package_plan.credits,
        balance,
        amount: payment.amount,
        currency: payment.currency.clone(),
        expires_at,
    })
}

fn warn_on_event_mismatch(event: &SettlementEvent, payment: &PaymentTransaction) {
    if event.user_id != payment.user
        || event.package_id != payment.package
        || event.plan_id != payment.plan
        || event.amount != payment.amount
        || event.currency != payment.currency
    {
        tracing::warn!(
            transaction_id = %payment.id,
            "Settlement event disagrees with the stored payment, settling the stored payment"
        );
    }
}

/// Record a payment status reported by the gateway.
///
/// Returns the payment after the update. Final statuses are never changed.
///
/// # Errors
///
/// Returns [`BillingError::NotFound`] if the payment does not exist.
pub fn record_payment_status(
    store: &dyn Store,
    payment_id: &PaymentTransactionId,
    status: PaymentStatus,
) -> Result<PaymentTransaction> {
    let mut txn = Txn::begin(store)?;
    let payment = txn.set_payment_status(payment_id, status)?;
    txn.commit()?;
    if payment.status != status {
        tracing::warn!(
            transaction_id = %payment.id,
            current = ?payment.status,
            reported = ?status,
            "Ignoring status change of a final payment"
        );
    }
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use meterline_core::{Coupon, Discount, EntryType, Package, PackagePlan, Plan};
    use meterline_store::MemoryStore;

    use super::*;

    #[derive(Default)]
    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn payment_settled(&self, _receipt: &SettlementReceipt) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BillingError::Notification("mail API down".into()));
            }
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        consumer: SettlementConsumer,
        notifier: Arc<CountingNotifier>,
        package_plan: PackagePlan,
    }

    fn fixture(notifier: CountingNotifier) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let package = Package::new("Pro", Vec::new());
        let plan = Plan {
            id: PlanId::generate(),
            name: "Monthly".into(),
            duration_days: Some(30),
            is_active: true,
        };
        let package_plan = PackagePlan::new(package.id, plan.id, 5000).with_price("USD", 1999);

        let mut txn = Txn::begin(store.as_ref()).unwrap();
        txn.put_package(&package).unwrap();
        txn.put_plan(&plan).unwrap();
        txn.put_package_plan(&package_plan).unwrap();
        txn.commit().unwrap();

        let notifier = Arc::new(notifier);
        let consumer = SettlementConsumer::new(store.clone(), notifier.clone());
        Fixture {
            store,
            consumer,
            notifier,
            package_plan,
        }
    }

    fn payment(f: &Fixture, status: PaymentStatus) -> PaymentTransaction {
        let mut payment = PaymentTransaction::pending(
            UserId::generate(),
            f.package_plan.package,
            f.package_plan.plan,
            1999,
            Currency::new("USD"),
        );
        payment.status = status;
        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        txn.put_payment_transaction(&payment).unwrap();
        txn.commit().unwrap();
        payment
    }

    fn balance(f: &Fixture, user: &UserId) -> Option<i64> {
        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        txn.wallet_for_user(user).unwrap().map(|w| w.credits)
    }

    #[tokio::test]
    async fn duplicate_delivery_credits_once() {
        let f = fixture(CountingNotifier::default());
        let payment = payment(&f, PaymentStatus::Success);
        let event = SettlementEvent::from(&payment);

        let first = f.consumer.handle(&event).await.unwrap();
        let second = f.consumer.handle(&event).await.unwrap();

        let SettlementOutcome::Credited(receipt) = first else {
            panic!("expected a credit, got {first:?}");
        };
        assert_eq!(receipt.credits, 5000);
        assert_eq!(receipt.balance, 5000);
        assert!(receipt.expires_at.is_some());
        assert_eq!(
            second,
            SettlementOutcome::AlreadySettled {
                ledger_entry: receipt.ledger_entry
            }
        );
        assert_eq!(balance(&f, &payment.user), Some(5000));
        assert_eq!(f.notifier.sent.load(Ordering::SeqCst), 1);

        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        let ledger = txn.ledger_for_user(&payment.user, 10, 0).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].entry_type(), EntryType::Increase);
        assert_eq!(ledger[0].payment_transaction(), Some(payment.id));
        let history = txn.package_transactions_for_user(&payment.user).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].package_plan, f.package_plan.id);
        let wallet = txn.wallet_for_user(&payment.user).unwrap().unwrap();
        assert_eq!(wallet.package, Some(f.package_plan.package));
        assert_eq!(wallet.plan, Some(f.package_plan.plan));
    }

    #[test]
    fn concurrent_deliveries_credit_once() {
        let f = Arc::new(fixture(CountingNotifier::default()));
        let payment = payment(&f, PaymentStatus::Success);
        let event = SettlementEvent::from(&payment);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                let event = event.clone();
                std::thread::spawn(move || f.consumer.settle(&event).unwrap())
            })
            .collect();
        let credited = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|outcome| matches!(outcome, SettlementOutcome::Credited(_)))
            .count();

        assert_eq!(credited, 1);
        assert_eq!(balance(&f, &payment.user), Some(5000));
    }

    #[tokio::test]
    async fn pending_payment_is_acknowledged_without_credit() {
        let f = fixture(CountingNotifier::default());
        let payment = payment(&f, PaymentStatus::Pending);

        let outcome = f.consumer.handle(&SettlementEvent::from(&payment)).await.unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::PaymentNotSuccessful {
                status: PaymentStatus::Pending
            }
        );
        assert_eq!(balance(&f, &payment.user), None);
        assert_eq!(f.notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_payment_is_acknowledged() {
        let f = fixture(CountingNotifier::default());
        let mut event = SettlementEvent::from(&payment(&f, PaymentStatus::Success));
        event.transaction_id = PaymentTransactionId::generate();

        let outcome = f.consumer.handle(&event).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::PaymentMissing);
    }

    #[tokio::test]
    async fn missing_package_plan_is_a_data_integrity_error() {
        let f = fixture(CountingNotifier::default());
        let mut payment = PaymentTransaction::pending(
            UserId::generate(),
            f.package_plan.package,
            PlanId::generate(),
            1999,
            Currency::new("USD"),
        );
        payment.status = PaymentStatus::Success;
        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        txn.put_payment_transaction(&payment).unwrap();
        txn.commit().unwrap();

        let err = f
            .consumer
            .handle(&SettlementEvent::from(&payment))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::DataIntegrity(_)));
        assert_eq!(balance(&f, &payment.user), None);
    }

    #[tokio::test]
    async fn notification_failure_does_not_undo_settlement() {
        let f = fixture(CountingNotifier {
            fail: true,
            ..CountingNotifier::default()
        });
        let payment = payment(&f, PaymentStatus::Success);

        let outcome = f.consumer.handle(&SettlementEvent::from(&payment)).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::Credited(_)));
        assert_eq!(balance(&f, &payment.user), Some(5000));
        assert_eq!(f.notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn coupon_is_redeemed_with_the_settlement() {
        let f = fixture(CountingNotifier::default());
        let coupon = Coupon::new("LAUNCH", Discount::Percentage { percent: 10 });
        let mut payment = PaymentTransaction::pending(
            UserId::generate(),
            f.package_plan.package,
            f.package_plan.plan,
            1800,
            Currency::new("USD"),
        )
        .with_coupon(coupon.id, 199);
        payment.status = PaymentStatus::Success;
        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        txn.put_coupon(&coupon).unwrap();
        txn.put_payment_transaction(&payment).unwrap();
        txn.commit().unwrap();

        f.consumer.settle(&SettlementEvent::from(&payment)).unwrap();
        f.consumer.settle(&SettlementEvent::from(&payment)).unwrap();

        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        assert_eq!(txn.coupon(&coupon.id).unwrap().unwrap().usage_count, 1);
    }

    #[test]
    fn settle_in_composes_with_a_caller_transaction() {
        let f = fixture(CountingNotifier::default());
        let payment = payment(&f, PaymentStatus::Success);

        let mut txn = Txn::begin(f.store.as_ref()).unwrap();
        let outcome = f
            .consumer
            .settle_in(&mut txn, &SettlementEvent::from(&payment))
            .unwrap();
        assert!(matches!(outcome, SettlementOutcome::Credited(_)));
        txn.rollback();

        assert_eq!(balance(&f, &payment.user), None);
    }

    #[test]
    fn final_status_is_not_overwritten() {
        let f = fixture(CountingNotifier::default());
        let payment = payment(&f, PaymentStatus::Pending);

        let updated =
            record_payment_status(f.store.as_ref(), &payment.id, PaymentStatus::Success).unwrap();
        assert_eq!(updated.status, PaymentStatus::Success);
        let ignored =
            record_payment_status(f.store.as_ref(), &payment.id, PaymentStatus::Failed).unwrap();
        assert_eq!(ignored.status, PaymentStatus::Success);
    }
}
