//! In-process settlement queue.
//!
//! Events published here are delivered to the [`SettlementConsumer`] by one
//! worker task, in order. A delivery that fails is re-delivered after an
//! exponential backoff until the retry policy's attempt budget is spent, and
//! then parked in the dead-letter list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};

use meterline_core::{BillingError, SettlementEvent};

use crate::config::RetryPolicy;
use crate::settlement::{SettlementConsumer, SettlementOutcome};

/// Events buffered before `publish` waits for the worker.
const QUEUE_CAPACITY: usize = 1024;

/// The queue no longer accepts events.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("settlement queue is closed")]
pub struct QueueClosed;

/// An event that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The undelivered event.
    pub event: SettlementEvent,
    /// Deliveries that were made.
    pub attempts: u32,
    /// Error of the last delivery.
    pub last_error: String,
    /// When the event was parked.
    pub failed_at: DateTime<Utc>,
}

/// Handle for publishing settlement events.
pub struct SettlementQueue {
    sender: mpsc::Sender<SettlementEvent>,
    in_flight: Arc<watch::Sender<usize>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    shutdown: mpsc::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SettlementQueue {
    /// Start the worker on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(consumer: Arc<SettlementConsumer>, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let in_flight = Arc::new(watch::Sender::new(0usize));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let worker = Worker {
            consumer,
            policy,
            in_flight: Arc::clone(&in_flight),
            dead_letters: Arc::clone(&dead_letters),
        };
        let handle = tokio::spawn(worker.run(receiver, shutdown_rx));

        Self {
            sender,
            in_flight,
            dead_letters,
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue an event for settlement.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] after [`SettlementQueue::shutdown`].
    pub async fn publish(&self, event: SettlementEvent) -> Result<(), QueueClosed> {
        self.in_flight.send_modify(|n| *n += 1);
        if self.sender.send(event).await.is_err() {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            return Err(QueueClosed);
        }
        Ok(())
    }

    /// Wait until every published event has been acknowledged or
    /// dead-lettered.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Events that exhausted their attempts, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    /// Stop the worker after its current delivery.
    ///
    /// Events still buffered are dropped unsettled; their payments settle on
    /// the next webhook delivery.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(()).await;
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Settlement worker panicked");
            }
        }
        let dropped = self.in_flight.send_replace(0);
        if dropped > 0 {
            tracing::warn!(dropped, "Settlement queue stopped with undelivered events");
        }
    }
}

struct Worker {
    consumer: Arc<SettlementConsumer>,
    policy: RetryPolicy,
    in_flight: Arc<watch::Sender<usize>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl Worker {
    async fn run(
        self,
        mut receiver: mpsc::Receiver<SettlementEvent>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        tracing::info!("Settlement worker started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Settlement worker shutting down");
                    break;
                }
                event = receiver.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.deliver(event).await;
                    self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
                }
            }
        }
    }

    async fn deliver(&self, event: SettlementEvent) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&event).await {
                Ok(outcome) => {
                    log_ack(&event, &outcome, attempt);
                    return;
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    tracing::error!(
                        transaction_id = %event.transaction_id,
                        attempts = attempt,
                        error = %e,
                        "Settlement dead-lettered"
                    );
                    self.dead_letters.lock().await.push(DeadLetter {
                        event,
                        attempts: attempt,
                        last_error: e.to_string(),
                        failed_at: Utc::now(),
                    });
                    return;
                }
                Err(e) => {
                    let backoff = self.policy.backoff(attempt);
                    tracing::warn!(
                        transaction_id = %event.transaction_id,
                        attempt,
                        retryable = e.is_retryable(),
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Settlement failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One delivery, isolated in its own task so a panic counts as a failed
    /// attempt instead of stopping the worker.
    async fn attempt(&self, event: &SettlementEvent) -> Result<SettlementOutcome, DeliveryError> {
        let consumer = Arc::clone(&self.consumer);
        let event = event.clone();
        let outcome = tokio::spawn(async move { consumer.handle(&event).await }).await?;
        Ok(outcome?)
    }
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error(transparent)]
    Settlement(#[from] BillingError),
    #[error("settlement task failed: {0}")]
    Task(#[from] JoinError),
}

impl DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Settlement(e) => e.is_retryable(),
            Self::Task(_) => false,
        }
    }
}

fn log_ack(event: &SettlementEvent, outcome: &SettlementOutcome, attempt: u32) {
    let result = match outcome {
        SettlementOutcome::Credited(_) => "credited",
        SettlementOutcome::AlreadySettled { .. } => "already_settled",
        SettlementOutcome::PaymentMissing => "payment_missing",
        SettlementOutcome::PaymentNotSuccessful { .. } => "payment_not_successful",
    };
    tracing::debug!(
        transaction_id = %event.transaction_id,
        attempt,
        result,
        "Settlement acknowledged"
    );
}
