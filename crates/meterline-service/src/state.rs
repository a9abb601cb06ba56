//! Application state.

use std::sync::Arc;

use meterline_core::TokenCostCalculator;
use meterline_store::Store;

use crate::catalog::CatalogService;
use crate::config::ServiceConfig;
use crate::coupons::CouponEngine;
use crate::metering::MeteringService;
use crate::notify::{HttpMailer, LogNotifier, Notifier};
use crate::queue::SettlementQueue;
use crate::settlement::SettlementConsumer;
use crate::wallets::WalletService;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Wallet reads and onboarding.
    pub wallets: WalletService,

    /// Start/end metering.
    pub metering: MeteringService,

    /// Coupon validation.
    pub coupons: CouponEngine,

    /// Catalog writes.
    pub catalog: CatalogService,

    /// Settlement consumer driven by `queue`.
    pub settlement: Arc<SettlementConsumer>,

    /// Settlement queue fed by the payment webhook.
    pub queue: Arc<SettlementQueue>,
}

impl AppState {
    /// Create the application state and start the settlement worker.
    ///
    /// Notifications go to the mail API when `MAIL_API_URL` is set and to the
    /// log otherwise.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match config.mail_api_url.as_deref() {
            Some(url) => {
                match HttpMailer::new(url, config.mail_api_key.clone(), &config.mail_from) {
                    Ok(mailer) => {
                        tracing::info!(mail_url = %url, "Mail notifications enabled");
                        Arc::new(mailer)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create mail client");
                        Arc::new(LogNotifier)
                    }
                }
            }
            None => {
                tracing::warn!("Mail API not configured - settlement notifications are logged only");
                Arc::new(LogNotifier)
            }
        };
        Self::with_notifier(store, config, notifier)
    }

    /// Create the application state with an explicit notifier.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_notifier(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let calculator = TokenCostCalculator::new(config.token_ratio);
        let settlement = Arc::new(SettlementConsumer::new(Arc::clone(&store), notifier));
        let queue = Arc::new(SettlementQueue::start(
            Arc::clone(&settlement),
            config.settlement,
        ));

        Self {
            wallets: WalletService::new(Arc::clone(&store)),
            metering: MeteringService::new(Arc::clone(&store), calculator),
            coupons: CouponEngine::new(Arc::clone(&store)),
            catalog: CatalogService::new(Arc::clone(&store)),
            settlement,
            queue,
            store,
            config,
        }
    }
}
