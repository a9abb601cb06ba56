//! Meterline engine service.
//!
//! This crate hosts the credits engine and its HTTP boundary:
//!
//! - Usage metering (`start`/`end` around each metered call)
//! - Payment settlement through an in-process retrying queue
//! - Wallet reads and the onboarding grant
//! - Coupon validation
//! - Catalog writes that keep the initial package and plan flags consistent
//!
//! # Authentication
//!
//! 1. **Service API key** (`x-api-key`) - for the gateway calling the
//!    metering endpoints
//! 2. **HS256 JWT** (`Authorization: Bearer`) - for end-user wallet and
//!    coupon endpoints
//! 3. **Admin API key** (`x-admin-key`) - for catalog writes

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod auth;
pub mod catalog;
pub mod config;
pub mod coupons;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod metering;
pub mod notify;
pub mod queue;
pub mod routes;
pub mod settlement;
pub mod state;
pub mod wallets;

pub use catalog::CatalogService;
pub use config::{RetryPolicy, ServiceConfig};
pub use coupons::{CouponEngine, CouponValidation};
pub use error::ApiError;
pub use metering::{Access, DenialReason, EndOutcome, EndRequest, MeteringService, StartOutcome};
pub use notify::{HttpMailer, LogNotifier, Notifier};
pub use queue::{DeadLetter, QueueClosed, SettlementQueue};
pub use routes::create_router;
pub use settlement::{SettlementConsumer, SettlementOutcome, SettlementReceipt};
pub use state::AppState;
pub use wallets::{InitialGrantOutcome, WalletService};
