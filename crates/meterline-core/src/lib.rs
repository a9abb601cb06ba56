//! Core types and utilities for meterline.
//!
//! This crate provides the foundational types of the credits ledger and the
//! pure computations that sit on top of them:
//!
//! - **Identifiers**: `UserId`, `WalletId`, `PackageId`, `LedgerEntryId`, ...
//! - **Wallets**: `Wallet`, `WalletAdjustment`, `WalletGuard`
//! - **Ledger**: `LedgerEntry`, `LedgerSource`, `IncreaseSource`
//! - **Usage**: `UsageRecord`, `TokenUsage`, `CostBreakdown`
//! - **Catalog**: `Package`, `Plan`, `PackagePlan`, `FeatureEndpoint`, `ProfitRule`
//! - **Payments**: `PaymentTransaction`, `PackageTransaction`, `SettlementEvent`
//! - **Coupons**: `Coupon`, `CouponQuote`, `CouponRejection`
//! - **Pricing**: `TokenRatio`, `TokenCostCalculator`
//!
//! # Units
//!
//! Credits are stored as `i64`. Prices, discounts and payment amounts are `i64`
//! minor currency units (cents for USD) keyed by a [`Currency`] code.
//! Profit margins are basis points: `2000` is 20%. No floating point is used on
//! any money or credit path.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod coupon;
pub mod error;
pub mod ids;
pub mod initial;
pub mod ledger;
pub mod payment;
pub mod pricing;
pub mod usage;
pub mod wallet;

pub use catalog::{Currency, Feature, FeatureEndpoint, Package, PackagePlan, Plan, ProfitRule};
pub use coupon::{normalize_code, Coupon, CouponQuote, CouponRejection, Discount};
pub use error::{BillingError, Result};
pub use ids::{
    CouponId, FeatureEndpointId, FeatureId, IdError, LedgerEntryId, PackageId, PackagePlanId,
    PackageTransactionId, PaymentTransactionId, PlanId, ProfitRuleId, UsageRecordId, UserId,
    WalletId,
};
pub use initial::{first_initial_wins, promotion_candidate};
pub use ledger::{EntryType, IncreaseSource, LedgerEntry, LedgerSource};
pub use payment::{PackageTransaction, PaymentStatus, PaymentTransaction, SettlementEvent};
pub use pricing::{TokenCostCalculator, TokenRatio, BASIS_POINTS_PER_WHOLE};
pub use usage::{validate_usage_key, CostBreakdown, TokenUsage, UsageRecord};
pub use wallet::{AdjustOutcome, Wallet, WalletAdjustment, WalletGuard, WalletTarget};
