//! API handlers.

pub mod admin;
pub mod coupons;
pub mod health;
pub mod meter;
pub mod wallet;
pub mod webhooks;
