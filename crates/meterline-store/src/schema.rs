//! Database schema definitions and column families.
//!
//! Both backends use the same column families. Index families map a
//! composite or natural key to a record ID (or to nothing, when the ID is the
//! key suffix).

/// Column family names.
pub mod cf {
    /// Wallet records, keyed by `wallet_id`.
    pub const WALLETS: &str = "wallets";

    /// Index: live wallet by user, keyed by `user_id`. Value is the `wallet_id`.
    pub const WALLETS_BY_USER: &str = "wallets_by_user";

    /// Ledger entries, keyed by `entry_id` (ULID).
    pub const LEDGER: &str = "ledger";

    /// Index: ledger entries by user, keyed by `user_id || entry_id`.
    /// Value is empty (index only).
    pub const LEDGER_BY_USER: &str = "ledger_by_user";

    /// Index: payment credits, keyed by `payment_transaction_id`. Value is the
    /// `entry_id`. Settlement idempotency is checked here.
    pub const LEDGER_BY_PAYMENT: &str = "ledger_by_payment";

    /// Usage records, keyed by `usage_record_id` (ULID).
    pub const USAGE_RECORDS: &str = "usage_records";

    /// Index: usage records by caller-supplied key. Value is the `usage_record_id`.
    pub const USAGE_BY_KEY: &str = "usage_by_key";

    /// Features, keyed by `feature_id`.
    pub const FEATURES: &str = "features";

    /// Feature endpoints, keyed by `feature_endpoint_id`.
    pub const FEATURE_ENDPOINTS: &str = "feature_endpoints";

    /// Packages, keyed by `package_id`.
    pub const PACKAGES: &str = "packages";

    /// Plans, keyed by `plan_id`.
    pub const PLANS: &str = "plans";

    /// Package-plans, keyed by `package_plan_id`.
    pub const PACKAGE_PLANS: &str = "package_plans";

    /// Index: package-plans by package, keyed by `package_id || package_plan_id`.
    /// Value is empty (index only).
    pub const PACKAGE_PLANS_BY_PACKAGE: &str = "package_plans_by_package";

    /// Profit rules, keyed by `profit_rule_id`.
    pub const PROFIT_RULES: &str = "profit_rules";

    /// Coupons, keyed by `coupon_id`.
    pub const COUPONS: &str = "coupons";

    /// Index: coupons by normalized code. Value is the `coupon_id`.
    pub const COUPONS_BY_CODE: &str = "coupons_by_code";

    /// Payment transactions, keyed by `payment_transaction_id`.
    pub const PAYMENT_TRANSACTIONS: &str = "payment_transactions";

    /// Package transaction audit records, keyed by `package_transaction_id` (ULID).
    pub const PACKAGE_TRANSACTIONS: &str = "package_transactions";

    /// Index: package transactions by user, keyed by
    /// `user_id || package_transaction_id`. Value is empty (index only).
    pub const PACKAGE_TRANSACTIONS_BY_USER: &str = "package_transactions_by_user";

    /// Lock keys that serialize writers of collection-wide invariants.
    pub const LOCKS: &str = "locks";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::WALLETS,
        cf::WALLETS_BY_USER,
        cf::LEDGER,
        cf::LEDGER_BY_USER,
        cf::LEDGER_BY_PAYMENT,
        cf::USAGE_RECORDS,
        cf::USAGE_BY_KEY,
        cf::FEATURES,
        cf::FEATURE_ENDPOINTS,
        cf::PACKAGES,
        cf::PLANS,
        cf::PACKAGE_PLANS,
        cf::PACKAGE_PLANS_BY_PACKAGE,
        cf::PROFIT_RULES,
        cf::COUPONS,
        cf::COUPONS_BY_CODE,
        cf::PAYMENT_TRANSACTIONS,
        cf::PACKAGE_TRANSACTIONS,
        cf::PACKAGE_TRANSACTIONS_BY_USER,
        cf::LOCKS,
    ]
}
