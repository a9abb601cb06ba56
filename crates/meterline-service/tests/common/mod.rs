//! Common test utilities for meterline integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use meterline_core::{
    Currency, Feature, FeatureEndpoint, FeatureEndpointId, FeatureId, LedgerEntry, Package,
    PackagePlan, PaymentStatus, PaymentTransaction, Plan, PlanId, ProfitRule, ProfitRuleId,
    UserId, Wallet, WalletAdjustment, WalletTarget,
};
use meterline_service::crypto::hmac_sha256_hex;
use meterline_service::{create_router, AppState, LogNotifier, RetryPolicy, ServiceConfig};
use meterline_service::SettlementQueue;
use meterline_store::{MemoryStore, Txn};

pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// The settlement queue fed by the webhook.
    pub queue: Arc<SettlementQueue>,
    /// A test user for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with an empty store.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            settlement: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
            ..ServiceConfig::default()
        };

        let state = AppState::with_notifier(store.clone(), config, Arc::new(LogNotifier));
        let queue = Arc::clone(&state.queue);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            queue,
            test_user_id: UserId::generate(),
        }
    }

    // ------------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------------

    /// A signed user token.
    pub fn token_for(user: &UserId) -> String {
        let now = Utc::now().timestamp();
        let claims = json!({
            "sub": user.to_string(),
            "iss": "meterline",
            "aud": "meterline",
            "iat": now,
            "exp": now + 3600,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token")
    }

    /// Authorization header for `user`.
    pub fn auth_for(user: &UserId) -> (HeaderName, HeaderValue) {
        header("authorization", &format!("Bearer {}", Self::token_for(user)))
    }

    /// Authorization header for the test user.
    pub fn user_auth(&self) -> (HeaderName, HeaderValue) {
        Self::auth_for(&self.test_user_id)
    }

    /// Service API key header.
    pub fn service_auth() -> (HeaderName, HeaderValue) {
        header("x-api-key", SERVICE_API_KEY)
    }

    /// Admin API key header.
    pub fn admin_auth() -> (HeaderName, HeaderValue) {
        header("x-admin-key", ADMIN_API_KEY)
    }

    /// Signature header for a webhook body.
    pub fn webhook_signature(body: &str) -> (HeaderName, HeaderValue) {
        let signature = hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), body.as_bytes())
            .expect("Failed to sign body");
        header("x-payment-signature", &signature)
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    fn txn(&self) -> Txn<'_> {
        Txn::begin(self.store.as_ref()).expect("Failed to begin transaction")
    }

    /// An active feature with one endpoint requiring `min_credits`.
    pub fn seed_endpoint(&self, min_credits: i64) -> FeatureEndpoint {
        let feature = Feature {
            id: FeatureId::generate(),
            name: "chat".into(),
            is_active: true,
        };
        let endpoint = FeatureEndpoint {
            id: FeatureEndpointId::generate(),
            feature: feature.id,
            name: "chat-completion".into(),
            min_credits,
            is_active: true,
        };
        let mut txn = self.txn();
        txn.put_feature(&feature).unwrap();
        txn.put_feature_endpoint(&endpoint).unwrap();
        txn.commit().unwrap();
        endpoint
    }

    /// An active profit rule.
    pub fn seed_profit_rule(&self, percentage_bps: u32) {
        let mut txn = self.txn();
        txn.put_profit_rule(&ProfitRule {
            id: ProfitRuleId::generate(),
            name: format!("margin {percentage_bps}"),
            percentage_bps,
            is_active: true,
        })
        .unwrap();
        txn.commit().unwrap();
    }

    /// A plan of `duration_days`.
    pub fn seed_plan(&self, duration_days: Option<u32>) -> Plan {
        let plan = Plan {
            id: PlanId::generate(),
            name: "Monthly".into(),
            duration_days,
            is_active: true,
        };
        let mut txn = self.txn();
        txn.put_plan(&plan).unwrap();
        txn.commit().unwrap();
        plan
    }

    /// A package with one package-plan granting `credits` for `price` USD cents.
    pub fn seed_package_plan(&self, credits: i64, price: i64, is_initial: bool) -> PackagePlan {
        let plan = self.seed_plan(Some(30));
        let mut package = Package::new("Pro", Vec::new());
        package.is_initial = is_initial;
        let mut package_plan =
            PackagePlan::new(package.id, plan.id, credits).with_price("USD", price);
        package_plan.is_initial = true;

        let mut txn = self.txn();
        txn.put_package(&package).unwrap();
        txn.put_package_plan(&package_plan).unwrap();
        txn.commit().unwrap();
        package_plan
    }

    /// A payment for `package_plan` in `status`.
    pub fn seed_payment(
        &self,
        user: &UserId,
        package_plan: &PackagePlan,
        status: PaymentStatus,
    ) -> PaymentTransaction {
        let currency = Currency::new("USD");
        let amount = package_plan.price_in(&currency).unwrap_or_default();
        let mut payment = PaymentTransaction::pending(
            *user,
            package_plan.package,
            package_plan.plan,
            amount,
            currency,
        );
        payment.status = status;
        let mut txn = self.txn();
        txn.put_payment_transaction(&payment).unwrap();
        txn.commit().unwrap();
        payment
    }

    /// Add `credits` to `user`'s wallet, creating it if needed.
    pub fn fund(&self, user: &UserId, credits: i64) {
        let mut txn = self.txn();
        txn.get_or_create_wallet(user).unwrap();
        txn.adjust_wallet(WalletTarget::User(*user), &WalletAdjustment::delta(credits))
            .unwrap();
        txn.commit().unwrap();
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// `user`'s wallet, if it exists.
    pub fn wallet(&self, user: &UserId) -> Option<Wallet> {
        self.txn().wallet_for_user(user).unwrap()
    }

    /// `user`'s ledger, newest first.
    pub fn ledger(&self, user: &UserId) -> Vec<LedgerEntry> {
        self.txn().ledger_for_user(user, 1000, 0).unwrap()
    }
}

/// Attach a `(name, value)` header pair to a request.
pub trait WithHeader {
    fn header_pair(self, header: (HeaderName, HeaderValue)) -> Self;
}

impl WithHeader for TestRequest {
    fn header_pair(self, (name, value): (HeaderName, HeaderValue)) -> Self {
        self.add_header(name, value)
    }
}

fn header(name: &'static str, value: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(name),
        HeaderValue::from_str(value).expect("Invalid header value"),
    )
}
