//! Post-settlement notifications.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use meterline_core::{BillingError, Result};

use crate::settlement::SettlementReceipt;

/// Timeout for mail API requests.
const MAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends best-effort notifications. Failures are logged by the caller and
/// never undo the operation that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A payment was settled and its credits are available.
    async fn payment_settled(&self, receipt: &SettlementReceipt) -> Result<()>;
}

/// Logs notifications instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_settled(&self, receipt: &SettlementReceipt) -> Result<()> {
        tracing::info!(
            user_id = %receipt.user,
            transaction_id = %receipt.payment,
            credits = receipt.credits,
            "Payment settled notification (mail API not configured)"
        );
        Ok(())
    }
}

/// Posts notifications to a transactional mail API.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    template: &'static str,
    user_id: String,
    data: MailData,
}

#[derive(Debug, Serialize)]
struct MailData {
    transaction_id: String,
    package_id: String,
    plan_id: String,
    credits: i64,
    balance: i64,
    amount: i64,
    currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

impl HttpMailer {
    /// Create a mailer posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Configuration`] if the HTTP client cannot be
    /// built.
    pub fn new(url: &str, api_key: Option<String>, from: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(MAIL_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Configuration(format!("mail client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn payment_settled(&self, receipt: &SettlementReceipt) -> Result<()> {
        let body = MailRequest {
            from: &self.from,
            template: "payment_settled",
            user_id: receipt.user.to_string(),
            data: MailData {
                transaction_id: receipt.payment.to_string(),
                package_id: receipt.package.to_string(),
                plan_id: receipt.plan.to_string(),
                credits: receipt.credits,
                balance: receipt.balance,
                amount: receipt.amount,
                currency: receipt.currency.to_string(),
                expires_at: receipt.expires_at.map(|at| at.to_rfc3339()),
            },
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BillingError::Notification(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BillingError::Notification(format!(
                "mail API returned {}",
                response.status()
            )));
        }

        tracing::debug!(
            user_id = %receipt.user,
            transaction_id = %receipt.payment,
            "Settlement notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use meterline_core::{
        Currency, LedgerEntryId, PackageId, PackageTransactionId, PaymentTransactionId, PlanId,
        UserId, WalletId,
    };
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn receipt() -> SettlementReceipt {
        SettlementReceipt {
            payment: PaymentTransactionId::generate(),
            user: UserId::generate(),
            wallet: WalletId::generate(),
            ledger_entry: LedgerEntryId::generate(),
            package_transaction: PackageTransactionId::generate(),
            package: PackageId::generate(),
            plan: PlanId::generate(),
            credits: 5000,
            balance: 5200,
            amount: 1999,
            currency: Currency::new("USD"),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn mailer_posts_the_receipt() {
        let server = MockServer::start().await;
        let receipt = receipt();
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer mail-key"))
            .and(body_partial_json(serde_json::json!({
                "template": "payment_settled",
                "user_id": receipt.user.to_string(),
                "data": { "credits": 5000, "currency": "USD" },
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(
            &format!("{}/send", server.uri()),
            Some("mail-key".into()),
            "billing@example.com",
        )
        .unwrap();
        mailer.payment_settled(&receipt).await.unwrap();
    }

    #[tokio::test]
    async fn mailer_reports_api_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(&server.uri(), None, "billing@example.com").unwrap();
        let err = mailer.payment_settled(&receipt()).await.unwrap_err();
        assert!(matches!(err, BillingError::Notification(_)));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier.payment_settled(&receipt()).await.unwrap();
    }
}
