//! Payment gateway webhook.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use meterline_core::{PaymentStatus, PaymentTransactionId, SettlementEvent};

use crate::crypto::verify_hmac_sha256;
use crate::error::ApiError;
use crate::settlement::record_payment_status;
use crate::state::AppState;

/// Payment status notification from the gateway.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// The payment transaction.
    pub transaction_id: String,
    /// Its new status.
    pub status: PaymentStatus,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// `POST /webhooks/payments`
///
/// Records the reported status and queues a settlement when the payment
/// succeeded. Settlement is idempotent, so gateway retries are harmless.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get("x-payment-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing payment signature".into()))?;

        if !verify_hmac_sha256(secret.as_bytes(), body.as_bytes(), signature) {
            tracing::warn!("Invalid payment webhook signature");
            return Err(ApiError::BadRequest("Invalid webhook signature".into()));
        }
    } else {
        tracing::warn!("Payment webhook secret not configured - skipping signature verification");
    }

    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let transaction_id: PaymentTransactionId = webhook
        .transaction_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid transaction_id".into()))?;

    let payment = record_payment_status(state.store.as_ref(), &transaction_id, webhook.status)?;
    tracing::info!(
        transaction_id = %payment.id,
        status = ?payment.status,
        "Payment webhook received"
    );

    if payment.status == PaymentStatus::Success {
        state
            .queue
            .publish(SettlementEvent::from(&payment))
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    }

    Ok(Json(WebhookResponse { received: true }))
}
