//! Metering handlers: the start/end pair a gateway wraps around each call.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use meterline_core::{CostBreakdown, FeatureEndpointId, UserId};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::metering::{total_usage, Access, EndRequest, UsageItem};
use crate::state::AppState;

/// Pre-flight check request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartRequest {
    /// The caller.
    pub user_id: String,
    /// The endpoint about to be called.
    pub feature_endpoint_id: String,
}

/// Pre-flight check response.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    /// `accessible` or `not_accessible`.
    pub status: &'static str,
    /// Current balance.
    pub balance: i64,
    /// Machine-readable denial reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Human-readable denial message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Debit request for a completed call.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndBody {
    /// The caller.
    pub user_id: String,
    /// The endpoint that was called.
    pub feature_endpoint_id: String,
    /// Optional correlation key making the debit idempotent.
    #[serde(default)]
    pub usage_key: Option<String>,
    /// Usage items to price.
    pub usages: Vec<UsageItem>,
}

/// Debit response.
#[derive(Debug, Serialize)]
pub struct EndResponse {
    /// Always `returnable`.
    pub status: &'static str,
    /// Balance after the debit.
    pub balance: i64,
    /// How the charge was derived.
    pub cost: CostBreakdown,
    /// The usage record of the debit.
    pub usage_record_id: String,
    /// Whether an earlier debit with the same key was returned.
    pub replayed: bool,
}

/// `POST /v1/meter/start`
pub async fn start(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(request) = payload?;
    let user = parse_user(&request.user_id)?;
    let endpoint = parse_endpoint(&request.feature_endpoint_id)?;

    let outcome = state.metering.start(&user, &endpoint)?;
    tracing::debug!(
        service = %auth.service_name,
        user_id = %user,
        feature_endpoint_id = %endpoint,
        "Meter start"
    );

    let response = match outcome.access {
        Access::Accessible => StartResponse {
            status: "accessible",
            balance: outcome.balance,
            reason: None,
            message: None,
        },
        Access::NotAccessible(reason) => StartResponse {
            status: "not_accessible",
            balance: outcome.balance,
            reason: Some(reason.code()),
            message: Some(reason.to_string()),
        },
    };
    Ok(Json(response))
}

/// `POST /v1/meter/end`
pub async fn end(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    payload: Result<Json<EndBody>, JsonRejection>,
) -> Result<Json<EndResponse>, ApiError> {
    let Json(body) = payload?;
    let request = EndRequest {
        user: parse_user(&body.user_id)?,
        feature_endpoint: parse_endpoint(&body.feature_endpoint_id)?,
        usage: total_usage(&body.usages)?,
        usage_key: body.usage_key,
    };

    let outcome = state.metering.end(&request)?;
    tracing::debug!(
        service = %auth.service_name,
        user_id = %request.user,
        credits = outcome.cost.credits,
        replayed = outcome.replayed,
        "Meter end"
    );

    Ok(Json(EndResponse {
        status: "returnable",
        balance: outcome.balance,
        cost: outcome.cost,
        usage_record_id: outcome.usage_record.to_string(),
        replayed: outcome.replayed,
    }))
}

fn parse_user(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid user_id".into()))
}

fn parse_endpoint(raw: &str) -> Result<FeatureEndpointId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid feature_endpoint_id".into()))
}
