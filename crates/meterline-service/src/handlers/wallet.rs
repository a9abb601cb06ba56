//! Wallet handlers for the authenticated user.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meterline_core::{EntryType, LedgerEntry, LedgerSource, Wallet};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::wallets::InitialGrantOutcome;

/// Default ledger page size.
const DEFAULT_LEDGER_LIMIT: usize = 50;

/// Wallet view.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    /// Wallet ID.
    pub wallet_id: String,
    /// Owner.
    pub user_id: String,
    /// Current balance.
    pub balance: i64,
    /// Entitled package.
    pub package_id: Option<String>,
    /// Entitled plan.
    pub plan_id: Option<String>,
    /// Entitlement expiry; `null` when it never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the onboarding credits were granted.
    pub initial_token_given: bool,
    /// Whether the onboarding package was granted.
    pub initial_package_given: bool,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            wallet_id: wallet.id.to_string(),
            user_id: wallet.user.to_string(),
            balance: wallet.credits,
            package_id: wallet.package.map(|p| p.to_string()),
            plan_id: wallet.plan.map(|p| p.to_string()),
            expires_at: wallet.expires_at,
            initial_token_given: wallet.initial_token_given,
            initial_package_given: wallet.initial_package_given,
        }
    }
}

/// Ledger page query.
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// Page size (max 100).
    #[serde(default)]
    pub limit: Option<usize>,
    /// Entries to skip.
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Ledger entry view.
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    /// Entry ID.
    pub id: String,
    /// `increase` or `decrease`.
    pub entry_type: EntryType,
    /// Magnitude of the change.
    pub amount: i64,
    /// Balance after the entry.
    pub balance_after: i64,
    /// Why the balance changed.
    pub source: LedgerSource,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            entry_type: entry.entry_type(),
            amount: entry.amount,
            balance_after: entry.balance_after,
            source: entry.source,
            created_at: entry.created_at,
        }
    }
}

/// Ledger page response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntryResponse>,
}

/// Initial grant response.
#[derive(Debug, Serialize)]
pub struct InitialGrantResponse {
    /// `granted`, `already_granted` or `no_initial_package`.
    pub status: &'static str,
    /// Credits added by this call.
    pub credits_granted: i64,
    /// Balance after the call.
    pub balance: i64,
}

/// `GET /v1/wallet`
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state.wallets.wallet(&auth.user_id)?;
    Ok(Json(WalletResponse::from(&wallet)))
}

/// `GET /v1/wallet/ledger`
pub async fn get_ledger(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    query: Result<Query<LedgerQuery>, QueryRejection>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let Query(query) = query?;
    let entries = state.wallets.ledger(
        &auth.user_id,
        query.limit.unwrap_or(DEFAULT_LEDGER_LIMIT),
        query.offset.unwrap_or(0),
    )?;
    Ok(Json(LedgerResponse {
        entries: entries.into_iter().map(LedgerEntryResponse::from).collect(),
    }))
}

/// `POST /v1/wallet/initial-grant`
pub async fn initial_grant(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<InitialGrantResponse>, ApiError> {
    let outcome = state.wallets.grant_initial(&auth.user_id)?;
    let (status, credits_granted) = match &outcome {
        InitialGrantOutcome::Granted { credits, .. } => ("granted", *credits),
        InitialGrantOutcome::AlreadyGranted { .. } => ("already_granted", 0),
        InitialGrantOutcome::NoInitialPackage { .. } => ("no_initial_package", 0),
    };
    Ok(Json(InitialGrantResponse {
        status,
        credits_granted,
        balance: outcome.wallet().credits,
    }))
}
