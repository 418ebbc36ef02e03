use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppResult, WebhookError},
    ledger::{Wallet, WalletLedger},
    payments::{
        PaymentOutcome, PaymentProcessor, ProviderHealth, Transaction, TransactionRepository,
    },
    payments::PaymentOrchestrator,
    schedule::{NewSchedule, Schedule, ScheduleEngine},
    webhooks::WebhookReconciler,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<WalletLedger>,
    pub transactions: Arc<TransactionRepository>,
    pub schedules: Arc<ScheduleEngine>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub processor: Arc<PaymentProcessor>,
    pub reconciler: Arc<WebhookReconciler>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: Vec<ProviderHealthEntry>,
}

#[derive(Serialize)]
pub struct ProviderHealthEntry {
    pub name: String,
    #[serde(flatten)]
    pub health: ProviderHealth,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = state
        .orchestrator
        .all_provider_health()
        .into_iter()
        .map(|(name, health)| ProviderHealthEntry { name, health })
        .collect();
    Json(HealthResponse {
        status: "ok",
        providers,
    })
}

/// POST /webhooks/:provider
///
/// The signature is computed over the raw body, so the body must reach the
/// reconciler untouched; axum hands us `Bytes` and deserialization happens
/// after verification.
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let header_name = format!("x-{}-signature", provider);
    let signature = headers
        .get(&header_name)
        .and_then(|value| value.to_str().ok())
        .ok_or(WebhookError::SignatureInvalid)?;

    state.reconciler.handle(&provider, &body, signature).await?;
    Ok(Json(serde_json::json!({ "received": true })))
}

/// POST /api/v1/schedules
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<NewSchedule>,
) -> AppResult<Json<Schedule>> {
    let schedule = state.schedules.create_schedule(request).await?;
    info!("created schedule {} for user {}", schedule.id, schedule.user_id);
    Ok(Json(schedule))
}

/// GET /api/v1/schedules/:id
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> AppResult<Json<Schedule>> {
    Ok(Json(state.schedules.get_schedule(schedule_id).await?))
}

/// POST /api/v1/schedules/:id/pause
pub async fn pause_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> AppResult<Json<Schedule>> {
    let schedule = state
        .schedules
        .pause_schedule(schedule_id, "Paused by user")
        .await?;
    Ok(Json(schedule))
}

/// POST /api/v1/schedules/:id/resume
pub async fn resume_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> AppResult<Json<Schedule>> {
    Ok(Json(state.schedules.resume_schedule(schedule_id).await?))
}

/// POST /api/v1/schedules/:id/cancel
pub async fn cancel_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> AppResult<Json<Schedule>> {
    Ok(Json(state.schedules.cancel_schedule(schedule_id).await?))
}

/// GET /api/v1/wallets/:user_id
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Wallet>> {
    Ok(Json(state.ledger.get_wallet(user_id).await?))
}

/// GET /api/v1/transactions/user/:user_id
pub async fn list_user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<Transaction>>> {
    Ok(Json(state.transactions.list_for_user(user_id).await?))
}

/// GET /api/v1/transactions/:id
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    Ok(Json(state.transactions.get(transaction_id).await?))
}

/// POST /api/v1/transactions/:id/retry
pub async fn retry_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<PaymentOutcome>> {
    let outcome = state.processor.retry_failed_payment(transaction_id).await?;
    Ok(Json(outcome))
}
