use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Wallet ledger errors
///
/// Insufficient available balance is NOT represented here: a failed fund
/// lock is an expected business outcome and is returned as a `LockOutcome`,
/// never raised as an error.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Wallet not found for user {0}")]
    WalletNotFound(uuid::Uuid),

    #[error("Invalid ledger state: {0}")]
    InvalidState(String),

    #[error("Transfer rejected: source wallet cannot cover {required} (available {available})")]
    TransferUnfunded { required: String, available: String },
}

/// Payment pipeline errors
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("No payment provider available")]
    ProviderUnavailable,

    #[error("Provider {provider} error: {message}")]
    ProviderError { provider: String, message: String },

    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Transaction in invalid state: {current}, expected: {expected}")]
    InvalidState { current: String, expected: String },

    #[error("Max retries exceeded for transaction {transaction_id} ({retry_count} attempts)")]
    MaxRetriesExceeded {
        transaction_id: uuid::Uuid,
        retry_count: i32,
    },
}

/// Schedule state machine errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Schedule not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("Schedule in invalid state: {current}, expected: {expected}")]
    InvalidState { current: String, expected: String },

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfig(String),
}

/// Webhook processing errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown webhook event: {0}")]
    UnknownEvent(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Webhook(WebhookError::SignatureInvalid) => (
                StatusCode::UNAUTHORIZED,
                "SIGNATURE_INVALID",
                "Webhook signature verification failed".to_string(),
                None,
            ),
            AppError::Webhook(WebhookError::MalformedPayload(msg)) => (
                StatusCode::BAD_REQUEST,
                "MALFORMED_PAYLOAD",
                format!("Malformed webhook payload: {}", msg),
                None,
            ),
            AppError::Webhook(WebhookError::UnknownEvent(event)) => (
                StatusCode::BAD_REQUEST,
                "UNKNOWN_EVENT",
                format!("Unknown webhook event: {}", event),
                Some(serde_json::json!({ "event": event })),
            ),
            AppError::Webhook(WebhookError::UnknownProvider(name)) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_PROVIDER",
                format!("Unknown provider: {}", name),
                None,
            ),
            AppError::Payment(PaymentError::ProviderUnavailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDER_UNAVAILABLE",
                "No payment provider is currently available".to_string(),
                None,
            ),
            AppError::Payment(PaymentError::DuplicateIdempotencyKey(key)) => (
                StatusCode::CONFLICT,
                "DUPLICATE_IDEMPOTENCY_KEY",
                "A transaction already exists for this idempotency key".to_string(),
                Some(serde_json::json!({ "idempotency_key": key })),
            ),
            AppError::Payment(PaymentError::MaxRetriesExceeded {
                transaction_id,
                retry_count,
            }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MAX_RETRIES_EXCEEDED",
                format!("Transaction {} cannot be retried again", transaction_id),
                Some(serde_json::json!({ "retry_count": retry_count })),
            ),
            AppError::Schedule(ScheduleError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "SCHEDULE_NOT_FOUND",
                format!("Schedule not found: {}", id),
                None,
            ),
            AppError::Schedule(ScheduleError::InvalidState { current, expected }) => (
                StatusCode::CONFLICT,
                "SCHEDULE_INVALID_STATE",
                format!(
                    "Schedule in invalid state: {}, expected: {}",
                    current, expected
                ),
                None,
            ),
            AppError::Ledger(LedgerError::WalletNotFound(user_id)) => (
                StatusCode::NOT_FOUND,
                "WALLET_NOT_FOUND",
                format!("Wallet not found for user {}", user_id),
                None,
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Webhook(WebhookError::MalformedPayload(error.to_string()))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
