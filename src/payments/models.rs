use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        }
    }

    /// Transitions are forward-only with two exceptions: a processing
    /// transfer may still fail, and a successful transfer may be reversed
    /// by the provider.
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Success)
                | (Pending, Failed)
                | (Processing, Success)
                | (Processing, Failed)
                | (Success, Reversed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One payment attempt, keyed by a caller-supplied idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub retry_count: i32,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for a transaction record
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub provider: Option<String>,
    pub retry_count: i32,
    pub failure_reason: Option<String>,
}

/// What a payment attempt produced, reported back to the caller and the
/// schedule engine
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub message: Option<String>,
}

impl PaymentOutcome {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
            message: tx.failure_reason.clone(),
        }
    }
}

/// Provider health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        };
        write!(f, "{}", s)
    }
}

/// In-memory, process-lifetime health record per provider. Rebuilt on
/// restart; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub failure_rate: f64,
    pub last_checked: DateTime<Utc>,
}

impl ProviderHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            failure_rate: 0.0,
            last_checked: Utc::now(),
        }
    }
}
