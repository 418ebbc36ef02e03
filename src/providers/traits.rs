use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Provider-side state of a transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Success,
    Pending,
    Processing,
    Failed,
    Reversed,
}

impl TransferStatus {
    /// Terminal-success check: only `Success` means the money has moved.
    /// `Pending`/`Processing` transfers settle later via webhook or verify.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, TransferStatus::Success)
    }

    pub fn from_provider_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "success" | "successful" | "completed" => TransferStatus::Success,
            "processing" | "otp" => TransferStatus::Processing,
            "failed" | "error" | "abandoned" => TransferStatus::Failed,
            "reversed" => TransferStatus::Reversed,
            _ => TransferStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub recipient_account: String,
    pub recipient_bank: String,
    pub recipient_name: String,
    /// Our reference for the transfer, unique per attempt
    pub reference: String,
    pub narration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferResponse {
    pub success: bool,
    pub provider_reference: Option<String>,
    pub status: TransferStatus,
    pub message: Option<String>,
    /// Raw provider response body, kept for fee extraction
    pub raw: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct TransferVerification {
    pub success: bool,
    pub status: TransferStatus,
    pub amount: Option<Decimal>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountValidation {
    pub valid: bool,
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
    pub code: String,
    pub active: bool,
}

/// Contract every transfer provider implements. The orchestrator depends
/// only on this trait, never a concrete provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate_transfer(&self, request: TransferRequest) -> AppResult<TransferResponse>;

    async fn verify_transfer(&self, reference: &str) -> AppResult<TransferVerification>;

    async fn validate_bank_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> AppResult<AccountValidation>;

    async fn get_banks(&self) -> AppResult<Vec<Bank>>;

    /// Verify an inbound webhook signature over the raw payload bytes.
    /// Must be constant-time with respect to the signature contents.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Cheap liveness probe used by the orchestrator's health checks
    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
