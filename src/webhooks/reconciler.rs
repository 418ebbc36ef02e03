use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, PaymentError, WebhookError};
use crate::ledger::WalletLedger;
use crate::payments::{Transaction, TransactionRepository, TransactionStatus};
use crate::providers::registry::ProviderRegistry;

/// Provider callback payload: `{ "event": "...", "data": { ... } }`
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Settles transactions the synchronous provider call left in flight.
///
/// Every handler checks current status before mutating, so duplicate
/// deliveries of the same event are no-ops.
pub struct WebhookReconciler {
    registry: Arc<ProviderRegistry>,
    transactions: Arc<TransactionRepository>,
    ledger: Arc<WalletLedger>,
}

impl WebhookReconciler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transactions: Arc<TransactionRepository>,
        ledger: Arc<WalletLedger>,
    ) -> Self {
        Self {
            registry,
            transactions,
            ledger,
        }
    }

    /// Verify the signature over the raw body, then dispatch on event type.
    /// Nothing is parsed, let alone mutated, before the signature checks out.
    pub async fn handle(
        &self,
        provider_name: &str,
        payload: &[u8],
        signature: &str,
    ) -> AppResult<()> {
        let provider = self
            .registry
            .get(provider_name)
            .ok_or_else(|| WebhookError::UnknownProvider(provider_name.to_string()))?;

        if !provider.verify_webhook_signature(payload, signature) {
            warn!("rejected webhook for {}: bad signature", provider_name);
            return Err(WebhookError::SignatureInvalid.into());
        }

        let event: WebhookEvent = serde_json::from_slice(payload)?;
        info!(
            "webhook from {}: {} (reference {})",
            provider_name, event.event, event.data.reference
        );

        match event.event.as_str() {
            "transfer.success" => self.on_transfer_success(&event.data).await,
            "transfer.failed" => self.on_transfer_failed(&event.data).await,
            "transfer.reversed" => self.on_transfer_reversed(&event.data).await,
            other => Err(WebhookError::UnknownEvent(other.to_string()).into()),
        }
    }

    /// Primary reconciliation path for asynchronous transfers: the funds
    /// were left locked at initiation, so settle them now.
    async fn on_transfer_success(&self, data: &WebhookData) -> AppResult<()> {
        let transaction = self.find_transaction(&data.reference).await?;
        match transaction.status {
            TransactionStatus::Success => {
                info!("transaction {} already settled", transaction.id);
                Ok(())
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {
                // The status transition is the claim on the reservation:
                // whichever delivery (or racing verify job) wins it performs
                // the one debit, losers see a terminal state and stand down
                match self
                    .transactions
                    .update_status(transaction.id, TransactionStatus::Success, None)
                    .await
                {
                    Ok(_) => {
                        self.ledger
                            .debit_wallet(transaction.user_id, transaction.amount, true)
                            .await?;
                        info!("transaction {} settled by webhook", transaction.id);
                        Ok(())
                    }
                    Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                        info!(
                            "transaction {} settled concurrently, skipping",
                            transaction.id
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            other => {
                warn!(
                    "transfer.success for transaction {} in state {}, ignoring",
                    transaction.id, other
                );
                Ok(())
            }
        }
    }

    async fn on_transfer_failed(&self, data: &WebhookData) -> AppResult<()> {
        let transaction = self.find_transaction(&data.reference).await?;
        match transaction.status {
            TransactionStatus::Failed => {
                info!("transaction {} already failed", transaction.id);
                Ok(())
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {
                let reason = data
                    .message
                    .clone()
                    .unwrap_or_else(|| "Transfer failed".to_string());
                match self
                    .transactions
                    .update_status(transaction.id, TransactionStatus::Failed, Some(reason))
                    .await
                {
                    Ok(_) => {
                        self.ledger
                            .unlock_funds(transaction.user_id, transaction.amount)
                            .await?;
                        info!("transaction {} failed by webhook", transaction.id);
                        Ok(())
                    }
                    Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                        info!(
                            "transaction {} reconciled concurrently, skipping",
                            transaction.id
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            other => {
                warn!(
                    "transfer.failed for transaction {} in state {}, ignoring",
                    transaction.id, other
                );
                Ok(())
            }
        }
    }

    /// The provider clawed a settled transfer back; refund the wallet. A
    /// transaction still in flight is settled first so the refund has a
    /// debit to reverse.
    async fn on_transfer_reversed(&self, data: &WebhookData) -> AppResult<()> {
        let transaction = self.find_transaction(&data.reference).await?;
        match transaction.status {
            TransactionStatus::Reversed => {
                info!("transaction {} already reversed", transaction.id);
                Ok(())
            }
            TransactionStatus::Success => {
                self.refund(&transaction).await
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {
                // Settle first so the refund has a debit to reverse; a lost
                // transition means another path is reconciling it and a
                // redelivery will find the terminal state
                match self
                    .transactions
                    .update_status(transaction.id, TransactionStatus::Success, None)
                    .await
                {
                    Ok(_) => {
                        self.ledger
                            .debit_wallet(transaction.user_id, transaction.amount, true)
                            .await?;
                        self.refund(&transaction).await
                    }
                    Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                        info!(
                            "transaction {} reconciled concurrently, skipping reversal",
                            transaction.id
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            TransactionStatus::Failed => {
                warn!(
                    "transfer.reversed for failed transaction {}, ignoring",
                    transaction.id
                );
                Ok(())
            }
        }
    }

    async fn refund(&self, transaction: &Transaction) -> AppResult<()> {
        // Winning the Success -> Reversed transition is what entitles this
        // delivery to the single credit
        match self
            .transactions
            .update_status(transaction.id, TransactionStatus::Reversed, None)
            .await
        {
            Ok(_) => {}
            Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                info!("transaction {} already reversed, skipping", transaction.id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.ledger
            .credit_wallet(transaction.user_id, transaction.amount)
            .await?;
        info!(
            "transaction {} reversed, {} refunded to user {}",
            transaction.id, transaction.amount, transaction.user_id
        );
        Ok(())
    }

    /// The reference in a callback is the provider's own reference for
    /// transfers it assigned one, or the reference we supplied (our
    /// transaction id) otherwise.
    async fn find_transaction(&self, reference: &str) -> AppResult<Transaction> {
        if let Some(transaction) = self
            .transactions
            .find_by_provider_reference(reference)
            .await?
        {
            return Ok(transaction);
        }
        if let Ok(id) = reference.parse::<Uuid>() {
            if let Ok(transaction) = self.transactions.get(id).await {
                return Ok(transaction);
            }
        }
        Err(AppError::NotFound(format!(
            "No transaction for webhook reference {}",
            reference
        )))
    }
}
