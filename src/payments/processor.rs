use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, PaymentError};
use crate::ledger::WalletLedger;
use crate::payments::fees;
use crate::payments::models::{NewTransaction, PaymentOutcome, Transaction, TransactionStatus};
use crate::payments::orchestrator::PaymentOrchestrator;
use crate::payments::repository::TransactionRepository;
use crate::providers::traits::{TransferRequest, TransferStatus};
use crate::schedule::{Schedule, ScheduleEngine};

/// A failed transaction may be retried this many times in total
pub const MAX_PAYMENT_RETRIES: i32 = 3;

/// The transactional unit of the pipeline: one call, one attempt, one
/// transaction row, one schedule bookkeeping entry. Idempotency-key dedup
/// makes the whole thing safe to re-run after a crash or queue redelivery.
pub struct PaymentProcessor {
    ledger: Arc<WalletLedger>,
    transactions: Arc<TransactionRepository>,
    schedules: Arc<ScheduleEngine>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl PaymentProcessor {
    pub fn new(
        ledger: Arc<WalletLedger>,
        transactions: Arc<TransactionRepository>,
        schedules: Arc<ScheduleEngine>,
        orchestrator: Arc<PaymentOrchestrator>,
    ) -> Self {
        Self {
            ledger,
            transactions,
            schedules,
            orchestrator,
        }
    }

    /// Execute one scheduled payment attempt.
    ///
    /// Every exit path that reserved funds either debits or unlocks them,
    /// and `mark_schedule_as_run` fires exactly once per attempt.
    pub async fn process_scheduled_payment(
        &self,
        schedule: &Schedule,
        idempotency_key: &str,
    ) -> AppResult<PaymentOutcome> {
        // A key that has been seen before returns the prior result; no
        // second attempt is ever made for the same key
        if let Some(existing) = self
            .transactions
            .find_by_idempotency_key(idempotency_key)
            .await?
        {
            info!(
                "idempotency key {} already processed as transaction {} ({})",
                idempotency_key, existing.id, existing.status
            );
            return Ok(PaymentOutcome::from_transaction(&existing));
        }

        let lock = self
            .ledger
            .lock_funds(schedule.user_id, schedule.amount)
            .await?;
        if !lock.success {
            info!(
                "schedule {} skipped: insufficient balance (available {})",
                schedule.id, lock.available_balance
            );
            let transaction = self
                .transactions
                .create(NewTransaction {
                    user_id: schedule.user_id,
                    schedule_id: Some(schedule.id),
                    idempotency_key: idempotency_key.to_string(),
                    amount: schedule.amount,
                    fee: fees::transfer_fee(schedule.amount, None).total,
                    status: TransactionStatus::Failed,
                    provider: None,
                    retry_count: 0,
                    failure_reason: Some("Insufficient balance".to_string()),
                })
                .await?;
            self.schedules
                .mark_schedule_as_run(schedule.id, false)
                .await?;
            return Ok(PaymentOutcome::from_transaction(&transaction));
        }

        // Funds are reserved from here on; create the pending transaction
        // before touching the provider
        let transaction = match self
            .transactions
            .create(NewTransaction {
                user_id: schedule.user_id,
                schedule_id: Some(schedule.id),
                idempotency_key: idempotency_key.to_string(),
                amount: schedule.amount,
                fee: fees::transfer_fee(schedule.amount, None).total,
                status: TransactionStatus::Pending,
                provider: None,
                retry_count: 0,
                failure_reason: None,
            })
            .await
        {
            Ok(transaction) => transaction,
            Err(AppError::Payment(PaymentError::DuplicateIdempotencyKey(key))) => {
                // Lost a race on the unique index: release our reservation
                // and hand back the winner's result
                self.ledger
                    .unlock_funds(schedule.user_id, schedule.amount)
                    .await?;
                let existing = self
                    .transactions
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("duplicate key {} with no transaction", key))
                    })?;
                return Ok(PaymentOutcome::from_transaction(&existing));
            }
            Err(e) => {
                self.ledger
                    .unlock_funds(schedule.user_id, schedule.amount)
                    .await?;
                return Err(e);
            }
        };

        let request = TransferRequest {
            amount: schedule.amount,
            recipient_account: schedule.recipient.account_number.clone(),
            recipient_bank: schedule.recipient.bank_code.clone(),
            recipient_name: schedule.recipient.name.clone(),
            reference: transaction.id.to_string(),
            narration: schedule.narration.clone(),
        };

        match self.orchestrator.initiate_payment(request, None).await {
            Ok(init) => {
                self.transactions
                    .set_provider_details(
                        transaction.id,
                        &init.provider,
                        init.response.provider_reference.clone(),
                    )
                    .await?;

                if init.response.success && init.response.status.is_terminal_success() {
                    let fee =
                        fees::transfer_fee(schedule.amount, init.response.raw.as_ref()).total;
                    self.transactions.set_fee(transaction.id, fee).await?;
                    // The transition is the claim on the reservation: an
                    // early webhook can settle first, in which case the
                    // debit already happened
                    let transaction = match self
                        .transactions
                        .update_status(transaction.id, TransactionStatus::Success, None)
                        .await
                    {
                        Ok(transaction) => {
                            self.ledger
                                .debit_wallet(schedule.user_id, schedule.amount, true)
                                .await?;
                            transaction
                        }
                        Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                            self.transactions.get(transaction.id).await?
                        }
                        Err(e) => return Err(e),
                    };
                    self.schedules
                        .mark_schedule_as_run(schedule.id, true)
                        .await?;
                    info!(
                        "schedule {} paid via {} (transaction {})",
                        schedule.id, init.provider, transaction.id
                    );
                    Ok(PaymentOutcome::from_transaction(&transaction))
                } else if init.response.success {
                    // Provider accepted but has not settled: funds stay
                    // locked until a webhook or verify job reconciles
                    let transaction = self
                        .transactions
                        .update_status(transaction.id, TransactionStatus::Processing, None)
                        .await?;
                    self.schedules
                        .mark_schedule_as_run(schedule.id, true)
                        .await?;
                    info!(
                        "schedule {} transfer in flight via {} (transaction {})",
                        schedule.id, init.provider, transaction.id
                    );
                    Ok(PaymentOutcome::from_transaction(&transaction))
                } else {
                    let reason = init
                        .response
                        .message
                        .unwrap_or_else(|| "Transfer failed".to_string());
                    self.fail_attempt(&transaction, schedule, reason).await
                }
            }
            Err(e) => {
                // Timeouts and transport errors land here; the reservation
                // must never outlive the attempt
                warn!(
                    "provider call failed for transaction {}: {}",
                    transaction.id, e
                );
                self.fail_attempt(&transaction, schedule, e.to_string()).await
            }
        }
    }

    /// Re-run a failed payment as a fresh attempt with a new idempotency
    /// key, carrying the retry counter forward.
    pub async fn retry_failed_payment(&self, transaction_id: Uuid) -> AppResult<PaymentOutcome> {
        let transaction = self.transactions.get(transaction_id).await?;

        if transaction.status != TransactionStatus::Failed {
            return Err(PaymentError::InvalidState {
                current: transaction.status.to_string(),
                expected: TransactionStatus::Failed.to_string(),
            }
            .into());
        }
        if transaction.retry_count >= MAX_PAYMENT_RETRIES {
            return Err(PaymentError::MaxRetriesExceeded {
                transaction_id,
                retry_count: transaction.retry_count,
            }
            .into());
        }
        let schedule_id = transaction.schedule_id.ok_or_else(|| {
            AppError::BadRequest(format!(
                "transaction {} is not linked to a schedule",
                transaction_id
            ))
        })?;

        let schedule = self.schedules.get_schedule(schedule_id).await?;
        let fresh_key = format!("retry-{}-{}", transaction_id, Uuid::new_v4());
        info!(
            "retrying failed transaction {} as new attempt (retry {})",
            transaction_id,
            transaction.retry_count + 1
        );

        let outcome = self.process_scheduled_payment(&schedule, &fresh_key).await?;
        self.transactions
            .set_retry_count(outcome.transaction_id, transaction.retry_count + 1)
            .await?;
        Ok(outcome)
    }

    /// Re-check a transaction the provider left non-terminal. Body of the
    /// delayed verify job; a no-op for transactions a webhook settled first.
    pub async fn verify_pending_payment(&self, transaction_id: Uuid) -> AppResult<PaymentOutcome> {
        let transaction = self.transactions.get(transaction_id).await?;
        if !matches!(
            transaction.status,
            TransactionStatus::Pending | TransactionStatus::Processing
        ) {
            return Ok(PaymentOutcome::from_transaction(&transaction));
        }

        let provider_name = transaction.provider.clone().ok_or_else(|| {
            AppError::Internal(format!(
                "transaction {} has no provider to verify against",
                transaction_id
            ))
        })?;
        let provider = self.orchestrator.provider(&provider_name).ok_or_else(|| {
            AppError::NotFound(format!("provider {} not registered", provider_name))
        })?;

        let reference = transaction
            .provider_reference
            .clone()
            .unwrap_or_else(|| transaction.id.to_string());
        let verification = provider.verify_transfer(&reference).await?;

        match verification.status {
            TransferStatus::Success => {
                // Winning the transition is the claim on the reservation;
                // losing it means a webhook settled the transaction first
                match self
                    .transactions
                    .update_status(transaction.id, TransactionStatus::Success, None)
                    .await
                {
                    Ok(transaction) => {
                        self.ledger
                            .debit_wallet(transaction.user_id, transaction.amount, true)
                            .await?;
                        info!("transaction {} settled on verification", transaction.id);
                        Ok(PaymentOutcome::from_transaction(&transaction))
                    }
                    Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                        let transaction = self.transactions.get(transaction.id).await?;
                        Ok(PaymentOutcome::from_transaction(&transaction))
                    }
                    Err(e) => Err(e),
                }
            }
            TransferStatus::Failed => {
                match self
                    .transactions
                    .update_status(
                        transaction.id,
                        TransactionStatus::Failed,
                        verification
                            .message
                            .or_else(|| Some("Transfer failed on verification".to_string())),
                    )
                    .await
                {
                    Ok(transaction) => {
                        self.ledger
                            .unlock_funds(transaction.user_id, transaction.amount)
                            .await?;
                        warn!("transaction {} failed on verification", transaction.id);
                        Ok(PaymentOutcome::from_transaction(&transaction))
                    }
                    Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                        let transaction = self.transactions.get(transaction.id).await?;
                        Ok(PaymentOutcome::from_transaction(&transaction))
                    }
                    Err(e) => Err(e),
                }
            }
            _ => {
                // Still in flight; a later webhook or verify pass settles it
                Ok(PaymentOutcome::from_transaction(&transaction))
            }
        }
    }

    /// Failure path shared by declines and provider-call errors: release
    /// the reservation, record the reason, count the failed run.
    async fn fail_attempt(
        &self,
        transaction: &Transaction,
        schedule: &Schedule,
        reason: String,
    ) -> AppResult<PaymentOutcome> {
        let transaction = match self
            .transactions
            .update_status(transaction.id, TransactionStatus::Failed, Some(reason))
            .await
        {
            Ok(transaction) => {
                if let Err(e) = self
                    .ledger
                    .unlock_funds(schedule.user_id, schedule.amount)
                    .await
                {
                    error!(
                        "failed to release reservation for transaction {}: {}",
                        transaction.id, e
                    );
                    return Err(e);
                }
                transaction
            }
            // A webhook for this very reference already reconciled it
            Err(AppError::Payment(PaymentError::InvalidState { .. })) => {
                self.transactions.get(transaction.id).await?
            }
            Err(e) => return Err(e),
        };
        self.schedules
            .mark_schedule_as_run(
                schedule.id,
                transaction.status == TransactionStatus::Success,
            )
            .await?;
        Ok(PaymentOutcome::from_transaction(&transaction))
    }
}
