use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppResult, PaymentError};
use crate::payments::models::{NewTransaction, Transaction, TransactionStatus};

/// Transaction store. The idempotency-key index enforces uniqueness the way
/// the database unique constraint would: it is the final backstop against
/// races that slip past the processor's dedup check.
pub struct TransactionRepository {
    transactions: RwLock<TransactionStore>,
}

#[derive(Default)]
struct TransactionStore {
    by_id: HashMap<Uuid, Transaction>,
    by_idempotency_key: HashMap<String, Uuid>,
}

impl TransactionRepository {
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(TransactionStore::default()),
        }
    }

    pub async fn create(&self, new: NewTransaction) -> AppResult<Transaction> {
        let mut store = self.transactions.write().await;
        if store.by_idempotency_key.contains_key(&new.idempotency_key) {
            return Err(
                PaymentError::DuplicateIdempotencyKey(new.idempotency_key.clone()).into(),
            );
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            schedule_id: new.schedule_id,
            idempotency_key: new.idempotency_key.clone(),
            amount: new.amount,
            fee: new.fee,
            status: new.status,
            provider: new.provider,
            provider_reference: None,
            retry_count: new.retry_count,
            failure_reason: new.failure_reason,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        store
            .by_idempotency_key
            .insert(new.idempotency_key, transaction.id);
        store.by_id.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    pub async fn get(&self, transaction_id: Uuid) -> AppResult<Transaction> {
        let store = self.transactions.read().await;
        store
            .by_id
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| {
                crate::error::AppError::NotFound(format!("Transaction {} not found", transaction_id))
            })
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> AppResult<Option<Transaction>> {
        let store = self.transactions.read().await;
        Ok(store
            .by_idempotency_key
            .get(key)
            .and_then(|id| store.by_id.get(id))
            .cloned())
    }

    pub async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<Transaction>> {
        let store = self.transactions.read().await;
        Ok(store
            .by_id
            .values()
            .find(|t| t.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Transaction>> {
        let store = self.transactions.read().await;
        let mut transactions: Vec<Transaction> = store
            .by_id
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(transactions)
    }

    /// Move a transaction to a new status, enforcing the transition table.
    pub async fn update_status(
        &self,
        transaction_id: Uuid,
        to: TransactionStatus,
        failure_reason: Option<String>,
    ) -> AppResult<Transaction> {
        let mut store = self.transactions.write().await;
        let transaction = store.by_id.get_mut(&transaction_id).ok_or_else(|| {
            crate::error::AppError::NotFound(format!("Transaction {} not found", transaction_id))
        })?;

        if !transaction.status.can_transition_to(to) {
            return Err(PaymentError::InvalidState {
                current: transaction.status.to_string(),
                expected: to.to_string(),
            }
            .into());
        }

        transaction.status = to;
        transaction.updated_at = Utc::now();
        if matches!(to, TransactionStatus::Success | TransactionStatus::Reversed) {
            transaction.completed_at = Some(transaction.updated_at);
        }
        if failure_reason.is_some() {
            transaction.failure_reason = failure_reason;
        }
        Ok(transaction.clone())
    }

    pub async fn set_provider_details(
        &self,
        transaction_id: Uuid,
        provider: &str,
        provider_reference: Option<String>,
    ) -> AppResult<()> {
        let mut store = self.transactions.write().await;
        let transaction = store.by_id.get_mut(&transaction_id).ok_or_else(|| {
            crate::error::AppError::NotFound(format!("Transaction {} not found", transaction_id))
        })?;
        transaction.provider = Some(provider.to_string());
        transaction.provider_reference = provider_reference;
        transaction.updated_at = Utc::now();
        Ok(())
    }

    pub async fn set_fee(&self, transaction_id: Uuid, fee: rust_decimal::Decimal) -> AppResult<()> {
        let mut store = self.transactions.write().await;
        let transaction = store.by_id.get_mut(&transaction_id).ok_or_else(|| {
            crate::error::AppError::NotFound(format!("Transaction {} not found", transaction_id))
        })?;
        transaction.fee = fee;
        transaction.updated_at = Utc::now();
        Ok(())
    }

    pub async fn set_retry_count(&self, transaction_id: Uuid, retry_count: i32) -> AppResult<()> {
        let mut store = self.transactions.write().await;
        let transaction = store.by_id.get_mut(&transaction_id).ok_or_else(|| {
            crate::error::AppError::NotFound(format!("Transaction {} not found", transaction_id))
        })?;
        transaction.retry_count = retry_count;
        transaction.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for TransactionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use rust_decimal_macros::dec;

    fn new_tx(key: &str) -> NewTransaction {
        NewTransaction {
            user_id: Uuid::new_v4(),
            schedule_id: None,
            idempotency_key: key.to_string(),
            amount: dec!(100),
            fee: dec!(10),
            status: TransactionStatus::Pending,
            provider: None,
            retry_count: 0,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let repo = TransactionRepository::new();
        repo.create(new_tx("key-1")).await.unwrap();

        let err = repo.create(new_tx("key-1")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Payment(PaymentError::DuplicateIdempotencyKey(_))
        ));
    }

    #[tokio::test]
    async fn lookup_by_key_and_reference() {
        let repo = TransactionRepository::new();
        let tx = repo.create(new_tx("key-2")).await.unwrap();
        repo.set_provider_details(tx.id, "paystack", Some("TRF_123".to_string()))
            .await
            .unwrap();

        let by_key = repo.find_by_idempotency_key("key-2").await.unwrap().unwrap();
        assert_eq!(by_key.id, tx.id);

        let by_ref = repo
            .find_by_provider_reference("TRF_123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, tx.id);
        assert!(repo
            .find_by_provider_reference("TRF_999")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn status_transitions_are_validated() {
        let repo = TransactionRepository::new();
        let tx = repo.create(new_tx("key-3")).await.unwrap();

        repo.update_status(tx.id, TransactionStatus::Processing, None)
            .await
            .unwrap();
        let success = repo
            .update_status(tx.id, TransactionStatus::Success, None)
            .await
            .unwrap();
        assert!(success.completed_at.is_some());

        // Success can only move to Reversed
        let err = repo
            .update_status(tx.id, TransactionStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Payment(PaymentError::InvalidState { .. })
        ));

        repo.update_status(tx.id, TransactionStatus::Reversed, None)
            .await
            .unwrap();
    }
}
