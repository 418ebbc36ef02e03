use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::{LockOutcome, Wallet};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Wallet ledger - THE source of truth for all balances.
///
/// Each wallet row carries its own mutex, held for the full duration of a
/// ledger operation. This is the in-process equivalent of a
/// `SELECT ... FOR UPDATE` row lock: two concurrent operations on the same
/// wallet serialize, and the second sees the first's updated balances
/// before deciding. In production the map would be PostgreSQL rows.
pub struct WalletLedger {
    wallets: RwLock<HashMap<Uuid, Arc<Mutex<Wallet>>>>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self {
            wallets: RwLock::new(HashMap::new()),
        }
    }

    /// Create a wallet for a newly registered user. Idempotent.
    pub async fn create_wallet(&self, user_id: Uuid) -> AppResult<Wallet> {
        let mut wallets = self.wallets.write().await;
        let row = wallets
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Wallet::new(user_id))))
            .clone();
        drop(wallets);
        let wallet = row.lock().await.clone();
        Ok(wallet)
    }

    pub async fn get_wallet(&self, user_id: Uuid) -> AppResult<Wallet> {
        let row = self.row(user_id).await?;
        let wallet = row.lock().await;
        Ok(wallet.clone())
    }

    /// Reserve `amount` against the wallet's available balance.
    ///
    /// Succeeds iff `available >= amount`; otherwise returns
    /// `success: false` without mutating state. Never errors for
    /// insufficient funds.
    pub async fn lock_funds(&self, user_id: Uuid, amount: Decimal) -> AppResult<LockOutcome> {
        let row = self.row(user_id).await?;
        let mut wallet = row.lock().await;

        let available = wallet.available_balance();
        if available < amount {
            debug!(
                "lock_funds rejected for {}: requested {} available {}",
                user_id, amount, available
            );
            return Ok(LockOutcome {
                success: false,
                available_balance: available,
            });
        }

        wallet.locked_balance += amount;
        Self::touch(&mut wallet);

        Ok(LockOutcome {
            success: true,
            available_balance: wallet.available_balance(),
        })
    }

    /// Release previously locked funds back to the available balance.
    pub async fn unlock_funds(&self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        let row = self.row(user_id).await?;
        let mut wallet = row.lock().await;

        if amount > wallet.locked_balance {
            return Err(LedgerError::InvalidState(format!(
                "cannot unlock {} with only {} locked",
                amount, wallet.locked_balance
            ))
            .into());
        }

        wallet.locked_balance -= amount;
        Self::touch(&mut wallet);
        Ok(())
    }

    /// Finalize a spend. With `from_locked` the amount is taken out of the
    /// reservation made by `lock_funds`; otherwise it must fit within the
    /// available balance.
    pub async fn debit_wallet(
        &self,
        user_id: Uuid,
        amount: Decimal,
        from_locked: bool,
    ) -> AppResult<()> {
        let row = self.row(user_id).await?;
        let mut wallet = row.lock().await;

        if from_locked {
            if amount > wallet.locked_balance {
                return Err(LedgerError::InvalidState(format!(
                    "cannot debit {} from locked balance of {}",
                    amount, wallet.locked_balance
                ))
                .into());
            }
            wallet.locked_balance -= amount;
        } else if wallet.available_balance() < amount {
            return Err(LedgerError::InvalidState(format!(
                "cannot debit {} with only {} available",
                amount,
                wallet.available_balance()
            ))
            .into());
        }

        wallet.balance -= amount;
        Self::touch(&mut wallet);
        Ok(())
    }

    /// Unconditional credit (top-ups, refunds, reversals).
    pub async fn credit_wallet(&self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        let row = self.row(user_id).await?;
        let mut wallet = row.lock().await;

        wallet.balance += amount;
        Self::touch(&mut wallet);
        Ok(())
    }

    /// Atomic wallet-to-wallet transfer. Both rows are locked in ascending
    /// user-id order so two opposing transfers cannot deadlock.
    pub async fn transfer_between_wallets(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Decimal,
    ) -> AppResult<()> {
        if from_user_id == to_user_id {
            return Err(AppError::InvalidInput(
                "cannot transfer between a wallet and itself".to_string(),
            ));
        }

        let from_row = self.row(from_user_id).await?;
        let to_row = self.row(to_user_id).await?;

        let (first, second) = if from_user_id < to_user_id {
            (&from_row, &to_row)
        } else {
            (&to_row, &from_row)
        };

        let mut first_guard = first.lock().await;
        let mut second_guard = second.lock().await;

        let (from_wallet, to_wallet) = if from_user_id < to_user_id {
            (&mut *first_guard, &mut *second_guard)
        } else {
            (&mut *second_guard, &mut *first_guard)
        };

        if from_wallet.available_balance() < amount {
            return Err(LedgerError::TransferUnfunded {
                required: amount.to_string(),
                available: from_wallet.available_balance().to_string(),
            }
            .into());
        }

        from_wallet.balance -= amount;
        Self::touch(from_wallet);
        to_wallet.balance += amount;
        Self::touch(to_wallet);

        debug!(
            "transferred {} from {} to {}",
            amount, from_user_id, to_user_id
        );
        Ok(())
    }

    async fn row(&self, user_id: Uuid) -> AppResult<Arc<Mutex<Wallet>>> {
        let wallets = self.wallets.read().await;
        wallets
            .get(&user_id)
            .cloned()
            .ok_or_else(|| LedgerError::WalletNotFound(user_id).into())
    }

    fn touch(wallet: &mut Wallet) {
        wallet.version += 1;
        wallet.updated_at = Utc::now();
    }
}

impl Default for WalletLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn funded_wallet(ledger: &WalletLedger, balance: Decimal) -> Uuid {
        let user_id = Uuid::new_v4();
        ledger.create_wallet(user_id).await.unwrap();
        ledger.credit_wallet(user_id, balance).await.unwrap();
        user_id
    }

    #[tokio::test]
    async fn lock_within_available_succeeds() {
        let ledger = WalletLedger::new();
        let user = funded_wallet(&ledger, dec!(1000)).await;

        let outcome = ledger.lock_funds(user, dec!(400)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.available_balance, dec!(600));

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.balance, dec!(1000));
        assert_eq!(wallet.locked_balance, dec!(400));
    }

    #[tokio::test]
    async fn lock_beyond_available_is_rejected_without_mutation() {
        let ledger = WalletLedger::new();
        let user = funded_wallet(&ledger, dec!(100)).await;
        ledger.lock_funds(user, dec!(80)).await.unwrap();

        let outcome = ledger.lock_funds(user, dec!(30)).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.available_balance, dec!(20));

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.locked_balance, dec!(80));
    }

    #[tokio::test]
    async fn concurrent_locks_exactly_one_wins() {
        let ledger = Arc::new(WalletLedger::new());
        let user = funded_wallet(&ledger, dec!(100)).await;

        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.lock_funds(user, dec!(100)).await.unwrap() })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.lock_funds(user, dec!(100)).await.unwrap() })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a.success ^ b.success);

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.locked_balance, dec!(100));
    }

    #[tokio::test]
    async fn unlock_more_than_locked_is_invalid_state() {
        let ledger = WalletLedger::new();
        let user = funded_wallet(&ledger, dec!(100)).await;
        ledger.lock_funds(user, dec!(50)).await.unwrap();

        let err = ledger.unlock_funds(user, dec!(60)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn debit_from_locked_releases_reservation() {
        let ledger = WalletLedger::new();
        let user = funded_wallet(&ledger, dec!(1000)).await;
        ledger.lock_funds(user, dec!(250)).await.unwrap();

        ledger.debit_wallet(user, dec!(250), true).await.unwrap();

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.balance, dec!(750));
        assert_eq!(wallet.locked_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn unlocked_debit_respects_available_balance() {
        let ledger = WalletLedger::new();
        let user = funded_wallet(&ledger, dec!(100)).await;
        ledger.lock_funds(user, dec!(90)).await.unwrap();

        let err = ledger.debit_wallet(user, dec!(20), false).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::InvalidState(_))
        ));

        ledger.debit_wallet(user, dec!(10), false).await.unwrap();
        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.balance, dec!(90));
    }

    #[tokio::test]
    async fn invariant_holds_across_operation_sequence() {
        let ledger = WalletLedger::new();
        let user = funded_wallet(&ledger, dec!(1000)).await;

        let check = |w: &Wallet| {
            assert!(w.locked_balance >= Decimal::ZERO);
            assert!(w.locked_balance <= w.balance);
        };

        ledger.lock_funds(user, dec!(600)).await.unwrap();
        check(&ledger.get_wallet(user).await.unwrap());
        ledger.unlock_funds(user, dec!(100)).await.unwrap();
        check(&ledger.get_wallet(user).await.unwrap());
        ledger.debit_wallet(user, dec!(500), true).await.unwrap();
        check(&ledger.get_wallet(user).await.unwrap());
        ledger.credit_wallet(user, dec!(250)).await.unwrap();
        check(&ledger.get_wallet(user).await.unwrap());
        ledger.debit_wallet(user, dec!(300), false).await.unwrap();
        check(&ledger.get_wallet(user).await.unwrap());

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.balance, dec!(450));
        assert_eq!(wallet.locked_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_rejects_unfunded_source() {
        let ledger = WalletLedger::new();
        let alice = funded_wallet(&ledger, dec!(300)).await;
        let bob = funded_wallet(&ledger, dec!(0)).await;

        ledger
            .transfer_between_wallets(alice, bob, dec!(120))
            .await
            .unwrap();
        assert_eq!(ledger.get_wallet(alice).await.unwrap().balance, dec!(180));
        assert_eq!(ledger.get_wallet(bob).await.unwrap().balance, dec!(120));

        let err = ledger
            .transfer_between_wallets(alice, bob, dec!(500))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::TransferUnfunded { .. })
        ));
    }

    #[tokio::test]
    async fn version_bumps_on_every_mutation() {
        let ledger = WalletLedger::new();
        let user = Uuid::new_v4();
        ledger.create_wallet(user).await.unwrap();

        ledger.credit_wallet(user, dec!(10)).await.unwrap();
        ledger.lock_funds(user, dec!(5)).await.unwrap();
        ledger.unlock_funds(user, dec!(5)).await.unwrap();

        assert_eq!(ledger.get_wallet(user).await.unwrap().version, 3);
    }
}
