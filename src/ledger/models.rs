use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's wallet. Invariant: 0 <= locked_balance <= balance.
///
/// Mutated only through the ledger operations, each of which holds the
/// wallet's exclusive lock for its full duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub locked_balance: Decimal,
    /// Optimistic concurrency counter, bumped on every mutation
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The only amount eligible for new reservations
    pub fn available_balance(&self) -> Decimal {
        self.balance - self.locked_balance
    }
}

/// Result of a fund-lock attempt. `success: false` is an expected business
/// outcome (insufficient available balance), not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOutcome {
    pub success: bool,
    pub available_balance: Decimal,
}
