pub mod models;
pub mod repository;

pub use models::{LockOutcome, Wallet};
pub use repository::WalletLedger;
