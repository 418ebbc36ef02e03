pub mod fees;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod repository;

pub use models::{
    HealthStatus, NewTransaction, PaymentOutcome, ProviderHealth, Transaction, TransactionStatus,
};
pub use orchestrator::{OrchestratorConfig, PaymentOrchestrator};
pub use processor::PaymentProcessor;
pub use repository::TransactionRepository;
