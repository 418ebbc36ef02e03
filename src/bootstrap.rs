use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::info;

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::WalletLedger,
    payments::{OrchestratorConfig, PaymentOrchestrator, PaymentProcessor, TransactionRepository},
    providers::{paystack::PaystackProvider, registry::ProviderRegistry},
    schedule::ScheduleEngine,
    scheduler::{DueScheduleScanner, Job, JobDispatcher},
    webhooks::WebhookReconciler,
};

const JOB_QUEUE_CAPACITY: usize = 1024;

/// Wire the components together and start the background loops: the
/// due-schedule scanner, the job dispatcher, and the provider health probe.
pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let ledger = Arc::new(WalletLedger::new());
    let transactions = Arc::new(TransactionRepository::new());
    let schedules = Arc::new(ScheduleEngine::new());

    let mut registry = ProviderRegistry::new();
    let paystack = PaystackProvider::new(
        config.paystack_base_url.clone(),
        config.paystack_secret_key.clone(),
        Duration::from_secs(config.provider_timeout_secs),
    )?;
    registry.register(Arc::new(paystack));
    let registry = Arc::new(registry);
    info!("{} payment provider(s) registered", registry.len());

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        registry.clone(),
        OrchestratorConfig::default(),
    ));
    let processor = Arc::new(PaymentProcessor::new(
        ledger.clone(),
        transactions.clone(),
        schedules.clone(),
        orchestrator.clone(),
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        registry,
        transactions.clone(),
        ledger.clone(),
    ));

    let (queue_tx, queue_rx) = mpsc::channel::<Job>(JOB_QUEUE_CAPACITY);

    let scanner = DueScheduleScanner::new(
        schedules.clone(),
        queue_tx.clone(),
        Duration::from_secs(config.scan_interval_secs),
    );
    tokio::spawn(scanner.run());

    let dispatcher = JobDispatcher::new(
        processor.clone(),
        schedules.clone(),
        queue_tx,
        config.worker_count,
        Duration::from_secs(config.verify_delay_secs),
    );
    tokio::spawn(dispatcher.run(queue_rx));

    let health_orchestrator = orchestrator.clone();
    let probe_interval = Duration::from_secs(config.health_check_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            health_orchestrator.perform_health_check().await;
        }
    });

    info!("Background loops started");

    Ok(AppState {
        ledger,
        transactions,
        schedules,
        orchestrator,
        processor,
        reconciler,
    })
}
