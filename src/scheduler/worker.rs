use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::payments::{PaymentProcessor, TransactionStatus};
use crate::schedule::{ScheduleEngine, ScheduleStatus};

/// Work items flowing from the scanner (and from settled-but-unconfirmed
/// payments) to the worker pool.
#[derive(Debug)]
pub enum Job {
    ProcessPayment {
        schedule_id: Uuid,
        idempotency_key: String,
    },
    VerifyPayment {
        transaction_id: Uuid,
    },
}

/// Pulls jobs off the queue and runs each on its own task, bounded by a
/// semaphore so a burst of due schedules cannot exhaust provider
/// connections.
pub struct JobDispatcher {
    processor: Arc<PaymentProcessor>,
    engine: Arc<ScheduleEngine>,
    queue_tx: mpsc::Sender<Job>,
    concurrency: Arc<Semaphore>,
    verify_delay: Duration,
}

impl JobDispatcher {
    pub fn new(
        processor: Arc<PaymentProcessor>,
        engine: Arc<ScheduleEngine>,
        queue_tx: mpsc::Sender<Job>,
        worker_count: usize,
        verify_delay: Duration,
    ) -> Self {
        Self {
            processor,
            engine,
            queue_tx,
            concurrency: Arc::new(Semaphore::new(worker_count)),
            verify_delay,
        }
    }

    pub async fn run(self, mut queue_rx: mpsc::Receiver<Job>) {
        info!(
            "job dispatcher started ({} workers)",
            self.concurrency.available_permits()
        );
        while let Some(job) = queue_rx.recv().await {
            let permit = match self.concurrency.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed, shutting down
            };
            let processor = self.processor.clone();
            let engine = self.engine.clone();
            let queue_tx = self.queue_tx.clone();
            let verify_delay = self.verify_delay;
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute(job, processor, engine, queue_tx, verify_delay).await;
            });
        }
        info!("job dispatcher stopped");
    }

    async fn execute(
        job: Job,
        processor: Arc<PaymentProcessor>,
        engine: Arc<ScheduleEngine>,
        queue_tx: mpsc::Sender<Job>,
        verify_delay: Duration,
    ) {
        match job {
            Job::ProcessPayment {
                schedule_id,
                idempotency_key,
            } => {
                // Re-fetch: the schedule may have been paused or cancelled
                // while the job sat in the queue
                let schedule = match engine.get_schedule(schedule_id).await {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!("skipping job for schedule {}: {}", schedule_id, e);
                        return;
                    }
                };
                if schedule.status != ScheduleStatus::Active {
                    info!(
                        "skipping schedule {}: status is {}",
                        schedule_id, schedule.status
                    );
                    return;
                }

                match processor
                    .process_scheduled_payment(&schedule, &idempotency_key)
                    .await
                {
                    Ok(outcome) if outcome.status == TransactionStatus::Processing => {
                        // Settlement is pending; check back after the delay
                        // in case the webhook never arrives
                        let transaction_id = outcome.transaction_id;
                        tokio::spawn(async move {
                            tokio::time::sleep(verify_delay).await;
                            if let Err(e) = queue_tx
                                .send(Job::VerifyPayment { transaction_id })
                                .await
                            {
                                error!(
                                    "failed to enqueue verification for {}: {}",
                                    transaction_id, e
                                );
                            }
                        });
                    }
                    Ok(outcome) => {
                        info!(
                            "schedule {} processed: transaction {} is {}",
                            schedule_id, outcome.transaction_id, outcome.status
                        );
                    }
                    Err(e) => {
                        error!("payment for schedule {} errored: {}", schedule_id, e);
                    }
                }
            }
            Job::VerifyPayment { transaction_id } => {
                match processor.verify_pending_payment(transaction_id).await {
                    Ok(outcome) => {
                        info!(
                            "verification of {} resolved to {}",
                            transaction_id, outcome.status
                        );
                    }
                    Err(e) => {
                        error!("verification of {} errored: {}", transaction_id, e);
                    }
                }
            }
        }
    }
}
