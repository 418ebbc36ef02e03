use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::schedule::{Schedule, ScheduleEngine};
use crate::scheduler::worker::Job;

/// Periodically turns due schedules into payment jobs.
///
/// The scanner is fire-and-forget: it never executes payments itself, it
/// only enqueues. Duplicate enqueues across ticks (or across restarts) are
/// harmless because the job key is deterministic and the processor dedups
/// on it.
pub struct DueScheduleScanner {
    engine: Arc<ScheduleEngine>,
    queue: mpsc::Sender<Job>,
    interval: Duration,
}

impl DueScheduleScanner {
    pub fn new(engine: Arc<ScheduleEngine>, queue: mpsc::Sender<Job>, interval: Duration) -> Self {
        Self {
            engine,
            queue,
            interval,
        }
    }

    pub async fn run(self) {
        info!(
            "due-schedule scanner started (interval {}s)",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.scan_once(Utc::now()).await {
                error!("schedule scan failed: {}", e);
            }
        }
    }

    /// One scan pass: enqueue a job for every schedule due at `now`.
    /// Split out from `run` so tests can drive it without the clock.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> crate::error::AppResult<usize> {
        let due = self.engine.get_due_schedules(now).await?;
        if due.is_empty() {
            debug!("no schedules due");
            return Ok(0);
        }
        info!("{} schedule(s) due", due.len());

        let mut enqueued = 0;
        for schedule in due {
            let job = Job::ProcessPayment {
                schedule_id: schedule.id,
                idempotency_key: Self::run_key(&schedule),
            };
            match self.queue.send(job).await {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    // Queue closed; the dispatcher is gone and the process
                    // is shutting down
                    error!("failed to enqueue schedule {}: {}", schedule.id, e);
                    break;
                }
            }
        }
        Ok(enqueued)
    }

    /// One key per (schedule, scheduled run instant, attempt). Re-scanning a
    /// still-due schedule that has not been attempted produces the same key,
    /// so at-least-once delivery collapses to exactly-one payment; a failed
    /// attempt bumps `failed_runs`, which keys the next tick as a fresh
    /// attempt instead of dedup-ing into the failed one.
    fn run_key(schedule: &Schedule) -> String {
        Self::run_key_for(schedule.id, schedule.next_run_date, schedule.failed_runs)
    }

    pub fn run_key_for(schedule_id: Uuid, run_at: DateTime<Utc>, attempt: i32) -> String {
        format!("sched-{}-{}-{}", schedule_id, run_at.timestamp(), attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Frequency, NewSchedule, Recipient};
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    async fn due_schedule(engine: &ScheduleEngine) -> Schedule {
        engine
            .create_schedule(NewSchedule {
                user_id: Uuid::new_v4(),
                amount: dec!(250),
                frequency: Frequency::Daily,
                day_of_week: None,
                day_of_month: None,
                custom_interval_days: None,
                hour: 0,
                minute: 0,
                timezone: chrono_tz::UTC,
                start_date: Utc::now() - ChronoDuration::days(2),
                end_date: None,
                recipient: Recipient {
                    account_number: "0123456789".to_string(),
                    bank_code: "058".to_string(),
                    name: "Due Recipient".to_string(),
                },
                narration: None,
            })
            .await
            .unwrap()
    }

    /// The fixture's first run lands within a day of creation, so a scan
    /// two days out always sees it due
    fn scan_horizon() -> chrono::DateTime<Utc> {
        Utc::now() + ChronoDuration::days(2)
    }

    fn payment_key(job: Job) -> String {
        match job {
            Job::ProcessPayment { idempotency_key, .. } => idempotency_key,
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn scan_enqueues_one_job_per_due_schedule() {
        let engine = Arc::new(ScheduleEngine::new());
        let schedule = due_schedule(&engine).await;
        let (tx, mut rx) = mpsc::channel(16);
        let scanner = DueScheduleScanner::new(engine, tx, Duration::from_secs(60));

        let enqueued = scanner.scan_once(scan_horizon()).await.unwrap();
        assert_eq!(enqueued, 1);

        match rx.recv().await.unwrap() {
            Job::ProcessPayment {
                schedule_id,
                idempotency_key,
            } => {
                assert_eq!(schedule_id, schedule.id);
                assert_eq!(
                    idempotency_key,
                    DueScheduleScanner::run_key_for(schedule.id, schedule.next_run_date, 0)
                );
            }
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rescanning_an_unattempted_schedule_repeats_the_key() {
        let engine = Arc::new(ScheduleEngine::new());
        let _schedule = due_schedule(&engine).await;
        let (tx, mut rx) = mpsc::channel(16);
        let scanner = DueScheduleScanner::new(engine, tx, Duration::from_secs(60));

        scanner.scan_once(scan_horizon()).await.unwrap();
        scanner.scan_once(scan_horizon()).await.unwrap();

        let first = payment_key(rx.recv().await.unwrap());
        let second = payment_key(rx.recv().await.unwrap());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failed_attempt_keys_the_next_tick_as_a_fresh_attempt() {
        let engine = Arc::new(ScheduleEngine::new());
        let schedule = due_schedule(&engine).await;
        let (tx, mut rx) = mpsc::channel(16);
        let scanner = DueScheduleScanner::new(engine.clone(), tx, Duration::from_secs(60));

        scanner.scan_once(scan_horizon()).await.unwrap();
        engine.mark_schedule_as_run(schedule.id, false).await.unwrap();
        scanner.scan_once(scan_horizon()).await.unwrap();

        let first = payment_key(rx.recv().await.unwrap());
        let second = payment_key(rx.recv().await.unwrap());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn future_schedules_are_not_enqueued() {
        let engine = Arc::new(ScheduleEngine::new());
        engine
            .create_schedule(NewSchedule {
                user_id: Uuid::new_v4(),
                amount: dec!(250),
                frequency: Frequency::Daily,
                day_of_week: None,
                day_of_month: None,
                custom_interval_days: None,
                hour: 0,
                minute: 0,
                timezone: chrono_tz::UTC,
                start_date: Utc::now() + ChronoDuration::days(1),
                end_date: None,
                recipient: Recipient {
                    account_number: "0123456789".to_string(),
                    bank_code: "058".to_string(),
                    name: "Future Recipient".to_string(),
                },
                narration: None,
            })
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let scanner = DueScheduleScanner::new(engine, tx, Duration::from_secs(60));

        let enqueued = scanner.scan_once(Utc::now()).await.unwrap();
        assert_eq!(enqueued, 0);
    }

    #[tokio::test]
    async fn auto_pause_is_reachable_through_repeated_scans() {
        let engine = Arc::new(ScheduleEngine::new());
        let schedule = due_schedule(&engine).await;
        let (tx, mut rx) = mpsc::channel(16);
        let scanner = DueScheduleScanner::new(engine.clone(), tx, Duration::from_secs(60));

        // Each tick after a failed attempt must produce a processable job,
        // so three failing attempts walk the schedule to auto-pause
        let mut keys = Vec::new();
        for _ in 0..3 {
            assert_eq!(scanner.scan_once(scan_horizon()).await.unwrap(), 1);
            keys.push(payment_key(rx.recv().await.unwrap()));
            engine.mark_schedule_as_run(schedule.id, false).await.unwrap();
        }
        keys.dedup();
        assert_eq!(keys.len(), 3);

        let paused = engine.get_schedule(schedule.id).await.unwrap();
        assert_eq!(paused.status, crate::schedule::ScheduleStatus::Paused);
        assert!(paused.pause_reason.is_some());
        assert_eq!(scanner.scan_once(scan_horizon()).await.unwrap(), 0);
    }
}
