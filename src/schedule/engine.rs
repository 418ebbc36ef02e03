use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, ScheduleError};
use crate::schedule::models::{Frequency, NewSchedule, Schedule, ScheduleStatus};
use crate::schedule::time::TimeService;

/// Schedules with this many consecutive failed runs are paused
pub const MAX_CONSECUTIVE_FAILURES: i32 = 3;

/// Cap on schedules returned per due scan, bounding per-tick work
const DUE_BATCH_SIZE: usize = 100;

/// Schedule state machine and run bookkeeping.
///
/// Schedules are mutated exclusively through this engine; everything else
/// gets clones. In production the map would be PostgreSQL via sqlx.
pub struct ScheduleEngine {
    schedules: RwLock<HashMap<Uuid, Schedule>>,
}

impl ScheduleEngine {
    pub fn new() -> Self {
        Self {
            schedules: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_schedule(&self, new: NewSchedule) -> AppResult<Schedule> {
        Self::validate_config(&new)?;

        let now = Utc::now();
        let next_run_date = TimeService::first_run(&new, now)?;

        let schedule = Schedule {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            amount: new.amount,
            frequency: new.frequency,
            day_of_week: new.day_of_week,
            day_of_month: new.day_of_month,
            custom_interval_days: new.custom_interval_days,
            hour: new.hour,
            minute: new.minute,
            timezone: new.timezone,
            start_date: new.start_date,
            end_date: new.end_date,
            next_run_date,
            last_run_date: None,
            status: ScheduleStatus::Active,
            pause_reason: None,
            successful_runs: 0,
            failed_runs: 0,
            consecutive_failures: 0,
            recipient: new.recipient,
            narration: new.narration,
            created_at: now,
            updated_at: now,
        };

        let mut schedules = self.schedules.write().await;
        schedules.insert(schedule.id, schedule.clone());
        info!(
            "created {} schedule {} for user {}, first run {}",
            schedule.frequency, schedule.id, schedule.user_id, schedule.next_run_date
        );
        Ok(schedule)
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> AppResult<Schedule> {
        let schedules = self.schedules.read().await;
        schedules
            .get(&schedule_id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(schedule_id).into())
    }

    /// Pause a schedule, recording why. Used both for user action and the
    /// automatic failure-streak pause.
    pub async fn pause_schedule(&self, schedule_id: Uuid, reason: &str) -> AppResult<Schedule> {
        let mut schedules = self.schedules.write().await;
        let schedule = Self::get_mut(&mut schedules, schedule_id)?;
        Self::validate_transition(schedule.status, ScheduleStatus::Paused)?;

        schedule.status = ScheduleStatus::Paused;
        schedule.pause_reason = Some(reason.to_string());
        schedule.updated_at = Utc::now();
        info!("paused schedule {}: {}", schedule_id, reason);
        Ok(schedule.clone())
    }

    /// Resume a paused schedule. The next run is recomputed from now, not
    /// from the last run, so a long pause does not produce a burst of
    /// catch-up payments.
    pub async fn resume_schedule(&self, schedule_id: Uuid) -> AppResult<Schedule> {
        let mut schedules = self.schedules.write().await;
        let schedule = Self::get_mut(&mut schedules, schedule_id)?;
        Self::validate_transition(schedule.status, ScheduleStatus::Active)?;

        schedule.status = ScheduleStatus::Active;
        schedule.pause_reason = None;
        schedule.consecutive_failures = 0;
        schedule.next_run_date = TimeService::next_run_after(schedule, Utc::now())?;
        schedule.updated_at = Utc::now();
        info!(
            "resumed schedule {}, next run {}",
            schedule_id, schedule.next_run_date
        );
        Ok(schedule.clone())
    }

    /// Cancel a schedule. Idempotent: cancelling an already-cancelled
    /// schedule is a no-op.
    pub async fn cancel_schedule(&self, schedule_id: Uuid) -> AppResult<Schedule> {
        let mut schedules = self.schedules.write().await;
        let schedule = Self::get_mut(&mut schedules, schedule_id)?;
        if schedule.status == ScheduleStatus::Cancelled {
            return Ok(schedule.clone());
        }
        Self::validate_transition(schedule.status, ScheduleStatus::Cancelled)?;

        schedule.status = ScheduleStatus::Cancelled;
        schedule.updated_at = Utc::now();
        info!("cancelled schedule {}", schedule_id);
        Ok(schedule.clone())
    }

    /// Hard-delete a cancelled schedule.
    pub async fn delete_schedule(&self, schedule_id: Uuid) -> AppResult<()> {
        let mut schedules = self.schedules.write().await;
        let schedule = Self::get_mut(&mut schedules, schedule_id)?;
        if schedule.status != ScheduleStatus::Cancelled {
            return Err(ScheduleError::InvalidState {
                current: schedule.status.to_string(),
                expected: ScheduleStatus::Cancelled.to_string(),
            }
            .into());
        }
        schedules.remove(&schedule_id);
        Ok(())
    }

    /// All active schedules whose next run has passed, oldest first,
    /// bounded to a fixed batch size.
    pub async fn get_due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut due: Vec<Schedule> = schedules
            .values()
            .filter(|s| s.status == ScheduleStatus::Active && s.next_run_date <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_date);
        due.truncate(DUE_BATCH_SIZE);
        Ok(due)
    }

    /// Record the outcome of one payment attempt. Called exactly once per
    /// attempt by the payment processor.
    pub async fn mark_schedule_as_run(&self, schedule_id: Uuid, success: bool) -> AppResult<Schedule> {
        let mut schedules = self.schedules.write().await;
        let schedule = Self::get_mut(&mut schedules, schedule_id)?;
        let now = Utc::now();
        schedule.last_run_date = Some(now);
        schedule.updated_at = now;

        if success {
            schedule.successful_runs += 1;
            schedule.consecutive_failures = 0;

            let next = TimeService::next_run_after(schedule, now)?;
            match schedule.end_date {
                Some(end) if next > end => {
                    schedule.status = ScheduleStatus::Completed;
                    info!(
                        "schedule {} completed after {} successful runs",
                        schedule_id, schedule.successful_runs
                    );
                }
                _ => {
                    schedule.next_run_date = next;
                }
            }
        } else {
            schedule.failed_runs += 1;
            schedule.consecutive_failures += 1;

            if schedule.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
                && schedule.status == ScheduleStatus::Active
            {
                schedule.status = ScheduleStatus::Paused;
                schedule.pause_reason = Some(format!(
                    "Automatically paused after {} consecutive failed payments",
                    schedule.consecutive_failures
                ));
                warn!(
                    "auto-paused schedule {} after {} consecutive failures",
                    schedule_id, schedule.consecutive_failures
                );
            }
            // next_run_date is untouched on failure: the schedule stays due
            // and the next tick retries it until the streak pauses it
        }

        Ok(schedule.clone())
    }

    /// Valid transitions:
    /// - Active -> Paused, Cancelled, Completed
    /// - Paused -> Active, Cancelled
    /// - Cancelled, Completed -> terminal
    fn validate_transition(from: ScheduleStatus, to: ScheduleStatus) -> AppResult<()> {
        let allowed = match from {
            ScheduleStatus::Active => vec![
                ScheduleStatus::Paused,
                ScheduleStatus::Cancelled,
                ScheduleStatus::Completed,
            ],
            ScheduleStatus::Paused => vec![ScheduleStatus::Active, ScheduleStatus::Cancelled],
            ScheduleStatus::Cancelled | ScheduleStatus::Completed => {
                return Err(ScheduleError::InvalidState {
                    current: from.to_string(),
                    expected: "no transitions from terminal states".to_string(),
                }
                .into());
            }
        };

        if !allowed.contains(&to) {
            return Err(ScheduleError::InvalidState {
                current: from.to_string(),
                expected: format!("{:?}", allowed),
            }
            .into());
        }
        Ok(())
    }

    fn validate_config(new: &NewSchedule) -> AppResult<()> {
        if new.amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(
                "schedule amount must be positive".to_string(),
            ));
        }
        if new.hour > 23 || new.minute > 59 {
            return Err(ScheduleError::InvalidConfig(format!(
                "invalid time of day {}:{}",
                new.hour, new.minute
            ))
            .into());
        }
        match new.frequency {
            Frequency::Weekly => {
                if !matches!(new.day_of_week, Some(0..=6)) {
                    return Err(ScheduleError::InvalidConfig(
                        "weekly schedule requires day_of_week 0-6".to_string(),
                    )
                    .into());
                }
            }
            Frequency::Monthly => {
                if !matches!(new.day_of_month, Some(1..=31)) {
                    return Err(ScheduleError::InvalidConfig(
                        "monthly schedule requires day_of_month 1-31".to_string(),
                    )
                    .into());
                }
            }
            Frequency::Custom => {
                if !matches!(new.custom_interval_days, Some(d) if d >= 1) {
                    return Err(ScheduleError::InvalidConfig(
                        "custom schedule requires a positive interval".to_string(),
                    )
                    .into());
                }
            }
            Frequency::Daily => {}
        }
        Ok(())
    }

    fn get_mut(
        schedules: &mut HashMap<Uuid, Schedule>,
        schedule_id: Uuid,
    ) -> Result<&mut Schedule, ScheduleError> {
        schedules
            .get_mut(&schedule_id)
            .ok_or(ScheduleError::NotFound(schedule_id))
    }
}

impl Default for ScheduleEngine {
    fn default() -> Self {
        Self::new()
    }
}
