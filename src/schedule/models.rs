use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How often a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schedule status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer destination, fully resolved before the processor ever sees the
/// schedule (recipient lookup is the recipient service's job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub account_number: String,
    pub bank_code: String,
    pub name: String,
}

/// One recurring payment intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub frequency: Frequency,
    /// 0 = Sunday, used by weekly schedules
    pub day_of_week: Option<u32>,
    /// 1-31, clamped to month length, used by monthly schedules
    pub day_of_month: Option<u32>,
    pub custom_interval_days: Option<i64>,
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_run_date: DateTime<Utc>,
    pub last_run_date: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
    pub pause_reason: Option<String>,
    pub successful_runs: i32,
    pub failed_runs: i32,
    pub consecutive_failures: i32,
    pub recipient: Recipient,
    pub narration: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for a schedule (descriptive CRUD fields live upstream)
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    pub custom_interval_days: Option<i64>,
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub recipient: Recipient,
    pub narration: Option<String>,
}
