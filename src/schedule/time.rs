use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{AppError, AppResult};
use crate::schedule::models::{Frequency, NewSchedule, Schedule};

/// Timezone-aware next-run arithmetic.
///
/// All cadence math happens on the schedule's local calendar date; the
/// configured `hour:minute` is applied last and the result converted back
/// to UTC. Clamping the day-of-month BEFORE setting the time-of-day is what
/// keeps month-end and DST-boundary schedules correct.
pub struct TimeService;

impl TimeService {
    /// Next eligible instant strictly after `from` (normally the run that
    /// just finished).
    pub fn next_run_after(schedule: &Schedule, from: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        let local_date = from.with_timezone(&schedule.timezone).date_naive();
        let next_date = Self::advance(
            schedule.frequency,
            schedule.day_of_week,
            schedule.day_of_month,
            schedule.custom_interval_days,
            local_date,
        )?;
        Self::at_time_of_day(next_date, schedule.hour, schedule.minute, schedule.timezone)
    }

    /// Initial `next_run_date` for a freshly created schedule: today's slot
    /// in the schedule's timezone if it is still ahead, otherwise one
    /// cadence step out.
    pub fn first_run(new: &NewSchedule, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        let base = if new.start_date > now {
            new.start_date
        } else {
            now
        };
        let local_date = base.with_timezone(&new.timezone).date_naive();
        let candidate = Self::at_time_of_day(local_date, new.hour, new.minute, new.timezone)?;
        if candidate >= base {
            return Ok(candidate);
        }

        let next_date = Self::advance(
            new.frequency,
            new.day_of_week,
            new.day_of_month,
            new.custom_interval_days,
            local_date,
        )?;
        Self::at_time_of_day(next_date, new.hour, new.minute, new.timezone)
    }

    fn advance(
        frequency: Frequency,
        day_of_week: Option<u32>,
        day_of_month: Option<u32>,
        custom_interval_days: Option<i64>,
        date: NaiveDate,
    ) -> AppResult<NaiveDate> {
        let next = match frequency {
            Frequency::Daily => date + Duration::days(1),
            Frequency::Weekly => {
                let base = date + Duration::days(7);
                // 0 = Sunday
                let current = base.weekday().num_days_from_sunday();
                let target = day_of_week.unwrap_or(current) % 7;
                let shift = (target + 7 - current) % 7;
                base + Duration::days(shift as i64)
            }
            Frequency::Monthly => Self::add_month_clamped(date, day_of_month)?,
            Frequency::Custom => {
                let days = custom_interval_days.unwrap_or(1).max(1);
                date + Duration::days(days)
            }
        };
        Ok(next)
    }

    /// One month forward with the day clamped to the target month's length
    /// (Jan 31 -> Feb 28/29). The configured day is re-applied each month,
    /// so a day-31 schedule springs back to the 31st where possible.
    fn add_month_clamped(date: NaiveDate, configured_day: Option<u32>) -> AppResult<NaiveDate> {
        let (year, month) = if date.month() == 12 {
            (date.year() + 1, 1)
        } else {
            (date.year(), date.month() + 1)
        };
        let day = configured_day
            .unwrap_or_else(|| date.day())
            .clamp(1, Self::days_in_month(year, month));
        NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| AppError::Internal(format!("invalid date {}-{}-{}", year, month, day)))
    }

    fn days_in_month(year: i32, month: u32) -> u32 {
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .map(|d| d.day())
            .unwrap_or(28)
    }

    fn at_time_of_day(
        date: NaiveDate,
        hour: u32,
        minute: u32,
        tz: Tz,
    ) -> AppResult<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, minute, 0).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid time of day {}:{}", hour, minute))
        })?;

        let local = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            // Clock rolled back: take the earlier occurrence
            LocalResult::Ambiguous(earliest, _) => earliest,
            // Clock sprang forward over this slot: run an hour later
            LocalResult::None => tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .ok_or_else(|| {
                    AppError::Internal(format!("unresolvable local time {} in {}", naive, tz))
                })?,
        };
        Ok(local.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::models::{Recipient, ScheduleStatus};
    use chrono_tz::Tz;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn schedule(frequency: Frequency, tz: Tz) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: dec!(100),
            frequency,
            day_of_week: None,
            day_of_month: None,
            custom_interval_days: None,
            hour: 9,
            minute: 0,
            timezone: tz,
            start_date: now,
            end_date: None,
            next_run_date: now,
            last_run_date: None,
            status: ScheduleStatus::Active,
            pause_reason: None,
            successful_runs: 0,
            failed_runs: 0,
            consecutive_failures: 0,
            recipient: Recipient {
                account_number: "0123456789".to_string(),
                bank_code: "058".to_string(),
                name: "Test Recipient".to_string(),
            },
            narration: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn daily_advances_one_day_across_month_end() {
        let s = schedule(Frequency::Daily, chrono_tz::UTC);
        let next = TimeService::next_run_after(&s, utc(2025, 1, 31, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 2, 1, 9, 0));
    }

    #[test]
    fn monthly_day_31_clamps_to_february_length() {
        let mut s = schedule(Frequency::Monthly, chrono_tz::UTC);
        s.day_of_month = Some(31);

        let next = TimeService::next_run_after(&s, utc(2025, 1, 31, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 2, 28, 9, 0));

        let leap = TimeService::next_run_after(&s, utc(2024, 1, 31, 9, 0)).unwrap();
        assert_eq!(leap, utc(2024, 2, 29, 9, 0));
    }

    #[test]
    fn monthly_springs_back_to_configured_day_after_short_month() {
        let mut s = schedule(Frequency::Monthly, chrono_tz::UTC);
        s.day_of_month = Some(31);

        // Ran on the clamped Feb 28; March has a 31st again
        let next = TimeService::next_run_after(&s, utc(2025, 2, 28, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 31, 9, 0));
    }

    #[test]
    fn weekly_shifts_forward_to_anchor_day() {
        let mut s = schedule(Frequency::Weekly, chrono_tz::UTC);
        s.day_of_week = Some(3); // Wednesday

        // 2025-01-06 is a Monday; +1 week lands Monday Jan 13, shifted to
        // Wednesday Jan 15 rather than plain +7 days
        let next = TimeService::next_run_after(&s, utc(2025, 1, 6, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 1, 15, 9, 0));
    }

    #[test]
    fn weekly_already_on_anchor_day_keeps_plus_seven() {
        let mut s = schedule(Frequency::Weekly, chrono_tz::UTC);
        s.day_of_week = Some(3);

        // 2025-01-08 is a Wednesday
        let next = TimeService::next_run_after(&s, utc(2025, 1, 8, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 1, 15, 9, 0));
    }

    #[test]
    fn custom_interval_advances_configured_days() {
        let mut s = schedule(Frequency::Custom, chrono_tz::UTC);
        s.custom_interval_days = Some(10);

        let next = TimeService::next_run_after(&s, utc(2025, 3, 25, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 4, 4, 9, 0));
    }

    #[test]
    fn time_of_day_is_applied_in_schedule_timezone() {
        let mut s = schedule(Frequency::Daily, chrono_tz::America::New_York);
        s.hour = 8;
        s.minute = 30;

        // January: New York is UTC-5, so 08:30 local is 13:30 UTC
        let next = TimeService::next_run_after(&s, utc(2025, 1, 10, 13, 30)).unwrap();
        assert_eq!(next, utc(2025, 1, 11, 13, 30));
    }

    #[test]
    fn first_run_uses_today_when_slot_still_ahead() {
        let s = schedule(Frequency::Daily, chrono_tz::UTC);
        let new = NewSchedule {
            user_id: s.user_id,
            amount: s.amount,
            frequency: s.frequency,
            day_of_week: None,
            day_of_month: None,
            custom_interval_days: None,
            hour: 9,
            minute: 0,
            timezone: chrono_tz::UTC,
            start_date: utc(2025, 5, 1, 0, 0),
            end_date: None,
            recipient: s.recipient.clone(),
            narration: None,
        };

        let run = TimeService::first_run(&new, utc(2025, 5, 2, 6, 0)).unwrap();
        assert_eq!(run, utc(2025, 5, 2, 9, 0));

        // Slot already passed today: one cadence step out
        let run = TimeService::first_run(&new, utc(2025, 5, 2, 10, 0)).unwrap();
        assert_eq!(run, utc(2025, 5, 3, 9, 0));
    }
}
