//! Cron as a pure function (§9 "Cron evaluation"): building the five-field
//! expression from typed settings, and `(expression, now, tz) -> next_run`
//! are both free functions, independently testable without the Scheduler
//! loop.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use super::error::SchedulerError;
use crate::store::settings::MergeSchedule;

/// Build the five-field POSIX cron expression for a schedule (§4.E step 2).
pub fn build_expression(schedule: MergeSchedule, merge_time: &str, merge_days: &[u8]) -> Result<String, SchedulerError> {
    let (hour, minute) = parse_hh_mm(merge_time)?;

    match schedule {
        MergeSchedule::Daily => Ok(format!("{minute} {hour} * * *")),
        MergeSchedule::Weekly => {
            if merge_days.is_empty() {
                return Err(SchedulerError::InvalidSchedule(
                    "merge_days must not be empty for a weekly schedule".to_string(),
                ));
            }
            let days = merge_days.iter().map(u8::to_string).collect::<Vec<_>>().join(",");
            Ok(format!("{minute} {hour} * * {days}"))
        }
    }
}

fn parse_hh_mm(value: &str) -> Result<(u8, u8), SchedulerError> {
    let (h, m) = value
        .split_once(':')
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("merge_time '{value}' must be HH:MM")))?;

    let hour: u8 = h
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("invalid hour in merge_time '{value}'")))?;
    let minute: u8 = m
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("invalid minute in merge_time '{value}'")))?;

    if hour > 23 || minute > 59 {
        return Err(SchedulerError::InvalidSchedule(format!("merge_time '{value}' out of range")));
    }

    Ok((hour, minute))
}

/// `(expression, now, tz) -> next_run_instant` (§9). The `cron` crate
/// requires a leading seconds field; a fixed "at second 0" is prepended
/// since the engine only schedules to minute granularity.
///
/// `expression`'s hour/minute fields are `merge_time` read literally, i.e.
/// wall-clock in `tz` (§3 "`HH:MM` in UTC unless `TZ` env overrides"), so
/// `now` is converted into `tz` before the schedule is evaluated and the
/// resulting occurrence is converted back to UTC for everything downstream
/// (Job timestamps, `next_scheduled_run`) to keep comparing on a common zone.
pub fn next_run(expression: &str, now: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, SchedulerError> {
    let with_seconds = format!("0 {expression}");
    let schedule = Schedule::from_str(&with_seconds)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{expression}': {e}")))?;

    let now_tz = now.with_timezone(&tz);

    schedule
        .after(&now_tz)
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("'{expression}' has no future occurrence")))
}
