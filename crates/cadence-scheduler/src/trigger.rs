use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::ScheduleSpec;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Longest accepted interval: one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 3600;

/// A validated, ready-to-evaluate job trigger.
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(Box<Schedule>),
    Interval(Duration),
}

impl Trigger {
    /// Validate a schedule spec. Every malformed spec is rejected here,
    /// never at fire time.
    pub fn from_spec(spec: &ScheduleSpec) -> Result<Self> {
        match spec {
            ScheduleSpec::Cron { expression } => {
                let schedule = parse_cron(expression)?;
                if schedule.upcoming(Utc).next().is_none() {
                    return Err(CadenceError::Validation(format!(
                        "cron expression '{}' never fires",
                        expression
                    )));
                }
                Ok(Self::Cron(Box::new(schedule)))
            }
            ScheduleSpec::Interval {
                hours,
                minutes,
                seconds,
            } => {
                let total = u64::from(*hours) * 3600 + u64::from(*minutes) * 60 + u64::from(*seconds);
                if total == 0 {
                    return Err(CadenceError::Validation(
                        "interval needs at least one of hours, minutes, seconds".to_string(),
                    ));
                }
                if total > MAX_INTERVAL_SECS {
                    return Err(CadenceError::Validation(format!(
                        "interval of {}s exceeds the maximum of {}s",
                        total, MAX_INTERVAL_SECS
                    )));
                }
                Ok(Self::Interval(Duration::seconds(total as i64)))
            }
        }
    }

    /// First fire strictly after `now`, for a fresh or resumed job.
    /// `None` when there is no representable future fire.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now).next(),
            Self::Interval(period) => now.checked_add_signed(*period),
        }
    }

    /// Next fire after a fire that was due at `due`, strictly after `now`.
    ///
    /// Interval jobs keep their phase: missed periods are skipped, not
    /// replayed.
    pub fn next_after(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now.max(due)).next(),
            Self::Interval(period) => {
                let period_secs = period.num_seconds().max(1);
                let behind = (now - due).num_seconds().max(0);
                let periods = behind / period_secs + 1;
                let offset = Duration::try_seconds(periods.checked_mul(period_secs)?)?;
                due.checked_add_signed(offset)
            }
        }
    }

    /// The next `count` fire times after `now`.
    pub fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = now;
        while out.len() < count {
            match self.first_fire(cursor) {
                Some(next) => {
                    out.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        out
    }
}

/// Parse a standard five-field cron expression
/// (`minute hour day-of-month month day-of-week`).
///
/// Day-of-week takes 0-7 (0 and 7 are Sunday) or three-letter names.
/// When both day fields are restricted, a fire needs both to match.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CadenceError::Validation(format!(
            "cron expression '{}' has {} fields, expected 5 (minute hour day month weekday)",
            expression,
            fields.len()
        )));
    }

    let day_of_week = translate_day_of_week(fields[4])?;
    let full = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    );

    Schedule::from_str(&full).map_err(|e| {
        CadenceError::Validation(format!("invalid cron expression '{}': {}", expression, e))
    })
}

/// Rewrite a standard day-of-week field as explicit day names, which the
/// `cron` crate reads unambiguously.
fn translate_day_of_week(field: &str) -> Result<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let invalid = |detail: &str| {
        CadenceError::Validation(format!("invalid day-of-week '{}': {}", field, detail))
    };

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (base, step)
            }
            None => (part, 1),
        };

        let (start, end) = if base == "*" {
            (0, 6)
        } else if let Some((a, b)) = base.split_once('-') {
            (day_number(a).ok_or_else(|| invalid(a))?, day_number(b).ok_or_else(|| invalid(b))?)
        } else {
            let day = day_number(base).ok_or_else(|| invalid(base))?;
            // "n/step" runs from n to the end of the week.
            (day, if part.contains('/') { 6 } else { day })
        };
        if start > end {
            return Err(invalid("range runs backwards"));
        }

        let mut day = start;
        while day <= end {
            days.insert(day % 7);
            day += step;
        }
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .into_iter()
        .map(|d| DAY_NAMES[d as usize])
        .collect::<Vec<_>>()
        .join(","))
}

/// 0-7 or a day name. Sunday is both 0 and 7.
fn day_number(token: &str) -> Option<u32> {
    if let Ok(n) = token.parse::<u32>() {
        return (n <= 7).then_some(n);
    }
    let lower = token.to_ascii_lowercase();
    DAY_NAMES
        .iter()
        .position(|name| lower.starts_with(&name.to_ascii_lowercase()) && lower.len() >= 3)
        .map(|i| i as u32)
}
