//! Validated cron expressions.
//!
//! Schedules are written in the classic five-field form (`min hour dom mon
//! dow`). The `cron` crate expects a leading seconds field and numbers
//! weekdays 1-7 from Sunday, so five-field input is normalised by pinning
//! seconds to `0` and rewriting numeric weekdays (0-7, Sunday being both 0
//! and 7) as day names. Six and seven field expressions use the crate's
//! own syntax and are passed through unchanged. The text the user supplied
//! is what gets persisted and displayed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    pub fn parse(expression: impl AsRef<str>) -> Result<Self, ValidationError> {
        let source = expression.as_ref().trim();
        let invalid = |reason: String| ValidationError::InvalidCron {
            expression: source.to_string(),
            reason,
        };

        let normalised = match source.split_whitespace().count() {
            5 => {
                let fields: Vec<&str> = source.split_whitespace().collect();
                let weekdays = posix_weekdays(fields[4]).map_err(invalid)?;
                format!("0 {} {weekdays}", fields[..4].join(" "))
            }
            6 | 7 => source.to_string(),
            n => return Err(invalid(format!("expected 5 to 7 fields, found {n}"))),
        };

        let schedule = cron::Schedule::from_str(&normalised).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First firing time strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(after).next()
    }
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite a five-field weekday column into day names. Numeric ranges and
/// steps are expanded into explicit lists; names and wildcards are left for
/// the `cron` parser.
fn posix_weekdays(field: &str) -> Result<String, String> {
    let items = field
        .split(',')
        .map(posix_weekday_item)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items.join(","))
}

fn posix_weekday_item(item: &str) -> Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let number = |text: &str| -> Option<Result<u8, String>> {
        let value = text.parse::<u8>().ok()?;
        Some(if value <= 7 {
            Ok(value)
        } else {
            Err(format!("day of week {value} is out of range 0-7"))
        })
    };

    let (start, end) = match range.split_once('-') {
        Some((from, to)) => match (number(from), number(to)) {
            (Some(from), Some(to)) => (from?, to?),
            _ => return Ok(item.to_string()),
        },
        None => match number(range) {
            Some(day) if step.is_some() => (day?, 6),
            Some(day) => return Ok(DAY_NAMES[usize::from(day?) % 7].to_string()),
            None => return Ok(item.to_string()),
        },
    };
    if start > end {
        return Err(format!("day of week range {range} runs backwards"));
    }
    let step = match step {
        Some(step) => match step.parse::<usize>() {
            Ok(step) if step > 0 => step,
            _ => return Err(format!("invalid day of week step '{step}'")),
        },
        None => 1,
    };

    let mut days: Vec<usize> = (start..=end)
        .step_by(step)
        .map(|day| usize::from(day) % 7)
        .collect();
    days.sort_unstable();
    days.dedup();
    Ok(days
        .into_iter()
        .map(|day| DAY_NAMES[day])
        .collect::<Vec<_>>()
        .join(","))
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

impl FromStr for CronExpression {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronExpression {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<CronExpression> for String {
    fn from(expr: CronExpression) -> Self {
        expr.source
    }
}
