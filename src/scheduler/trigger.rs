//! When a job fires.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use super::SchedulerError;

#[derive(Debug, Clone)]
pub enum Trigger {
    /// Cron expression evaluated in the scheduler's time zone.
    Cron {
        expression: String,
        schedule: Box<Schedule>,
    },
    /// Fixed period measured from the previous firing.
    Every(Duration),
}

impl Trigger {
    /// Parse a cron expression. Five-field expressions (minute precision)
    /// fire at second zero.
    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        let fields = expression.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", expression.trim()),
            6 | 7 => expression.trim().to_string(),
            _ => {
                return Err(SchedulerError::InvalidCron {
                    expression: expression.to_string(),
                    reason: format!("expected 5 to 7 fields, got {}", fields),
                })
            }
        };
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::Cron {
            expression: expression.trim().to_string(),
            schedule: Box::new(schedule),
        })
    }

    pub fn every(period: Duration) -> Self {
        Self::Every(period.max(Duration::from_secs(1)))
    }

    pub fn every_minutes(minutes: u32) -> Self {
        Self::every(Duration::from_secs(u64::from(minutes) * 60))
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { schedule, .. } => schedule
                .after(&after.with_timezone(&timezone))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Self::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Cron { expression, .. } => expression.clone(),
            Self::Every(period) if period.as_secs() % 60 == 0 => {
                format!("every {}m", period.as_secs() / 60)
            }
            Self::Every(period) => format!("every {}s", period.as_secs()),
        }
    }
}
