//! Cron schedule evaluation.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Converts five- and six-field expressions to the seven-field form the
/// `cron` crate parses (`sec min hour day month weekday year`).
fn normalize_cron_expression(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => format!("0 {expr} *"),
        6 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

/// A parsed cron schedule, evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses an expression with 5, 6 or 7 fields.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidCronExpression` if it does not parse.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let schedule = Schedule::from_str(&normalize_cron_expression(expression)).map_err(|e| {
            ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as written.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first occurrence strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether an occurrence falls in `(since, until]`.
    #[must_use]
    pub fn fires_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.next_after(since).is_some_and(|next| next <= until)
    }
}
