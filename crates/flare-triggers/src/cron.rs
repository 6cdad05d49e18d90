//! Cron expression validation for scheduled triggers.
//!
//! Expressions are minute-first (`min hour dom month dow [year]`) with `?`
//! meaning "no specific value". They are normalized to the seconds-first
//! form the `cron` crate parses.

use chrono::{DateTime, Utc};
use cron::Schedule;
use flare_core::{Error, Result};
use std::str::FromStr;

/// Shortest interval allowed between two fire times.
pub const MIN_INTERVAL_SECS: u64 = 300;

const NO_VALID_TIME: &str =
    "Given cron expression doesn't evaluate to a valid time. Please check the expression provided";

#[derive(Debug, Clone)]
pub struct CronValidator {
    min_interval_secs: u64,
    lookahead: usize,
}

impl CronValidator {
    pub fn new(min_interval_secs: u64, lookahead: usize) -> Self {
        Self {
            min_interval_secs: min_interval_secs.max(MIN_INTERVAL_SECS),
            lookahead: lookahead.max(2),
        }
    }

    pub fn validate(&self, expression: &str) -> Result<()> {
        self.validate_at(expression, Utc::now())
    }

    /// Parse only. Disabled triggers keep their expression without the
    /// interval check so they can be saved while paused.
    pub fn validate_syntax(&self, expression: &str) -> Result<()> {
        parse(expression).map(|_| ())
    }

    /// Validate against the fire times following `now`.
    pub fn validate_at(&self, expression: &str, now: DateTime<Utc>) -> Result<()> {
        let schedule = parse(expression)?;
        let fires: Vec<DateTime<Utc>> = schedule.after(&now).take(self.lookahead).collect();
        if fires.is_empty() {
            return Err(Error::InvalidCronExpression {
                expression: expression.to_string(),
                reason: NO_VALID_TIME.to_string(),
            });
        }

        let shortest = fires
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_seconds())
            .min();
        if let Some(shortest) = shortest {
            if shortest < self.min_interval_secs as i64 {
                return Err(Error::CronIntervalTooShort {
                    min_seconds: self.min_interval_secs,
                });
            }
        }
        Ok(())
    }

    /// The next `count` fire times after `now`.
    pub fn next_fire_times(
        &self,
        expression: &str,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let schedule = parse(expression)?;
        Ok(schedule.after(&now).take(count).collect())
    }
}

impl Default for CronValidator {
    fn default() -> Self {
        Self::new(MIN_INTERVAL_SECS, 10)
    }
}

fn parse(expression: &str) -> Result<Schedule> {
    let normalized = normalize(expression);
    Schedule::from_str(&normalized).map_err(|e| Error::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn normalize(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let mut normalized = String::from("0");
    for field in fields {
        normalized.push(' ');
        normalized.push_str(&field.replace('?', "*"));
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_normalize_prepends_seconds() {
        assert_eq!(normalize("0/5 0 ? * * *"), "0 0/5 0 * * * *");
        assert_eq!(normalize("  15  10 * * ?"), "0 15 10 * * *");
    }

    #[test]
    fn test_five_minute_cadence_accepted() {
        let validator = CronValidator::default();
        assert!(validator.validate_at("0/5 0 ? * * *", at(12, 0)).is_ok());
        assert!(validator.validate_at("0/5 0 ? * * *", at(0, 42)).is_ok());
        assert!(validator.validate("0/15 * ? * *").is_ok());
    }

    #[test]
    fn test_short_cadence_rejected() {
        let validator = CronValidator::default();
        for expression in ["* * * * ?", "0/2 0 ? * * *"] {
            let err = validator.validate_at(expression, at(0, 0)).unwrap_err();
            assert!(
                err.to_string()
                    .starts_with("Deployments must be triggered at intervals greater than or equal to 5 minutes."),
                "{expression}: {err}"
            );
        }
    }

    #[test]
    fn test_syntax_check_ignores_cadence() {
        let validator = CronValidator::default();
        assert!(validator.validate_syntax("* * * * ?").is_ok());
        assert!(matches!(
            validator.validate_syntax("not a cron").unwrap_err(),
            Error::InvalidCronExpression { .. }
        ));
    }

    #[test]
    fn test_expression_without_future_fire_rejected() {
        let validator = CronValidator::default();
        let err = validator.validate_at("0 0 1 1 ? 2001", at(0, 0)).unwrap_err();
        assert!(err.to_string().contains("doesn't evaluate to a valid time"));
    }

    #[test]
    fn test_garbage_rejected() {
        let validator = CronValidator::default();
        let err = validator.validate("every tuesday").unwrap_err();
        assert!(matches!(err, Error::InvalidCronExpression { .. }));
    }

    #[test]
    fn test_min_interval_cannot_be_lowered() {
        let validator = CronValidator::new(60, 10);
        assert!(validator.validate_at("0/2 * ? * *", at(0, 0)).is_err());
    }

    #[test]
    fn test_next_fire_times() {
        let validator = CronValidator::default();
        let fires = validator
            .next_fire_times("30 9 ? * *", at(8, 0), 2)
            .unwrap();
        assert_eq!(fires, vec![at(9, 30), Utc.with_ymd_and_hms(2026, 3, 11, 9, 30, 0).unwrap()]);
    }
}
