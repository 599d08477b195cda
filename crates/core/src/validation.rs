//! Validation of human-supplied tracker parameters.
//!
//! The request layer hands over the raw `period` and `frequency` strings; the
//! checks below produce the exact user-facing messages, in order. Period and
//! frequency are judged independently; their relation is only checked once
//! both are individually valid.

use std::time::Duration;

use crate::duration::{DurationError, parse_duration};
use crate::job::{MAX_FREQUENCY, MIN_FREQUENCY};

/// Shortest accepted tracking period.
pub const MIN_PERIOD: Duration = Duration::from_secs(2);

/// Longest accepted tracking period.
pub const MAX_PERIOD: Duration = Duration::from_secs(60 * 60);

pub const MSG_FREQUENCY_INVALID: &str = "Not valid frequency";
pub const MSG_FREQUENCY_ZERO: &str = "Frequency cannot be empty or zero";
pub const MSG_FREQUENCY_RANGE: &str = "Frequency cannot be less then 1 second & more then 1 hour";
pub const MSG_PERIOD_INVALID: &str = "Not valid period";
pub const MSG_PERIOD_ZERO: &str = "Period cannot be empty or zero";
pub const MSG_PERIOD_RANGE: &str = "Period cannot be less then 2 second & more then 1 hour";
pub const MSG_PERIOD_SHORTER_THAN_FREQUENCY: &str = "Period cannot be less than frequency";

/// A validated tracker request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerRequest {
    pub period: Duration,
    pub frequency: Duration,
}

enum Bound {
    Invalid,
    Zero,
    OutOfRange,
}

fn check(raw: &str, min: Duration, max: Duration) -> Result<Duration, Bound> {
    match parse_duration(raw) {
        Ok(d) if d.is_zero() => Err(Bound::Zero),
        Ok(d) if d < min || d > max => Err(Bound::OutOfRange),
        Ok(d) => Ok(d),
        Err(DurationError::Negative(_)) => Err(Bound::OutOfRange),
        Err(_) => Err(Bound::Invalid),
    }
}

/// Validate raw `period` / `frequency` strings.
///
/// Returns every applicable message on failure; frequency messages come first.
pub fn validate_tracker_request(
    period: &str,
    frequency: &str,
) -> Result<TrackerRequest, Vec<&'static str>> {
    let mut messages = Vec::new();

    let frequency = match check(frequency, MIN_FREQUENCY, MAX_FREQUENCY) {
        Ok(d) => Some(d),
        Err(Bound::Invalid) => {
            messages.push(MSG_FREQUENCY_INVALID);
            None
        }
        Err(Bound::Zero) => {
            messages.push(MSG_FREQUENCY_ZERO);
            None
        }
        Err(Bound::OutOfRange) => {
            messages.push(MSG_FREQUENCY_RANGE);
            None
        }
    };

    let period = match check(period, MIN_PERIOD, MAX_PERIOD) {
        Ok(d) => Some(d),
        Err(Bound::Invalid) => {
            messages.push(MSG_PERIOD_INVALID);
            None
        }
        Err(Bound::Zero) => {
            messages.push(MSG_PERIOD_ZERO);
            None
        }
        Err(Bound::OutOfRange) => {
            messages.push(MSG_PERIOD_RANGE);
            None
        }
    };

    match (period, frequency) {
        (Some(period), Some(frequency)) if frequency > period => {
            Err(vec![MSG_PERIOD_SHORTER_THAN_FREQUENCY])
        }
        (Some(period), Some(frequency)) => Ok(TrackerRequest { period, frequency }),
        _ => Err(messages),
    }
}
