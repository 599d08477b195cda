//! Duration strings as accepted by the request layer.
//!
//! Syntax: an optional sign followed by one or more decimal numbers, each with
//! an optional fraction and a mandatory unit: `ns`, `us` (`µs`), `ms`, `s`,
//! `m`, `h`. Examples: `10s`, `500ms`, `1.5h`, `1h30m`. The bare string `0`
//! is zero.

use std::time::Duration;

use thiserror::Error;

/// Largest representable duration (matches a signed 64-bit nanosecond count).
const MAX_NANOS: u128 = i64::MAX as u128;

/// Fraction digits beyond this precision cannot change a nanosecond count.
const MAX_FRACTION_DIGITS: usize = 18;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} overflows")]
    Overflow(String),

    /// The value parsed but is below zero.
    #[error("negative duration -{0:?}")]
    Negative(Duration),
}

/// Parse a duration string such as `1h30m` or `250ms`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());
    let overflow = || DurationError::Overflow(input.to_string());

    let mut rest = input;
    let mut negative = false;
    if let Some(tail) = rest.strip_prefix('-') {
        negative = true;
        rest = tail;
    } else if let Some(tail) = rest.strip_prefix('+') {
        rest = tail;
    }

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let (whole, tail) = split_digits(rest);
        let (fraction, tail) = match tail.strip_prefix('.') {
            Some(after_dot) => split_digits(after_dot),
            None => ("", tail),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }

        let unit_len = tail
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = unit_scale(unit, input)?;

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(overflow)?;

        if !fraction.is_empty() {
            let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            let denominator = 10u128.pow(digits.len() as u32);
            nanos = nanos
                .checked_add(numerator * scale / denominator)
                .ok_or_else(overflow)?;
        }

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        if total > MAX_NANOS {
            return Err(overflow());
        }
        rest = tail;
    }

    let duration = Duration::from_nanos(total as u64);
    if negative && !duration.is_zero() {
        return Err(DurationError::Negative(duration));
    }
    Ok(duration)
}

fn split_digits(s: &str) -> (&str, &str) {
    let len = s.bytes().take_while(u8::is_ascii_digit).count();
    s.split_at(len)
}

fn unit_scale(unit: &str, input: &str) -> Result<u128, DurationError> {
    let scale = match unit {
        "ns" => 1,
        "us" | "\u{b5}s" | "\u{3bc}s" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        "" => return Err(DurationError::MissingUnit(input.to_string())),
        other => {
            return Err(DurationError::UnknownUnit {
                unit: other.to_string(),
                input: input.to_string(),
            });
        }
    };
    Ok(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_common_forms() {
        let cases = [
            ("0", Duration::ZERO),
            ("10s", Duration::from_secs(10)),
            ("500ms", Duration::from_millis(500)),
            ("1h30m", Duration::from_secs(90 * 60)),
            ("1.5h", Duration::from_secs(90 * 60)),
            (".5s", Duration::from_millis(500)),
            ("1.s", Duration::from_secs(1)),
            ("+2m", Duration::from_secs(120)),
            ("-0s", Duration::ZERO),
            ("3µs", Duration::from_micros(3)),
            ("7ns", Duration::from_nanos(7)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_duration(input), Ok(expected), "input {input:?}");
        }
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(parse_duration(""), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("abc"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("10"), Err(DurationError::MissingUnit(_))));
        assert!(matches!(parse_duration("5d"), Err(DurationError::UnknownUnit { .. })));
        assert!(matches!(parse_duration("."), Err(DurationError::Invalid(_))));
        assert!(matches!(
            parse_duration("9999999999999999999h"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn negative_values_are_reported_with_magnitude() {
        assert_eq!(
            parse_duration("-3s"),
            Err(DurationError::Negative(Duration::from_secs(3)))
        );
    }

    proptest! {
        #[test]
        fn composite_forms_sum_their_parts(h in 0u64..100, m in 0u64..60, s in 0u64..60, ms in 0u64..1000) {
            let input = format!("{h}h{m}m{s}s{ms}ms");
            let expected = Duration::from_secs(h * 3600 + m * 60 + s) + Duration::from_millis(ms);
            prop_assert_eq!(parse_duration(&input), Ok(expected));
        }

        #[test]
        fn never_panics(input in "\\PC{0,16}") {
            let _ = parse_duration(&input);
        }
    }
}
