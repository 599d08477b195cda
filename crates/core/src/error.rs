//! Domain error model.

use std::time::Duration;

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Why a job descriptor or identifier could not be built.
///
/// These are deterministic input failures; transport and storage errors are
/// defined next to their adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("frequency {frequency:?} outside [{min:?}, {max:?}]")]
    FrequencyOutOfRange {
        frequency: Duration,
        min: Duration,
        max: Duration,
    },

    /// A job must get at least one full interval before it expires.
    #[error("frequency {frequency:?} exceeds period {period:?}")]
    FrequencyExceedsPeriod { frequency: Duration, period: Duration },

    #[error("period {0:?} does not yield a representable expiry")]
    PeriodUnrepresentable(Duration),

    #[error("invalid job id {input:?}: {reason}")]
    InvalidId { input: String, reason: String },
}
