//! Job descriptor: the immutable value that travels over the message channel.
//!
//! A descriptor names *what* to sample and *until when*. It carries no
//! behavior related to delivery; acknowledgement lives alongside it in the
//! bus layer.
//!
//! ## Wire format
//!
//! ```text
//! {"Id": "<uuid>", "Frequency": <nanoseconds>, "Expire": "<rfc3339>"}
//! ```
//!
//! `Frequency` is an integer number of nanoseconds so descriptors published by
//! older producers decode unchanged.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Lower bound for the sampling interval.
pub const MIN_FREQUENCY: Duration = Duration::from_secs(1);

/// Upper bound for the sampling interval.
pub const MAX_FREQUENCY: Duration = Duration::from_secs(60 * 60);

/// Extra lifetime added at creation so a job is not already expired the
/// instant it is delivered.
pub const EXPIRY_GRACE: Duration = Duration::from_secs(1);

/// A scheduled sampling job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(rename = "Id")]
    id: JobId,
    #[serde(rename = "Frequency", with = "nanos")]
    frequency: Duration,
    #[serde(rename = "Expire")]
    expire: DateTime<Utc>,
}

impl JobDescriptor {
    /// Build a new descriptor that samples every `frequency` for `period`
    /// starting at `now`.
    ///
    /// Enforces `MIN_FREQUENCY <= frequency <= MAX_FREQUENCY` and
    /// `frequency <= period`. The expiry is `now + period + EXPIRY_GRACE`.
    pub fn schedule(
        period: Duration,
        frequency: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if frequency < MIN_FREQUENCY || frequency > MAX_FREQUENCY {
            return Err(DomainError::FrequencyOutOfRange {
                frequency,
                min: MIN_FREQUENCY,
                max: MAX_FREQUENCY,
            });
        }
        if frequency > period {
            return Err(DomainError::FrequencyExceedsPeriod { frequency, period });
        }

        let lifetime = period
            .checked_add(EXPIRY_GRACE)
            .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok())
            .ok_or(DomainError::PeriodUnrepresentable(period))?;
        let expire = now
            .checked_add_signed(lifetime)
            .ok_or(DomainError::PeriodUnrepresentable(period))?;

        Ok(Self {
            id: JobId::new(),
            frequency,
            expire,
        })
    }

    /// Reassemble a descriptor from its parts without validation.
    ///
    /// Decoding still enforces the frequency bounds; this constructor does not.
    pub fn from_parts(id: JobId, frequency: Duration, expire: DateTime<Utc>) -> Self {
        Self {
            id,
            frequency,
            expire,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn expire(&self) -> DateTime<Utc> {
        self.expire
    }

    /// Time left until expiry, or `None` once `now` has reached it.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expire - now)
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_none()
    }
}

mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{MAX_FREQUENCY, MIN_FREQUENCY};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos())
            .map_err(|_| serde::ser::Error::custom("duration does not fit in u64 nanoseconds"))?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let frequency = Duration::from_nanos(u64::deserialize(deserializer)?);
        if !(MIN_FREQUENCY..=MAX_FREQUENCY).contains(&frequency) {
            return Err(serde::de::Error::custom(format!(
                "frequency {frequency:?} outside [{MIN_FREQUENCY:?}, {MAX_FREQUENCY:?}]"
            )));
        }
        Ok(frequency)
    }
}
