//! Samples and the finalized result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// One timestamped reading collected for a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "Value")]
    pub value: f64,
}

impl Sample {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }

    /// A sample taken now.
    pub fn now(value: f64) -> Self {
        Self::new(Utc::now(), value)
    }
}

/// The finalized, immutable aggregate of all samples of one job.
///
/// Written exactly once per job lifecycle, at finalization. `values` keeps
/// the order in which the runner appended them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(rename = "Id")]
    pub id: JobId,
    #[serde(rename = "Values")]
    pub values: Vec<Sample>,
}

impl JobResult {
    pub fn new(id: JobId, values: Vec<Sample>) -> Self {
        Self { id, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_json_matches_storage_layout() {
        let id = JobId::new();
        let time = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = JobResult::new(id, vec![Sample::new(time, 40123.0)]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["Id"], id.to_string());
        assert_eq!(json["Values"][0]["Time"], "2024-01-01T00:00:00Z");
        assert_eq!(json["Values"][0]["Value"], 40123.0);
    }
}
