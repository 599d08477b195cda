//! `tracker-core`: the sampling job data model.
//!
//! This crate contains **pure domain** values (no infrastructure concerns):
//! the job descriptor that travels over the message channel, the samples a
//! runner collects, and the finalized result. It also owns the request-level
//! validation rules, since those decide which descriptors may be created.

pub mod duration;
pub mod error;
pub mod id;
pub mod job;
pub mod sample;
pub mod validation;

pub use duration::parse_duration;
pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{EXPIRY_GRACE, JobDescriptor, MAX_FREQUENCY, MIN_FREQUENCY};
pub use sample::{JobResult, Sample};
pub use validation::{TrackerRequest, validate_tracker_request};
