//! `tracker-scheduler`: job execution on top of the message channel.
//!
//! ## Pieces
//!
//! - [`runner::JobRunner`]: per-job state machine (`Sampling → Finalizing →
//!   {Acked, Rejected}`) racing cancellation, expiry and the sampling timer.
//! - [`dispatcher::Dispatcher`]: pulls consumed jobs and runs at most
//!   `max_workers` runners at once.
//! - [`service::TrackerService`]: composition root exposing job creation,
//!   result lookup and `start`.
//!
//! One process-wide `CancellationToken` stops everything: runners reject
//! their jobs, the dispatcher returns buffered jobs and the channel shuts
//! down once the runners have drained.

pub mod dispatcher;
pub mod runner;
pub mod service;
pub mod stats;

pub use dispatcher::Dispatcher;
pub use runner::{JobRunner, Outcome, StaleSamples};
pub use service::{ServiceConfig, ServiceError, ServiceHandle, TrackerApi, TrackerService};
pub use stats::DispatcherStats;
