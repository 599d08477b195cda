//! Dispatcher runtime statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::runner::Outcome;

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub consumed: u64,
    pub acked: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    consumed: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    pub(crate) fn consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: &Outcome) {
        if outcome.is_finalized() {
            self.acked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected();
        }
    }

    /// Count one runner as in flight until the guard drops.
    pub(crate) fn begin(self: &Arc<Self>) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlight {
            counters: self.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
            consumed: self.consumed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct InFlight {
    counters: Arc<Counters>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_survives_runners_finishing() {
        let counters = Arc::new(Counters::default());
        let a = counters.begin();
        let b = counters.begin();
        drop(a);
        let _c = counters.begin();
        drop(b);

        let stats = counters.snapshot();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.peak_in_flight, 2);
    }
}
