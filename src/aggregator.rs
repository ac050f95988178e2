//! Thread-safe accumulation of per-request outcomes.
//!
//! Every worker feeds the same [`ResultAggregator`]. All state lives behind a
//! single mutex so the attempted count, the latency samples and the error
//! counts can never drift apart.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use crate::executor::RequestOutcome;

/// Aggregation key for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// A response with status >= 400.
    Status(u16),
    /// The request never produced a response.
    TransportException,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Status(code) => write!(f, "{}", code),
            ErrorKind::TransportException => f.write_str("transport-exception"),
        }
    }
}

/// Point-in-time copy of the aggregated run state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSnapshot {
    pub total_attempted: u64,
    /// Latencies in seconds, in arrival order.
    pub latencies: Vec<f64>,
    pub error_counts: BTreeMap<ErrorKind, u64>,
}

impl AggregateSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.error_counts.values().sum()
    }
}

#[derive(Debug, Default)]
struct AggregateState {
    total_attempted: u64,
    latencies: Vec<f64>,
    error_counts: BTreeMap<ErrorKind, u64>,
}

impl AggregateState {
    fn record(&mut self, outcome: &RequestOutcome) {
        self.latencies.push(outcome.latency.as_secs_f64());
        if let Some(kind) = outcome.error_kind() {
            *self.error_counts.entry(kind).or_insert(0) += 1;
        }
    }
}

/// Shared accumulator for a single run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    state: Mutex<AggregateState>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the outcome's latency and counts it if it is an error.
    pub fn record(&self, outcome: &RequestOutcome) {
        self.lock().record(outcome);
    }

    pub fn increment_attempted(&self) {
        self.lock().total_attempted += 1;
    }

    /// Records an outcome and counts the attempt in one critical section.
    pub fn record_attempt(&self, outcome: &RequestOutcome) {
        let mut state = self.lock();
        state.record(outcome);
        state.total_attempted += 1;
    }

    pub fn attempted(&self) -> u64 {
        self.lock().total_attempted
    }

    /// Copies the current state. Only call once every worker has joined.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.lock();
        AggregateSnapshot {
            total_attempted: state.total_attempted,
            latencies: state.latencies.clone(),
            error_counts: state.error_counts.clone(),
        }
    }

    // A panicking worker cannot leave the state half-updated: every mutation
    // is a single push or increment, so a poisoned lock is still usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, AggregateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn ok(status: u16, ms: u64) -> RequestOutcome {
        RequestOutcome::completed(Duration::from_millis(ms), status)
    }

    fn failed(ms: u64) -> RequestOutcome {
        RequestOutcome::transport_failure(Duration::from_millis(ms))
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Status(503).to_string(), "503");
        assert_eq!(
            ErrorKind::TransportException.to_string(),
            "transport-exception"
        );
    }

    #[test]
    fn records_latency_for_every_outcome() {
        let aggregator = ResultAggregator::new();
        aggregator.record_attempt(&ok(200, 10));
        aggregator.record_attempt(&ok(404, 20));
        aggregator.record_attempt(&failed(30));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total_attempted, 3);
        assert_eq!(snapshot.latencies, vec![0.01, 0.02, 0.03]);
        assert_eq!(snapshot.error_counts.get(&ErrorKind::Status(404)), Some(&1));
        assert_eq!(
            snapshot.error_counts.get(&ErrorKind::TransportException),
            Some(&1)
        );
        assert_eq!(snapshot.total_errors(), 2);
    }

    #[test]
    fn redirects_and_successes_are_not_errors() {
        let aggregator = ResultAggregator::new();
        for status in [200, 201, 204, 301, 302, 399] {
            aggregator.record_attempt(&ok(status, 1));
        }
        let snapshot = aggregator.snapshot();
        assert!(snapshot.error_counts.is_empty());
        assert_eq!(snapshot.latencies.len(), 6);
    }

    #[test]
    fn record_and_increment_are_separate_primitives() {
        let aggregator = ResultAggregator::new();
        aggregator.record(&ok(500, 5));
        assert_eq!(aggregator.attempted(), 0);
        aggregator.increment_attempted();
        assert_eq!(aggregator.attempted(), 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let aggregator = Arc::new(ResultAggregator::new());
        let mut handles = Vec::new();

        for t in 0..8 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let outcome = if (t + i) % 10 == 0 {
                        failed(1)
                    } else if i % 7 == 0 {
                        ok(500, 1)
                    } else {
                        ok(200, 1)
                    };
                    aggregator.record_attempt(&outcome);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total_attempted, 4000);
        assert_eq!(snapshot.latencies.len(), 4000);
        assert!(snapshot.total_errors() <= snapshot.total_attempted);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let aggregator = ResultAggregator::new();
        aggregator.record_attempt(&ok(200, 1));
        let first = aggregator.snapshot();
        aggregator.record_attempt(&ok(200, 1));
        assert_eq!(first.total_attempted, 1);
        assert_eq!(aggregator.snapshot().total_attempted, 2);
    }
}
