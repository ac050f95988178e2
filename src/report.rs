//! Summary statistics for a finished run.
//!
//! Percentiles use linear interpolation between closest ranks over the
//! sorted samples: for percentile `p` over `n` values the rank is
//! `p / 100 * (n - 1)` and the result interpolates between the values at
//! `floor(rank)` and `ceil(rank)`.

use std::collections::BTreeMap;
use std::fmt;

use crate::aggregator::{AggregateSnapshot, ErrorKind};

/// Derived, read-only statistics. Latencies are in seconds; mean and
/// percentiles are `f64::INFINITY` when nothing was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStats {
    pub total_requests: u64,
    pub total_errors: u64,
    /// Fraction in `[0, 1]`.
    pub error_rate: f64,
    pub mean_latency: f64,
    pub stdev_latency: f64,
    pub p50_latency: f64,
    pub p90_latency: f64,
    pub p99_latency: f64,
    pub error_counts: BTreeMap<ErrorKind, u64>,
}

impl SummaryStats {
    pub fn from_snapshot(snapshot: &AggregateSnapshot) -> Self {
        let total_requests = snapshot.total_attempted;
        let total_errors = snapshot.total_errors();
        let error_rate = if total_requests > 0 {
            total_errors as f64 / total_requests as f64
        } else {
            0.0
        };

        let mut sorted = snapshot.latencies.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Self {
            total_requests,
            total_errors,
            error_rate,
            mean_latency: mean(&snapshot.latencies).unwrap_or(f64::INFINITY),
            stdev_latency: sample_stdev(&snapshot.latencies),
            p50_latency: percentile_sorted(&sorted, 50.0).unwrap_or(f64::INFINITY),
            p90_latency: percentile_sorted(&sorted, 90.0).unwrap_or(f64::INFINITY),
            p99_latency: percentile_sorted(&sorted, 99.0).unwrap_or(f64::INFINITY),
            error_counts: snapshot.error_counts.clone(),
        }
    }

    /// `{404: 3, transport-exception: 1}`
    pub fn format_error_counts(&self) -> String {
        let entries: Vec<String> = self
            .error_counts
            .iter()
            .map(|(kind, count)| format!("{}: {}", kind, count))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

impl fmt::Display for SummaryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Requests: {}", self.total_requests)?;
        writeln!(f, "Total Errors: {}", self.total_errors)?;
        writeln!(f, "Error Rate: {:.2}%", self.error_rate * 100.0)?;
        writeln!(f, "Average Latency: {:.4}s", self.mean_latency)?;
        writeln!(f, "Latency Standard Deviation: {:.4}s", self.stdev_latency)?;
        writeln!(f, "P50 Latency: {:.4}s", self.p50_latency)?;
        writeln!(f, "P90 Latency: {:.4}s", self.p90_latency)?;
        writeln!(f, "P99 Latency: {:.4}s", self.p99_latency)?;
        write!(f, "Errors by Status Code: {}", self.format_error_counts())
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Unbiased (n - 1) standard deviation; 0 for fewer than two values.
pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Percentile of an already sorted slice, `None` when empty.
pub fn percentile_sorted(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Percentile of unsorted values. The input is left untouched.
pub fn percentile(values: &[f64], percentile: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, percentile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(latencies: Vec<f64>, errors: &[(ErrorKind, u64)], attempted: u64) -> AggregateSnapshot {
        AggregateSnapshot {
            total_attempted: attempted,
            latencies,
            error_counts: errors.iter().cloned().collect(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_run_reports_sentinels() {
        let stats = SummaryStats::from_snapshot(&AggregateSnapshot::default());
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.mean_latency, f64::INFINITY);
        assert_eq!(stats.stdev_latency, 0.0);
        assert_eq!(stats.p50_latency, f64::INFINITY);
        assert_eq!(stats.p90_latency, f64::INFINITY);
        assert_eq!(stats.p99_latency, f64::INFINITY);
    }

    #[test]
    fn single_sample() {
        let stats = SummaryStats::from_snapshot(&snapshot(vec![0.25], &[], 1));
        assert_eq!(stats.mean_latency, 0.25);
        assert_eq!(stats.stdev_latency, 0.0);
        assert_eq!(stats.p50_latency, 0.25);
        assert_eq!(stats.p99_latency, 0.25);
    }

    #[test]
    fn linear_interpolation_between_ranks() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        assert!(approx(percentile(&values, 50.0).unwrap(), 5.5));
        assert!(approx(percentile(&values, 90.0).unwrap(), 9.1));
        assert!(approx(percentile(&values, 99.0).unwrap(), 9.91));
        assert!(approx(percentile(&values, 0.0).unwrap(), 1.0));
        assert!(approx(percentile(&values, 100.0).unwrap(), 10.0));
    }

    #[test]
    fn mean_and_sample_stdev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(approx(mean(&values).unwrap(), 5.0));
        // Population stdev is 2.0; the sample stdev is sqrt(32 / 7).
        assert!(approx(sample_stdev(&values), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn percentiles_are_idempotent_and_non_destructive() {
        let snap = snapshot(vec![0.5, 0.1, 0.3, 0.2, 0.4], &[], 5);
        let before = snap.clone();

        let first = SummaryStats::from_snapshot(&snap);
        let second = SummaryStats::from_snapshot(&snap);

        assert_eq!(first, second);
        assert_eq!(snap, before, "input latencies must keep their order");
        assert!(approx(first.p50_latency, 0.3));
    }

    #[test]
    fn error_rate_counts_status_and_transport_errors() {
        let snap = snapshot(
            vec![0.1; 10],
            &[(ErrorKind::Status(500), 2), (ErrorKind::TransportException, 3)],
            10,
        );
        let stats = SummaryStats::from_snapshot(&snap);
        assert_eq!(stats.total_errors, 5);
        assert!(approx(stats.error_rate, 0.5));
        assert_eq!(stats.format_error_counts(), "{500: 2, transport-exception: 3}");
    }

    #[test]
    fn report_text_matches_layout() {
        let snap = snapshot(vec![0.1, 0.2], &[(ErrorKind::Status(404), 1)], 2);
        let text = SummaryStats::from_snapshot(&snap).to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Total Requests: 2");
        assert_eq!(lines[1], "Total Errors: 1");
        assert_eq!(lines[2], "Error Rate: 50.00%");
        assert_eq!(lines[3], "Average Latency: 0.1500s");
        assert_eq!(lines[5], "P50 Latency: 0.1500s");
        assert_eq!(lines[8], "Errors by Status Code: {404: 1}");
    }

    #[test]
    fn empty_run_prints_inf() {
        let text = SummaryStats::from_snapshot(&AggregateSnapshot::default()).to_string();
        assert!(text.contains("Average Latency: infs"));
        assert!(text.contains("Errors by Status Code: {}"));
    }
}
