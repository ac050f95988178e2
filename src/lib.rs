//! Rate-paced HTTP load generation.
//!
//! A [`worker::WorkerPool`] runs a fixed number of workers that share one
//! [`pacing::PacingController`] and one [`aggregator::ResultAggregator`].
//! Each admitted slot becomes exactly one request through
//! [`executor::RequestExecutor`], and the final snapshot is summarized by
//! [`report::SummaryStats`].

pub mod aggregator;
pub mod args;
pub mod client;
pub mod config;
pub mod errors;
pub mod executor;
pub mod logger;
pub mod metrics;
pub mod pacing;
pub mod report;
pub mod request_log;
pub mod runner;
pub mod utils;
pub mod worker;
