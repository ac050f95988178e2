use std::sync::Arc;
use tracing::{info, warn};

use crate::client::build_client;
use crate::config::Config;
use crate::errors::ConfigError;
use crate::executor::{PreparedRequest, ReqwestTransport, RequestExecutor, Transport};
use crate::pacing::PacingController;
use crate::report::SummaryStats;
use crate::request_log::RequestLog;
use crate::utils::format_duration;
use crate::worker::{RunResult, WorkerPool};

/// Final outcome of [`run_load_test`].
#[derive(Debug, Clone)]
pub struct LoadTestReport {
    pub run: RunResult,
    pub stats: SummaryStats,
}

/// Runs a complete load test over HTTP with the configured client identity.
///
/// Errors only come from setup (client, log file); once workers start the
/// run always completes.
pub async fn run_load_test(config: &Config) -> Result<LoadTestReport, ConfigError> {
    let client = build_client(&config.to_client_config())?;
    let transport = ReqwestTransport::new(client).capture_body(config.log_file.is_some());
    run_with_transport(config, Arc::new(transport)).await
}

/// Same as [`run_load_test`] over a caller-supplied transport.
pub async fn run_with_transport(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<LoadTestReport, ConfigError> {
    let request = PreparedRequest::from_config(config)?;
    let mut executor = RequestExecutor::new(transport, request);

    let log = match config.log_file {
        Some(ref path) => Some(Arc::new(RequestLog::create(path)?)),
        None => None,
    };
    if let Some(ref log) = log {
        executor = executor.with_log(Arc::clone(log));
    }

    let pacer = Arc::new(PacingController::new(config.qps));
    let pool = WorkerPool::new(config.concurrency, config.stop_condition, pacer, executor);
    let run = pool.run().await;

    if let Some(log) = log {
        if let Err(e) = log.flush() {
            warn!(error = %e, "Failed to flush request log");
        }
    }

    info!(
        elapsed = %format_duration(run.elapsed.as_secs()),
        attempted = run.snapshot.total_attempted,
        "Load test finished"
    );

    let stats = SummaryStats::from_snapshot(&run.snapshot);
    Ok(LoadTestReport { run, stats })
}
