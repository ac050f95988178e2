use clap::Parser;
use tokio::time::Duration;

use crate::config::{RunParams, DEFAULT_CONTENT_TYPE};
use crate::utils::parse_duration_string;

/// Command line for a rate-paced HTTP load test.
///
/// Every option can also be supplied through the `LOADTEST_*` environment
/// variable named in its help text.
#[derive(Debug, Parser, Clone)]
#[clap(version, about = "HTTP load testing tool with a fixed target request rate")]
pub struct LoadTestArgs {
    /// URL to test
    #[arg(env = "LOADTEST_URL")]
    pub url: String,

    /// Queries per second
    #[arg(long, env = "LOADTEST_QPS")]
    pub qps: f64,

    /// Duration of the test (seconds, or 30s/10m/2h/1d)
    #[arg(long, env = "LOADTEST_DURATION", default_value = "1", value_parser = parse_duration_arg)]
    pub duration: Duration,

    /// Number of requests to perform (run mode num_requests)
    #[arg(long = "num-requests", alias = "num_requests", env = "LOADTEST_NUM_REQUESTS")]
    pub num_requests: Option<u64>,

    /// HTTP method to use: GET, POST, PUT or DELETE
    #[arg(long, short = 'X', env = "LOADTEST_METHOD", default_value = "GET")]
    pub method: String,

    /// HTTP headers as a JSON object
    #[arg(long, env = "LOADTEST_HEADERS")]
    pub headers: Option<String>,

    /// HTTP request body as JSON (POST, PUT, DELETE)
    #[arg(long, env = "LOADTEST_BODY")]
    pub body: Option<String>,

    /// Number of concurrent workers
    #[arg(long, env = "LOADTEST_CONCURRENT", default_value_t = 1)]
    pub concurrent: usize,

    /// Content-Type of the request
    #[arg(long = "content-type", env = "LOADTEST_CONTENT_TYPE", default_value = DEFAULT_CONTENT_TYPE)]
    pub content_type: String,

    /// Path to the client certificate (PEM)
    #[arg(long, env = "LOADTEST_CERT")]
    pub cert: Option<String>,

    /// Path to the client private key (PEM, PKCS#8)
    #[arg(long, env = "LOADTEST_KEY")]
    pub key: Option<String>,

    /// Path to the request log file (one JSON object per line)
    #[arg(long = "log-file", env = "LOADTEST_LOG_FILE")]
    pub log_file: Option<String>,

    /// Run mode: duration or num_requests
    #[arg(long = "run-mode", env = "LOADTEST_RUN_MODE", default_value = "duration")]
    pub run_mode: String,

    /// Per-request timeout (seconds, or 30s/1m)
    #[arg(long, env = "LOADTEST_TIMEOUT", value_parser = parse_duration_arg)]
    pub timeout: Option<Duration>,

    /// Serve Prometheus metrics on this port during the run
    #[arg(long = "metrics-port", env = "LOADTEST_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

fn parse_duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration_string(value)
}

impl LoadTestArgs {
    /// Hands the raw values to config validation.
    pub fn into_params(self) -> RunParams {
        RunParams {
            url: self.url,
            qps: self.qps,
            duration: Some(self.duration),
            num_requests: self.num_requests,
            method: self.method,
            headers: self.headers,
            body: self.body,
            concurrency: self.concurrent,
            content_type: self.content_type,
            run_mode: self.run_mode,
            client_cert_path: self.cert,
            client_key_path: self.key,
            log_file: self.log_file,
            request_timeout: self.timeout,
        }
    }
}
