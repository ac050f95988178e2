//! Single-request execution and outcome classification.
//!
//! [`RequestExecutor::execute`] issues exactly one request through a
//! [`Transport`] and always returns a [`RequestOutcome`]: any response is a
//! completed outcome carrying its status code, and any failure to get one is
//! a transport failure. Nothing propagates past this boundary.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::aggregator::ErrorKind;
use crate::config::{Config, HttpMethod};
use crate::errors::{ConfigError, TransportError};
use crate::metrics::{
    status_code_label, CONCURRENT_REQUESTS, REQUEST_DURATION_SECONDS, REQUEST_STATUS_CODES,
    REQUEST_TOTAL, TRANSPORT_ERRORS,
};
use crate::request_log::{LogEntry, LoggedRequest, LoggedResponse, RequestLog};

/// The result of one attempted request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOutcome {
    /// Wall-clock time from dispatch to response receipt or failure.
    pub latency: Duration,
    /// `None` when the transport failed before a response arrived.
    pub status: Option<u16>,
}

impl RequestOutcome {
    pub fn completed(latency: Duration, status: u16) -> Self {
        Self {
            latency,
            status: Some(status),
        }
    }

    pub fn transport_failure(latency: Duration) -> Self {
        Self {
            latency,
            status: None,
        }
    }

    /// Status >= 400 and transport failures count as errors. Their
    /// latencies are still regular samples.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            Some(code) if code >= 400 => Some(ErrorKind::Status(code)),
            Some(_) => None,
            None => Some(ErrorKind::TransportException),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind().is_some()
    }
}

/// Everything needed to issue the run's request, built once from [`Config`].
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderMap,
    /// The same headers as strings, for the request log.
    pub header_fields: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub body_text: Option<String>,
}

impl PreparedRequest {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            method: config.method,
            url: config.target_url.clone(),
            headers: config.header_map()?,
            header_fields: config.headers.clone(),
            body: config.body.clone(),
            body_text: config.body_text(),
        })
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Only captured when something (the request log) needs it.
    pub body: Option<String>,
}

/// Executes prepared requests. The production implementation is
/// [`ReqwestTransport`]; tests substitute their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport sharing one connection pool across workers.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    capture_body: bool,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            capture_body: false,
        }
    }

    /// Keep response bodies as text instead of discarding them.
    pub fn capture_body(mut self, capture: bool) -> Self {
        self.capture_body = capture;
        self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .headers(request.headers.clone());
        if let Some(ref body) = request.body_text {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        // The body is part of the response, so it is read inside the timed
        // window either way.
        let body = if self.capture_body {
            Some(response.text().await?)
        } else {
            while response.chunk().await?.is_some() {}
            None
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Issues one request per call and turns the result into an outcome.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    request: Arc<PreparedRequest>,
    log: Option<Arc<RequestLog>>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, request: PreparedRequest) -> Self {
        Self {
            transport,
            request: Arc::new(request),
            log: None,
        }
    }

    pub fn with_log(mut self, log: Arc<RequestLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Performs exactly one request. Never fails.
    pub async fn execute(&self, task_id: usize) -> RequestOutcome {
        CONCURRENT_REQUESTS.inc();
        REQUEST_TOTAL.inc();

        let request_start_time = Instant::now();
        let result = self.transport.send(&self.request).await;
        let latency = request_start_time.elapsed();

        REQUEST_DURATION_SECONDS.observe(latency.as_secs_f64());
        CONCURRENT_REQUESTS.dec();

        let outcome = match &result {
            Ok(response) => {
                REQUEST_STATUS_CODES
                    .with_label_values(&[status_code_label(response.status)])
                    .inc();
                debug!(
                    task_id,
                    url = %self.request.url,
                    status_code = response.status,
                    latency_ms = latency.as_millis() as u64,
                    "Request completed"
                );
                RequestOutcome::completed(latency, response.status)
            }
            Err(e) => {
                REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();
                TRANSPORT_ERRORS
                    .with_label_values(&[e.category.label()])
                    .inc();
                debug!(
                    task_id,
                    url = %self.request.url,
                    error = %e.message,
                    error_category = %e.category.label(),
                    "Request failed"
                );
                RequestOutcome::transport_failure(latency)
            }
        };

        if let Some(ref log) = self.log {
            self.write_log(log, &result);
        }

        outcome
    }

    fn write_log(&self, log: &RequestLog, result: &Result<TransportResponse, TransportError>) {
        let request = LoggedRequest {
            method: self.request.method.as_str(),
            url: &self.request.url,
            headers: &self.request.header_fields,
            body: self.request.body.as_ref(),
        };
        let entry = match result {
            Ok(response) => LogEntry {
                request,
                response: Some(LoggedResponse {
                    status_code: response.status,
                    headers: &response.headers,
                    body: response.body.as_deref(),
                }),
                error: None,
            },
            Err(e) => LogEntry {
                request,
                response: None,
                error: Some(e.message.as_str()),
            },
        };

        if let Err(e) = log.append(&entry) {
            warn!(error = %e, "Failed to write request log entry");
        }
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("request", &self.request)
            .field("log", &self.log.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunParams;
    use crate::errors::ErrorCategory;
    use std::io::{self, Write};
    use std::sync::Mutex;

    struct FixedTransport(Result<TransportResponse, TransportError>);

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            _request: &PreparedRequest,
        ) -> Result<TransportResponse, TransportError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.0.clone()
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn prepared(method: &str) -> PreparedRequest {
        let config = Config::new(RunParams {
            url: "http://localhost:9/api".to_string(),
            qps: 1.0,
            method: method.to_string(),
            ..RunParams::default()
        })
        .unwrap();
        PreparedRequest::from_config(&config).unwrap()
    }

    fn executor(result: Result<TransportResponse, TransportError>) -> RequestExecutor {
        RequestExecutor::new(Arc::new(FixedTransport(result)), prepared("POST"))
    }

    #[test]
    fn classification_by_status() {
        let latency = Duration::from_millis(1);
        assert_eq!(RequestOutcome::completed(latency, 200).error_kind(), None);
        assert_eq!(RequestOutcome::completed(latency, 302).error_kind(), None);
        assert_eq!(
            RequestOutcome::completed(latency, 400).error_kind(),
            Some(ErrorKind::Status(400))
        );
        assert_eq!(
            RequestOutcome::completed(latency, 503).error_kind(),
            Some(ErrorKind::Status(503))
        );
        assert_eq!(
            RequestOutcome::transport_failure(latency).error_kind(),
            Some(ErrorKind::TransportException)
        );
    }

    #[test]
    fn prepared_request_carries_body_only_for_non_get() {
        assert!(prepared("GET").body_text.is_none());
        assert_eq!(
            prepared("POST").body_text.as_deref(),
            Some(r#"{"default":"body"}"#)
        );
    }

    #[tokio::test]
    async fn response_becomes_completed_outcome() {
        let outcome = executor(Ok(TransportResponse {
            status: 404,
            ..TransportResponse::default()
        }))
        .execute(0)
        .await;

        assert_eq!(outcome.status, Some(404));
        assert!(outcome.is_error());
        assert!(outcome.latency >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn transport_error_becomes_failure_outcome() {
        let outcome = executor(Err(TransportError::new(
            ErrorCategory::NetworkError,
            "connection refused",
        )))
        .execute(0)
        .await;

        assert_eq!(outcome.status, None);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::TransportException));
        assert!(outcome.latency >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn writes_one_log_line_per_request() {
        let buf = SharedBuf::default();
        let log = Arc::new(RequestLog::from_writer(buf.clone()));

        let ok = executor(Ok(TransportResponse {
            status: 200,
            headers: BTreeMap::from([("server".to_string(), "mock".to_string())]),
            body: Some("hello".to_string()),
        }))
        .with_log(Arc::clone(&log));
        let failing = executor(Err(TransportError::new(
            ErrorCategory::TimeoutError,
            "timed out",
        )))
        .with_log(log);

        ok.execute(0).await;
        failing.execute(1).await;

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["request"]["method"], "POST");
        assert_eq!(lines[0]["request"]["url"], "http://localhost:9/api");
        assert_eq!(lines[0]["request"]["body"]["default"], "body");
        assert_eq!(lines[0]["response"]["status_code"], 200);
        assert_eq!(lines[0]["response"]["headers"]["server"], "mock");
        assert_eq!(lines[0]["response"]["body"], "hello");

        assert!(lines[1]["response"].is_null());
        assert_eq!(lines[1]["error"], "timed out");
    }
}
