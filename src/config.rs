use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::errors::ConfigError;
use crate::utils::{format_duration, validate_url};

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// HTTP methods a run can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// GET requests are sent without a body.
    pub fn sends_body(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ConfigError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Which stop condition is authoritative for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Duration,
    RequestCount,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Duration => "duration",
            RunMode::RequestCount => "num_requests",
        }
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duration" => Ok(RunMode::Duration),
            "num_requests" => Ok(RunMode::RequestCount),
            _ => Err(ConfigError::UnknownRunMode(s.to_string())),
        }
    }
}

/// When the worker pool stops dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Stop once `start + duration` has passed.
    Duration(Duration),
    /// Stop once this many requests have been attempted.
    RequestCount(u64),
}

impl StopCondition {
    pub fn run_mode(&self) -> RunMode {
        match self {
            StopCondition::Duration(_) => RunMode::Duration,
            StopCondition::RequestCount(_) => RunMode::RequestCount,
        }
    }
}

/// Unvalidated run parameters, as they arrive from the command line.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub url: String,
    pub qps: f64,
    pub duration: Option<Duration>,
    pub num_requests: Option<u64>,
    pub method: String,
    /// JSON object of header names to values.
    pub headers: Option<String>,
    /// JSON document sent as the body of POST, PUT and DELETE requests.
    pub body: Option<String>,
    pub concurrency: usize,
    pub content_type: String,
    pub run_mode: String,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub log_file: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            url: String::new(),
            qps: 1.0,
            duration: Some(Duration::from_secs(1)),
            num_requests: None,
            method: "GET".to_string(),
            headers: None,
            body: None,
            concurrency: 1,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            run_mode: "duration".to_string(),
            client_cert_path: None,
            client_key_path: None,
            log_file: None,
            request_timeout: None,
        }
    }
}

/// Validated, immutable configuration for one load test run.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub method: HttpMethod,
    /// Request headers, including the injected Content-Type.
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub content_type: String,
    pub qps: f64,
    pub stop_condition: StopCondition,
    pub concurrency: usize,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub log_file: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Validates raw parameters. Every check runs before any worker exists.
    pub fn new(params: RunParams) -> Result<Self, ConfigError> {
        if !validate_url(&params.url) {
            return Err(ConfigError::InvalidUrl(params.url));
        }

        if !(params.qps > 0.0 && params.qps.is_finite()) {
            return Err(ConfigError::InvalidRate(params.qps));
        }

        if let Some(duration) = params.duration {
            if duration.is_zero() {
                return Err(ConfigError::InvalidDuration(
                    "must be a positive number".to_string(),
                ));
            }
            if std::time::Instant::now().checked_add(duration).is_none() {
                return Err(ConfigError::InvalidDuration(format!(
                    "{}s is too large",
                    duration.as_secs()
                )));
            }
        }

        if let Some(count) = params.num_requests {
            if count == 0 {
                return Err(ConfigError::InvalidRequestCount(count));
            }
        }

        let method: HttpMethod = params.method.parse()?;

        if params.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(params.concurrency));
        }

        let run_mode: RunMode = params.run_mode.parse()?;
        let stop_condition = match run_mode {
            RunMode::Duration => StopCondition::Duration(
                params
                    .duration
                    .ok_or(ConfigError::MissingStopCondition("duration", "--duration"))?,
            ),
            RunMode::RequestCount => StopCondition::RequestCount(params.num_requests.ok_or(
                ConfigError::MissingStopCondition("num_requests", "--num-requests"),
            )?),
        };

        match (&params.client_cert_path, &params.client_key_path) {
            (Some(_), None) => {
                return Err(ConfigError::IncompleteClientIdentity("--cert", "--key"));
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteClientIdentity("--key", "--cert"));
            }
            _ => {}
        }

        let headers = build_headers(params.headers.as_deref(), &params.content_type)?;
        let body = if method.sends_body() {
            Some(parse_body(params.body.as_deref())?)
        } else {
            None
        };

        Ok(Config {
            target_url: params.url,
            method,
            headers,
            body,
            content_type: params.content_type,
            qps: params.qps,
            stop_condition,
            concurrency: params.concurrency,
            client_cert_path: params.client_cert_path,
            client_key_path: params.client_key_path,
            log_file: params.log_file,
            request_timeout: params.request_timeout,
        })
    }

    pub fn run_mode(&self) -> RunMode {
        self.stop_condition.run_mode()
    }

    /// Builds the header map sent with every request.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        to_header_map(&self.headers)
    }

    /// Serialized request body, if the method carries one.
    pub fn body_text(&self) -> Option<String> {
        self.body.as_ref().map(|body| body.to_string())
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            request_timeout: self.request_timeout,
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting load test:");
        println!("  Target URL: {}", self.target_url);
        println!("  Request type: {}", self.method);
        println!("  Target QPS: {}", self.qps);
        println!("  Concurrent Workers: {}", self.concurrency);
        match self.stop_condition {
            StopCondition::Duration(duration) => println!(
                "  Run Mode: duration ({})",
                format_duration(duration.as_secs())
            ),
            StopCondition::RequestCount(count) => {
                println!("  Run Mode: num_requests ({} requests)", count)
            }
        }

        if self.client_cert_path.is_some() && self.client_key_path.is_some() {
            println!("  mTLS Enabled: Yes");
        } else {
            println!("  mTLS Enabled: No");
        }

        if let Some(ref path) = self.log_file {
            println!("  Request Log: {}", path);
        }

        println!("  Headers:");
        for (name, value) in &self.headers {
            println!("    {}: {}", name, value);
        }
    }
}

/// Parses the JSON header object and injects the Content-Type, replacing
/// any user-supplied content-type regardless of case.
fn build_headers(
    headers_json: Option<&str>,
    content_type: &str,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut headers = BTreeMap::new();

    if let Some(json) = headers_json.filter(|s| !s.trim().is_empty()) {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidHeaders(e.to_string()))?;
        let object = value.as_object().ok_or_else(|| {
            ConfigError::InvalidHeaders("expected a JSON object of name/value pairs".to_string())
        })?;

        for (name, value) in object {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            headers.insert(name.clone(), value);
        }
    }

    headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
    headers.insert("Content-Type".to_string(), content_type.to_string());

    // Surface bad names/values now rather than on the first request.
    to_header_map(&headers)?;

    Ok(headers)
}

fn to_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name).map_err(|e| {
            ConfigError::InvalidHeaders(format!("invalid header name '{}': {}", name, e))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            ConfigError::InvalidHeaders(format!("invalid value for '{}': {}", name, e))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn parse_body(body_json: Option<&str>) -> Result<serde_json::Value, ConfigError> {
    match body_json {
        Some(json) => {
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidBody(e.to_string()))
        }
        None => Ok(serde_json::json!({"default": "body"})),
    }
}
