//! Error types for configuration and request transport.
//!
//! Configuration errors are raised before any worker starts. Transport errors
//! never leave the request executor: they are turned into outcomes and only
//! categorized here for logging and metrics labels.

use std::fmt;
use thiserror::Error;

/// A named validation failure that prevents a run from starting.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: '{0}'")]
    InvalidUrl(String),

    #[error("Invalid QPS: must be a positive number (got {0})")]
    InvalidRate(f64),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid number of requests: must be a positive number (got {0})")]
    InvalidRequestCount(u64),

    #[error("Invalid HTTP method '{0}': must be 'GET', 'POST', 'PUT', or 'DELETE'")]
    UnsupportedMethod(String),

    #[error("Invalid number of concurrent requests: must be a positive number (got {0})")]
    InvalidConcurrency(usize),

    #[error("Invalid run mode '{0}': must be 'duration' or 'num_requests'")]
    UnknownRunMode(String),

    #[error("Run mode '{0}' requires {1} to be set")]
    MissingStopCondition(&'static str, &'static str),

    #[error("Invalid headers: {0}")]
    InvalidHeaders(String),

    #[error("Invalid JSON body: {0}")]
    InvalidBody(String),

    #[error("{0} is set, but {1} is missing for mTLS")]
    IncompleteClientIdentity(&'static str, &'static str),

    #[error("Client identity: {0}")]
    ClientIdentity(String),

    #[error("Failed to open log file '{path}': {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Categories of transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network connectivity errors (DNS, connection refused, reset, etc.)
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// TLS/SSL handshake or certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        let error_msg = format_error_chain(error).to_lowercase();

        // Socket-level timeouts surface as connect errors with an io message.
        if error.is_timeout() || error_msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if error_msg.contains("certificate")
            || error_msg.contains("tls")
            || error_msg.contains("ssl")
            || error_msg.contains("handshake")
        {
            // TLS failures also surface as connect errors.
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else if error_msg.contains("dns")
            || error_msg.contains("resolve")
            || error_msg.contains("connection")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A failed request that never produced an HTTP response.
#[derive(Error, Debug, Clone)]
#[error("[{}] {message}", .category.label())]
pub struct TransportError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TransportError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(&error),
            message: format_error_chain(&error),
        }
    }
}

/// Joins an error and its sources, since reqwest keeps the useful detail
/// (e.g. "Connection refused") in the source chain.
fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
