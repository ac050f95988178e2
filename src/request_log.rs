//! Newline-delimited JSON log of every request and its response.
//!
//! Workers run concurrently but the file is a single ordered resource, so
//! each entry is written whole while holding the writer lock.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

use crate::errors::ConfigError;

#[derive(Debug, Serialize)]
pub struct LoggedRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub body: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct LoggedResponse<'a> {
    pub status_code: u16,
    pub headers: &'a BTreeMap<String, String>,
    pub body: Option<&'a str>,
}

/// One line of the request log. A transport failure has a `null` response
/// and carries the failure message in `error`.
#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    pub request: LoggedRequest<'a>,
    pub response: Option<LoggedResponse<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

/// Shared, serialized writer for [`LogEntry`] lines.
pub struct RequestLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl RequestLog {
    /// Creates (or truncates) the log file.
    pub fn create(path: &str) -> Result<Self, ConfigError> {
        let file = File::create(path).map_err(|source| ConfigError::LogFile {
            path: path.to_string(),
            source,
        })?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Serializes the entry first so a failed write never leaves half a line.
    pub fn append(&self, entry: &LogEntry<'_>) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&line)
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .flush()
    }
}

impl std::fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLog").finish_non_exhaustive()
    }
}
