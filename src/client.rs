use std::fs::File;
use std::io::Read;
use tokio::time::Duration;
use tracing::info;

use crate::errors::ConfigError;

/// Configuration for building the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub request_timeout: Option<Duration>,
}

/// Builds a reqwest HTTP client with the specified configuration.
///
/// The client is shared by every worker; connection pooling is reqwest's.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ConfigError> {
    let mut client_builder = reqwest::Client::builder();

    // mTLS Configuration
    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    if let Some(timeout) = config.request_timeout {
        client_builder = client_builder.timeout(timeout);
        info!(timeout_ms = timeout.as_millis() as u64, "Request timeout configured");
    }

    Ok(client_builder.build()?)
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>, ConfigError> {
    let mut file = File::open(path).map_err(|e| {
        ConfigError::ClientIdentity(format!("Failed to open {} file '{}': {}", what, path, e))
    })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|e| {
        ConfigError::ClientIdentity(format!("Failed to read {} file '{}': {}", what, path, e))
    })?;
    Ok(buf)
}

fn configure_mtls(
    mut client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, ConfigError> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            info!(cert_path, key_path, "Loading mTLS client identity");

            let cert_pem_buf = read_pem(cert_path, "client certificate")?;
            let key_pem_buf = read_pem(key_path, "client key")?;

            // Validate certificate PEM
            let mut cert_pem_cursor = std::io::Cursor::new(cert_pem_buf.as_slice());
            let certs_result: Vec<_> = rustls_pemfile::certs(&mut cert_pem_cursor).collect();
            if certs_result.is_empty() {
                return Err(ConfigError::ClientIdentity(format!(
                    "No PEM certificates found in '{}'",
                    cert_path
                )));
            }
            if let Some(Err(e)) = certs_result.into_iter().find(|cert| cert.is_err()) {
                return Err(ConfigError::ClientIdentity(format!(
                    "Failed to parse PEM certificates from '{}': {}",
                    cert_path, e
                )));
            }

            // Validate private key PEM (must be PKCS#8)
            let mut key_pem_cursor = std::io::Cursor::new(key_pem_buf.as_slice());
            let keys_result: Vec<_> =
                rustls_pemfile::pkcs8_private_keys(&mut key_pem_cursor).collect();
            if keys_result.is_empty() {
                return Err(ConfigError::ClientIdentity(format!(
                    "No PKCS#8 private keys found in '{}'. Ensure the file contains a valid PEM-encoded PKCS#8 private key.",
                    key_path
                )));
            }
            if let Some(Err(e)) = keys_result.into_iter().find(|key| key.is_err()) {
                return Err(ConfigError::ClientIdentity(format!(
                    "Failed to parse private key from '{}' as PKCS#8: {}",
                    key_path, e
                )));
            }

            // Combine certificate PEM and key PEM into one buffer
            let mut combined_pem_buf = Vec::new();
            combined_pem_buf.extend_from_slice(&cert_pem_buf);
            if !cert_pem_buf.ends_with(b"\n") && !key_pem_buf.starts_with(b"\n") {
                combined_pem_buf.push(b'\n');
            }
            combined_pem_buf.extend_from_slice(&key_pem_buf);

            let identity = reqwest::Identity::from_pem(&combined_pem_buf).map_err(|e| {
                ConfigError::ClientIdentity(format!(
                    "Failed to create client identity from PEM (cert+key): {}",
                    e
                ))
            })?;

            client_builder = client_builder.identity(identity);
            info!("Configured mTLS with client certificate and key");
        }
        (Some(_), None) => {
            return Err(ConfigError::IncompleteClientIdentity("--cert", "--key"));
        }
        (None, Some(_)) => {
            return Err(ConfigError::IncompleteClientIdentity("--key", "--cert"));
        }
        (None, None) => {
            // No mTLS configured
        }
    }

    Ok(client_builder)
}
