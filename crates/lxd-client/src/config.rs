// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the LXD client.

use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{LxdError, Result};

/// Default LXD HTTPS listener.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:8443";

/// Configuration for the [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct LxdConfig {
    /// Server host and port, without scheme.
    pub endpoint: String,
    /// Talk `http://`/`ws://` instead of TLS.
    pub plaintext: bool,
    /// Project every request is scoped to (`?project=`).
    pub project: Option<String>,
    /// PEM client certificate used for TLS client authentication.
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`.
    pub client_key: Option<PathBuf>,
    /// PEM certificate of the server, trusted in addition to the web PKI roots.
    pub server_cert: Option<PathBuf>,
    /// Skip TLS certificate verification (development only).
    pub skip_cert_verification: bool,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Server-side timeout passed to operation waits. `None` waits until the
    /// operation finishes.
    pub wait_timeout: Option<Duration>,
}

impl Default for LxdConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            plaintext: false,
            project: None,
            client_cert: None,
            client_key: None,
            server_cert: None,
            skip_cert_verification: false,
            connect_timeout: Duration::from_secs(10),
            wait_timeout: None,
        }
    }
}

impl LxdConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration for a local development server.
    ///
    /// This enables certificate verification skipping.
    pub fn localhost() -> Self {
        Self {
            skip_cert_verification: true,
            ..Self::default()
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LXD_ENDPOINT`: Server host:port (default: "127.0.0.1:8443")
    /// - `LXD_PLAINTEXT`: Use http/ws instead of https/wss (default: "false")
    /// - `LXD_PROJECT`: Project to scope requests to
    /// - `LXD_CLIENT_CERT` / `LXD_CLIENT_KEY`: PEM client certificate and key
    /// - `LXD_SERVER_CERT`: PEM server certificate to trust
    /// - `LXD_SKIP_CERT_VERIFICATION`: Skip TLS verification (default: "false")
    /// - `LXD_CONNECT_TIMEOUT_MS`: Connect timeout in milliseconds (default: 10000)
    /// - `LXD_WAIT_TIMEOUT_S`: Server-side operation wait timeout in seconds
    pub fn from_env() -> Result<Self> {
        let endpoint =
            std::env::var("LXD_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let plaintext = env_flag("LXD_PLAINTEXT");
        let skip_cert_verification = env_flag("LXD_SKIP_CERT_VERIFICATION");

        let project = std::env::var("LXD_PROJECT").ok().filter(|p| !p.is_empty());
        let client_cert = std::env::var("LXD_CLIENT_CERT").ok().map(PathBuf::from);
        let client_key = std::env::var("LXD_CLIENT_KEY").ok().map(PathBuf::from);
        let server_cert = std::env::var("LXD_SERVER_CERT").ok().map(PathBuf::from);

        let connect_timeout_ms: u64 = std::env::var("LXD_CONNECT_TIMEOUT_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .map_err(|e| LxdError::Config(format!("invalid LXD_CONNECT_TIMEOUT_MS: {}", e)))?;

        let wait_timeout = match std::env::var("LXD_WAIT_TIMEOUT_S") {
            Ok(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|e| LxdError::Config(format!("invalid LXD_WAIT_TIMEOUT_S: {}", e)))?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let config = Self {
            endpoint,
            plaintext,
            project,
            client_cert,
            client_key,
            server_cert,
            skip_cert_verification,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            wait_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check field combinations that can only fail at connect time otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(LxdError::Config("endpoint must not be empty".to_string()));
        }
        if self.endpoint.contains("://") {
            return Err(LxdError::Config(format!(
                "endpoint must be host:port without scheme, got {}",
                self.endpoint
            )));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(LxdError::Config(
                "client certificate and key must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// The endpoint this configuration points at.
    pub fn server_endpoint(&self) -> Endpoint {
        if self.plaintext {
            Endpoint::plaintext(&self.endpoint)
        } else {
            Endpoint::new(&self.endpoint)
        }
    }

    /// Set the server host:port.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Use plaintext http/ws.
    pub fn with_plaintext(mut self, plaintext: bool) -> Self {
        self.plaintext = plaintext;
        self
    }

    /// Scope every request to a project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Authenticate with a client certificate and key (PEM files).
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Trust the given server certificate (PEM file).
    pub fn with_server_cert(mut self, cert: impl Into<PathBuf>) -> Self {
        self.server_cert = Some(cert.into());
        self
    }

    /// Enable or disable certificate verification skipping.
    pub fn with_skip_cert_verification(mut self, skip: bool) -> Self {
        self.skip_cert_verification = skip;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the server-side operation wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Server-side wait timeout in whole seconds, rounded up. Never zero,
    /// since `timeout=0` makes the server return without waiting.
    pub fn wait_timeout_secs(&self) -> Option<u64> {
        self.wait_timeout.map(|timeout| {
            let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}
