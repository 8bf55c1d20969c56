// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server endpoint: turns resource paths into HTTP and WebSocket URLs.

use crate::path::ResourcePath;

/// Host (and port) of the LXD server plus the scheme pair used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    secure: bool,
}

impl Endpoint {
    /// TLS endpoint (`https://` / `wss://`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure: true,
        }
    }

    /// Plaintext endpoint (`http://` / `ws://`), for local proxies and tests.
    pub fn plaintext(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn https(&self, path: &ResourcePath) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host, path)
    }

    pub fn wss(&self, path: &ResourcePath) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.host, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_urls() {
        let endpoint = Endpoint::new("127.0.0.1:8443");
        let path = ResourcePath::api().join("operations").join("abc");
        assert_eq!(endpoint.https(&path), "https://127.0.0.1:8443/1.0/operations/abc");
        assert_eq!(
            endpoint.wss(&path.join("websocket").with_secret("s")),
            "wss://127.0.0.1:8443/1.0/operations/abc/websocket?secret=s"
        );
    }

    #[test]
    fn test_plaintext_urls() {
        let endpoint = Endpoint::plaintext("localhost:8080");
        assert!(!endpoint.is_secure());
        assert_eq!(endpoint.https(&ResourcePath::api()), "http://localhost:8080/1.0");
        assert_eq!(endpoint.wss(&ResourcePath::api()), "ws://localhost:8080/1.0");
    }
}
