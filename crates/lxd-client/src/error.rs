// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for lxd-client.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result type using LxdError.
pub type Result<T> = std::result::Result<T, LxdError>;

/// Errors that can occur when talking to an LXD server.
///
/// Nothing in this crate retries on its own; every variant is handed back to
/// the caller, who decides whether a retry makes sense.
#[derive(Debug, Error)]
pub enum LxdError {
    /// Caller misuse or invalid configuration, detected before any request is sent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection, DNS or TLS failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected the request (non-zero `error_code`).
    #[error("api error [{code}]: {message}")]
    Api { code: u16, message: String },

    /// The envelope or its metadata did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server returned a resource locator that is not a URL path.
    #[error("malformed resource locator: {0}")]
    MalformedLocator(String),

    /// An operation wait returned before the operation finished.
    #[error("operation still running after {0}s wait")]
    Timeout(u64),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// File endpoint answered with a content type other than JSON or octet-stream.
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// `X-LXD-uid`, `X-LXD-gid` or `X-LXD-mode` missing or not numeric.
    #[error("invalid file header: {0}")]
    InvalidFileHeader(String),

    /// A WebSocket was closed by the peer with a code other than normal/going-away.
    #[error("websocket closed abnormally (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },
}

impl LxdError {
    /// True for `Api` errors carrying a 404 code.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LxdError::Api { code: 404, .. })
    }

    /// The API error code, if this is an `Api` error.
    pub fn api_code(&self) -> Option<u16> {
        match self {
            LxdError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LxdError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LxdError::Decode(err.to_string())
        } else {
            LxdError::Transport(err.to_string())
        }
    }
}

impl From<tungstenite::Error> for LxdError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            // Handshake refused by the server, e.g. a stale or reused secret.
            tungstenite::Error::Http(response) => {
                let message = response
                    .body()
                    .as_ref()
                    .map(|body| String::from_utf8_lossy(body).into_owned())
                    .filter(|body| !body.is_empty())
                    .unwrap_or_else(|| {
                        response
                            .status()
                            .canonical_reason()
                            .unwrap_or("websocket upgrade rejected")
                            .to_string()
                    });
                LxdError::Api {
                    code: response.status().as_u16(),
                    message,
                }
            }
            tungstenite::Error::Url(e) => LxdError::Config(e.to_string()),
            other => LxdError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for LxdError {
    fn from(err: serde_json::Error) -> Self {
        LxdError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for LxdError {
    fn from(err: std::io::Error) -> Self {
        // Byte streams smuggle their own errors (cancellation, dirty close)
        // through io::Error; unwrap those instead of flattening them.
        if err.get_ref().is_some_and(|inner| inner.is::<LxdError>()) {
            if let Some(Ok(inner)) = err.into_inner().map(|inner| inner.downcast::<LxdError>()) {
                return *inner;
            }
            return LxdError::Transport("i/o error".to_string());
        }
        LxdError::Transport(err.to_string())
    }
}

impl From<rustls::Error> for LxdError {
    fn from(err: rustls::Error) -> Self {
        LxdError::Config(format!("tls: {}", err))
    }
}
