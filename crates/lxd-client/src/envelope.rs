// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The uniform response envelope.
//!
//! Every LXD response is wrapped in the same JSON object. Decoding happens in
//! two phases: the fixed envelope first, then the opaque `metadata` field into
//! whatever shape the endpoint returns (see [`Envelope::metadata`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LxdError, Result};
use crate::path::ResourcePath;

/// Envelope `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Request completed synchronously.
    Sync,
    /// Request accepted; `operation` points at the background task.
    Async,
    /// Request failed.
    Error,
}

/// Decoded response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub error_code: u16,
    #[serde(default)]
    pub error: String,
    /// Locator of the background operation, async responses only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    /// Endpoint-specific payload, decoded on demand.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// HTTP status of the response that carried this envelope.
    #[serde(skip)]
    pub http_status: u16,
}

impl Envelope {
    /// Decode an envelope and classify it.
    ///
    /// A non-zero `error_code` becomes [`LxdError::Api`] whatever the HTTP
    /// status was; anything that is not an envelope is [`LxdError::Decode`].
    pub fn decode(http_status: u16, body: &[u8]) -> Result<Self> {
        let mut envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
            LxdError::Decode(format!(
                "invalid response envelope (http {}): {}",
                http_status, e
            ))
        })?;
        envelope.http_status = http_status;
        envelope.into_result()
    }

    /// Turn an error envelope into [`LxdError::Api`].
    pub fn into_result(self) -> Result<Self> {
        if self.error_code != 0 {
            return Err(LxdError::Api {
                code: self.error_code,
                message: self.error,
            });
        }
        if self.response_type == ResponseType::Error {
            return Err(LxdError::Decode(format!(
                "error envelope without error_code: {}",
                self.error
            )));
        }
        Ok(self)
    }

    pub fn is_async(&self) -> bool {
        self.response_type == ResponseType::Async
    }

    /// Decode the metadata payload into `T`.
    pub fn metadata<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.metadata)
            .map_err(|e| LxdError::Decode(format!("unexpected metadata shape: {}", e)))
    }

    /// Like [`metadata`](Self::metadata), consuming the envelope.
    pub fn into_metadata<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.metadata)
            .map_err(|e| LxdError::Decode(format!("unexpected metadata shape: {}", e)))
    }

    /// Path of the background operation for async responses.
    pub fn operation_path(&self) -> Result<ResourcePath> {
        if self.operation.is_empty() {
            return Err(LxdError::Decode(
                "response carries no operation locator".to_string(),
            ));
        }
        ResourcePath::parse(&self.operation)
    }
}
