// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background operations and the blocking wait call.
//!
//! LXD holds `GET {operation}/wait` open until the operation reaches a
//! terminal state, so waiting is a single request. There is no client-side
//! polling loop here; callers that want to watch progress re-issue
//! [`Client::operation`] or a resource state query themselves.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::client::Client;
use crate::envelope::Envelope;
use crate::error::{LxdError, Result};
use crate::path::ResourcePath;

/// Operation status as reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Running,
    Cancelling,
    Success,
    Failure,
    Cancelled,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failure | OperationStatus::Cancelled
        )
    }
}

/// Operation class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Plain background task.
    Task,
    /// Task that waits for websocket connections (exec, console, migration).
    Websocket,
    /// Token handed to another party.
    Token,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Server-side operation object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class: OperationClass,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default)]
    pub status_code: u16,
    /// Resource kind (`instances`, `networks`, ...) to affected resource locators.
    #[serde(default)]
    pub resources: Option<HashMap<String, Vec<String>>>,
    /// Operation-specific payload (exec fds, exec return code, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub may_cancel: bool,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub location: String,
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Decode the operation's own metadata payload.
    pub fn metadata<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.metadata)
            .map_err(|e| LxdError::Decode(format!("unexpected operation metadata: {}", e)))
    }

    /// Locators of the affected resources of one kind, parsed.
    pub fn resource_paths(&self, kind: &str) -> Result<Vec<ResourcePath>> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.get(kind))
            .map(|locators| {
                locators
                    .iter()
                    .map(|locator| ResourcePath::parse(locator))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Map a terminal failure to an error. Success passes through.
    pub(crate) fn into_outcome(self) -> Result<Self> {
        match self.status {
            OperationStatus::Success => Ok(self),
            OperationStatus::Failure => Err(LxdError::Api {
                code: self.status_code,
                message: if self.err.is_empty() {
                    format!("operation {} failed", self.id)
                } else {
                    self.err
                },
            }),
            OperationStatus::Cancelled => Err(LxdError::Api {
                code: self.status_code,
                message: if self.err.is_empty() {
                    format!("operation {} was cancelled", self.id)
                } else {
                    self.err
                },
            }),
            _ => Ok(self),
        }
    }
}

/// An accepted asynchronous request: where its operation lives and what the
/// server said about it at creation time.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub path: ResourcePath,
    pub operation: Operation,
}

impl PendingOperation {
    pub(crate) fn from_envelope(envelope: Envelope) -> Result<Self> {
        let path = envelope.operation_path()?;
        let operation = envelope.into_metadata()?;
        Ok(Self { path, operation })
    }

    /// Wait for the operation to finish.
    pub async fn wait(&self, client: &Client) -> Result<Operation> {
        client.wait_operation(&self.path).await
    }
}

impl Client {
    /// Block until the operation at `path` reaches a terminal state.
    ///
    /// Issues exactly one `GET {path}/wait`. `Failure` and `Cancelled`
    /// outcomes come back as [`LxdError::Api`] with the operation's status
    /// code and error text. If a server-side wait timeout is configured and
    /// expires first, the result is [`LxdError::Timeout`].
    #[instrument(skip(self), fields(operation = %path))]
    pub async fn wait_operation(&self, path: &ResourcePath) -> Result<Operation> {
        let mut wait_path = path.join("wait");
        let timeout = self.config().wait_timeout_secs();
        if let Some(secs) = timeout {
            wait_path = wait_path.with_query("timeout", secs.to_string());
        }

        debug!("Waiting for operation");
        let operation: Operation = self.transport().get(&wait_path).await?.into_metadata()?;

        if !operation.is_terminal() {
            return Err(LxdError::Timeout(timeout.unwrap_or(0)));
        }

        info!(status = ?operation.status, "Operation finished");
        operation.into_outcome()
    }

    /// Current state of an operation, without waiting.
    #[instrument(skip(self), fields(operation = %path))]
    pub async fn operation(&self, path: &ResourcePath) -> Result<Operation> {
        self.transport().get(path).await?.into_metadata()
    }

    /// Ask the server to cancel an operation.
    #[instrument(skip(self), fields(operation = %path))]
    pub async fn cancel_operation(&self, path: &ResourcePath) -> Result<()> {
        info!("Cancelling operation");
        self.transport().delete(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation(value: serde_json::Value) -> Operation {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_creation_operation() {
        let op = operation(json!({
            "id": "b8d84888-1dc2-44fd-b386-7f679e171ba5",
            "class": "task",
            "description": "Creating instance",
            "created_at": "2024-05-01T10:00:00.123456789Z",
            "updated_at": "2024-05-01T10:00:02Z",
            "status": "Success",
            "status_code": 200,
            "resources": {"instances": ["/1.0/instances/wow"]},
            "metadata": null,
            "may_cancel": false,
            "err": "",
            "location": "none"
        }));

        assert!(op.is_terminal());
        assert_eq!(op.class, OperationClass::Task);
        assert!(op.created_at.is_some());
        let instances = op.resource_paths("instances").unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].name(), Some("wow"));
        assert!(op.resource_paths("networks").unwrap().is_empty());
    }

    #[test]
    fn test_null_resources() {
        let op = operation(json!({"class": "websocket", "status": "Running", "resources": null}));
        assert!(!op.is_terminal());
        assert!(op.resource_paths("instances").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_status_and_class() {
        let op = operation(json!({"class": "mystery", "status": "Frozen"}));
        assert_eq!(op.class, OperationClass::Unknown);
        assert_eq!(op.status, OperationStatus::Unknown);
    }

    #[test]
    fn test_malformed_resource_locator() {
        let op = operation(json!({
            "class": "task",
            "status": "Success",
            "resources": {"instances": ["not a locator"]}
        }));
        assert!(matches!(
            op.resource_paths("instances"),
            Err(LxdError::MalformedLocator(_))
        ));
    }

    #[test]
    fn test_failure_outcome_is_api_error() {
        let op = operation(json!({
            "id": "x",
            "class": "task",
            "status": "Failure",
            "status_code": 400,
            "err": "Failed creating instance: image not found"
        }));
        match op.into_outcome() {
            Err(LxdError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert!(message.contains("image not found"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_outcome_is_api_error() {
        let op = operation(json!({"id": "x", "class": "task", "status": "Cancelled", "status_code": 401}));
        assert_eq!(op.into_outcome().unwrap_err().api_code(), Some(401));
    }

    #[test]
    fn test_operation_metadata() {
        let op = operation(json!({
            "class": "websocket",
            "status": "Running",
            "metadata": {"fds": {"0": "a", "1": "b", "2": "c"}}
        }));
        let meta: HashMap<String, HashMap<String, String>> = op.metadata().unwrap();
        assert_eq!(meta["fds"]["1"], "b");
    }
}
