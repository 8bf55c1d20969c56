// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance handle.
//!
//! Exec lives in [`crate::exec`] and file transfer in [`crate::files`]; both
//! extend [`Instance`] with further methods.

use tracing::{debug, info, instrument};

use crate::client::Client;
use crate::error::Result;
use crate::operation::PendingOperation;
use crate::path::ResourcePath;
use crate::types::{InstanceInfo, InstanceState, StateChange};

/// A client bound to one instance path.
#[derive(Debug, Clone)]
pub struct Instance {
    pub(crate) client: Client,
    pub(crate) path: ResourcePath,
}

impl Instance {
    pub(crate) fn new(client: Client, path: ResourcePath) -> Self {
        Self { client, path }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Instance name (last path segment).
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or_default()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch the instance record.
    #[instrument(skip(self), fields(instance = %self.path))]
    pub async fn get(&self) -> Result<InstanceInfo> {
        self.client.transport().get(&self.path).await?.into_metadata()
    }

    /// Single-shot runtime state query.
    ///
    /// Cancellable like every other call; callers waiting for an instance to
    /// boot re-issue it in their own loop.
    #[instrument(skip(self), fields(instance = %self.path))]
    pub async fn state(&self) -> Result<InstanceState> {
        let state: InstanceState = self
            .client
            .transport()
            .get(&self.path.join("state"))
            .await?
            .into_metadata()?;
        debug!(status = %state.status, processes = state.processes, "Instance state");
        Ok(state)
    }

    /// Request a state transition (start, stop, ...).
    #[instrument(skip(self), fields(instance = %self.path, action = ?change.action))]
    pub async fn update_state(&self, change: &StateChange) -> Result<PendingOperation> {
        let envelope = self
            .client
            .transport()
            .put(&self.path.join("state"), change)
            .await?;
        PendingOperation::from_envelope(envelope)
    }

    /// Delete the instance. It must be stopped first.
    #[instrument(skip(self), fields(instance = %self.path))]
    pub async fn delete(&self) -> Result<PendingOperation> {
        info!("Deleting instance");
        let envelope = self.client.transport().delete(&self.path).await?;
        PendingOperation::from_envelope(envelope)
    }
}
