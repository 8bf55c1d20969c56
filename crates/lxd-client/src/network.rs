// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Network handle and port-forward rules.

use tracing::{info, instrument};

use crate::client::Client;
use crate::error::Result;
use crate::path::ResourcePath;
use crate::types::ForwardAddress;

/// A client bound to one network path.
#[derive(Debug, Clone)]
pub struct Network {
    client: Client,
    path: ResourcePath,
}

impl Network {
    pub(crate) fn new(client: Client, path: ResourcePath) -> Self {
        Self { client, path }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name().unwrap_or_default()
    }

    fn forwards_path(&self) -> ResourcePath {
        self.path.join("forwards")
    }

    /// All forward rules on this network, with their ports.
    #[instrument(skip(self), fields(network = %self.path))]
    pub async fn forwards(&self) -> Result<Vec<ForwardAddress>> {
        self.client
            .transport()
            .get(&self.forwards_path().with_query("recursion", "1"))
            .await?
            .into_metadata()
    }

    /// The forward rule listening on `listen_address`.
    #[instrument(skip(self), fields(network = %self.path))]
    pub async fn forward(&self, listen_address: &str) -> Result<ForwardAddress> {
        self.client
            .transport()
            .get(&self.forwards_path().join(listen_address))
            .await?
            .into_metadata()
    }

    /// Create a forward rule. Fails with a conflict if the listen address is taken.
    #[instrument(skip(self, forward), fields(network = %self.path, listen = %forward.listen_address))]
    pub async fn create_forward(&self, forward: &ForwardAddress) -> Result<()> {
        self.client
            .transport()
            .post(&self.forwards_path(), forward)
            .await?;
        info!(ports = forward.ports.len(), "Created network forward");
        Ok(())
    }

    /// Replace a forward rule. The stored port list becomes exactly
    /// `forward.ports`; ports missing from it are removed.
    #[instrument(skip(self, forward), fields(network = %self.path, listen = %forward.listen_address))]
    pub async fn update_forward(&self, forward: &ForwardAddress) -> Result<()> {
        self.client
            .transport()
            .put(&self.forwards_path().join(&forward.listen_address), forward)
            .await?;
        info!(ports = forward.ports.len(), "Replaced network forward");
        Ok(())
    }

    #[instrument(skip(self), fields(network = %self.path))]
    pub async fn delete_forward(&self, listen_address: &str) -> Result<()> {
        self.client
            .transport()
            .delete(&self.forwards_path().join(listen_address))
            .await?;
        Ok(())
    }
}
