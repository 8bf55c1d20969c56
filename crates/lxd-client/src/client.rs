// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client entry point for talking to an LXD server.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::LxdConfig;
use crate::error::{LxdError, Result};
use crate::instance::Instance;
use crate::network::Network;
use crate::operation::PendingOperation;
use crate::path::ResourcePath;
use crate::transport::Transport;
use crate::types::CreateInstanceRequest;

/// High-level client for one LXD server.
///
/// Cheap to clone: clones share the connection pool and configuration.
/// Resource handles ([`Instance`], [`Network`]) borrow nothing from the
/// client; they carry their own clone.
#[derive(Clone)]
pub struct Client {
    transport: Transport,
    config: Arc<LxdConfig>,
}

impl Client {
    /// Create a new client with the given configuration.
    pub fn new(config: LxdConfig) -> Result<Self> {
        let transport = Transport::new(&config)?;
        debug!(endpoint = %config.endpoint, "Created LXD client");
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(LxdConfig::from_env()?)
    }

    /// Create a client for a local development server.
    pub fn localhost() -> Result<Self> {
        Self::new(LxdConfig::localhost())
    }

    /// A clone whose every call, including stream reads and writes, aborts
    /// with [`LxdError::Cancelled`] once `token` fires.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            transport: self.transport.with_cancellation(token),
            config: self.config.clone(),
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &LxdConfig {
        &self.config
    }

    /// Lower-level transport, for endpoints without a typed wrapper.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Handle for `/1.0/instances/{name}`. Does not contact the server.
    pub fn instance(&self, name: &str) -> Instance {
        Instance::new(self.clone(), ResourcePath::api().join("instances").join(name))
    }

    /// Handle for an instance locator returned by the server.
    pub fn instance_at(&self, path: ResourcePath) -> Instance {
        Instance::new(self.clone(), path.without_query("project"))
    }

    /// Handle for `/1.0/networks/{name}`. Does not contact the server.
    pub fn network(&self, name: &str) -> Network {
        Network::new(self.clone(), ResourcePath::api().join("networks").join(name))
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Locators of all instances in the configured project.
    #[instrument(skip(self))]
    pub async fn list_instances(&self) -> Result<Vec<ResourcePath>> {
        let locators: Vec<String> = self
            .transport
            .get(&ResourcePath::api().join("instances"))
            .await?
            .into_metadata()?;

        locators.iter().map(|l| ResourcePath::parse(l)).collect()
    }

    /// Submit an instance creation. Returns as soon as the server accepts it.
    #[instrument(skip(self, request), fields(name = ?request.name))]
    pub async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<PendingOperation> {
        let envelope = self
            .transport
            .post(&ResourcePath::api().join("instances"), request)
            .await?;
        let pending = PendingOperation::from_envelope(envelope)?;
        info!(operation = %pending.path, "Instance creation accepted");
        Ok(pending)
    }

    /// Create an instance and wait for the operation to finish.
    ///
    /// The handle is built from the operation's `resources.instances[0]`, so
    /// it also works for requests without a name.
    pub async fn create_instance_and_wait(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<Instance> {
        let pending = self.create_instance(request).await?;
        let operation = pending.wait(self).await?;

        let path = operation
            .resource_paths("instances")?
            .into_iter()
            .next()
            .ok_or_else(|| {
                LxdError::Decode(format!(
                    "operation {} lists no created instance",
                    operation.id
                ))
            })?;

        Ok(self.instance_at(path))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.transport.endpoint().host())
            .field("project", &self.config.project)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(LxdConfig::new().with_plaintext(true)).unwrap()
    }

    #[test]
    fn test_instance_handle_path() {
        let instance = client().instance("wow");
        assert_eq!(instance.path().render(), "/1.0/instances/wow");
        assert_eq!(instance.name(), "wow");
    }

    #[test]
    fn test_instance_at_strips_project() {
        let path = ResourcePath::parse("/1.0/instances/wow?project=games").unwrap();
        let instance = client().instance_at(path);
        assert_eq!(instance.path().render(), "/1.0/instances/wow");
    }

    #[test]
    fn test_network_handle_path() {
        let network = client().network("lxdbr0");
        assert_eq!(network.path().render(), "/1.0/networks/lxdbr0");
    }

    #[test]
    fn test_debug_hides_credentials() {
        let rendered = format!("{:?}", client());
        assert!(rendered.contains("127.0.0.1:8443"));
    }
}
