// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response payloads for instances and network forwards.
//!
//! Only the fields this crate acts on are typed. Maps are used where LXD
//! itself treats the data as free-form (`config`, extra device keys).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Instances
// ============================================================================

/// Kind of instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    #[default]
    Container,
    VirtualMachine,
}

/// Where the root filesystem of a new instance comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSource {
    /// Source kind, usually `image`.
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Remote image server URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Remote protocol (`simplestreams` or `lxd`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl InstanceSource {
    /// Image by alias from the server's local image store.
    pub fn image(alias: impl Into<String>) -> Self {
        Self {
            source_type: "image".to_string(),
            alias: Some(alias.into()),
            fingerprint: None,
            server: None,
            protocol: None,
        }
    }

    /// Image by alias from a remote simplestreams server.
    pub fn remote_image(server: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            protocol: Some("simplestreams".to_string()),
            ..Self::image(alias)
        }
    }
}

/// Instance device entry. Well-known keys are typed, the rest is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Device {
    /// Root disk on a storage pool.
    pub fn root_disk(pool: impl Into<String>, size: Option<String>) -> Self {
        Self {
            device_type: "disk".to_string(),
            path: Some("/".to_string()),
            pool: Some(pool.into()),
            size,
            ..Default::default()
        }
    }
}

/// Body of `POST /1.0/instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Server picks a name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: InstanceSource,
    #[serde(default)]
    pub start: bool,
    #[serde(rename = "type", default)]
    pub instance_type: InstanceType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub devices: HashMap<String, Device>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
}

impl CreateInstanceRequest {
    pub fn new(source: InstanceSource) -> Self {
        Self {
            name: None,
            source,
            start: true,
            instance_type: InstanceType::Container,
            config: HashMap::new(),
            devices: HashMap::new(),
            profiles: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, instance_type: InstanceType) -> Self {
        self.instance_type = instance_type;
        self
    }

    pub fn with_start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_device(mut self, name: impl Into<String>, device: Device) -> Self {
        self.devices.insert(name.into(), device);
        self
    }
}

/// Instance record from `GET /1.0/instances/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(rename = "type", default)]
    pub instance_type: InstanceType,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub devices: HashMap<String, Device>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: String,
}

/// Runtime state from `GET /1.0/instances/{name}/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub pid: i64,
    /// Process count; `-1` or `0` while the instance is still booting.
    #[serde(default)]
    pub processes: i64,
    #[serde(default)]
    pub network: Option<HashMap<String, NetworkState>>,
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        self.status == "Running"
    }

    /// Global-scope IPv4 addresses across all interfaces except loopback.
    pub fn ipv4_addresses(&self) -> Vec<&str> {
        self.network
            .iter()
            .flatten()
            .filter(|(name, _)| name.as_str() != "lo")
            .flat_map(|(_, iface)| iface.addresses.iter())
            .filter(|addr| addr.family == "inet" && addr.scope == "global")
            .map(|addr| addr.address.as_str())
            .collect()
    }
}

/// One network interface inside an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkState {
    #[serde(default)]
    pub addresses: Vec<NetworkAddress>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub hwaddr: String,
    #[serde(default)]
    pub mtu: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub family: String,
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub scope: String,
}

/// Action for `PUT /1.0/instances/{name}/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

/// Body of `PUT /1.0/instances/{name}/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub action: StateAction,
    /// Seconds before a stop/restart is forced; `-1` waits forever.
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub stateful: bool,
}

impl StateChange {
    pub fn new(action: StateAction) -> Self {
        Self {
            action,
            timeout: 30,
            force: false,
            stateful: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

// ============================================================================
// Network forwards
// ============================================================================

/// Forwarded protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// One forwarded port (or port range, e.g. `"8000-8010"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardPort {
    pub listen_port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_port: String,
    pub target_address: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ForwardPort {
    /// Forward `port` to the same port on `target_address`.
    pub fn tcp(port: impl Into<String>, target_address: impl Into<String>) -> Self {
        let port = port.into();
        Self {
            target_port: port.clone(),
            listen_port: port,
            target_address: target_address.into(),
            protocol: Protocol::Tcp,
            description: String::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_target_port(mut self, port: impl Into<String>) -> Self {
        self.target_port = port.into();
        self
    }
}

/// Port-forwarding rule on a network, identified by its listen address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAddress {
    pub listen_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
    /// Full port list; an update replaces it wholesale.
    #[serde(default)]
    pub ports: Vec<ForwardPort>,
}

impl ForwardAddress {
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            description: String::new(),
            config: HashMap::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: ForwardPort) -> Self {
        self.ports.push(port);
        self
    }
}
