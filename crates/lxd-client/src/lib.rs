// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LXD Client
//!
//! Async client for the LXD REST API: typed requests over HTTPS, blocking
//! waits on background operations, and exec sessions whose stdin, stdout and
//! stderr each run over their own authenticated WebSocket.
//!
//! # Architecture
//!
//! - [`ResourcePath`] addresses every resource; the API root is `/1.0`.
//! - [`Transport`] sends requests and dials WebSockets; every response goes
//!   through the uniform [`Envelope`].
//! - Requests accepted asynchronously return a [`PendingOperation`], finished
//!   with a single [`Client::wait_operation`] call.
//! - [`Instance`] and [`Network`] handles carry a client and a path.
//!
//! Nothing here spawns tasks or retries. Cancel any call, stream read or
//! stream write by binding the client to a token with
//! [`Client::with_cancellation`].
//!
//! # Example
//!
//! ```no_run
//! use lxd_client::{Client, CreateInstanceRequest, ExecRequest, InstanceSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_env()?;
//!
//! let request = CreateInstanceRequest::new(InstanceSource::image("ubuntu/24.04"))
//!     .with_name("wow");
//! let instance = client.create_instance_and_wait(&request).await?;
//!
//! let session = instance.exec(&ExecRequest::new(["uname", "-a"])).await?;
//! let streams = session.attach(&client).await?;
//! let operation = streams.operation().clone();
//! streams
//!     .pump(tokio::io::empty(), tokio::io::stdout(), tokio::io::stderr())
//!     .await?;
//! let outcome = client.wait_exec(&operation).await?;
//! println!("exit status: {}", outcome.exit_code);
//! # Ok(())
//! # }
//! ```

mod cancel;
mod client;
mod config;
mod endpoint;
mod envelope;
mod error;
mod exec;
mod files;
mod instance;
mod network;
mod operation;
mod path;
mod stream;
mod tls;
mod transport;
mod types;

pub use client::Client;
pub use config::{DEFAULT_ENDPOINT, LxdConfig};
pub use endpoint::Endpoint;
pub use envelope::{Envelope, ResponseType};
pub use error::{LxdError, Result};
pub use exec::{ExecOutcome, ExecRequest, ExecSession, ExecStreams};
pub use files::{FileContent, FileHandle, FileHeader, FileMetadata, FileReader, WriteMode};
pub use instance::Instance;
pub use network::Network;
pub use operation::{Operation, OperationClass, OperationStatus, PendingOperation};
pub use path::{API_VERSION, ResourcePath};
pub use stream::FdStream;
pub use tls::build_client_config;
pub use transport::Transport;
pub use types::{
    CreateInstanceRequest, Device, ForwardAddress, ForwardPort, InstanceInfo, InstanceSource,
    InstanceState, InstanceType, NetworkAddress, NetworkState, Protocol, StateAction,
    StateChange,
};
