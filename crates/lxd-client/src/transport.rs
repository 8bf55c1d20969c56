// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTPS and WebSocket transport.
//!
//! Requests go through a pooled `reqwest` client; WebSockets are dialed with
//! `tokio-tungstenite` using the same rustls configuration. Every call races
//! against the transport's cancellation token.

use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Response};
use serde::Serialize;
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::cancel::cancellable;
use crate::config::LxdConfig;
use crate::endpoint::Endpoint;
use crate::envelope::Envelope;
use crate::error::{LxdError, Result};
use crate::path::ResourcePath;
use crate::stream::WsConnection;
use crate::tls;

const APPLICATION_JSON: &str = "application/json";

/// Authenticated connection factory for one LXD server.
///
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    endpoint: Endpoint,
    tls: Option<Arc<rustls::ClientConfig>>,
    project: Option<String>,
    cancel: CancellationToken,
}

impl Transport {
    /// Build a transport from configuration. Loads TLS material for secure endpoints.
    pub fn new(config: &LxdConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.server_endpoint();

        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        let tls = if endpoint.is_secure() {
            let tls = tls::build_client_config(config)?;
            builder = builder.use_preconfigured_tls(tls.clone());
            Some(Arc::new(tls))
        } else {
            None
        };

        let http = builder
            .build()
            .map_err(|e| LxdError::Config(format!("cannot build http client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            tls,
            project: config.project.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// A clone whose calls abort when `token` fires.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Add the configured project unless the path already names one.
    fn scoped(&self, path: &ResourcePath) -> Result<ResourcePath> {
        if path.has_dot_segment() {
            return Err(LxdError::Config(format!(
                "cannot address {}: dot segments are not sent",
                path
            )));
        }
        Ok(match &self.project {
            Some(project) if path.query_value("project").is_none() => path.with_project(project),
            _ => path.clone(),
        })
    }

    /// Issue a JSON request and decode the response envelope.
    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    pub async fn invoke<B>(
        &self,
        method: Method,
        path: &ResourcePath,
        body: Option<&B>,
    ) -> Result<Envelope>
    where
        B: Serialize + ?Sized,
    {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| LxdError::Config(format!("cannot encode request body: {}", e)))?;
        let url = self.endpoint.https(&self.scoped(path)?);

        cancellable(&self.cancel, async {
            let mut request = self
                .http
                .request(method, &url)
                .header(ACCEPT, APPLICATION_JSON);
            if let Some(body) = body {
                request = request.header(CONTENT_TYPE, APPLICATION_JSON).body(body);
            }

            let response = request.send().await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            debug!(status, len = bytes.len(), "Received response");

            Envelope::decode(status, &bytes)
        })
        .await
    }

    pub async fn get(&self, path: &ResourcePath) -> Result<Envelope> {
        self.invoke::<()>(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &ResourcePath, body: &B) -> Result<Envelope> {
        self.invoke(Method::POST, path, Some(body)).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &ResourcePath, body: &B) -> Result<Envelope> {
        self.invoke(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &ResourcePath) -> Result<Envelope> {
        self.invoke::<()>(Method::DELETE, path, None).await
    }

    /// Issue a request with a raw body and hand back the undecoded response.
    ///
    /// The response body is not read; callers stream it. Used by the file
    /// endpoints, which do not always answer with an envelope.
    #[instrument(skip(self, headers, body), fields(method = %method, path = %path))]
    pub async fn send(
        &self,
        method: Method,
        path: &ResourcePath,
        headers: HeaderMap,
        body: Option<reqwest::Body>,
    ) -> Result<Response> {
        let url = self.endpoint.https(&self.scoped(path)?);

        cancellable(&self.cancel, async {
            let mut request = self.http.request(method, &url).headers(headers);
            if let Some(body) = body {
                request = request.body(body);
            }
            let response = request.send().await?;
            debug!(status = response.status().as_u16(), "Received response");
            Ok(response)
        })
        .await
    }

    /// Dial a WebSocket to `path`.
    #[instrument(skip(self, path), fields(path = %path.without_query("secret")))]
    pub(crate) async fn websocket(&self, path: &ResourcePath) -> Result<WsConnection> {
        let url = self.endpoint.wss(&self.scoped(path)?);
        let connector = match &self.tls {
            Some(tls) => Connector::Rustls(tls.clone()),
            None => Connector::Plain,
        };

        cancellable(&self.cancel, async {
            let (ws, response) =
                connect_async_tls_with_config(url, None, false, Some(connector)).await?;
            debug!(status = response.status().as_u16(), "WebSocket connected");
            Ok(ws)
        })
        .await
    }
}

/// Header value from a number, for the `X-LXD-*` headers.
pub(crate) fn numeric_header(value: impl ToString) -> Result<HeaderValue> {
    HeaderValue::from_str(&value.to_string())
        .map_err(|e| LxdError::Config(format!("invalid header value: {}", e)))
}
