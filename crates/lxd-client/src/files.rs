// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File transfer into and out of instances.
//!
//! `GET {instance}/files?path=...` answers either with a JSON list of entry
//! names (directory) or with the raw file bytes; the content type is the only
//! discriminator. Ownership and permissions travel in `X-LXD-*` headers in
//! both directions: uid and gid in decimal, mode in octal (`0644`).

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cancel::{CancelWatch, cancellable, cancelled_io};
use crate::envelope::Envelope;
use crate::error::{LxdError, Result};
use crate::instance::Instance;
use crate::path::ResourcePath;
use crate::transport::numeric_header;

const APPLICATION_JSON: &str = "application/json";
const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

const X_LXD_UID: HeaderName = HeaderName::from_static("x-lxd-uid");
const X_LXD_GID: HeaderName = HeaderName::from_static("x-lxd-gid");
const X_LXD_MODE: HeaderName = HeaderName::from_static("x-lxd-mode");
const X_LXD_TYPE: HeaderName = HeaderName::from_static("x-lxd-type");
const X_LXD_WRITE: HeaderName = HeaderName::from_static("x-lxd-write");

/// Ownership, permissions and kind of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits, e.g. `0o644`.
    pub mode: u32,
    /// `X-LXD-type` (`file`, `directory`, `symlink`), when the server sent it.
    pub file_type: Option<String>,
}

impl FileMetadata {
    fn from_headers(headers: &HeaderMap) -> Result<Self> {
        Ok(Self {
            uid: numeric(headers, &X_LXD_UID, 10)?,
            gid: numeric(headers, &X_LXD_GID, 10)?,
            mode: numeric(headers, &X_LXD_MODE, 8)?,
            file_type: headers
                .get(X_LXD_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }
}

fn numeric(headers: &HeaderMap, name: &HeaderName, radix: u32) -> Result<u32> {
    let raw = headers
        .get(name)
        .ok_or_else(|| LxdError::InvalidFileHeader(format!("{} missing", name)))?;
    raw.to_str()
        .ok()
        .and_then(|v| u32::from_str_radix(v.trim(), radix).ok())
        .ok_or_else(|| LxdError::InvalidFileHeader(format!("{}: {:?}", name, raw)))
}

/// Body of a file read: a listing or a byte stream, never both.
#[derive(Debug)]
pub enum FileContent {
    Directory(Vec<String>),
    File(FileReader),
}

/// Result of [`Instance::read_file`].
#[derive(Debug)]
pub struct FileHandle {
    pub metadata: FileMetadata,
    pub content: FileContent,
}

impl FileHandle {
    pub fn is_directory(&self) -> bool {
        matches!(self.content, FileContent::Directory(_))
    }

    /// Entry names, for directories.
    pub fn listing(&self) -> Option<&[String]> {
        match &self.content {
            FileContent::Directory(entries) => Some(entries),
            FileContent::File(_) => None,
        }
    }

    /// The byte stream, for regular files.
    pub fn into_reader(self) -> Option<FileReader> {
        match self.content {
            FileContent::File(reader) => Some(reader),
            FileContent::Directory(_) => None,
        }
    }
}

/// Streaming body of a downloaded file. Nothing is buffered beyond the chunk
/// currently being handed out.
pub struct FileReader {
    inner: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
    cancel: CancelWatch,
}

impl FileReader {
    fn new(response: Response, token: CancellationToken) -> Self {
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::other(LxdError::from(e)))
            .boxed();
        Self {
            inner: StreamReader::new(body),
            cancel: CancelWatch::new(token),
        }
    }
}

impl fmt::Debug for FileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileReader").finish_non_exhaustive()
    }
}

impl AsyncRead for FileReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.cancel.poll_cancelled(cx) {
            return Poll::Ready(Err(cancelled_io()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// How an upload treats an existing file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

impl WriteMode {
    fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        }
    }
}

/// Ownership and permissions for an upload. Unset fields are left to the
/// server's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub write: WriteMode,
}

impl FileHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn appending(mut self) -> Self {
        self.write = WriteMode::Append;
        self
    }

    fn to_headers(self, file_type: &'static str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(X_LXD_TYPE, HeaderValue::from_static(file_type));
        headers.insert(X_LXD_WRITE, HeaderValue::from_static(self.write.as_str()));
        if let Some(uid) = self.uid {
            headers.insert(X_LXD_UID, numeric_header(uid)?);
        }
        if let Some(gid) = self.gid {
            headers.insert(X_LXD_GID, numeric_header(gid)?);
        }
        if let Some(mode) = self.mode {
            headers.insert(X_LXD_MODE, numeric_header(format!("{:04o}", mode))?);
        }
        Ok(headers)
    }
}

fn media_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Directory listings come either bare or wrapped in a sync envelope.
fn decode_listing(status: StatusCode, body: &[u8]) -> Result<Vec<String>> {
    if let Ok(entries) = serde_json::from_slice::<Vec<String>>(body) {
        return Ok(entries);
    }
    Envelope::decode(status.as_u16(), body)?.into_metadata()
}

/// Error for a non-2xx answer, preferring the server's own error envelope.
fn failure(status: StatusCode, body: &[u8]) -> LxdError {
    match Envelope::decode(status.as_u16(), body) {
        Err(e @ LxdError::Api { .. }) => e,
        _ => LxdError::Api {
            code: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        },
    }
}

impl Instance {
    fn files_path(&self, path: &str) -> ResourcePath {
        self.path.join("files").with_query("path", path)
    }

    async fn read_body(&self, response: Response) -> Result<Bytes> {
        cancellable(self.client.transport().cancellation_token(), async {
            Ok(response.bytes().await?)
        })
        .await
    }

    /// Read a file or list a directory.
    #[instrument(skip(self), fields(instance = %self.path))]
    pub async fn read_file(&self, path: &str) -> Result<FileHandle> {
        let transport = self.client.transport();
        let response = transport
            .send(Method::GET, &self.files_path(path), HeaderMap::new(), None)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = self.read_body(response).await?;
            return Err(failure(status, &body));
        }

        let content_type = media_type(response.headers());
        match content_type.as_str() {
            APPLICATION_JSON => {
                let metadata = FileMetadata::from_headers(response.headers())?;
                let body = self.read_body(response).await?;
                let entries = decode_listing(status, &body)?;
                debug!(entries = entries.len(), "Listed directory");
                Ok(FileHandle {
                    metadata,
                    content: FileContent::Directory(entries),
                })
            }
            APPLICATION_OCTET_STREAM => {
                let metadata = FileMetadata::from_headers(response.headers())?;
                debug!(mode = metadata.mode, "Streaming file");
                Ok(FileHandle {
                    metadata,
                    content: FileContent::File(FileReader::new(
                        response,
                        transport.cancellation_token().clone(),
                    )),
                })
            }
            _ => Err(LxdError::UnexpectedContentType(content_type)),
        }
    }

    /// Upload `reader` to `path`, streaming it as the request body.
    #[instrument(skip(self, reader), fields(instance = %self.path))]
    pub async fn write_file<R>(&self, path: &str, reader: R, header: FileHeader) -> Result<()>
    where
        R: AsyncRead + Send + 'static,
    {
        let mut headers = header.to_headers("file")?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_OCTET_STREAM));
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));

        self.upload(path, headers, Some(body)).await?;
        info!("Uploaded file");
        Ok(())
    }

    /// Create a directory at `path`.
    #[instrument(skip(self), fields(instance = %self.path))]
    pub async fn create_directory(&self, path: &str, header: FileHeader) -> Result<()> {
        self.upload(path, header.to_headers("directory")?, None).await
    }

    async fn upload(
        &self,
        path: &str,
        headers: HeaderMap,
        body: Option<reqwest::Body>,
    ) -> Result<()> {
        let response = self
            .client
            .transport()
            .send(Method::POST, &self.files_path(path), headers, body)
            .await?;
        let status = response.status();
        let bytes = self.read_body(response).await?;
        if !status.is_success() {
            return Err(failure(status, &bytes));
        }
        Envelope::decode(status.as_u16(), &bytes)?;
        Ok(())
    }

    /// Delete a file or an empty directory.
    #[instrument(skip(self), fields(instance = %self.path))]
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.client
            .transport()
            .delete(&self.files_path(path))
            .await?;
        Ok(())
    }
}
