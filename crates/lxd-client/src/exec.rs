// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command execution inside an instance.
//!
//! An exec call returns an operation whose metadata maps each file
//! descriptor to a one-time secret. [`ExecSession::attach`] turns those
//! secrets into WebSocket byte streams:
//!
//! ```text
//! POST {instance}/exec            -> operation + {"fds": {"0": s0, "1": s1, "2": s2}}
//! GET  {operation}/websocket?secret=s0   stdin
//! GET  {operation}/websocket?secret=s1   stdout
//! GET  {operation}/websocket?secret=s2   stderr
//! GET  {operation}/wait           -> {"return": exit_code}
//! ```
//!
//! The three streams are independent. Closing stdin tells the command its
//! input ended; stdout and stderr still have to be drained to their own end.

use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::client::Client;
use crate::error::{LxdError, Result};
use crate::instance::Instance;
use crate::operation::PendingOperation;
use crate::path::ResourcePath;
use crate::stream::FdStream;

const STDIN: &str = "0";
const STDOUT: &str = "1";
const STDERR: &str = "2";

/// Body of `POST {instance}/exec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: Vec<String>,
    /// Must be `true`; without it the server hands out no stream secrets.
    #[serde(rename = "wait-for-websocket")]
    pub wait_for_websocket: bool,
    /// Allocate a PTY. Output then arrives on fd 0 as well.
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// uid to run as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<u32>,
    /// gid to run as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    /// Keep stdout/stderr in server-side log files.
    #[serde(rename = "record-output", default)]
    pub record_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ExecRequest {
    /// Non-interactive exec of `command` with websockets enabled.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            wait_for_websocket: true,
            interactive: false,
            environment: HashMap::new(),
            cwd: None,
            user: None,
            group: None,
            record_output: false,
            width: None,
            height: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_user(mut self, uid: u32) -> Self {
        self.user = Some(uid);
        self
    }

    pub fn with_group(mut self, gid: u32) -> Self {
        self.group = Some(gid);
        self
    }

    /// Run under a PTY of the given size.
    pub fn interactive(mut self, width: u32, height: u32) -> Self {
        self.interactive = true;
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_wait_for_websocket(mut self, wait: bool) -> Self {
        self.wait_for_websocket = wait;
        self
    }

    pub fn with_record_output(mut self, record: bool) -> Self {
        self.record_output = record;
        self
    }

    /// Reject requests that could never produce usable streams.
    pub fn validate(&self) -> Result<()> {
        if !self.wait_for_websocket {
            return Err(LxdError::Config(
                "exec requires wait-for-websocket; no stream secrets would be returned".to_string(),
            ));
        }
        if self.command.is_empty() {
            return Err(LxdError::Config("exec command is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ExecMetadata {
    #[serde(default)]
    fds: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExecResult {
    #[serde(rename = "return")]
    exit_code: i32,
    #[serde(default)]
    output: HashMap<String, String>,
}

/// Final result of an exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    /// fd name to server-side log path, when output was recorded.
    pub output: HashMap<String, String>,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl Instance {
    /// Start a command. The request is validated locally first; an invalid
    /// one never reaches the server.
    #[instrument(skip(self, request), fields(instance = %self.path, command = ?request.command))]
    pub async fn exec(&self, request: &ExecRequest) -> Result<ExecSession> {
        request.validate()?;

        let envelope = self
            .client
            .transport()
            .post(&self.path.join("exec"), request)
            .await?;
        let pending = PendingOperation::from_envelope(envelope)?;
        let metadata: ExecMetadata = pending.operation.metadata()?;

        info!(operation = %pending.path, fds = metadata.fds.len(), "Exec started");
        Ok(ExecSession::new(pending.path, metadata.fds))
    }
}

/// Stream secrets of a running exec.
///
/// Each secret authorizes one WebSocket upgrade. [`attach`](Self::attach)
/// consumes the session, so a secret cannot be presented twice from it.
#[derive(Debug)]
pub struct ExecSession {
    operation: ResourcePath,
    fds: HashMap<String, String>,
}

impl ExecSession {
    pub fn new(operation: ResourcePath, fds: HashMap<String, String>) -> Self {
        Self { operation, fds }
    }

    /// Path of the exec operation.
    pub fn operation(&self) -> &ResourcePath {
        &self.operation
    }

    /// True when the server allocated a single PTY stream.
    pub fn is_interactive(&self) -> bool {
        !self.fds.contains_key(STDOUT) && !self.fds.contains_key(STDERR)
    }

    /// Open the streams in order: stdin, then stdout, then stderr.
    ///
    /// If any open fails, streams opened before it are closed and the error
    /// is returned.
    #[instrument(skip(self, client), fields(operation = %self.operation))]
    pub async fn attach(self, client: &Client) -> Result<ExecStreams> {
        let order: &[&str] = match (self.fds.contains_key(STDOUT), self.fds.contains_key(STDERR)) {
            (true, true) => &[STDIN, STDOUT, STDERR],
            (false, false) => &[STDIN],
            _ => {
                return Err(LxdError::Decode(
                    "exec metadata has only one of stdout/stderr".to_string(),
                ));
            }
        };

        let mut opened: Vec<FdStream> = Vec::with_capacity(order.len());
        for fd in order {
            match self.open(client, fd).await {
                Ok(stream) => opened.push(stream),
                Err(e) => {
                    warn!(fd = %fd, error = %e, opened = opened.len(), "Exec stream failed to open");
                    for stream in opened.iter_mut() {
                        stream.close_quietly().await;
                    }
                    return Err(e);
                }
            }
        }

        let mut streams = opened.into_iter();
        let stdin = streams
            .next()
            .ok_or_else(|| LxdError::Decode("exec metadata has no stdin".to_string()))?;
        Ok(ExecStreams {
            operation: self.operation,
            stdin,
            stdout: streams.next(),
            stderr: streams.next(),
        })
    }

    async fn open(&self, client: &Client, fd: &str) -> Result<FdStream> {
        let secret = self
            .fds
            .get(fd)
            .ok_or_else(|| LxdError::Decode(format!("exec metadata has no secret for fd {}", fd)))?;
        let path = self.operation.join("websocket").with_secret(secret);

        let ws = client.transport().websocket(&path).await?;
        debug!(fd, "Exec stream open");
        Ok(FdStream::new(
            fd,
            ws,
            client.transport().cancellation_token().clone(),
        ))
    }

    /// Wait for the command to exit.
    pub async fn wait(&self, client: &Client) -> Result<ExecOutcome> {
        client.wait_exec(&self.operation).await
    }
}

/// Open byte streams of one exec.
///
/// For interactive sessions `stdout` and `stderr` are `None`; the PTY is
/// read from and written to through `stdin`.
#[derive(Debug)]
pub struct ExecStreams {
    operation: ResourcePath,
    pub stdin: FdStream,
    pub stdout: Option<FdStream>,
    pub stderr: Option<FdStream>,
}

impl ExecStreams {
    pub fn operation(&self) -> &ResourcePath {
        &self.operation
    }

    /// Close every stream, reporting the first failure.
    pub async fn close(&mut self) -> Result<()> {
        let mut first = Ok(());
        for stream in std::iter::once(&mut self.stdin)
            .chain(self.stdout.as_mut())
            .chain(self.stderr.as_mut())
        {
            let result = stream.close().await;
            if first.is_ok() {
                first = result;
            }
        }
        first
    }

    /// Copy `input` into the command and its output into the sinks until the
    /// output streams end.
    ///
    /// All copies run concurrently in the calling task. Stdin is closed when
    /// `input` reaches end-of-file, or once the outputs have ended if `input`
    /// never does. A stdin write failure is logged and the outputs are still
    /// drained to the end. For interactive sessions everything read from the
    /// PTY goes to `stdout` and `stderr` is left untouched.
    pub async fn pump<I, O, E>(self, mut input: I, mut stdout: O, mut stderr: E) -> Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let ExecStreams {
            stdin: fd0,
            stdout: fd1,
            stderr: fd2,
            ..
        } = self;

        match (fd1, fd2) {
            (Some(fd1), Some(fd2)) => {
                let outputs = async {
                    tokio::try_join!(drain(fd1, &mut stdout), drain(fd2, &mut stderr))?;
                    Ok::<(), std::io::Error>(())
                };
                feed(fd0, &mut input, outputs).await
            }
            (fd1, fd2) => {
                for mut stream in [fd1, fd2].into_iter().flatten() {
                    stream.close_quietly().await;
                }
                let (reader, writer) = tokio::io::split(fd0);
                feed(writer, &mut input, drain(reader, &mut stdout)).await
            }
        }
    }

    /// Wait for the command to exit.
    pub async fn wait(&self, client: &Client) -> Result<ExecOutcome> {
        client.wait_exec(&self.operation).await
    }
}

async fn drain<R, W>(mut reader: R, writer: &mut W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::io::copy(&mut reader, writer).await?;
    writer.flush().await
}

async fn feed<W, I, F>(mut writer: W, input: &mut I, outputs: F) -> Result<()>
where
    W: AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    F: Future<Output = std::io::Result<()>>,
{
    let mut outputs = pin!(outputs);

    let input = {
        let copy_in = async {
            tokio::io::copy(input, &mut writer).await?;
            writer.shutdown().await
        };
        tokio::select! {
            biased;

            result = copy_in => Some(result),
            result = &mut outputs => {
                result?;
                None
            }
        }
    };

    match input {
        Some(Ok(())) => outputs.await?,
        // The server tears down stdin once the command exits.
        Some(Err(e)) => {
            warn!(error = %e, "Exec stdin closed before input was consumed");
            outputs.await?;
        }
        None => {
            if let Err(e) = writer.shutdown().await {
                warn!(error = %e, "Failed to close exec stdin");
            }
        }
    }
    Ok(())
}

impl Client {
    /// Wait for the exec operation at `operation` and read the exit code.
    pub async fn wait_exec(&self, operation: &ResourcePath) -> Result<ExecOutcome> {
        let result: ExecResult = self.wait_operation(operation).await?.metadata()?;
        debug!(exit_code = result.exit_code, "Exec finished");
        Ok(ExecOutcome {
            exit_code: result.exit_code,
            output: result.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request = ExecRequest::new(["sh", "-c", "echo hi"])
            .with_env("TERM", "xterm")
            .with_cwd("/root")
            .with_user(1000)
            .with_group(1000);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "command": ["sh", "-c", "echo hi"],
                "wait-for-websocket": true,
                "interactive": false,
                "environment": {"TERM": "xterm"},
                "cwd": "/root",
                "user": 1000,
                "group": 1000,
                "record-output": false
            })
        );
    }

    #[test]
    fn test_interactive_request() {
        let value = serde_json::to_value(ExecRequest::new(["bash"]).interactive(80, 24)).unwrap();
        assert_eq!(value["interactive"], true);
        assert_eq!(value["width"], 80);
        assert_eq!(value["height"], 24);
    }

    #[test]
    fn test_validate_rejects_without_websocket() {
        let request = ExecRequest::new(["true"]).with_wait_for_websocket(false);
        assert!(matches!(request.validate(), Err(LxdError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let request = ExecRequest::new(Vec::<String>::new());
        assert!(matches!(request.validate(), Err(LxdError::Config(_))));
    }

    #[test]
    fn test_session_interactive_detection() {
        let op = ResourcePath::parse("/1.0/operations/abc").unwrap();
        let pty = ExecSession::new(
            op.clone(),
            HashMap::from([("0".into(), "s0".into()), ("control".into(), "c".into())]),
        );
        assert!(pty.is_interactive());

        let piped = ExecSession::new(
            op,
            HashMap::from([
                ("0".into(), "s0".into()),
                ("1".into(), "s1".into()),
                ("2".into(), "s2".into()),
            ]),
        );
        assert!(!piped.is_interactive());
    }

    #[test]
    fn test_exec_result_decoding() {
        let result: ExecResult = serde_json::from_value(json!({"return": 3})).unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.output.is_empty());
    }
}
