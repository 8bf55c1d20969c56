// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One exec file descriptor carried over a WebSocket, exposed as a byte stream.
//!
//! Writes are framed one binary message per `write` call. Reads hand out the
//! current inbound message in whatever chunk size the caller asks for and only
//! pull the next message once it is drained.
//!
//! A close frame with code 1000 (normal) or 1001 (going away), or no code at
//! all, reads as end-of-stream. Any other close code, or a connection dropped
//! without a close handshake, fails the read with
//! [`io::ErrorKind::ConnectionAborted`] wrapping [`LxdError::AbnormalClose`].

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cancel::{CancelWatch, cancelled_io};
use crate::error::{LxdError, Result};

pub(crate) type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Byte stream bound to one exec file descriptor.
pub struct FdStream {
    fd: String,
    ws: WsConnection,
    buffer: Bytes,
    eof: bool,
    cancel: CancelWatch,
}

impl FdStream {
    pub(crate) fn new(fd: impl Into<String>, ws: WsConnection, token: CancellationToken) -> Self {
        Self {
            fd: fd.into(),
            ws,
            buffer: Bytes::new(),
            eof: false,
            cancel: CancelWatch::new(token),
        }
    }

    /// File descriptor name (`"0"`, `"1"`, `"2"`).
    pub fn fd(&self) -> &str {
        &self.fd
    }

    /// Send a close frame and flush it.
    ///
    /// Closing one descriptor says nothing about the others.
    pub async fn close(&mut self) -> Result<()> {
        debug!(fd = %self.fd, "Closing exec stream");
        match self.ws.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Close, logging instead of returning failures. Used on cleanup paths.
    pub(crate) async fn close_quietly(&mut self) {
        if let Err(e) = self.close().await {
            warn!(fd = %self.fd, error = %e, "Failed to close exec stream");
        }
    }

    fn on_close(&mut self, frame: Option<CloseFrame>) -> io::Result<()> {
        self.eof = true;
        match frame {
            None => Ok(()),
            Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
                debug!(fd = %self.fd, code = u16::from(frame.code), "Exec stream closed by peer");
                Ok(())
            }
            Some(frame) => Err(abnormal_close(
                u16::from(frame.code),
                frame.reason.as_str().to_string(),
            )),
        }
    }
}

impl fmt::Debug for FdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdStream")
            .field("fd", &self.fd)
            .field("buffered", &self.buffer.len())
            .field("eof", &self.eof)
            .finish()
    }
}

impl AsyncRead for FdStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        loop {
            if !this.buffer.is_empty() {
                let n = buf.remaining().min(this.buffer.len());
                buf.put_slice(&this.buffer.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }
            if this.cancel.poll_cancelled(cx) {
                return Poll::Ready(Err(cancelled_io()));
            }

            match ready!(Pin::new(&mut this.ws).poll_next(cx)) {
                Some(Ok(Message::Close(frame))) => {
                    this.on_close(frame)?;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(message)) => {
                    this.buffer = message.into_data();
                }
                None => {
                    this.eof = true;
                }
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    this.eof = true;
                }
                Some(Err(tungstenite::Error::Protocol(
                    ProtocolError::ResetWithoutClosingHandshake,
                ))) => {
                    this.eof = true;
                    return Poll::Ready(Err(abnormal_close(
                        1006,
                        "connection reset without closing handshake".to_string(),
                    )));
                }
                Some(Err(e)) => {
                    this.eof = true;
                    return Poll::Ready(Err(ws_io(e)));
                }
            }
        }
    }
}

impl AsyncWrite for FdStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        if this.cancel.poll_cancelled(cx) {
            return Poll::Ready(Err(cancelled_io()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(Pin::new(&mut this.ws).poll_ready(cx)).map_err(ws_io)?;
        Pin::new(&mut this.ws)
            .start_send(Message::binary(Bytes::copy_from_slice(buf)))
            .map_err(ws_io)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.cancel.poll_cancelled(cx) {
            return Poll::Ready(Err(cancelled_io()));
        }
        Pin::new(&mut this.ws).poll_flush(cx).map_err(ws_io)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match ready!(Pin::new(&mut self.ws).poll_close(cx)) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(ws_io(e))),
        }
    }
}

fn abnormal_close(code: u16, reason: String) -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        LxdError::AbnormalClose { code, reason },
    )
}

fn ws_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(e) => e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::BrokenPipe, LxdError::from(err))
        }
        other => io::Error::other(LxdError::from(other)),
    }
}
