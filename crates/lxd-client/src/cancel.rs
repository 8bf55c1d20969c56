// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellation plumbing.
//!
//! Async calls race against the client's token with [`cancellable`]; the
//! poll-based byte streams hold a [`CancelWatch`] instead.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::{LxdError, Result};

/// Run `operation` unless `token` fires first.
///
/// The losing future is dropped, which aborts any in-flight request and
/// returns its connection to the pool.
pub(crate) async fn cancellable<F, T>(token: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;

        _ = token.cancelled() => Err(LxdError::Cancelled),

        result = operation => result,
    }
}

/// Cancellation observer for `poll_*` implementations.
pub(crate) struct CancelWatch {
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    fired: bool,
}

impl CancelWatch {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            cancelled: Box::pin(token.cancelled_owned()),
            fired: false,
        }
    }

    /// True once the token has fired. Registers the waker otherwise.
    pub(crate) fn poll_cancelled(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.fired && self.cancelled.as_mut().poll(cx).is_ready() {
            self.fired = true;
        }
        self.fired
    }
}

/// `io::Error` carrying [`LxdError::Cancelled`].
pub(crate) fn cancelled_io() -> std::io::Error {
    std::io::Error::other(LxdError::Cancelled)
}
