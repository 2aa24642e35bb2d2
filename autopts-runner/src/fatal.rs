// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervision of unrecoverable faults.
//!
//! Some failures cannot be reported to their caller. The engine's callbacks run inside a foreign
//! blocking frame that cannot be unwound, so a failure there is captured by a
//! [`FatalFaultHandler`] instead. The handler records the first fault and cancels a shutdown token
//! that the surrounding service observes, so that logs are flushed and the cause is reported
//! before the process exits.

use crate::errors::FatalFault;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Captures the first unrecoverable fault and signals shutdown.
///
/// This is cheap to clone: all clones share the same state.
#[derive(Clone, Debug)]
pub struct FatalFaultHandler {
    inner: Arc<FatalInner>,
}

#[derive(Debug)]
struct FatalInner {
    triggered: AtomicBool,
    shutdown: CancellationToken,
    captured: Mutex<Option<FatalFault>>,
}

impl FatalFaultHandler {
    /// Creates a new handler with its own shutdown token.
    pub fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Creates a new handler that cancels `shutdown` when a fault is reported.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                shutdown,
                captured: Mutex::new(None),
            }),
        }
    }

    /// Reports a fault.
    ///
    /// Only the first fault is kept. Later faults are logged and dropped.
    pub fn trigger(&self, fault: FatalFault) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::debug!(error = %fault, "fatal fault already captured, ignoring");
            return;
        }

        tracing::error!(
            context = fault.context(),
            error = %fault,
            "unrecoverable fault; initiating shutdown"
        );

        {
            let mut slot = self
                .inner
                .captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(fault);
            }
        }

        self.inner.shutdown.cancel();
    }

    /// Returns true if a fault has been reported.
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Returns the captured fault, if any.
    pub fn fault(&self) -> Option<FatalFault> {
        self.inner
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a future that resolves once a fault has been reported.
    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.inner.shutdown.cancelled()
    }
}

impl Default for FatalFaultHandler {
    fn default() -> Self {
        Self::new()
    }
}
