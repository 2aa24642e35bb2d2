// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary between autopts and the test engine.
//!
//! The engine itself is an external, stateful system. The host process that embeds it provides an
//! implementation of [`Engine`]; autopts drives that implementation from the
//! [engine server](crate::server). In the other direction, the engine calls back into autopts
//! through [`EngineHooks`]: log lines go to the [`EngineLogger`] and implicit sends go to the
//! [`ImplicitSendBridge`].

use crate::{
    bridge::ImplicitSendBridge,
    callback::{CallbackSlot, LogLine},
    errors::{EngineError, FatalFault},
    fatal::FatalFaultHandler,
};
use autopts_metadata::LogType;
use camino::Utf8Path;
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::runtime::Handle;

/// A test engine.
///
/// All methods are called from a blocking thread, one at a time. [`run_test_case`] blocks until
/// the test case completes. While it runs, the engine reports progress through the
/// [`EngineHooks`] it was started with.
///
/// [`run_test_case`]: Self::run_test_case
pub trait Engine: Send + 'static {
    /// Starts the engine, registering `hooks` as its logger and implicit-send handler.
    fn start(&mut self, hooks: EngineHooks) -> Result<(), EngineError>;

    /// Stops the engine.
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Returns true if the engine is running.
    fn is_running(&self) -> bool;

    /// Opens an existing workspace.
    fn open_workspace(&mut self, path: &Utf8Path) -> Result<(), EngineError>;

    /// Returns the projects in the open workspace.
    fn project_names(&self) -> Result<Vec<String>, EngineError>;

    /// Returns every test case of `project`, active or not.
    fn test_case_names(&self, project: &str) -> Result<Vec<String>, EngineError>;

    /// Returns true if `test_case` is active in `project`.
    fn is_active_test_case(&self, project: &str, test_case: &str) -> Result<bool, EngineError>;

    /// Runs a test case to completion.
    fn run_test_case(&mut self, project: &str, test_case: &str) -> Result<(), EngineError>;

    /// Stops the running test case.
    fn stop_test_case(&mut self) -> Result<(), EngineError>;

    /// Sets a PIXIT parameter.
    fn update_pixit(&mut self, project: &str, name: &str, value: &str) -> Result<(), EngineError>;

    /// Sets a PICS entry.
    fn update_pics(&mut self, project: &str, name: &str, value: bool) -> Result<(), EngineError>;

    /// Enables or disables the engine's maximum logging.
    fn enable_maximum_logging(&mut self, enable: bool) -> Result<(), EngineError>;

    /// Sets the timeout applied to [`run_test_case`](Self::run_test_case), in milliseconds.
    ///
    /// 0 means no timeout.
    fn set_call_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError>;

    /// Returns the engine's version.
    fn version(&self) -> Result<String, EngineError>;

    /// Returns the engine's device address as a hex string.
    fn device_address(&self) -> Result<String, EngineError>;
}

/// Callbacks handed to the engine on start.
#[derive(Clone, Debug)]
pub struct EngineHooks {
    /// Receives the engine's log lines.
    pub logger: Arc<EngineLogger>,

    /// Answers the engine's implicit sends.
    pub sender: Arc<ImplicitSendBridge>,
}

/// How long forwarding a single log line to a client may take.
pub(crate) const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Forwards the engine's log lines to the registered client.
#[derive(Debug)]
pub struct EngineLogger {
    callbacks: CallbackSlot,
    maximum_logging: AtomicBool,
    test_case: Mutex<Option<String>>,
    runtime: Handle,
    fatal: FatalFaultHandler,
}

impl EngineLogger {
    /// Creates a new logger.
    ///
    /// Log lines are forwarded using `runtime`.
    pub fn new(callbacks: CallbackSlot, runtime: Handle, fatal: FatalFaultHandler) -> Self {
        Self {
            callbacks,
            maximum_logging: AtomicBool::new(false),
            test_case: Mutex::new(None),
            runtime,
            fatal,
        }
    }

    /// Enables or disables forwarding of every log type.
    pub fn set_maximum_logging(&self, enable: bool) {
        self.maximum_logging.store(enable, Ordering::SeqCst);
    }

    /// Sets the test case that subsequent log lines are tagged with.
    pub fn set_test_case(&self, test_case: impl Into<String>) {
        *self.test_case.lock().unwrap_or_else(PoisonError::into_inner) = Some(test_case.into());
    }

    /// Handles a log line from the engine.
    ///
    /// Called from the engine's own thread. Lines are forwarded only if maximum logging is
    /// enabled or the log type is forwarded by default, and only if a client is registered.
    pub fn log(&self, log_type: u32, log_type_label: &str, timestamp: &str, message: &str) {
        tracing::info!(
            target: "autopts_runner::engine::log",
            "{log_type} {log_type_label} {timestamp} {message}"
        );

        let forward = self.maximum_logging.load(Ordering::SeqCst)
            || LogType::from_raw(log_type).is_some_and(LogType::is_forwarded_by_default);
        if !forward {
            return;
        }

        let Some(callback) = self.callbacks.get() else {
            return;
        };

        let test_case_name = self
            .test_case
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default();
        let line = LogLine {
            kind: log_type,
            kind_label: log_type_label.to_owned(),
            timestamp: timestamp.to_owned(),
            message: message.to_owned(),
            test_case_name,
        };

        let result = self.runtime.block_on(async {
            tokio::time::timeout(FORWARD_TIMEOUT, callback.on_log(line)).await
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self
                .fatal
                .trigger(FatalFault::new("engine log forwarding", error)),
            Err(_) => self.fatal.trigger(FatalFault::new(
                "engine log forwarding",
                "client did not accept the log line in time",
            )),
        }
    }
}
