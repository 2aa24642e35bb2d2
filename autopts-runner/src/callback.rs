// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The callback channel.
//!
//! The engine server pushes log lines back to the client that most recently registered. The client
//! side of the channel is a [`CallbackListener`], started before the client registers itself with
//! `registerCallback`. The server side is a [`CallbackSlot`] holding at most one
//! [`ClientCallback`].

use crate::{
    errors::{CallbackError, FatalFault},
    fatal::FatalFaultHandler,
    registry::RunRegistry,
    rpc::{CallbackRpcClient, CallbackRpcServer},
};
use futures::future::BoxFuture;
use jsonrpsee::{
    core::{RpcResult, async_trait},
    http_client::{HttpClient, HttpClientBuilder},
    server::{Server, ServerHandle},
};
use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

/// A log line emitted by the engine, tagged with the test case it belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogLine {
    /// The raw log type.
    pub kind: u32,

    /// The engine's label for the log type.
    pub kind_label: String,

    /// The engine's timestamp for the line.
    pub timestamp: String,

    /// The message.
    pub message: String,

    /// The test case that was running when the line was emitted.
    pub test_case_name: String,
}

/// A client that receives the engine's log lines.
pub trait ClientCallback: fmt::Debug + Send + Sync + 'static {
    /// Returns a description of where log lines are sent.
    fn target(&self) -> &str;

    /// Delivers a log line.
    fn on_log(&self, line: LogLine) -> BoxFuture<'_, Result<(), CallbackError>>;
}

/// The single active callback target of an engine server.
///
/// This is cheap to clone: all clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct CallbackSlot {
    inner: Arc<Mutex<Option<Arc<dyn ClientCallback>>>>,
}

impl CallbackSlot {
    /// Creates a new, empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `callback` the active target, returning the previous target if there was one.
    pub fn replace(&self, callback: Arc<dyn ClientCallback>) -> Option<Arc<dyn ClientCallback>> {
        self.lock().replace(callback)
    }

    /// Clears the active target, returning it if there was one.
    pub fn clear(&self) -> Option<Arc<dyn ClientCallback>> {
        self.lock().take()
    }

    /// Returns the active target.
    pub fn get(&self) -> Option<Arc<dyn ClientCallback>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn ClientCallback>>> {
        // The slot only ever holds a fully-formed value, so a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A proxy to a client's [`CallbackListener`].
#[derive(Debug)]
pub struct RemoteCallback {
    target: String,
    client: HttpClient,
}

impl RemoteCallback {
    /// Connects to the callback listener at `address:port` and probes it once.
    pub async fn connect(
        address: &str,
        port: u16,
        request_timeout: Duration,
    ) -> Result<Self, CallbackError> {
        let target = format!("http://{address}:{port}/");
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(&target)
            .map_err(|error| CallbackError::Connect {
                target: target.clone(),
                error,
            })?;

        client
            .ping()
            .await
            .map_err(|error| CallbackError::Probe {
                target: target.clone(),
                error,
            })?;

        Ok(Self { target, client })
    }
}

impl ClientCallback for RemoteCallback {
    fn target(&self) -> &str {
        &self.target
    }

    fn on_log(&self, line: LogLine) -> BoxFuture<'_, Result<(), CallbackError>> {
        Box::pin(async move {
            let LogLine {
                kind,
                kind_label,
                timestamp,
                message,
                test_case_name,
            } = line;
            self.client
                .log(kind, kind_label, timestamp, message, test_case_name)
                .await
                .map_err(|error| CallbackError::Forward {
                    target: self.target.clone(),
                    error,
                })
        })
    }
}

/// The client side of the callback channel.
///
/// Each incoming log line is routed to the test case it names, looked up in the
/// [`RunRegistry`]. Lines for test cases that aren't running are dropped.
///
/// The listener runs on its own task and stops when this is dropped.
#[derive(Debug)]
pub struct CallbackListener {
    local_addr: SocketAddr,
    handle: ServerHandle,
}

impl CallbackListener {
    /// Starts a callback listener on `addr`.
    pub async fn start(
        addr: SocketAddr,
        registry: RunRegistry,
        fatal: FatalFaultHandler,
    ) -> Result<Self, CallbackError> {
        let server = Server::builder()
            .build(addr)
            .await
            .map_err(|error| CallbackError::Listen { addr, error })?;
        let local_addr = server
            .local_addr()
            .map_err(|error| CallbackError::Listen { addr, error })?;

        let service = CallbackService { registry, fatal };
        let handle = server.start(service.into_rpc());
        tracing::debug!(%local_addr, "callback listener started");

        Ok(Self { local_addr, handle })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        // An error here means the listener already stopped.
        if self.handle.stop().is_ok() {
            tracing::debug!(local_addr = %self.local_addr, "callback listener stopped");
        }
    }
}

struct CallbackService {
    registry: RunRegistry,
    fatal: FatalFaultHandler,
}

impl CallbackService {
    fn dispatch(&self, line: &LogLine) {
        tracing::debug!(
            target: "autopts_runner::callback::log",
            "{} {} {} {} {}",
            line.kind,
            line.kind_label,
            line.timestamp,
            line.test_case_name,
            line.message,
        );

        let Some(test_case) = self.registry.get(&line.test_case_name) else {
            tracing::trace!(
                test_case = %line.test_case_name,
                "dropping log line for test case that isn't running",
            );
            return;
        };

        if let Err(error) = test_case.on_log(line) {
            self.fatal
                .trigger(FatalFault::new("callback log dispatch", error));
        }
    }
}

#[async_trait]
impl CallbackRpcServer for CallbackService {
    async fn log(
        &self,
        kind: u32,
        kind_label: String,
        timestamp: String,
        message: String,
        test_case_name: String,
    ) -> RpcResult<()> {
        self.dispatch(&LogLine {
            kind,
            kind_label,
            timestamp,
            message,
            test_case_name,
        });
        Ok(())
    }

    async fn ping(&self) -> RpcResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_case::{TestCase, TestStatus};
    use autopts_metadata::LogType;
    use camino_tempfile::Utf8TempDir;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[derive(Debug)]
    struct NamedCallback(&'static str);

    impl ClientCallback for NamedCallback {
        fn target(&self) -> &str {
            self.0
        }

        fn on_log(&self, _line: LogLine) -> BoxFuture<'_, Result<(), CallbackError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn registration_replaces() {
        let slot = CallbackSlot::new();
        assert!(slot.get().is_none());

        assert!(slot.replace(Arc::new(NamedCallback("first"))).is_none());
        let previous = slot
            .replace(Arc::new(NamedCallback("second")))
            .expect("first target was active");
        assert_eq!(previous.target(), "first");

        // The first target was discarded: only the second one is left.
        assert_eq!(Arc::strong_count(&previous), 1);
        assert_eq!(slot.get().expect("target active").target(), "second");

        assert_eq!(slot.clear().expect("target active").target(), "second");
        assert!(slot.get().is_none());
    }

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    #[tokio::test]
    async fn listener_routes_to_running_test_case() {
        let registry = RunRegistry::new();
        let fatal = FatalFaultHandler::new();
        let listener = CallbackListener::start(loopback(), registry.clone(), fatal.clone())
            .await
            .unwrap();

        let log_dir = Utf8TempDir::new().unwrap();
        let test_case = Arc::new(TestCase::new("GAP/CONN/BV-01-C"));
        test_case.reset();
        test_case
            .open_log(&log_dir.path().join("attempt.log"))
            .unwrap();

        let addr = listener.local_addr();
        let remote = RemoteCallback::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let verdict = |test_case_name: &str| LogLine {
            kind: LogType::FinalVerdict.as_raw(),
            kind_label: "Final Verdict".to_owned(),
            timestamp: "12:00:00".to_owned(),
            message: "Final verdict: PASS".to_owned(),
            test_case_name: test_case_name.to_owned(),
        };

        // Not registered yet: the line is dropped.
        remote.on_log(verdict("GAP/CONN/BV-01-C")).await.unwrap();
        assert_eq!(test_case.status(), TestStatus::Init);

        {
            let _guard = registry.register(test_case.clone());
            remote.on_log(verdict("GAP/CONN/BV-01-C")).await.unwrap();
            // Lines for other test cases are dropped without error.
            remote.on_log(verdict("GAP/OTHER")).await.unwrap();
        }

        assert_eq!(test_case.status(), TestStatus::Pass);
        test_case.close_log();
        let contents = std::fs::read_to_string(log_dir.path().join("attempt.log")).unwrap();
        assert_eq!(contents.lines().count(), 1, "contents: {contents}");
        assert!(!fatal.is_triggered());
    }
}
