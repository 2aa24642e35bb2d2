// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client sessions with engine servers.
//!
//! A [`ServerSession`] owns the command-channel client for one server and the callback listener
//! that server logs to. Sessions for every server are initialized concurrently by [`init_all`].

use crate::{
    callback::CallbackListener,
    client::{EngineControl, RemoteEngine},
    config::ClientConfig,
    errors::{SessionInitError, SessionInitErrorKind},
    fatal::FatalFaultHandler,
    registry::RunRegistry,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{net::UdpSocket, task::JoinHandle};

/// The PIXIT parameter holding the device address of the implementation under test.
pub const BD_ADDR_IUT_PIXIT: &str = "TSPX_bd_addr_iut";

/// An engine server to connect to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerTarget {
    /// The server's address.
    pub address: String,

    /// The server's command-channel port.
    pub port: u16,

    /// The local address advertised to this server for callbacks. If unset, the address of the
    /// interface used to reach the server is advertised.
    pub local_address: Option<String>,
}

/// Settings shared by every session of a run.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// The workspace to open, as seen by the servers.
    pub workspace: String,

    /// The engine call timeout, in milliseconds.
    pub call_timeout_ms: u32,

    /// Whether to enable the engine's maximum logging.
    pub enable_max_logging: bool,

    /// If set, written to every project's `TSPX_bd_addr_iut` PIXIT.
    pub bd_addr_override: Option<String>,

    /// The callback listener for the server at index `i` listens on `callback_port + i`. A base of
    /// 0 picks ephemeral ports.
    pub callback_port: u16,

    /// How long each server gets to complete initialization.
    pub init_timeout: Duration,

    /// The longest a single command-channel call may take.
    pub rpc_timeout: Duration,
}

impl SessionOptions {
    /// Creates options from the client config.
    pub fn new(workspace: impl Into<String>, call_timeout_ms: u32, config: &ClientConfig) -> Self {
        Self {
            workspace: workspace.into(),
            call_timeout_ms,
            enable_max_logging: false,
            bd_addr_override: None,
            callback_port: config.callback_port,
            init_timeout: config.init_timeout,
            rpc_timeout: config.rpc_timeout,
        }
    }

    fn callback_port(&self, index: usize) -> u16 {
        if self.callback_port == 0 {
            return 0;
        }
        u16::try_from(index)
            .ok()
            .and_then(|index| self.callback_port.checked_add(index))
            .unwrap_or(0)
    }
}

/// An initialized session with one engine server.
#[derive(Debug)]
pub struct ServerSession {
    engine: RemoteEngine,
    listener: CallbackListener,
    version: String,
    bd_addr: String,
}

impl ServerSession {
    /// Initializes a session with `target`.
    ///
    /// The engine is restarted and the callback listener is started before anything else, so
    /// that every log line of the session reaches `registry`.
    pub async fn init(
        index: usize,
        target: &ServerTarget,
        options: &SessionOptions,
        registry: RunRegistry,
        fatal: FatalFaultHandler,
    ) -> Result<Self, SessionInitError> {
        let server = format!("{}:{}", target.address, target.port);
        let err = |kind: SessionInitErrorKind| SessionInitError::new(server.clone(), kind);

        let engine = RemoteEngine::connect(&target.address, target.port, options.rpc_timeout)
            .map_err(|error| err(error.into()))?;

        tracing::info!(%server, "restarting engine");
        engine.restart().await.map_err(|error| err(error.into()))?;

        let listen_addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            options.callback_port(index),
        );
        let listener = CallbackListener::start(listen_addr, registry, fatal)
            .await
            .map_err(|error| err(error.into()))?;

        engine
            .set_call_timeout(options.call_timeout_ms)
            .await
            .map_err(|error| err(error.into()))?;

        let version = engine.version().await.map_err(|error| err(error.into()))?;
        tracing::info!(%server, %version, "engine version");

        let bd_addr = engine.bd_addr().await.map_err(|error| err(error.into()))?;
        tracing::info!(%server, %bd_addr, "engine device address");

        let local_address = match &target.local_address {
            Some(address) => address.clone(),
            None => probe_local_address(&target.address, target.port)
                .await
                .map_err(|error| err(SessionInitErrorKind::LocalAddress(error)))?
                .to_string(),
        };
        let callback_port = listener.local_addr().port();
        tracing::info!(%server, %local_address, callback_port, "registering callback");
        engine
            .register_callback(&local_address, callback_port)
            .await
            .map_err(|error| err(error.into()))?;

        tracing::info!(%server, workspace = %options.workspace, "opening workspace");
        engine
            .open_workspace(&options.workspace)
            .await
            .map_err(|error| err(error.into()))?;

        if let Some(bd_addr) = &options.bd_addr_override {
            let projects = engine
                .project_list()
                .await
                .map_err(|error| err(error.into()))?;
            for project in &projects {
                tracing::debug!(%server, %project, %bd_addr, "setting {BD_ADDR_IUT_PIXIT}");
                engine
                    .set_pixit(project, BD_ADDR_IUT_PIXIT, bd_addr)
                    .await
                    .map_err(|error| err(error.into()))?;
            }
        }

        engine
            .enable_max_logging(options.enable_max_logging)
            .await
            .map_err(|error| err(error.into()))?;

        Ok(Self {
            engine,
            listener,
            version,
            bd_addr,
        })
    }

    /// Returns the command-channel client.
    pub fn engine(&self) -> &RemoteEngine {
        &self.engine
    }

    /// Returns the address the callback listener is bound to.
    pub fn callback_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Returns the engine version reported during initialization.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the engine's device address, cached during initialization.
    pub fn bd_addr(&self) -> &str {
        &self.bd_addr
    }

    /// Clears the server's callback registration and stops the callback listener.
    pub async fn close(self) {
        if let Err(error) = self.engine.unregister_callback().await {
            tracing::debug!(
                server = %self.engine.server(),
                %error,
                "failed to unregister callback"
            );
        }
    }
}

/// Initializes a session with every target concurrently.
///
/// Each target gets `options.init_timeout` to complete. The first failure is returned: sessions
/// that did initialize are dropped and initializations still in flight are aborted.
pub async fn init_all(
    targets: &[ServerTarget],
    options: &SessionOptions,
    registry: &RunRegistry,
    fatal: &FatalFaultHandler,
) -> Result<Vec<ServerSession>, SessionInitError> {
    let handles: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(index, target)| {
            let target = target.clone();
            let options = options.clone();
            let registry = registry.clone();
            let fatal = fatal.clone();
            let server = format!("{}:{}", target.address, target.port);
            let handle = tokio::spawn(async move {
                let init = ServerSession::init(index, &target, &options, registry, fatal);
                match tokio::time::timeout(options.init_timeout, init).await {
                    Ok(result) => result,
                    Err(_) => Err(SessionInitError::new(
                        format!("{}:{}", target.address, target.port),
                        SessionInitErrorKind::TimedOut {
                            timeout: options.init_timeout,
                        },
                    )),
                }
            });
            (server, handle)
        })
        .collect();

    join_in_order(handles).await
}

/// Awaits each initialization in target order.
///
/// On the first failure, the tasks that haven't been awaited yet are aborted.
async fn join_in_order<T>(
    handles: Vec<(String, JoinHandle<Result<T, SessionInitError>>)>,
) -> Result<Vec<T>, SessionInitError> {
    let mut results = Vec::with_capacity(handles.len());
    let mut handles = handles.into_iter();
    while let Some((server, handle)) = handles.next() {
        let result = match handle.await {
            Ok(result) => result,
            Err(error) => Err(SessionInitError::new(
                server,
                SessionInitErrorKind::Join(error),
            )),
        };
        match result {
            Ok(value) => results.push(value),
            Err(error) => {
                for (server, handle) in handles {
                    tracing::debug!(%server, "aborting initialization");
                    handle.abort();
                }
                return Err(error);
            }
        }
    }
    Ok(results)
}

/// Returns the address of the local interface used to reach `address:port`.
///
/// Connecting a UDP socket sends nothing: it only selects a route.
async fn probe_local_address(address: &str, port: u16) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect((address, port)).await?;
    Ok(socket.local_addr()?.ip())
}
