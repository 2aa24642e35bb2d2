// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The engine server.
//!
//! An [`EngineServer`] embeds an [`Engine`] and exposes it over the command channel. Engine calls
//! are serialized: the engine is driven from one blocking thread at a time, and a long-running
//! `runTestCase` holds the engine until it completes.
//!
//! The server also owns the engine's [hooks](EngineHooks): the [`EngineLogger`] that forwards log
//! lines to the registered client, and the [`ImplicitSendBridge`] that answers the engine's
//! questions.
//!
//! A host process that embeds an engine usually calls [`serve`], which wires the bridge to MQTT
//! and runs the server until shutdown.

use crate::{
    bridge::ImplicitSendBridge,
    callback::{CallbackSlot, RemoteCallback},
    config::{AutoptsConfig, EngineConfig},
    engine::{Engine, EngineHooks, EngineLogger, FORWARD_TIMEOUT},
    errors::{EngineError, ServeError, ServerRunError, ServerStartError, WorkspaceError},
    fatal::FatalFaultHandler,
    helpers::format_device_address,
    pubsub::mqtt_connect,
    rpc::{
        CALLBACK_ERROR_CODE, ENGINE_ERROR_CODE, EngineRpcServer, HOST_ERROR_CODE,
        UNKNOWN_PROJECT_CODE, WORKSPACE_ERROR_CODE, error_object,
    },
};
use autopts_metadata::{ENGINE_E_PICS_ENTRY_NOT_CHANGED, ENGINE_E_PIXIT_PARAM_NOT_CHANGED};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use jsonrpsee::{
    core::{RpcResult, async_trait},
    server::{Server, ServerHandle},
    types::{ErrorObject, ErrorObjectOwned},
};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Options for an [`EngineServer`].
#[derive(Clone, Debug)]
pub struct EngineServerOptions {
    /// The address to listen on.
    pub bind: String,

    /// The command-channel port. 0 picks an ephemeral port.
    pub port: u16,

    /// Engine settings.
    pub engine: EngineConfig,
}

impl EngineServerOptions {
    /// Creates options from config.
    pub fn from_config(config: &AutoptsConfig) -> Self {
        Self {
            bind: config.server.bind.clone(),
            port: config.server.port,
            engine: config.engine.clone(),
        }
    }
}

/// Hosts an engine behind the command channel.
#[derive(Debug)]
pub struct EngineServer;

impl EngineServer {
    /// Starts the engine and begins serving the command channel.
    ///
    /// Implicit sends are relayed through `bridge`. Faults that cannot be reported to a caller go
    /// to `fatal`; the returned [`RunningServer`] shuts down when one is reported.
    pub async fn start(
        engine: Box<dyn Engine>,
        options: EngineServerOptions,
        bridge: Arc<ImplicitSendBridge>,
        fatal: FatalFaultHandler,
    ) -> Result<RunningServer, ServerStartError> {
        let callbacks = CallbackSlot::new();
        let logger = Arc::new(EngineLogger::new(
            callbacks.clone(),
            Handle::current(),
            fatal.clone(),
        ));
        let hooks = EngineHooks {
            logger: logger.clone(),
            sender: bridge.clone(),
        };

        let host = Arc::new(Mutex::new(EngineHost::new(
            engine,
            options.engine.clone(),
        )));
        {
            let host = host.clone();
            let hooks = hooks.clone();
            tokio::task::spawn_blocking(move || lock_host(&host).engine.start(hooks))
                .await
                .map_err(ServerStartError::Join)?
                .map_err(ServerStartError::Engine)?;
        }

        let addr = format!("{}:{}", options.bind, options.port);
        let server = Server::builder()
            .build(addr.as_str())
            .await
            .map_err(|error| ServerStartError::Bind {
                addr: addr.clone(),
                error,
            })?;
        let local_addr = server
            .local_addr()
            .map_err(|error| ServerStartError::Bind { addr, error })?;

        let service = EngineService {
            host: host.clone(),
            hooks,
            callbacks,
        };
        let module = service.into_rpc();
        let methods: Vec<_> = module.method_names().collect();
        tracing::info!(%local_addr, ?methods, "engine server listening");

        let handle = server.start(module);
        Ok(RunningServer {
            local_addr,
            handle,
            host,
            bridge,
            fatal,
        })
    }
}

/// A running engine server.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    handle: ServerHandle,
    host: Arc<Mutex<EngineHost>>,
    bridge: Arc<ImplicitSendBridge>,
    fatal: FatalFaultHandler,
}

impl RunningServer {
    /// Returns the address the command channel is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the implicit-send bridge, for delivering responses.
    pub fn bridge(&self) -> &Arc<ImplicitSendBridge> {
        &self.bridge
    }

    /// Serves until the server is stopped, shutdown is requested, or an unrecoverable fault is
    /// reported.
    ///
    /// On a fault, the command channel and the engine are stopped before the fault is returned.
    pub async fn wait(self) -> Result<(), ServerRunError> {
        tokio::select! {
            _ = self.fatal.triggered() => {}
            _ = self.handle.clone().stopped() => return Ok(()),
        }

        let fault = self.fatal.fault();
        if fault.is_none() {
            tracing::info!("shutdown requested");
        }
        self.shutdown().await;
        match fault {
            Some(fault) => Err(ServerRunError::Fatal(fault)),
            None => Ok(()),
        }
    }

    /// Stops the command channel, then the engine.
    pub async fn shutdown(self) {
        if self.handle.stop().is_ok() {
            self.handle.clone().stopped().await;
        }

        let host = self.host.clone();
        let stopped = tokio::task::spawn_blocking(move || {
            let mut host = lock_host(&host);
            if host.engine.is_running() {
                host.engine.stop()
            } else {
                Ok(())
            }
        })
        .await;
        match stopped {
            Ok(Ok(())) => tracing::info!("engine stopped"),
            Ok(Err(error)) => tracing::warn!(%error, "failed to stop engine"),
            Err(error) => tracing::warn!(%error, "engine host task failed while stopping"),
        }
    }
}

/// Runs an engine server with its implicit-send relay until `shutdown` is cancelled or an
/// unrecoverable fault is reported.
///
/// The relay connects to the MQTT broker in `config`, and answers to implicit sends are read
/// from its response topic. A fault cancels `shutdown` too.
pub async fn serve(
    config: &AutoptsConfig,
    engine: Box<dyn Engine>,
    shutdown: CancellationToken,
) -> Result<(), ServeError> {
    let fatal = FatalFaultHandler::with_shutdown(shutdown.clone());
    let (publisher, subscription) = mqtt_connect(&config.implicit_send);
    let bridge = Arc::new(ImplicitSendBridge::from_config(
        Arc::new(publisher),
        &config.implicit_send,
        fatal.clone(),
    ));
    tracing::info!(
        broker_host = %config.implicit_send.broker_host,
        broker_port = config.implicit_send.broker_port,
        "starting implicit-send relay"
    );
    let relay_shutdown = shutdown.child_token();
    let relay = subscription.spawn(bridge.clone(), relay_shutdown.clone());

    let options = EngineServerOptions::from_config(config);
    let result = match EngineServer::start(engine, options, bridge, fatal).await {
        Ok(server) => server.wait().await.map_err(ServeError::from),
        Err(error) => Err(ServeError::from(error)),
    };

    relay_shutdown.cancel();
    if let Err(error) = relay.await {
        tracing::warn!(%error, "implicit-send relay task failed");
    }
    result
}

fn lock_host(host: &Mutex<EngineHost>) -> std::sync::MutexGuard<'_, EngineHost> {
    // A panic inside an engine call leaves the host usable: its caches are rebuilt on the next
    // workspace open.
    host.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The engine, plus what the server caches about it.
#[derive(Debug)]
struct EngineHost {
    engine: DebugIgnore<Box<dyn Engine>>,
    config: EngineConfig,
    workspace: Option<Utf8PathBuf>,
    projects: IndexMap<String, Vec<String>>,
    bd_addr: Option<String>,
    call_timeout_ms: u32,
}

impl EngineHost {
    fn new(engine: Box<dyn Engine>, config: EngineConfig) -> Self {
        let call_timeout_ms = config.call_timeout_ms();
        Self {
            engine: DebugIgnore(engine),
            config,
            workspace: None,
            projects: IndexMap::new(),
            bd_addr: None,
            call_timeout_ms,
        }
    }

    fn restart(&mut self, hooks: EngineHooks) -> Result<(), EngineError> {
        if self.engine.is_running() {
            tracing::info!("stopping engine");
            self.engine.stop()?;
        }
        self.workspace = None;
        self.projects.clear();
        self.bd_addr = None;

        std::thread::sleep(self.config.restart_delay);
        tracing::info!("starting engine");
        self.engine.start(hooks)
    }

    fn open_workspace(&mut self, path: &Utf8Path) -> Result<(), WorkspaceError> {
        if !path.is_file() {
            return Err(WorkspaceError::NotFound {
                path: path.to_owned(),
            });
        }
        if path.extension() != Some(self.config.workspace_extension.as_str()) {
            return Err(WorkspaceError::WrongExtension {
                path: path.to_owned(),
                expected: self.config.workspace_extension.clone(),
            });
        }

        tracing::info!(%path, "opening workspace");
        let engine_err = |error| WorkspaceError::Engine {
            path: path.to_owned(),
            error,
        };
        self.engine.open_workspace(path).map_err(engine_err)?;

        self.projects.clear();
        for project in self.engine.project_names().map_err(engine_err)? {
            let test_cases = self.engine.test_case_names(&project).map_err(engine_err)?;
            self.projects.insert(project, test_cases);
        }
        self.workspace = Some(path.to_owned());
        tracing::debug!(projects = self.projects.len(), "cached workspace index");
        Ok(())
    }

    fn set_call_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError> {
        self.engine.set_call_timeout(timeout_ms)?;
        self.call_timeout_ms = timeout_ms;
        Ok(())
    }

    fn active_test_cases(&self, project: &str) -> Result<Vec<String>, ErrorObjectOwned> {
        let Some(test_cases) = self.projects.get(project) else {
            return Err(ErrorObject::owned(
                UNKNOWN_PROJECT_CODE,
                format!("unknown project `{project}`"),
                None::<()>,
            ));
        };

        let mut active = Vec::new();
        for test_case in test_cases {
            if self
                .engine
                .is_active_test_case(project, test_case)
                .map_err(engine_error)?
            {
                active.push(test_case.clone());
            }
        }
        Ok(active)
    }

    /// Runs a test case, recovering the engine if it reports an error.
    fn run_test_case(
        &mut self,
        workspace: &Utf8Path,
        project: &str,
        test_case: &str,
    ) -> Option<String> {
        tracing::info!(%project, %test_case, "running test case");
        let error = match self.engine.run_test_case(project, test_case) {
            Ok(()) => {
                tracing::info!(%project, %test_case, "test case finished");
                return None;
            }
            Err(error) => error,
        };

        tracing::warn!(%project, %test_case, %error, "test case failed, recovering engine");
        if let Err(error) = self.engine.stop_test_case() {
            tracing::warn!(%error, "failed to stop test case");
        }
        if let Err(error) = self.open_workspace(workspace) {
            tracing::warn!(%error, "failed to re-open workspace");
        }
        let call_timeout_ms = self.call_timeout_ms;
        if let Err(error) = self.set_call_timeout(call_timeout_ms) {
            tracing::warn!(%error, "failed to restore call timeout");
        }

        Some(error.status())
    }

    fn bd_addr(&mut self) -> Result<String, EngineError> {
        if let Some(bd_addr) = &self.bd_addr {
            return Ok(bd_addr.clone());
        }
        let bd_addr = format_device_address(&self.engine.device_address()?);
        self.bd_addr = Some(bd_addr.clone());
        Ok(bd_addr)
    }
}

fn engine_error(error: EngineError) -> ErrorObjectOwned {
    error_object(ENGINE_ERROR_CODE, &error)
}

/// Returns `Ok` for an error that only reports a value was already set.
fn ignore_not_changed(
    result: Result<(), EngineError>,
    not_changed: u32,
) -> Result<(), EngineError> {
    match result {
        Err(EngineError::Code(code)) if code == not_changed => {
            tracing::debug!(%code, "value not changed");
            Ok(())
        }
        other => other,
    }
}

struct EngineService {
    host: Arc<Mutex<EngineHost>>,
    hooks: EngineHooks,
    callbacks: CallbackSlot,
}

impl EngineService {
    /// Runs `f` against the engine host on a blocking thread.
    async fn with_host<T, F>(&self, f: F) -> RpcResult<T>
    where
        F: FnOnce(&mut EngineHost) -> Result<T, ErrorObjectOwned> + Send + 'static,
        T: Send + 'static,
    {
        let host = self.host.clone();
        tokio::task::spawn_blocking(move || f(&mut lock_host(&host)))
            .await
            .map_err(|error| error_object(HOST_ERROR_CODE, &error))?
    }
}

#[async_trait]
impl EngineRpcServer for EngineService {
    async fn restart_engine(&self) -> RpcResult<()> {
        let hooks = self.hooks.clone();
        self.with_host(move |host| host.restart(hooks).map_err(engine_error))
            .await
    }

    async fn open_workspace(&self, path: String) -> RpcResult<()> {
        self.with_host(move |host| {
            host.open_workspace(Utf8Path::new(&path))
                .map_err(|error| error_object(WORKSPACE_ERROR_CODE, &error))
        })
        .await
    }

    async fn get_project_list(&self) -> RpcResult<Vec<String>> {
        self.with_host(|host| Ok(host.projects.keys().cloned().collect()))
            .await
    }

    async fn get_test_case_list(&self, project: String) -> RpcResult<Vec<String>> {
        self.with_host(move |host| host.active_test_cases(&project))
            .await
    }

    async fn run_test_case(
        &self,
        workspace: String,
        project: String,
        test_case: String,
    ) -> RpcResult<Option<String>> {
        self.hooks.logger.set_test_case(test_case.clone());
        self.with_host(move |host| {
            Ok(host.run_test_case(Utf8Path::new(&workspace), &project, &test_case))
        })
        .await
    }

    async fn stop_test_case(&self, project: String, test_case: String) -> RpcResult<()> {
        tracing::info!(%project, %test_case, "stopping test case");
        self.with_host(|host| host.engine.stop_test_case().map_err(engine_error))
            .await
    }

    async fn set_pixit(&self, project: String, name: String, value: String) -> RpcResult<()> {
        tracing::debug!(%project, %name, %value, "setting PIXIT");
        self.with_host(move |host| {
            let result = host.engine.update_pixit(&project, &name, &value);
            ignore_not_changed(result, ENGINE_E_PIXIT_PARAM_NOT_CHANGED).map_err(engine_error)
        })
        .await
    }

    async fn set_pics(&self, project: String, name: String, value: bool) -> RpcResult<()> {
        tracing::debug!(%project, %name, value, "setting PICS");
        self.with_host(move |host| {
            let result = host.engine.update_pics(&project, &name, value);
            ignore_not_changed(result, ENGINE_E_PICS_ENTRY_NOT_CHANGED).map_err(engine_error)
        })
        .await
    }

    async fn enable_max_logging(&self, enable: bool) -> RpcResult<()> {
        tracing::debug!(enable, "setting maximum logging");
        let logger = self.hooks.logger.clone();
        self.with_host(move |host| {
            host.engine
                .enable_maximum_logging(enable)
                .map_err(engine_error)?;
            logger.set_maximum_logging(enable);
            Ok(())
        })
        .await
    }

    async fn set_call_timeout(&self, timeout_ms: u32) -> RpcResult<()> {
        tracing::debug!(timeout_ms, "setting call timeout");
        self.with_host(move |host| host.set_call_timeout(timeout_ms).map_err(engine_error))
            .await
    }

    async fn register_callback(&self, address: String, port: u16) -> RpcResult<()> {
        let callback = RemoteCallback::connect(&address, port, FORWARD_TIMEOUT)
            .await
            .map_err(|error| error_object(CALLBACK_ERROR_CODE, &error))?;
        tracing::info!(%address, port, "registered callback");
        if let Some(previous) = self.callbacks.replace(Arc::new(callback)) {
            tracing::debug!(target = previous.target(), "replaced previous callback");
        }
        Ok(())
    }

    async fn unregister_callback(&self) -> RpcResult<()> {
        if let Some(previous) = self.callbacks.clear() {
            tracing::info!(target = previous.target(), "unregistered callback");
        }
        Ok(())
    }

    async fn get_version(&self) -> RpcResult<String> {
        self.with_host(|host| host.engine.version().map_err(engine_error))
            .await
    }

    async fn get_bd_addr(&self) -> RpcResult<String> {
        self.with_host(|host| host.bd_addr().map_err(engine_error))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bridge::BridgeTimings, pubsub::ChannelPublisher};
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[derive(Debug, Default)]
    struct RecordingEngine {
        running: bool,
        starts: Arc<AtomicUsize>,
        calls: Arc<Mutex<Vec<String>>>,
        fail_run_with: Option<u32>,
        pics_error: Option<u32>,
    }

    impl RecordingEngine {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl Engine for RecordingEngine {
        fn start(&mut self, _hooks: EngineHooks) -> Result<(), EngineError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), EngineError> {
            self.record("stop");
            self.running = false;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn open_workspace(&mut self, path: &Utf8Path) -> Result<(), EngineError> {
            self.record(format!("open {}", path.file_name().unwrap_or_default()));
            Ok(())
        }

        fn project_names(&self) -> Result<Vec<String>, EngineError> {
            Ok(vec!["GAP".to_owned(), "SM".to_owned()])
        }

        fn test_case_names(&self, project: &str) -> Result<Vec<String>, EngineError> {
            Ok((1..=3).map(|i| format!("{project}/{i}")).collect())
        }

        fn is_active_test_case(
            &self,
            _project: &str,
            test_case: &str,
        ) -> Result<bool, EngineError> {
            Ok(!test_case.ends_with('2'))
        }

        fn run_test_case(&mut self, project: &str, test_case: &str) -> Result<(), EngineError> {
            self.record(format!("run {project} {test_case}"));
            match self.fail_run_with {
                Some(code) => Err(EngineError::Code(code)),
                None => Ok(()),
            }
        }

        fn stop_test_case(&mut self) -> Result<(), EngineError> {
            self.record("stop_test_case");
            Ok(())
        }

        fn update_pixit(&mut self, _: &str, _: &str, _: &str) -> Result<(), EngineError> {
            Err(EngineError::Code(ENGINE_E_PIXIT_PARAM_NOT_CHANGED))
        }

        fn update_pics(&mut self, _: &str, _: &str, _: bool) -> Result<(), EngineError> {
            match self.pics_error {
                Some(code) => Err(EngineError::Code(code)),
                None => Ok(()),
            }
        }

        fn enable_maximum_logging(&mut self, _enable: bool) -> Result<(), EngineError> {
            Ok(())
        }

        fn set_call_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError> {
            self.record(format!("set_call_timeout {timeout_ms}"));
            Ok(())
        }

        fn version(&self) -> Result<String, EngineError> {
            Ok("8.0.3".to_owned())
        }

        fn device_address(&self) -> Result<String, EngineError> {
            Ok("001bdcf21c48".to_owned())
        }
    }

    fn service(engine: RecordingEngine) -> EngineService {
        let fatal = FatalFaultHandler::new();
        let (publisher, _) = ChannelPublisher::new();
        let bridge = Arc::new(ImplicitSendBridge::new(
            Arc::new(publisher),
            "user/test",
            BridgeTimings::default(),
            fatal.clone(),
        ));
        let callbacks = CallbackSlot::new();
        let logger = Arc::new(EngineLogger::new(
            callbacks.clone(),
            Handle::current(),
            fatal,
        ));
        let mut config = AutoptsConfig::default_config().engine;
        config.restart_delay = Duration::ZERO;
        EngineService {
            host: Arc::new(Mutex::new(EngineHost::new(Box::new(engine), config))),
            hooks: EngineHooks {
                logger,
                sender: bridge,
            },
            callbacks,
        }
    }

    fn workspace(dir: &Utf8TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, "").unwrap();
        path.into_string()
    }

    #[tokio::test]
    async fn workspace_validation() {
        let dir = Utf8TempDir::new().unwrap();
        let service = service(RecordingEngine::default());

        let missing = dir.path().join("missing.pqw6").into_string();
        let error = service.open_workspace(missing).await.unwrap_err();
        assert_eq!(error.code(), WORKSPACE_ERROR_CODE);
        assert!(error.message().contains("does not exist"), "{error:?}");

        let wrong = workspace(&dir, "zephyr.pqw5");
        let error = service.open_workspace(wrong).await.unwrap_err();
        assert_eq!(error.code(), WORKSPACE_ERROR_CODE);
        assert!(error.message().contains("wrong extension"), "{error:?}");

        // Nothing is cached until a workspace opens.
        assert!(service.get_project_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn project_index_and_active_filter() {
        let dir = Utf8TempDir::new().unwrap();
        let service = service(RecordingEngine::default());
        service
            .open_workspace(workspace(&dir, "zephyr.pqw6"))
            .await
            .unwrap();

        assert_eq!(service.get_project_list().await.unwrap(), vec!["GAP", "SM"]);
        assert_eq!(
            service.get_test_case_list("SM".to_owned()).await.unwrap(),
            vec!["SM/1", "SM/3"]
        );
        let error = service
            .get_test_case_list("L2CAP".to_owned())
            .await
            .unwrap_err();
        assert_eq!(error.code(), UNKNOWN_PROJECT_CODE);
    }

    #[tokio::test]
    async fn engine_error_recovers() {
        let dir = Utf8TempDir::new().unwrap();
        let engine = RecordingEngine {
            fail_run_with: Some(autopts_metadata::ENGINE_E_TESTCASE_TIMEOUT),
            ..Default::default()
        };
        let calls = engine.calls.clone();
        let service = service(engine);
        let ws = workspace(&dir, "zephyr.pqw6");
        service.open_workspace(ws.clone()).await.unwrap();
        service.set_call_timeout(6000).await.unwrap();
        calls.lock().unwrap().clear();

        let result = service
            .run_test_case(ws, "GAP".to_owned(), "GAP/1".to_owned())
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("PTS TIMEOUT"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "run GAP GAP/1",
                "stop_test_case",
                "open zephyr.pqw6",
                "set_call_timeout 6000",
            ]
        );
    }

    #[tokio::test]
    async fn successful_run_returns_none() {
        let dir = Utf8TempDir::new().unwrap();
        let service = service(RecordingEngine::default());
        let ws = workspace(&dir, "zephyr.pqw6");
        service.open_workspace(ws.clone()).await.unwrap();
        let result = service
            .run_test_case(ws, "GAP".to_owned(), "GAP/1".to_owned())
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn not_changed_is_not_an_error() {
        let service = service(RecordingEngine {
            pics_error: Some(ENGINE_E_PICS_ENTRY_NOT_CHANGED),
            ..Default::default()
        });
        service
            .set_pixit("GAP".to_owned(), "TSPX_bd_addr_iut".to_owned(), "x".to_owned())
            .await
            .unwrap();
        service
            .set_pics("GAP".to_owned(), "TSPC_GAP_1_1".to_owned(), true)
            .await
            .unwrap();

        let service = self::service(RecordingEngine {
            pics_error: Some(0x849C_0001),
            ..Default::default()
        });
        let error = service
            .set_pics("GAP".to_owned(), "TSPC_GAP_1_1".to_owned(), true)
            .await
            .unwrap_err();
        assert_eq!(error.code(), ENGINE_ERROR_CODE);
    }

    #[tokio::test]
    async fn serve_until_shutdown() {
        let engine = RecordingEngine::default();
        let starts = engine.starts.clone();
        let calls = engine.calls.clone();

        let mut config = AutoptsConfig::default_config();
        config.server.bind = "127.0.0.1".to_owned();
        config.server.port = 0;
        // No broker: the relay keeps retrying in the background.
        config.implicit_send.broker_host = "127.0.0.1".to_owned();
        config.implicit_send.broker_port = 1;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { serve(&config, Box::new(engine), shutdown).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while starts.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("engine started");

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("serve returned")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(*calls.lock().unwrap(), vec!["stop"]);
    }

    #[tokio::test]
    async fn restart_and_bd_addr_cache() {
        let engine = RecordingEngine::default();
        let starts = engine.starts.clone();
        let calls = engine.calls.clone();
        let service = service(engine);

        // Not running yet: nothing to stop.
        service.restart_engine().await.unwrap();
        service.restart_engine().await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(*calls.lock().unwrap(), vec!["stop"]);

        assert_eq!(service.get_bd_addr().await.unwrap(), "00:1B:DC:F2:1C:48");
        assert_eq!(service.get_version().await.unwrap(), "8.0.3");
    }
}
