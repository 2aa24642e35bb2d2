// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use autopts_metadata::LogType;
use autopts_runner::{
    bridge::{BridgeTimings, ImplicitSendBridge},
    config::AutoptsConfig,
    engine::{Engine, EngineHooks},
    errors::EngineError,
    fatal::FatalFaultHandler,
    pubsub::ChannelPublisher,
    server::{EngineServer, EngineServerOptions, RunningServer},
    session::{ServerTarget, SessionOptions},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

/// What the engine does when a test case runs.
#[derive(Clone, Debug)]
pub enum Step {
    /// Report a final verdict.
    Verdict(&'static str),

    /// Ask an implicit-send question, then report a final verdict.
    AskThenVerdict { wid: u16, verdict: &'static str },

    /// Fail with an engine error code.
    Code(u32),
}

/// Shared view of what a [`ScriptedEngine`] did.
#[derive(Clone, Debug, Default)]
pub struct EngineRecord {
    calls: Arc<Mutex<Vec<String>>>,
    answers: Arc<Mutex<Vec<[String; 3]>>>,
}

impl EngineRecord {
    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn answers(&self) -> Vec<[String; 3]> {
        self.answers.lock().unwrap().clone()
    }
}

/// An engine that follows a script, calling its hooks the way the real engine does.
pub struct ScriptedEngine {
    hooks: Option<EngineHooks>,
    running: bool,
    projects: Vec<(String, Vec<String>)>,
    script: HashMap<String, VecDeque<Step>>,
    record: EngineRecord,
}

impl ScriptedEngine {
    pub fn new(projects: &[(&str, &[&str])]) -> Self {
        Self {
            hooks: None,
            running: false,
            projects: projects
                .iter()
                .map(|(project, names)| {
                    (
                        project.to_string(),
                        names.iter().map(|name| name.to_string()).collect(),
                    )
                })
                .collect(),
            script: HashMap::new(),
            record: EngineRecord::default(),
        }
    }

    pub fn script(mut self, test_case: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script
            .entry(test_case.to_owned())
            .or_default()
            .extend(steps);
        self
    }

    pub fn record(&self) -> EngineRecord {
        self.record.clone()
    }

    fn log(&self, kind: LogType, message: &str) {
        if let Some(hooks) = &self.hooks {
            hooks
                .logger
                .log(kind.as_raw(), kind.as_str(), "00:00:00.000", message);
        }
    }
}

impl Engine for ScriptedEngine {
    fn start(&mut self, hooks: EngineHooks) -> Result<(), EngineError> {
        self.record.push("start".to_owned());
        self.hooks = Some(hooks);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.record.push("stop".to_owned());
        self.hooks = None;
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn open_workspace(&mut self, path: &Utf8Path) -> Result<(), EngineError> {
        self.record
            .push(format!("open_workspace {}", path.file_name().unwrap_or_default()));
        Ok(())
    }

    fn project_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.projects.iter().map(|(p, _)| p.clone()).collect())
    }

    fn test_case_names(&self, project: &str) -> Result<Vec<String>, EngineError> {
        Ok(self
            .projects
            .iter()
            .find(|(p, _)| p == project)
            .map(|(_, names)| names.clone())
            .unwrap_or_default())
    }

    fn is_active_test_case(&self, _project: &str, _test_case: &str) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn run_test_case(&mut self, project: &str, test_case: &str) -> Result<(), EngineError> {
        self.record.push(format!("run {test_case}"));
        let step = self
            .script
            .get_mut(test_case)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Verdict("INCONC"));

        self.log(LogType::StartTest, "Test case started");
        // Not forwarded unless maximum logging is enabled.
        self.log(LogType::Message, "some chatter");
        let verdict = match step {
            Step::Verdict(verdict) => verdict,
            Step::AskThenVerdict { wid, verdict } => {
                let hooks = self.hooks.as_ref().expect("engine is started");
                let reply = hooks.sender.on_implicit_send(
                    &format!(" {project} "),
                    wid,
                    test_case,
                    "Please confirm",
                    0x11141,
                );
                self.record.answers.lock().unwrap().push(reply.into_array());
                verdict
            }
            Step::Code(code) => return Err(EngineError::Code(code)),
        };
        self.log(LogType::FinalVerdict, &format!("Final Verdict: {verdict}"));
        self.log(LogType::EndTest, "Test case ended");
        Ok(())
    }

    fn stop_test_case(&mut self) -> Result<(), EngineError> {
        self.record.push("stop_test_case".to_owned());
        Ok(())
    }

    fn update_pixit(&mut self, project: &str, name: &str, value: &str) -> Result<(), EngineError> {
        self.record.push(format!("pixit {project} {name} {value}"));
        Ok(())
    }

    fn update_pics(&mut self, project: &str, name: &str, value: bool) -> Result<(), EngineError> {
        self.record.push(format!("pics {project} {name} {value}"));
        Ok(())
    }

    fn enable_maximum_logging(&mut self, enable: bool) -> Result<(), EngineError> {
        self.record.push(format!("max_logging {enable}"));
        Ok(())
    }

    fn set_call_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError> {
        self.record.push(format!("set_call_timeout {timeout_ms}"));
        Ok(())
    }

    fn version(&self) -> Result<String, EngineError> {
        Ok("8.5.0".to_owned())
    }

    fn device_address(&self) -> Result<String, EngineError> {
        Ok("001bdcf21c48".to_owned())
    }
}

/// How the implicit-send counterpart behaves.
pub enum Responder {
    /// Answers every question with the given status.
    Answer(&'static str),

    /// Never answers.
    Silent,

    /// Gone: every publish fails.
    Disconnected,
}

/// A loopback engine server plus the workspace it serves.
pub struct Loopback {
    pub dir: Utf8TempDir,
    pub workspace: Utf8PathBuf,
    pub server: RunningServer,
    pub server_fatal: FatalFaultHandler,
    pub requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl Loopback {
    pub async fn start(
        engine: ScriptedEngine,
        responder: Responder,
        timings: BridgeTimings,
    ) -> Self {
        let dir = Utf8TempDir::new().unwrap();
        let workspace = dir.path().join("zephyr.pqw6");
        std::fs::write(&workspace, "").unwrap();

        let server_fatal = FatalFaultHandler::new();
        let (publisher, receiver) = ChannelPublisher::new();
        let bridge = Arc::new(ImplicitSendBridge::new(
            Arc::new(publisher),
            "user/test",
            timings,
            server_fatal.clone(),
        ));

        let requests = Arc::new(Mutex::new(Vec::new()));
        if matches!(responder, Responder::Disconnected) {
            drop(receiver);
        } else {
            let bridge = bridge.clone();
            let requests = requests.clone();
            std::thread::spawn(move || {
                for (topic, payload) in receiver {
                    assert_eq!(topic, "user/test");
                    requests
                        .lock()
                        .unwrap()
                        .push(serde_json::from_slice(&payload).unwrap());
                    if let Responder::Answer(status) = &responder {
                        let response = serde_json::json!({ "parameters": { "status": status } });
                        bridge.deliver_response(response.to_string().as_bytes());
                    }
                }
            });
        }

        let mut config = AutoptsConfig::default_config();
        config.server.bind = "127.0.0.1".to_owned();
        config.server.port = 0;
        config.engine.restart_delay = Duration::ZERO;
        let server = EngineServer::start(
            Box::new(engine),
            EngineServerOptions::from_config(&config),
            bridge,
            server_fatal.clone(),
        )
        .await
        .unwrap();

        Self {
            dir,
            workspace,
            server,
            server_fatal,
            requests,
        }
    }

    pub fn target(&self) -> ServerTarget {
        ServerTarget {
            address: "127.0.0.1".to_owned(),
            port: self.server.local_addr().port(),
            local_address: Some("127.0.0.1".to_owned()),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let config = AutoptsConfig::default_config();
        let mut options =
            SessionOptions::new(self.workspace.as_str(), 60_000, &config.client);
        options.callback_port = 0;
        options.init_timeout = Duration::from_secs(30);
        options.rpc_timeout = Duration::from_secs(30);
        options
    }

    pub fn log_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("logs")
    }
}
