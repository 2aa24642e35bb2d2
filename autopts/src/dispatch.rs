// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, clap_styles},
};
use autopts_metadata::AutoptsExitCode;
use autopts_runner::{
    client::EngineControl,
    config::AutoptsConfig,
    fatal::FatalFaultHandler,
    ledger::RunLedger,
    registry::RunRegistry,
    reporter::{AttemptReporter, ReportWidths},
    runner::{CandidateList, RunOptions, TestRunner, collect_candidates},
    session::{ServerSession, ServerTarget, SessionOptions, init_all},
    test_case::{TestCatalog, project_of},
    test_filter::{TestFilter, TestFilterBuilder},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::io::Write;

/// Runs conformance test cases on one or more engine servers.
#[derive(Debug, Parser)]
#[command(version, name = "autopts", styles = clap_styles::style())]
pub struct AutoptsApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl AutoptsApp {
    /// Initializes logging and color settings. Must be called before [`Self::exec`].
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, writing regular output to `stdout`.
    ///
    /// Returns the process exit code.
    pub fn exec(self, output: OutputContext, stdout: &mut dyn Write) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeBuildError { err })?;

        match self.command {
            Command::List { servers, filter } => {
                runtime.block_on(exec_list(&config, &servers, &filter, stdout))
            }
            Command::Run {
                servers,
                filter,
                runner_opts,
            } => runtime.block_on(exec_run(
                &config,
                &servers,
                &filter,
                &runner_opts,
                output,
                stdout,
            )),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/autopts.toml]
    #[arg(long, global = true, value_name = "PATH", env = "AUTOPTS_CONFIG_FILE")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<AutoptsConfig> {
        Ok(AutoptsConfig::from_sources(
            Utf8Path::new("."),
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the test cases that would run
    ///
    /// This initializes a session with the first server, opens the workspace and prints the
    /// selected test cases grouped by project.
    List {
        #[clap(flatten)]
        servers: ServerOpts,

        #[clap(flatten)]
        filter: FilterOpts,
    },

    /// Run test cases
    ///
    /// Every server is initialized; test cases run on the first one. Each test case that does not
    /// pass is retried up to --retry times.
    Run {
        #[clap(flatten)]
        servers: ServerOpts,

        #[clap(flatten)]
        filter: FilterOpts,

        #[clap(flatten)]
        runner_opts: RunnerOpts,
    },
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Server options")]
struct ServerOpts {
    /// Path to the workspace file, as seen by the servers
    #[arg(value_name = "WORKSPACE")]
    workspace: String,

    /// Addresses of the engine servers
    #[arg(
        short = 'i',
        long = "ip-addr",
        value_name = "ADDR",
        required = true,
        num_args = 1..,
        value_delimiter = ',',
        env = "AUTOPTS_SERVERS"
    )]
    servers: Vec<String>,

    /// Local addresses advertised to each server for callbacks [default: autodetect]
    #[arg(short = 'l', long = "local-addr", value_name = "ADDR", num_args = 1..)]
    local_addrs: Vec<String>,

    /// Device address of the implementation under test, written to every project
    #[arg(short = 'a', long, value_name = "BD_ADDR", env = "AUTOPTS_BD_ADDR")]
    bd_addr: Option<String>,

    /// Enable the engine's maximum logging
    #[arg(short = 'd', long = "debug-logs")]
    max_logging: bool,
}

impl ServerOpts {
    fn targets(&self, port: u16) -> Result<Vec<ServerTarget>> {
        if !self.local_addrs.is_empty() && self.local_addrs.len() != self.servers.len() {
            return Err(ExpectedError::LocalAddressMismatch {
                servers: self.servers.len(),
                local: self.local_addrs.len(),
            });
        }

        Ok(self
            .servers
            .iter()
            .enumerate()
            .map(|(index, address)| ServerTarget {
                address: address.clone(),
                port,
                local_address: self.local_addrs.get(index).cloned(),
            })
            .collect())
    }

    fn session_options(&self, config: &AutoptsConfig) -> SessionOptions {
        let mut options = SessionOptions::new(
            self.workspace.clone(),
            config.engine.call_timeout_ms(),
            &config.client,
        );
        options.enable_max_logging = self.max_logging;
        options.bd_addr_override = self.bd_addr.clone();
        options
    }

    async fn init_sessions(
        &self,
        config: &AutoptsConfig,
        count: usize,
        registry: &RunRegistry,
        fatal: &FatalFaultHandler,
    ) -> Result<Vec<ServerSession>> {
        let targets = self.targets(config.server.port)?;
        let targets = &targets[..count.min(targets.len())];
        let sessions = init_all(targets, &self.session_options(config), registry, fatal).await?;
        for session in &sessions {
            tracing::info!(
                server = %session.engine().server(),
                version = %session.version(),
                bd_addr = %session.bd_addr(),
                callback_addr = %session.callback_addr(),
                "server ready"
            );
        }
        Ok(sessions)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Filter options")]
struct FilterOpts {
    /// Run only test cases whose names start with one of these prefixes
    #[arg(short = 'c', long = "test-cases", value_name = "PREFIX", num_args = 1..)]
    include: Vec<String>,

    /// Skip test cases whose names start with one of these prefixes
    #[arg(short = 'e', long = "excluded", value_name = "PREFIX", num_args = 1..)]
    exclude: Vec<String>,
}

impl FilterOpts {
    fn build(&self) -> Result<TestFilter> {
        Ok(TestFilterBuilder::new(self.include.clone(), self.exclude.clone()).build()?)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Number of times a test case that does not pass is retried [default: from config]
    #[arg(short = 'r', long = "retry", value_name = "N", env = "AUTOPTS_RETRY")]
    retries: Option<u32>,

    /// Directory per-attempt logs are written under [default: from config]
    #[arg(long, value_name = "DIR", env = "AUTOPTS_LOG_DIR")]
    log_dir: Option<Utf8PathBuf>,

    /// Write run statistics to this file instead of a temporary file
    #[arg(long, value_name = "PATH", env = "AUTOPTS_LEDGER_PATH")]
    ledger_path: Option<Utf8PathBuf>,
}

async fn exec_list(
    config: &AutoptsConfig,
    servers: &ServerOpts,
    filter: &FilterOpts,
    stdout: &mut dyn Write,
) -> Result<i32> {
    let filter = filter.build()?;
    let registry = RunRegistry::new();
    let sessions = servers
        .init_sessions(config, 1, &registry, &FatalFaultHandler::new())
        .await?;

    let result = list_candidates(&sessions[0], &filter, stdout).await;
    close_sessions(sessions).await;
    result
}

async fn list_candidates(
    session: &ServerSession,
    filter: &TestFilter,
    stdout: &mut dyn Write,
) -> Result<i32> {
    let candidates = collect_candidates(session.engine(), filter)
        .await
        .map_err(|err| ExpectedError::CreateTestListError { err })?;
    write_candidates(&candidates, stdout).map_err(|err| ExpectedError::WriteError { err })?;
    Ok(AutoptsExitCode::OK)
}

fn write_candidates(candidates: &CandidateList, stdout: &mut dyn Write) -> std::io::Result<()> {
    for project in &candidates.projects {
        let mut names = candidates
            .test_cases
            .iter()
            .filter(|name| project_of(name) == project.as_str())
            .peekable();
        if names.peek().is_none() {
            continue;
        }
        writeln!(stdout, "{project}:")?;
        for name in names {
            writeln!(stdout, "    {name}")?;
        }
    }
    stdout.flush()
}

async fn exec_run(
    config: &AutoptsConfig,
    servers: &ServerOpts,
    filter: &FilterOpts,
    runner_opts: &RunnerOpts,
    output: OutputContext,
    stdout: &mut dyn Write,
) -> Result<i32> {
    let filter = filter.build()?;
    let registry = RunRegistry::new();
    let fatal = FatalFaultHandler::new();
    let sessions = servers
        .init_sessions(config, usize::MAX, &registry, &fatal)
        .await?;

    let result = run_on(
        &sessions[0],
        config,
        servers,
        &filter,
        runner_opts,
        RunContext {
            registry,
            fatal,
            output,
        },
        stdout,
    )
    .await;
    close_sessions(sessions).await;
    result
}

struct RunContext {
    registry: RunRegistry,
    fatal: FatalFaultHandler,
    output: OutputContext,
}

async fn run_on(
    session: &ServerSession,
    config: &AutoptsConfig,
    servers: &ServerOpts,
    filter: &TestFilter,
    runner_opts: &RunnerOpts,
    cx: RunContext,
    stdout: &mut dyn Write,
) -> Result<i32> {
    let candidates = collect_candidates(session.engine(), filter)
        .await
        .map_err(|err| ExpectedError::CreateTestListError { err })?;
    if candidates.is_empty() {
        return Err(ExpectedError::NoTestsRun);
    }

    let ledger = match runner_opts
        .ledger_path
        .as_ref()
        .or(config.run.ledger_path.as_ref())
    {
        Some(path) => RunLedger::create(path.clone())?,
        None => RunLedger::create_temp()?,
    };
    tracing::info!(path = %ledger.path(), "recording run statistics");

    let retries = runner_opts.retries.unwrap_or(config.run.retries);
    let catalog = TestCatalog::from_names(candidates.test_cases.iter().cloned());
    let widths = ReportWidths::new(&candidates.projects, &candidates.test_cases, retries);
    let mut reporter = AttemptReporter::new(stdout, widths);
    if cx.output.color.should_colorize(supports_color::Stream::Stdout) {
        reporter.colorize();
    }

    let runner = TestRunner::new(
        session.engine(),
        &catalog,
        cx.registry,
        &ledger,
        cx.fatal,
        RunOptions {
            workspace: servers.workspace.clone(),
            retries,
            log_dir: runner_opts
                .log_dir
                .clone()
                .unwrap_or_else(|| config.run.log_dir.clone()),
            call_timeout_ms: config.engine.call_timeout_ms(),
        },
    );
    let summary = runner.execute(&candidates, &mut reporter).await?;

    tracing::info!(
        test_cases = summary.test_case_count,
        logs = %summary.session_log_dir,
        ledger = %ledger.path(),
        "run complete"
    );
    Ok(AutoptsExitCode::OK)
}

async fn close_sessions(sessions: Vec<ServerSession>) {
    for session in sessions {
        session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn app_is_well_formed() {
        AutoptsApp::command().debug_assert();
    }

    fn parse(args: &[&str]) -> AutoptsApp {
        AutoptsApp::try_parse_from(std::iter::once("autopts").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn run_options() {
        let app = parse(&[
            "run",
            "C:\\ws\\zephyr.pqw6",
            "-i",
            "192.168.0.2",
            "192.168.0.3",
            "-c",
            "GAP",
            "SM/MAS",
            "-e",
            "GAP/CONN",
            "-r",
            "2",
            "-d",
            "-a",
            "AA:BB:CC:DD:EE:FF",
        ]);
        let Command::Run {
            servers,
            filter,
            runner_opts,
        } = app.command
        else {
            panic!("expected run command");
        };
        assert_eq!(servers.workspace, "C:\\ws\\zephyr.pqw6");
        assert_eq!(servers.servers, ["192.168.0.2", "192.168.0.3"]);
        assert!(servers.max_logging);
        assert_eq!(servers.bd_addr.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(filter.include, ["GAP", "SM/MAS"]);
        assert_eq!(filter.exclude, ["GAP/CONN"]);
        assert_eq!(runner_opts.retries, Some(2));
    }

    #[test_case(&["list", "ws.pqw6"]; "missing servers")]
    #[test_case(&["run", "-i", "10.0.0.1"]; "missing workspace")]
    #[test_case(&["run", "ws.pqw6", "-i", "10.0.0.1", "-r", "-1"]; "negative retry")]
    fn rejected_arguments(args: &[&str]) {
        let result =
            AutoptsApp::try_parse_from(std::iter::once("autopts").chain(args.iter().copied()));
        assert!(result.is_err(), "{args:?} should be rejected");
    }

    #[test]
    fn targets_pair_local_addresses() {
        let app = parse(&[
            "list", "ws.pqw6", "-i", "10.0.0.1", "10.0.0.2", "-l", "10.0.0.9", "10.0.0.8",
        ]);
        let Command::List { servers, .. } = app.command else {
            panic!("expected list command");
        };
        let targets = servers.targets(65000).unwrap();
        assert_eq!(
            targets,
            [
                ServerTarget {
                    address: "10.0.0.1".to_owned(),
                    port: 65000,
                    local_address: Some("10.0.0.9".to_owned()),
                },
                ServerTarget {
                    address: "10.0.0.2".to_owned(),
                    port: 65000,
                    local_address: Some("10.0.0.8".to_owned()),
                },
            ]
        );
    }

    #[test]
    fn targets_reject_partial_local_addresses() {
        let app = parse(&["list", "ws.pqw6", "-i", "10.0.0.1", "10.0.0.2", "-l", "10.0.0.9"]);
        let Command::List { servers, .. } = app.command else {
            panic!("expected list command");
        };
        let error = servers.targets(65000).unwrap_err();
        assert!(
            matches!(
                error,
                ExpectedError::LocalAddressMismatch {
                    servers: 2,
                    local: 1
                }
            ),
            "{error:?}"
        );
    }

    #[test]
    fn candidates_grouped_by_project() {
        let candidates = CandidateList {
            projects: vec!["GAP".to_owned(), "L2CAP".to_owned(), "SM".to_owned()],
            test_cases: vec![
                "GAP/CONN/BV-01-C".to_owned(),
                "GAP/CONN/BV-02-C".to_owned(),
                "SM/MAS/PROT/BV-01-C".to_owned(),
            ],
        };
        let mut out = Vec::new();
        write_candidates(&candidates, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "GAP:\n    GAP/CONN/BV-01-C\n    GAP/CONN/BV-02-C\nSM:\n    SM/MAS/PROT/BV-01-C\n"
        );
    }

    #[test]
    fn bare_names_are_their_own_project() {
        let candidates = CandidateList {
            projects: vec!["GAP".to_owned(), "GAPX".to_owned()],
            test_cases: vec!["GAPX".to_owned(), "GAP/1".to_owned()],
        };
        let mut out = Vec::new();
        write_candidates(&candidates, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "GAP:\n    GAP/1\nGAPX:\n    GAPX\n"
        );
    }
}
