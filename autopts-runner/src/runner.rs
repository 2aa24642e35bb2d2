// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test run scheduler.
//!
//! The main structure in this module is [`TestRunner`]. Given a [`CandidateList`] collected from
//! an engine server, it runs each candidate up to `retries + 1` times, stopping at the first
//! pass. Every attempt is recorded in the [`RunLedger`] and reported as it completes.

use crate::{
    client::EngineControl,
    errors::{CommandError, RunError},
    fatal::FatalFaultHandler,
    helpers::{DisplayErrorChain, attempt_log_file_name},
    ledger::RunLedger,
    registry::{RegistryGuard, RunRegistry},
    reporter::{AttemptOutcome, AttemptReporter, ReportWidths},
    stopwatch::stopwatch,
    test_case::{TestCase, TestCatalog, TestStatus},
    test_filter::TestFilter,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{collections::BTreeMap, io::Write, sync::Arc};

/// The test cases selected for a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CandidateList {
    /// Every project in the workspace, including projects with no selected test cases.
    pub projects: Vec<String>,

    /// The selected test cases, in engine order.
    pub test_cases: Vec<String>,
}

impl CandidateList {
    /// Returns true if no test case was selected.
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }
}

/// Enumerates the engine's test cases and keeps those accepted by `filter`.
pub async fn collect_candidates(
    engine: &dyn EngineControl,
    filter: &TestFilter,
) -> Result<CandidateList, CommandError> {
    let projects = engine.project_list().await?;

    let mut test_cases = Vec::new();
    for project in &projects {
        for name in engine.test_case_list(project).await? {
            let filter_match = filter.filter_match(&name);
            if filter_match.is_match() {
                test_cases.push(name);
            } else {
                tracing::trace!(test_case = %name, ?filter_match, "skipping test case");
            }
        }
    }

    tracing::debug!(
        projects = projects.len(),
        test_cases = test_cases.len(),
        "collected candidates"
    );
    Ok(CandidateList {
        projects,
        test_cases,
    })
}

/// Options for a [`TestRunner`].
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// The workspace path, as seen by the engine server.
    pub workspace: String,

    /// The number of times a non-passing test case is re-run.
    pub retries: u32,

    /// Per-attempt logs are written to a timestamped directory under this one.
    pub log_dir: Utf8PathBuf,

    /// The engine call timeout restored after a transport error, in milliseconds.
    pub call_timeout_ms: u32,
}

/// The outcome of a completed run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// The number of test cases that were scheduled.
    pub test_case_count: usize,

    /// The final status of each test case, in the order they ran.
    pub results: IndexMap<String, String>,

    /// The number of test cases at each final status.
    pub status_counts: BTreeMap<String, usize>,

    /// The directory per-attempt logs were written to.
    pub session_log_dir: Utf8PathBuf,
}

impl RunSummary {
    /// Returns true if every scheduled test case passed.
    pub fn all_passed(&self) -> bool {
        self.results
            .values()
            .all(|status| status == TestStatus::Pass.as_str())
    }
}

/// Runs test cases against a single engine server.
pub struct TestRunner<'a> {
    engine: &'a dyn EngineControl,
    catalog: &'a TestCatalog,
    registry: RunRegistry,
    ledger: &'a RunLedger,
    fatal: FatalFaultHandler,
    options: RunOptions,
}

impl<'a> TestRunner<'a> {
    /// Creates a new runner.
    ///
    /// `registry` must be the registry the session's callback listeners dispatch to.
    pub fn new(
        engine: &'a dyn EngineControl,
        catalog: &'a TestCatalog,
        registry: RunRegistry,
        ledger: &'a RunLedger,
        fatal: FatalFaultHandler,
        options: RunOptions,
    ) -> Self {
        Self {
            engine,
            catalog,
            registry,
            ledger,
            fatal,
            options,
        }
    }

    /// Runs every candidate, reporting to `reporter`.
    ///
    /// The run stops early if a fatal fault is reported, with the run so far still recorded in the
    /// ledger.
    pub async fn execute<W: Write>(
        &self,
        candidates: &CandidateList,
        reporter: &mut AttemptReporter<W>,
    ) -> Result<RunSummary, RunError> {
        let session_start = stopwatch().snapshot().start_time;
        let session_log_dir = self
            .options
            .log_dir
            .join(session_start.format("%Y_%m_%d_%H_%M_%S").to_string());
        fs_err::create_dir_all(&session_log_dir).map_err(|error| RunError::LogDirCreate {
            path: session_log_dir.clone(),
            error,
        })?;
        tracing::info!(
            test_cases = candidates.test_cases.len(),
            retries = self.options.retries,
            %session_log_dir,
            "starting run"
        );

        let total = candidates.test_cases.len();
        for (index, name) in candidates.test_cases.iter().enumerate() {
            for retry in 0..=self.options.retries {
                if let Some(fault) = self.fatal.fault() {
                    return Err(RunError::Aborted(fault));
                }

                reporter
                    .report_start(index, total, name)
                    .map_err(RunError::Write)?;

                let start = stopwatch();
                let status = self.run_attempt(name, &session_log_dir).await;
                let duration = start.snapshot().duration;

                self.ledger.update(name, duration, status.as_str())?;
                reporter
                    .report_finish(&AttemptOutcome {
                        status: &status,
                        duration,
                        retry,
                    })
                    .map_err(RunError::Write)?;

                if status.is_pass() {
                    break;
                }
            }
        }

        let status_counts = self.ledger.status_counts()?;
        reporter
            .report_summary(&status_counts, total)
            .map_err(RunError::Write)?;

        Ok(RunSummary {
            test_case_count: total,
            results: self.ledger.results()?,
            status_counts,
            session_log_dir,
        })
    }

    async fn run_attempt(&self, name: &str, session_log_dir: &Utf8Path) -> TestStatus {
        let Some(test_case) = self.catalog.get(name) else {
            return TestStatus::NotImplemented;
        };

        test_case.reset();
        if test_case.status() != TestStatus::Init {
            return TestStatus::NotInitialized;
        }

        let log_path = session_log_dir.join(attempt_log_file_name(name));
        if let Err(error) = test_case.open_log(&log_path) {
            tracing::error!(
                test_case = %name,
                error = %DisplayErrorChain(&error),
                "failed to open attempt log"
            );
            return TestStatus::fatal_error();
        }

        let _scope = AttemptScope::enter(&self.registry, test_case);
        test_case.mark_running();

        let workspace = self.options.workspace.as_str();
        match self
            .engine
            .run_test_case(workspace, test_case.project(), name)
            .await
        {
            Ok(None) => {}
            Ok(Some(code)) => {
                tracing::debug!(test_case = %name, %code, "engine reported an error");
                test_case.set_status(TestStatus::parse(&code));
            }
            Err(error) => {
                tracing::error!(
                    test_case = %name,
                    error = %DisplayErrorChain(&error),
                    "command channel failed, recovering engine"
                );
                test_case.set_status(TestStatus::transport_error());
                self.recover(test_case.project(), name).await;
            }
        }

        test_case.status()
    }

    async fn recover(&self, project: &str, name: &str) {
        if let Err(error) = self.engine.stop_test_case(project, name).await {
            tracing::warn!(
                test_case = %name,
                error = %DisplayErrorChain(&error),
                "failed to stop test case"
            );
        }
        if let Err(error) = self
            .engine
            .recover(&self.options.workspace, self.options.call_timeout_ms)
            .await
        {
            tracing::warn!(error = %DisplayErrorChain(&error), "failed to recover engine");
        }
    }
}

/// Holds a test case registered for the duration of an attempt.
///
/// On drop, the attempt log is closed and the test case is deregistered, in that order.
struct AttemptScope {
    test_case: Arc<TestCase>,
    _registration: RegistryGuard,
}

impl AttemptScope {
    fn enter(registry: &RunRegistry, test_case: &Arc<TestCase>) -> Self {
        Self {
            test_case: test_case.clone(),
            _registration: registry.register(test_case.clone()),
        }
    }
}

impl Drop for AttemptScope {
    fn drop(&mut self) {
        self.test_case.finish();
    }
}
