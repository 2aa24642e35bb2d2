// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client-side test case handles.
//!
//! A [`TestCase`] is created once per catalog entry and reused across attempts. Before each
//! attempt it is reset; while the attempt runs it is registered in the
//! [`RunRegistry`](crate::registry::RunRegistry), receives the engine's log lines, and picks up
//! the final verdict from them.

use crate::{callback::LogLine, errors::AttemptLogError};
use autopts_metadata::{FATAL_ERROR, LogType, TRANSPORT_ERROR};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{
    fmt,
    io::{BufWriter, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

pub use crate::helpers::project_of;

/// The status of a test case.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TestStatus {
    /// Reset and ready to run.
    Init,

    /// An attempt is in progress.
    Running,

    /// The engine reported a passing verdict.
    Pass,

    /// The engine reported a failing verdict.
    Fail,

    /// The engine reported an inconclusive verdict.
    Inconclusive,

    /// No handle exists for the test case.
    NotImplemented,

    /// The handle was not in its initial state when the attempt started.
    NotInitialized,

    /// Any other status: engine error codes, transport errors, or an unrecognized verdict.
    Other(String),
}

impl TestStatus {
    /// The status recorded when the command channel failed at the RPC layer.
    pub fn transport_error() -> Self {
        Self::Other(TRANSPORT_ERROR.to_owned())
    }

    /// The status recorded when an attempt failed for any other reason.
    pub fn fatal_error() -> Self {
        Self::Other(FATAL_ERROR.to_owned())
    }

    /// Parses a status from its display form.
    pub fn parse(s: &str) -> Self {
        match s {
            "init" => Self::Init,
            "RUNNING" => Self::Running,
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            "INCONC" => Self::Inconclusive,
            "NOT_IMPLEMENTED" => Self::NotImplemented,
            "NOT_INITIALIZED" => Self::NotInitialized,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the display form of this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Running => "RUNNING",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Inconclusive => "INCONC",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Other(s) => s,
        }
    }

    /// Returns true if this is a passing status.
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution state of a test case.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestState {
    /// Not running.
    Idle,

    /// An attempt is in progress.
    Running,

    /// The attempt has returned and is being cleaned up.
    Finishing,
}

/// A handle to a test case.
#[derive(Debug)]
pub struct TestCase {
    name: String,
    project: String,
    inner: Mutex<TestCaseInner>,
}

#[derive(Debug)]
struct TestCaseInner {
    status: TestStatus,
    state: TestState,
    log: Option<AttemptLog>,
}

#[derive(Debug)]
struct AttemptLog {
    path: Utf8PathBuf,
    writer: BufWriter<fs_err::File>,
}

impl TestCase {
    /// Creates a new handle for a qualified `<project>/<case>` name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let project = project_of(&name).to_owned();
        Self {
            name,
            project,
            inner: Mutex::new(TestCaseInner {
                status: TestStatus::Init,
                state: TestState::Idle,
                log: None,
            }),
        }
    }

    /// Returns the qualified name of this test case.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the project this test case belongs to.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Returns the current status.
    pub fn status(&self) -> TestStatus {
        self.lock().status.clone()
    }

    /// Returns the current execution state.
    pub fn state(&self) -> TestState {
        self.lock().state
    }

    /// Resets the test case before an attempt.
    ///
    /// A test case that is currently running is left untouched, so that its status is not
    /// [`TestStatus::Init`] afterwards.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state == TestState::Running {
            tracing::warn!(test_case = %self.name, "not resetting running test case");
            return;
        }
        inner.status = TestStatus::Init;
        inner.state = TestState::Idle;
    }

    /// Marks the start of an attempt.
    pub fn mark_running(&self) {
        let mut inner = self.lock();
        inner.status = TestStatus::Running;
        inner.state = TestState::Running;
    }

    /// Marks the end of an attempt and closes its log.
    pub fn finish(&self) {
        let mut inner = self.lock();
        inner.state = TestState::Finishing;
        Self::close_log_impl(&self.name, &mut inner);
    }

    /// Overrides the status, for outcomes not reported through a verdict.
    pub fn set_status(&self, status: TestStatus) {
        self.lock().status = status;
    }

    /// Opens the log for the upcoming attempt, creating or truncating `path`.
    pub fn open_log(&self, path: &Utf8Path) -> Result<(), AttemptLogError> {
        let file = fs_err::File::create(path.as_std_path())
            .map_err(|error| AttemptLogError::new(path, error))?;
        let mut inner = self.lock();
        Self::close_log_impl(&self.name, &mut inner);
        inner.log = Some(AttemptLog {
            path: path.to_owned(),
            writer: BufWriter::new(file),
        });
        Ok(())
    }

    /// Flushes and closes the attempt log, if one is open.
    pub fn close_log(&self) {
        let mut inner = self.lock();
        Self::close_log_impl(&self.name, &mut inner);
    }

    fn close_log_impl(name: &str, inner: &mut TestCaseInner) {
        if let Some(mut log) = inner.log.take() {
            if let Err(error) = log.writer.flush() {
                tracing::warn!(test_case = %name, path = %log.path, %error, "failed to flush attempt log");
            }
        }
    }

    /// Handles a log line routed to this test case.
    ///
    /// The line is appended to the attempt log. A final verdict sets the status.
    pub fn on_log(&self, line: &LogLine) -> Result<(), AttemptLogError> {
        let mut inner = self.lock();

        if let Some(log) = &mut inner.log {
            writeln!(
                log.writer,
                "{} {} {}",
                line.timestamp, line.kind_label, line.message
            )
            .map_err(|error| AttemptLogError::new(&log.path, error))?;
        }

        if LogType::from_raw(line.kind) == Some(LogType::FinalVerdict) {
            if let Some(verdict) = parse_verdict(&line.message) {
                tracing::debug!(test_case = %self.name, %verdict, "final verdict");
                inner.status = verdict;
            }
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, TestCaseInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Extracts the verdict from a final-verdict message of the form `...: <VERDICT>`.
fn parse_verdict(message: &str) -> Option<TestStatus> {
    let tail = message.rsplit_once(':').map_or(message, |(_, tail)| tail);
    let verdict = tail.split_whitespace().next()?;
    Some(TestStatus::parse(&verdict.to_uppercase()))
}

/// The locally held set of test case handles.
///
/// Test cases without a handle are reported as [`TestStatus::NotImplemented`] without contacting
/// the engine.
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    test_cases: IndexMap<String, Arc<TestCase>>,
}

impl TestCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with a handle for each name.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::new();
        for name in names {
            catalog.insert(TestCase::new(name));
        }
        catalog
    }

    /// Adds a handle to the catalog, replacing any handle with the same name.
    pub fn insert(&mut self, test_case: TestCase) {
        self.test_cases
            .insert(test_case.name().to_owned(), Arc::new(test_case));
    }

    /// Looks up a handle by name.
    pub fn get(&self, name: &str) -> Option<&Arc<TestCase>> {
        self.test_cases.get(name)
    }

    /// Returns the number of handles in the catalog.
    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    /// Returns true if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }
}
