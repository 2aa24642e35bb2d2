// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use autopts_metadata::AutoptsExitCode;
use autopts_runner::errors::{
    CommandError, ConfigParseError, LedgerError, RunError, SessionInitError,
    TestFilterBuilderError,
};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are printed with display_to_stderr, which
// colorizes them.

/// An error that autopts reports to the user and exits on.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("test filter build error")]
    TestFilterBuilderError {
        #[from]
        err: TestFilterBuilderError,
    },
    #[error("mismatched local addresses")]
    LocalAddressMismatch { servers: usize, local: usize },
    #[error("failed to build async runtime")]
    RuntimeBuildError {
        #[source]
        err: std::io::Error,
    },
    #[error("session init error")]
    SessionInitError {
        #[from]
        err: SessionInitError,
    },
    #[error("error creating test list")]
    CreateTestListError {
        #[source]
        err: CommandError,
    },
    #[error("no test cases to run")]
    NoTestsRun,
    #[error("ledger error")]
    LedgerError {
        #[from]
        err: LedgerError,
    },
    #[error("test run failed")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("error writing output")]
    WriteError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. }
            | Self::TestFilterBuilderError { .. }
            | Self::LocalAddressMismatch { .. }
            | Self::RuntimeBuildError { .. } => AutoptsExitCode::SETUP_ERROR,
            Self::SessionInitError { .. } => AutoptsExitCode::SERVER_INIT_FAILED,
            Self::CreateTestListError { .. } => AutoptsExitCode::TEST_LIST_CREATION_FAILED,
            Self::NoTestsRun => AutoptsExitCode::NO_TESTS_RUN,
            Self::LedgerError { .. } => AutoptsExitCode::LEDGER_ERROR,
            Self::RunError { err } => match err {
                RunError::LogDirCreate { .. } => AutoptsExitCode::SETUP_ERROR,
                RunError::Ledger(_) => AutoptsExitCode::LEDGER_ERROR,
                RunError::Aborted(_) => AutoptsExitCode::RUN_ABORTED,
                RunError::Write(_) => AutoptsExitCode::WRITE_OUTPUT_ERROR,
            },
            Self::WriteError { .. } => AutoptsExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::ConfigParseError { err } => {
                tracing::error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::TestFilterBuilderError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::LocalAddressMismatch { servers, local } => {
                tracing::error!(
                    "{} local addresses given for {} servers: pass one per server, or none",
                    local.style(styles.bold),
                    servers.style(styles.bold),
                );
                None
            }
            Self::RuntimeBuildError { err } => {
                tracing::error!("failed to build async runtime");
                Some(err as &dyn Error)
            }
            Self::SessionInitError { err } => {
                tracing::error!(
                    "failed to initialize server `{}`",
                    err.server().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::CreateTestListError { err } => {
                tracing::error!(
                    "failed to list test cases on server `{}`",
                    err.server().style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::NoTestsRun => {
                tracing::error!("no test cases matched the given filters");
                None
            }
            Self::LedgerError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::RunError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::WriteError { err } => {
                tracing::error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
