// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `autopts` failures.
///
/// Test failures do not change the exit code: a run that completes always
/// exits with [`OK`](Self::OK) after printing its summary. The codes below
/// cover failures of autopts itself.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum AutoptsExitCode {}

impl AutoptsExitCode {
    /// No errors occurred and autopts exited normally.
    pub const OK: i32 = 0;

    /// No test cases were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// An engine server did not finish initialization in time.
    pub const SERVER_INIT_FAILED: i32 = 97;

    /// A user issue happened while setting up an autopts invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Listing projects or test cases from the engine produced an error.
    pub const TEST_LIST_CREATION_FAILED: i32 = 104;

    /// The run statistics ledger could not be read or written.
    pub const LEDGER_ERROR: i32 = 105;

    /// An unrecoverable fault was reported while the run was in progress.
    pub const RUN_ABORTED: i32 = 106;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
