// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives one or more conformance test engine servers.
//!
//! `autopts run` initializes a session with every server, selects test cases from the workspace
//! and runs them on the first server, retrying failures. `autopts list` prints the selection
//! without running anything.
//!
//! The core logic lives in [`autopts_runner`]: this crate only parses the command line and wires
//! the pieces together.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputContext;
