// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Shared vocabulary for autopts.
//!
//! Types in this crate are used on both sides of the wire: by the engine
//! server that embeds the test engine and by the client that drives it. They
//! are kept free of transport details so that either side can be rebuilt
//! without the other.

mod engine_codes;
mod exit_codes;
mod implicit_send;
mod log_type;

pub use engine_codes::*;
pub use exit_codes::*;
pub use implicit_send::*;
pub use log_type::*;
