// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for autopts.
//!
//! autopts drives a stateful conformance test engine through a split
//! client/server architecture:
//!
//! * The [server](server) embeds the [`Engine`](engine::Engine) and exposes it
//!   over the command channel ([`rpc`]).
//! * The client establishes a [session](session) per server, which includes a
//!   [callback listener](callback) for the engine's log events.
//! * The [runner](runner) selects test cases, drives retries, and records the
//!   outcome of each attempt in the [ledger](ledger).
//! * While a test case runs, the engine may ask the outside world a question.
//!   The [implicit-send bridge](bridge) relays it over [pub/sub](pubsub) and
//!   blocks until an answer arrives or the wait times out.

pub mod bridge;
pub mod callback;
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fatal;
mod helpers;
pub mod ledger;
pub mod pubsub;
pub mod registry;
pub mod reporter;
pub mod rpc;
pub mod runner;
pub mod server;
pub mod session;
mod stopwatch;
pub mod test_case;
pub mod test_filter;
