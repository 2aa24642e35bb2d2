// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The implicit-send bridge.
//!
//! While a test case runs, the engine may ask the outside world a question. From the engine's
//! perspective this is a single blocking call that must return a string. The bridge turns that
//! call into a request published on a pub/sub topic, then blocks the engine's thread until a
//! correlated response is [delivered](ImplicitSendBridge::deliver_response) or the wait times
//! out.
//!
//! The engine issues implicit sends serially, so at most one exchange is outstanding per bridge.
//! Responses are stored in a single slot and the last write wins.

use crate::{
    config::ImplicitSendConfig,
    errors::FatalFault,
    fatal::FatalFaultHandler,
    helpers::strip_whitespace,
    pubsub::Publisher,
};
use autopts_metadata::{
    ImplicitSendParameters, ImplicitSendRequest, ImplicitSendResponse, mmi_style_name,
};
use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// The answer synthesized when no response arrives in time.
pub const CANCEL_RESPONSE: &str = "Cancel";

/// The reply returned to the engine: the triple its calling convention expects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImplicitSendReply {
    /// The response text.
    pub response: String,

    /// The length of the response text, as a decimal string.
    pub length: String,

    /// `"1"` if a response occupies the slot, `"0"` otherwise.
    pub present: String,
}

impl ImplicitSendReply {
    fn from_slot(slot: Option<&str>) -> Self {
        // A synthesized "Cancel" occupies the slot too, so it is reported as present.
        let present = if slot.is_some_and(|s| !s.is_empty()) {
            "1"
        } else {
            "0"
        };
        let response = slot.unwrap_or("None").to_owned();
        Self {
            length: response.len().to_string(),
            response,
            present: present.to_owned(),
        }
    }

    /// Returns the reply as an array, in the order the engine expects.
    pub fn into_array(self) -> [String; 3] {
        [self.response, self.length, self.present]
    }
}

/// Timings for the bridge's wait loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BridgeTimings {
    /// How long to wait for a response before synthesizing [`CANCEL_RESPONSE`].
    pub timeout: Duration,

    /// The slot is rechecked at least this often.
    pub poll_interval: Duration,
}

impl Default for BridgeTimings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Relays implicit sends from the engine to pub/sub and back.
pub struct ImplicitSendBridge {
    publisher: Arc<dyn Publisher>,
    request_topic: String,
    timings: BridgeTimings,
    slot: Mutex<Option<String>>,
    arrived: Condvar,
    fatal: FatalFaultHandler,
}

impl fmt::Debug for ImplicitSendBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplicitSendBridge")
            .field("request_topic", &self.request_topic)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl ImplicitSendBridge {
    /// Creates a new bridge that publishes requests through `publisher`.
    pub fn new(
        publisher: Arc<dyn Publisher>,
        request_topic: impl Into<String>,
        timings: BridgeTimings,
        fatal: FatalFaultHandler,
    ) -> Self {
        Self {
            publisher,
            request_topic: request_topic.into(),
            timings,
            slot: Mutex::new(None),
            arrived: Condvar::new(),
            fatal,
        }
    }

    /// Creates a new bridge from configuration.
    pub fn from_config(
        publisher: Arc<dyn Publisher>,
        config: &ImplicitSendConfig,
        fatal: FatalFaultHandler,
    ) -> Self {
        Self::new(
            publisher,
            config.request_topic.clone(),
            BridgeTimings {
                timeout: config.timeout,
                poll_interval: config.poll_interval,
            },
            fatal,
        )
    }

    /// Handles an implicit send from the engine.
    ///
    /// Blocks the calling thread until a response is delivered or the timeout elapses. This must
    /// not be called from within an async context.
    ///
    /// If the exchange cannot be relayed, the fault is reported to the [`FatalFaultHandler`] and
    /// a [`CANCEL_RESPONSE`] reply is returned so that the engine's frame can unwind.
    pub fn on_implicit_send(
        &self,
        project_name: &str,
        wid: u16,
        test_case: &str,
        description: &str,
        style: u32,
    ) -> ImplicitSendReply {
        let request = ImplicitSendRequest::new(ImplicitSendParameters {
            project_name: strip_whitespace(project_name),
            wid,
            test_case: strip_whitespace(test_case),
            description: description.to_owned(),
            style,
        });

        tracing::info!(
            project = %request.parameters.project_name,
            test_case = %request.parameters.test_case,
            wid,
            style = mmi_style_name(style).unwrap_or("unknown"),
            "implicit send: {description}",
        );

        match self.exchange(&request) {
            Ok(reply) => reply,
            Err(fault) => {
                self.fatal.trigger(fault);
                ImplicitSendReply::from_slot(Some(CANCEL_RESPONSE))
            }
        }
    }

    fn exchange(&self, request: &ImplicitSendRequest) -> Result<ImplicitSendReply, FatalFault> {
        let payload = serde_json::to_vec(request)
            .map_err(|error| FatalFault::new("implicit-send request encoding", error))?;

        // Clear any stale response before the request becomes visible.
        *self.lock_slot()? = None;

        self.publisher
            .publish(&self.request_topic, payload)
            .map_err(|error| FatalFault::new("implicit-send publish", error))?;

        let start = Instant::now();
        let deadline = start + self.timings.timeout;
        let mut slot = self.lock_slot()?;
        loop {
            if slot.as_deref().is_some_and(|s| !s.is_empty()) {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    wid = request.parameters.wid,
                    timeout = ?self.timings.timeout,
                    "no implicit-send response in time, cancelling",
                );
                *slot = Some(CANCEL_RESPONSE.to_owned());
                break;
            }

            let wait = (deadline - now).min(self.timings.poll_interval);
            let (guard, _) = self
                .arrived
                .wait_timeout(slot, wait)
                .map_err(|_| FatalFault::new("implicit-send wait", "response slot poisoned"))?;
            slot = guard;
            tracing::trace!("rechecking implicit-send response");
        }

        let reply = ImplicitSendReply::from_slot(slot.as_deref());
        tracing::debug!(
            wid = request.parameters.wid,
            elapsed = ?start.elapsed(),
            response = %reply.response,
            "implicit send answered",
        );
        Ok(reply)
    }

    /// Delivers a raw response payload received from pub/sub.
    ///
    /// Payloads that cannot be decoded are logged and ignored.
    pub fn deliver_response(&self, payload: &[u8]) {
        match ImplicitSendResponse::from_slice(payload) {
            Ok(response) => self.deliver_status(response.parameters.status),
            Err(error) => {
                tracing::warn!(
                    %error,
                    payload = %String::from_utf8_lossy(payload),
                    "ignoring undecodable implicit-send response",
                );
            }
        }
    }

    /// Stores a response status and wakes up the waiting engine thread.
    pub fn deliver_status(&self, status: String) {
        tracing::debug!(%status, "implicit-send response received");
        match self.lock_slot() {
            Ok(mut slot) => {
                *slot = Some(status);
                self.arrived.notify_all();
            }
            Err(fault) => self.fatal.trigger(fault),
        }
    }

    fn lock_slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, FatalFault> {
        self.slot
            .lock()
            .map_err(|_| FatalFault::new("implicit-send slot", "response slot poisoned"))
    }
}
