// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a log line emitted by the engine.
///
/// The numeric values are fixed by the engine's control interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum LogType {
    /// Engine infrastructure messages.
    Infrastructure = 0,
    /// A test case started.
    StartTest = 1,
    /// A test case ended.
    EndTest = 2,
    /// An implicit send was issued.
    ImplicitSend = 3,
    /// A free-form message.
    Message = 4,
    /// An error.
    Error = 5,
    /// A protocol event was sent.
    SendEvent = 6,
    /// A protocol event was received.
    ReceiveEvent = 7,
    /// The final verdict of a test case.
    FinalVerdict = 8,
    /// A preliminary verdict.
    PreliminaryVerdict = 9,
    /// Summary of events.
    EventSummary = 10,
}

impl LogType {
    /// All log types, ordered by their numeric value.
    pub const ALL: [Self; 11] = [
        Self::Infrastructure,
        Self::StartTest,
        Self::EndTest,
        Self::ImplicitSend,
        Self::Message,
        Self::Error,
        Self::SendEvent,
        Self::ReceiveEvent,
        Self::FinalVerdict,
        Self::PreliminaryVerdict,
        Self::EventSummary,
    ];

    /// Converts a raw engine log type into a `LogType`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Returns the raw value used by the engine.
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Returns the engine's symbolic name for this log type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Infrastructure => "PTS_LOGTYPE_INFRASTRUCTURE",
            Self::StartTest => "PTS_LOGTYPE_START_TEST",
            Self::EndTest => "PTS_LOGTYPE_END_TEST",
            Self::ImplicitSend => "PTS_LOGTYPE_IMPLICIT_SEND",
            Self::Message => "PTS_LOGTYPE_MESSAGE",
            Self::Error => "PTS_LOGTYPE_ERROR",
            Self::SendEvent => "PTS_LOGTYPE_SEND_EVENT",
            Self::ReceiveEvent => "PTS_LOGTYPE_RECEIVE_EVENT",
            Self::FinalVerdict => "PTS_LOGTYPE_FINAL_VERDICT",
            Self::PreliminaryVerdict => "PTS_LOGTYPE_PRELIMINARY_VERDICT",
            Self::EventSummary => "PTS_LOGTYPE_EVENT_SUMMARY",
        }
    }

    /// Returns true if lines of this type are forwarded to clients even when
    /// maximum logging is disabled.
    pub fn is_forwarded_by_default(self) -> bool {
        matches!(
            self,
            Self::StartTest | Self::EndTest | Self::Error | Self::FinalVerdict
        )
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_round_trip() {
        for log_type in LogType::ALL {
            assert_eq!(LogType::from_raw(log_type.as_raw()), Some(log_type));
        }
        assert_eq!(LogType::from_raw(11), None);
    }

    #[test]
    fn default_forwarding_whitelist() {
        let forwarded: Vec<_> = LogType::ALL
            .into_iter()
            .filter(|t| t.is_forwarded_by_default())
            .collect();
        assert_eq!(
            forwarded,
            [
                LogType::StartTest,
                LogType::EndTest,
                LogType::Error,
                LogType::FinalVerdict
            ]
        );
    }
}
