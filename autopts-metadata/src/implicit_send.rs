// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// The value of [`ImplicitSendRequest::command`].
pub const IMPLICIT_SEND_COMMAND: &str = "ImplicitSend";

/// A question posed by the engine mid-test, published on the pub/sub channel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImplicitSendRequest {
    /// Always [`IMPLICIT_SEND_COMMAND`].
    pub command: String,

    /// The question itself.
    pub parameters: ImplicitSendParameters,

    /// Always true: the engine is blocked until an answer arrives.
    pub response_required: bool,
}

impl ImplicitSendRequest {
    /// Creates a new request around the given parameters.
    pub fn new(parameters: ImplicitSendParameters) -> Self {
        Self {
            command: IMPLICIT_SEND_COMMAND.to_owned(),
            parameters,
            response_required: true,
        }
    }
}

/// The parameters of an [`ImplicitSendRequest`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitSendParameters {
    /// The project the running test case belongs to.
    pub project_name: String,

    /// The engine's identifier for this question.
    pub wid: u16,

    /// The running test case.
    pub test_case: String,

    /// Free-text description of the question.
    pub description: String,

    /// Prompt style code (see [`mmi_style_name`](crate::mmi_style_name)).
    pub style: u32,
}

/// An answer to an implicit send.
///
/// Only `parameters.status` is consumed: any other fields in the record are
/// ignored.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImplicitSendResponse {
    /// The answer.
    pub parameters: ImplicitSendResponseParameters,
}

/// The parameters of an [`ImplicitSendResponse`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImplicitSendResponseParameters {
    /// Opaque answer text, returned to the engine as-is.
    pub status: String,
}

impl ImplicitSendResponse {
    /// Decodes a response from its wire form.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_wire_form() {
        let request = ImplicitSendRequest::new(ImplicitSendParameters {
            project_name: "GAP".to_owned(),
            wid: 104,
            test_case: "GAP/BROB/BCST/BV-01-C".to_owned(),
            description: "Please start advertising".to_owned(),
            style: 0x11041,
        });
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "command": "ImplicitSend",
                "parameters": {
                    "projectName": "GAP",
                    "wid": 104,
                    "testCase": "GAP/BROB/BCST/BV-01-C",
                    "description": "Please start advertising",
                    "style": 69697,
                },
                "response_required": true,
            })
        );
    }

    #[test]
    fn response_ignores_extra_fields() {
        let payload = br#"{"command": "ImplicitSendResponse", "parameters": {"status": "OK", "wid": 104}}"#;
        let response = ImplicitSendResponse::from_slice(payload).unwrap();
        assert_eq!(response.parameters.status, "OK");

        let missing = br#"{"parameters": {}}"#;
        assert!(ImplicitSendResponse::from_slice(missing).is_err());
    }
}
