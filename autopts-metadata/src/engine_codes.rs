// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Numeric codes reported by the engine, and the status strings they map to.

/// Status recorded for an attempt whose command-channel call failed at the
/// RPC layer.
pub const TRANSPORT_ERROR: &str = "RPC ERROR";

/// Status recorded for an attempt that failed for any other reason.
pub const FATAL_ERROR: &str = "FATAL ERROR";

/// The engine reported that the test case ran past its call timeout.
pub const ENGINE_E_TESTCASE_TIMEOUT: u32 = 0x849C_0017;

/// The engine reported that a PIXIT parameter already has the requested value.
pub const ENGINE_E_PIXIT_PARAM_NOT_CHANGED: u32 = 0x849C_0021;

/// The engine reported that a PICS entry already has the requested value.
pub const ENGINE_E_PICS_ENTRY_NOT_CHANGED: u32 = 0x849C_0032;

static ENGINE_ERROR_NAMES: &[(u32, &str)] = &[
    (0x849C_0001, "PTSCONTROL_E_GUI_UPDATE_FAILED"),
    (0x849C_0002, "PTSCONTROL_E_PTS_FILE_FAILED_TO_INITIALIZE"),
    (0x849C_0003, "PTSCONTROL_E_FAILED_TO_CREATE_WORKSPACE"),
    (0x849C_0004, "PTSCONTROL_E_CLIENT_LOG_NOT_EXPECTED_TO_FAIL"),
    (0x849C_0005, "PTSCONTROL_E_FAILED_TO_OPEN_WORKSPACE"),
    (0x849C_0010, "PTSCONTROL_E_PROJECT_NOT_FOUND"),
    (0x849C_0011, "PTSCONTROL_E_TESTCASE_NOT_FOUND"),
    (0x849C_0012, "PTSCONTROL_E_TESTCASE_NOT_STARTED"),
    (0x849C_0013, "PTSCONTROL_E_INVALID_TEST_SUITE"),
    (0x849C_0014, "PTSCONTROL_E_PTS_VERSION_NOT_FOUND"),
    (0x849C_0015, "PTSCONTROL_E_PROJECT_VERSION_NOT_FOUND"),
    (0x849C_0016, "PTSCONTROL_E_TESTCASE_NOT_ACTIVE"),
    // Shortened, since this one shows up in the per-attempt status column.
    (ENGINE_E_TESTCASE_TIMEOUT, "PTS TIMEOUT"),
    (0x849C_0020, "PTSCONTROL_E_INVALID_PIXIT_PARAM_VALUE"),
    (ENGINE_E_PIXIT_PARAM_NOT_CHANGED, "PTSCONTROL_E_PIXIT_PARAM_NOT_CHANGED"),
    (0x849C_0022, "PTSCONTROL_E_PIXIT_PARAM_UPDATE_FAILED"),
    (0x849C_0023, "PTSCONTROL_E_PIXIT_PARAM_NOT_FOUND"),
    (0x849C_0024, "PTSCONTROL_E_TEST_SUITE_PARAM_UPDATE_FAILED"),
    (0x849C_0030, "PTSCONTROL_E_PICS_ENTRY_UPDATE_FAILED"),
    (0x849C_0031, "PTSCONTROL_E_PICS_ENTRY_NOT_FOUND"),
    (ENGINE_E_PICS_ENTRY_NOT_CHANGED, "PTSCONTROL_E_PICS_ENTRY_NOT_CHANGED"),
    (0x849C_0041, "PTSCONTROL_E_IMPLICIT_SEND_CALLBACK_ALREADY_REGISTERED"),
    (0x849C_0042, "PTSCONTROL_E_IMPLICIT_SEND_CALLBACK_NOT_EXPECTED_TO_FAIL"),
    (0x849C_0043, "PTSCONTROL_E_BLUETOOTH_ADDRESS_NOT_FOUND"),
    (0x849C_0044, "PTSCONTROL_E_INTERNAL_ERROR"),
    (0x849C_0099, "PTSCONTROL_E_FUNCTION_NOT_IMPLEMENTED"),
    (0x8000_4002, "E_NOINTERFACE"),
    (0x8008_0005, "CO_E_SERVER_EXEC_FAILURE"),
    // Not documented by the engine, but seen when its process crashes.
    (0x8007_06BA, "E_RPC_SERVER_UNAVAILABLE"),
    (0x8007_06BE, "E_RPC_CALL_FAILED"),
];

/// Returns the display name for an engine error code, if it is known.
pub fn engine_error_name(code: u32) -> Option<&'static str> {
    ENGINE_ERROR_NAMES
        .iter()
        .find_map(|&(c, name)| (c == code).then_some(name))
}

/// Returns the display name for an engine error code, falling back to the
/// hexadecimal value for unknown codes.
pub fn engine_error_display(code: u32) -> String {
    match engine_error_name(code) {
        Some(name) => name.to_owned(),
        None => format!("0x{code:08X}"),
    }
}

static MMI_STYLE_NAMES: &[(u32, &str)] = &[
    (0x11041, "MMI_Style_Ok_Cancel1"),
    (0x11141, "MMI_Style_Ok_Cancel2"),
    (0x11040, "MMI_Style_Ok"),
    (0x11044, "MMI_Style_Yes_No1"),
    (0x11043, "MMI_Style_Yes_No_Cancel1"),
    (0x11042, "MMI_Style_Abort_Retry1"),
    (0x12040, "MMI_Style_Edit1"),
    (0x12140, "MMI_Style_Edit2"),
];

/// Returns the name of an implicit-send prompt style, if it is known.
pub fn mmi_style_name(style: u32) -> Option<&'static str> {
    MMI_STYLE_NAMES
        .iter()
        .find_map(|&(s, name)| (s == style).then_some(name))
}
