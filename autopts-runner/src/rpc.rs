// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire definitions for the command and callback channels.
//!
//! Both channels are JSON-RPC 2.0 over HTTP. The command channel is served by the
//! [engine server](crate::server) and driven by [`RemoteEngine`](crate::client::RemoteEngine).
//! The callback channel is served by each client's
//! [`CallbackListener`](crate::callback::CallbackListener) and driven by the server.

use crate::helpers::DisplayErrorChain;
use jsonrpsee::{
    core::RpcResult,
    proc_macros::rpc,
    types::{ErrorObject, ErrorObjectOwned},
};

/// The error code returned when the engine itself reported an error.
pub const ENGINE_ERROR_CODE: i32 = -32000;

/// The error code returned when a workspace could not be opened.
pub const WORKSPACE_ERROR_CODE: i32 = -32001;

/// The error code returned when the callback target could not be reached.
pub const CALLBACK_ERROR_CODE: i32 = -32002;

/// The error code returned when a request names an unknown project.
pub const UNKNOWN_PROJECT_CODE: i32 = -32003;

/// The error code returned when the engine host failed internally.
pub const HOST_ERROR_CODE: i32 = -32010;

/// Builds an error object with the given code from an error's display form, including its
/// sources.
pub(crate) fn error_object(
    code: i32,
    error: &(dyn std::error::Error + 'static),
) -> ErrorObjectOwned {
    ErrorObject::owned(code, DisplayErrorChain(error).to_string(), None::<()>)
}

/// The command channel, exposed by the engine server.
#[rpc(server, client)]
pub trait EngineRpc {
    /// Stops the engine if it is running, then starts it again.
    #[method(name = "restartEngine")]
    async fn restart_engine(&self) -> RpcResult<()>;

    /// Opens a workspace. The path is interpreted on the server.
    #[method(name = "openWorkspace")]
    async fn open_workspace(&self, path: String) -> RpcResult<()>;

    /// Returns the projects in the open workspace.
    #[method(name = "getProjectList")]
    async fn get_project_list(&self) -> RpcResult<Vec<String>>;

    /// Returns the active test cases of a project.
    #[method(name = "getTestCaseList")]
    async fn get_test_case_list(&self, project: String) -> RpcResult<Vec<String>>;

    /// Runs a test case to completion.
    ///
    /// Returns `None` on success, or the engine's error code as a display string.
    #[method(name = "runTestCase")]
    async fn run_test_case(
        &self,
        workspace: String,
        project: String,
        test_case: String,
    ) -> RpcResult<Option<String>>;

    /// Stops the running test case.
    #[method(name = "stopTestCase")]
    async fn stop_test_case(&self, project: String, test_case: String) -> RpcResult<()>;

    /// Sets a PIXIT parameter.
    #[method(name = "setPixit")]
    async fn set_pixit(&self, project: String, name: String, value: String) -> RpcResult<()>;

    /// Sets a PICS entry.
    #[method(name = "setPics")]
    async fn set_pics(&self, project: String, name: String, value: bool) -> RpcResult<()>;

    /// Enables or disables the engine's maximum logging.
    #[method(name = "enableMaxLogging")]
    async fn enable_max_logging(&self, enable: bool) -> RpcResult<()>;

    /// Sets the engine's per-test-case call timeout, in milliseconds.
    #[method(name = "setCallTimeout")]
    async fn set_call_timeout(&self, timeout_ms: u32) -> RpcResult<()>;

    /// Registers the caller's callback listener, replacing any previous registration.
    #[method(name = "registerCallback")]
    async fn register_callback(&self, address: String, port: u16) -> RpcResult<()>;

    /// Clears the callback registration.
    #[method(name = "unregisterCallback")]
    async fn unregister_callback(&self) -> RpcResult<()>;

    /// Returns the engine's version.
    #[method(name = "getVersion")]
    async fn get_version(&self) -> RpcResult<String>;

    /// Returns the engine's device address, as colon-separated hex.
    #[method(name = "getBdAddr")]
    async fn get_bd_addr(&self) -> RpcResult<String>;
}

/// The callback channel, exposed by each client.
#[rpc(server, client)]
pub trait CallbackRpc {
    /// Receives a log line from the engine.
    #[method(name = "log")]
    async fn log(
        &self,
        kind: u32,
        kind_label: String,
        timestamp: String,
        message: String,
        test_case_name: String,
    ) -> RpcResult<()>;

    /// Liveness probe, used by the server when a callback is registered.
    #[method(name = "ping")]
    async fn ping(&self) -> RpcResult<()>;
}
