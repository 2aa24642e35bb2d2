// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client side of the command channel.
//!
//! [`EngineControl`] is the seam the runner and session code are written against. The production
//! implementation is [`RemoteEngine`], which talks to an engine server over JSON-RPC.

use crate::{errors::CommandError, rpc::EngineRpcClient};
use futures::future::BoxFuture;
use jsonrpsee::{
    core::client::Error as ClientError,
    http_client::{HttpClient, HttpClientBuilder},
};
use std::time::Duration;

/// Operations on an engine server.
///
/// Every call is bounded in time. A call that times out or fails at the RPC layer returns a
/// [`CommandError`], never success.
pub trait EngineControl: Send + Sync {
    /// Returns the address of the server, for display.
    fn server(&self) -> &str;

    /// Stops the engine if it is running, then starts it again.
    fn restart(&self) -> BoxFuture<'_, Result<(), CommandError>>;

    /// Opens a workspace, interpreted on the server.
    fn open_workspace<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), CommandError>>;

    /// Returns the projects in the open workspace.
    fn project_list(&self) -> BoxFuture<'_, Result<Vec<String>, CommandError>>;

    /// Returns the active test cases of `project`.
    fn test_case_list<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, CommandError>>;

    /// Runs a test case to completion.
    ///
    /// Returns `Some` with the engine's error code as a display string if the engine reported one.
    fn run_test_case<'a>(
        &'a self,
        workspace: &'a str,
        project: &'a str,
        test_case: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, CommandError>>;

    /// Stops the running test case.
    fn stop_test_case<'a>(
        &'a self,
        project: &'a str,
        test_case: &'a str,
    ) -> BoxFuture<'a, Result<(), CommandError>>;

    /// Sets a PIXIT parameter.
    fn set_pixit<'a>(
        &'a self,
        project: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<(), CommandError>>;

    /// Sets a PICS entry.
    fn set_pics<'a>(
        &'a self,
        project: &'a str,
        name: &'a str,
        value: bool,
    ) -> BoxFuture<'a, Result<(), CommandError>>;

    /// Enables or disables the engine's maximum logging.
    fn enable_max_logging(&self, enable: bool) -> BoxFuture<'_, Result<(), CommandError>>;

    /// Sets the engine's per-test-case call timeout, in milliseconds.
    fn set_call_timeout(&self, timeout_ms: u32) -> BoxFuture<'_, Result<(), CommandError>>;

    /// Registers a callback listener at `address:port`.
    fn register_callback<'a>(
        &'a self,
        address: &'a str,
        port: u16,
    ) -> BoxFuture<'a, Result<(), CommandError>>;

    /// Clears the callback registration.
    fn unregister_callback(&self) -> BoxFuture<'_, Result<(), CommandError>>;

    /// Returns the engine's version.
    fn version(&self) -> BoxFuture<'_, Result<String, CommandError>>;

    /// Returns the engine's device address.
    fn bd_addr(&self) -> BoxFuture<'_, Result<String, CommandError>>;

    /// Resynchronizes the engine after a failed call: re-opens the workspace and resets the call
    /// timeout.
    fn recover<'a>(
        &'a self,
        workspace: &'a str,
        call_timeout_ms: u32,
    ) -> BoxFuture<'a, Result<(), CommandError>> {
        Box::pin(async move {
            tracing::info!(
                server = %self.server(),
                %workspace,
                call_timeout_ms,
                "recovering engine"
            );
            self.open_workspace(workspace).await?;
            self.set_call_timeout(call_timeout_ms).await
        })
    }
}

/// A connection to a remote engine server.
#[derive(Debug)]
pub struct RemoteEngine {
    server: String,
    client: HttpClient,
}

impl RemoteEngine {
    /// Creates a client for the engine server at `address:port`.
    ///
    /// No request is made until the first call.
    pub fn connect(address: &str, port: u16, rpc_timeout: Duration) -> Result<Self, CommandError> {
        let server = format!("{address}:{port}");
        let client = HttpClientBuilder::default()
            .request_timeout(rpc_timeout)
            .build(format!("http://{server}/"))
            .map_err(|error| CommandError::new(server.clone(), "connect", error))?;
        Ok(Self { server, client })
    }

    fn map_err(&self, method: &'static str) -> impl FnOnce(ClientError) -> CommandError + '_ {
        move |error| CommandError::new(self.server.clone(), method, error)
    }
}

impl EngineControl for RemoteEngine {
    fn server(&self) -> &str {
        &self.server
    }

    fn restart(&self) -> BoxFuture<'_, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .restart_engine()
                .await
                .map_err(self.map_err("restartEngine"))
        })
    }

    fn open_workspace<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .open_workspace(path.to_owned())
                .await
                .map_err(self.map_err("openWorkspace"))
        })
    }

    fn project_list(&self) -> BoxFuture<'_, Result<Vec<String>, CommandError>> {
        Box::pin(async move {
            self.client
                .get_project_list()
                .await
                .map_err(self.map_err("getProjectList"))
        })
    }

    fn test_case_list<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, CommandError>> {
        Box::pin(async move {
            self.client
                .get_test_case_list(project.to_owned())
                .await
                .map_err(self.map_err("getTestCaseList"))
        })
    }

    fn run_test_case<'a>(
        &'a self,
        workspace: &'a str,
        project: &'a str,
        test_case: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, CommandError>> {
        Box::pin(async move {
            self.client
                .run_test_case(
                    workspace.to_owned(),
                    project.to_owned(),
                    test_case.to_owned(),
                )
                .await
                .map_err(self.map_err("runTestCase"))
        })
    }

    fn stop_test_case<'a>(
        &'a self,
        project: &'a str,
        test_case: &'a str,
    ) -> BoxFuture<'a, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .stop_test_case(project.to_owned(), test_case.to_owned())
                .await
                .map_err(self.map_err("stopTestCase"))
        })
    }

    fn set_pixit<'a>(
        &'a self,
        project: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .set_pixit(project.to_owned(), name.to_owned(), value.to_owned())
                .await
                .map_err(self.map_err("setPixit"))
        })
    }

    fn set_pics<'a>(
        &'a self,
        project: &'a str,
        name: &'a str,
        value: bool,
    ) -> BoxFuture<'a, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .set_pics(project.to_owned(), name.to_owned(), value)
                .await
                .map_err(self.map_err("setPics"))
        })
    }

    fn enable_max_logging(&self, enable: bool) -> BoxFuture<'_, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .enable_max_logging(enable)
                .await
                .map_err(self.map_err("enableMaxLogging"))
        })
    }

    fn set_call_timeout(&self, timeout_ms: u32) -> BoxFuture<'_, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .set_call_timeout(timeout_ms)
                .await
                .map_err(self.map_err("setCallTimeout"))
        })
    }

    fn register_callback<'a>(
        &'a self,
        address: &'a str,
        port: u16,
    ) -> BoxFuture<'a, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .register_callback(address.to_owned(), port)
                .await
                .map_err(self.map_err("registerCallback"))
        })
    }

    fn unregister_callback(&self) -> BoxFuture<'_, Result<(), CommandError>> {
        Box::pin(async move {
            self.client
                .unregister_callback()
                .await
                .map_err(self.map_err("unregisterCallback"))
        })
    }

    fn version(&self) -> BoxFuture<'_, Result<String, CommandError>> {
        Box::pin(async move {
            self.client
                .get_version()
                .await
                .map_err(self.map_err("getVersion"))
        })
    }

    fn bd_addr(&self) -> BoxFuture<'_, Result<String, CommandError>> {
        Box::pin(async move {
            self.client
                .get_bd_addr()
                .await
                .map_err(self.map_err("getBdAddr"))
        })
    }
}
