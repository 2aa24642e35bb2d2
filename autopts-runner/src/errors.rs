// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by autopts.

use autopts_metadata::engine_error_display;
use camino::Utf8PathBuf;
use config::ConfigError;
use jsonrpsee::core::client::Error as ClientError;
use std::{borrow::Cow, fmt, net::SocketAddr, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse autopts config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurs while building a
/// [`TestFilter`](crate::test_filter::TestFilter).
#[derive(Clone, Debug, Error)]
pub enum TestFilterBuilderError {
    /// An error that occurred while constructing prefix matchers.
    #[error("error constructing test filters")]
    Construct {
        /// The underlying error.
        #[from]
        error: aho_corasick::BuildError,
    },
}

/// An error that occurred while reading or writing the run statistics ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An error occurred while creating the ledger file.
    #[error("error creating ledger file")]
    Create {
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while reading the ledger file.
    #[error("error reading ledger at `{path}`")]
    Read {
        /// The path to the ledger.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The ledger file could not be parsed.
    #[error("error parsing ledger at `{path}`")]
    Parse {
        /// The path to the ledger.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: LedgerParseError,
    },

    /// The ledger could not be serialized.
    #[error("error serializing ledger for `{path}`")]
    Serialize {
        /// The path to the ledger.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while writing the ledger file.
    #[error("error writing ledger at `{path}`")]
    Write {
        /// The path to the ledger.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurred while parsing the contents of a ledger file.
#[derive(Debug, Error)]
pub enum LedgerParseError {
    /// The file is not well-formed XML.
    #[error("invalid XML")]
    Xml(#[from] quick_xml::Error),

    /// A record is missing a required attribute.
    #[error("record {index} is missing attribute `{attribute}`")]
    MissingAttribute {
        /// The zero-based index of the record.
        index: usize,

        /// The missing attribute.
        attribute: &'static str,
    },

    /// An attribute could not be parsed.
    #[error("record {index} has invalid `{attribute}`: {value}")]
    InvalidAttribute {
        /// The zero-based index of the record.
        index: usize,

        /// The attribute.
        attribute: &'static str,

        /// The value that failed to parse.
        value: String,
    },
}

/// A command-channel call failed at the RPC layer.
///
/// This covers connection failures, protocol faults, server-side faults and
/// timeouts. The runner treats all of these as a transport error for the
/// attempt in progress.
#[derive(Debug, Error)]
#[error("command `{method}` failed on server `{server}`")]
pub struct CommandError {
    server: String,
    method: &'static str,
    #[source]
    error: ClientError,
}

impl CommandError {
    /// Creates a new `CommandError`.
    pub fn new(server: impl Into<String>, method: &'static str, error: ClientError) -> Self {
        Self {
            server: server.into(),
            method,
            error,
        }
    }

    /// Returns the server the call was made against.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns the name of the method that failed.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Returns true if the call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self.error, ClientError::RequestTimeout)
    }
}

/// An error that occurred on the callback channel.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The callback listener could not be started.
    #[error("failed to start callback listener on `{addr}`")]
    Listen {
        /// The address the listener tried to bind to.
        addr: SocketAddr,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A proxy to the client's callback listener could not be created.
    #[error("failed to connect to callback listener at `{target}`")]
    Connect {
        /// The callback listener's address.
        target: String,

        /// The underlying error.
        #[source]
        error: ClientError,
    },

    /// The client's callback listener did not answer the liveness probe.
    #[error("callback listener at `{target}` did not answer the liveness probe")]
    Probe {
        /// The callback listener's address.
        target: String,

        /// The underlying error.
        #[source]
        error: ClientError,
    },

    /// A log line could not be forwarded to the client.
    #[error("failed to forward log line to `{target}`")]
    Forward {
        /// The callback listener's address.
        target: String,

        /// The underlying error.
        #[source]
        error: ClientError,
    },
}

/// An error that occurred while initializing a session with an engine server.
#[derive(Debug, Error)]
#[error("failed to initialize session with server `{server}`")]
pub struct SessionInitError {
    server: String,
    #[source]
    kind: SessionInitErrorKind,
}

impl SessionInitError {
    pub(crate) fn new(server: impl Into<String>, kind: impl Into<SessionInitErrorKind>) -> Self {
        Self {
            server: server.into(),
            kind: kind.into(),
        }
    }

    /// Returns the server this error is for.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &SessionInitErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred during session initialization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionInitErrorKind {
    /// A command-channel call failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The callback channel could not be set up.
    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// The local address to advertise to the server could not be determined.
    #[error("failed to determine local address")]
    LocalAddress(#[source] std::io::Error),

    /// Initialization did not complete in time.
    #[error("initialization did not complete within {}", humantime_serde::re::humantime::format_duration(*.timeout))]
    TimedOut {
        /// The time allotted to initialization.
        timeout: Duration,
    },

    /// The initialization task panicked or was cancelled.
    #[error("initialization task failed")]
    Join(#[source] tokio::task::JoinError),
}

/// An error that occurred while opening or writing a per-attempt log.
#[derive(Debug, Error)]
#[error("error writing attempt log at `{path}`")]
pub struct AttemptLogError {
    path: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl AttemptLogError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// An error that occurred while running test cases.
#[derive(Debug, Error)]
pub enum RunError {
    /// The session log directory could not be created.
    #[error("failed to create session log directory `{path}`")]
    LogDirCreate {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The ledger could not be read or written.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// An unrecoverable fault was reported while the run was in progress.
    #[error("run aborted")]
    Aborted(#[source] FatalFault),

    /// Writing to the output failed.
    #[error("error writing run output")]
    Write(#[source] std::io::Error),
}

/// An unrecoverable fault.
///
/// Faults are captured by a [`FatalFaultHandler`](crate::fatal::FatalFaultHandler) and cause
/// the surrounding service to shut down.
#[derive(Clone, Debug, Error)]
#[error("unrecoverable fault in {context}: {message}")]
pub struct FatalFault {
    context: Cow<'static, str>,
    message: String,
}

impl FatalFault {
    /// Creates a new `FatalFault`.
    pub fn new(context: impl Into<Cow<'static, str>>, message: impl fmt::Display) -> Self {
        Self {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Returns the context in which the fault occurred.
    pub fn context(&self) -> &str {
        &self.context
    }
}

/// An error that occurred while publishing a message.
#[derive(Debug, Error)]
#[error("failed to publish to topic `{topic}`")]
pub struct PublishError {
    topic: String,
    #[source]
    error: Box<dyn std::error::Error + Send + Sync>,
}

impl PublishError {
    /// Creates a new `PublishError`.
    pub fn new(
        topic: impl Into<String>,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            error: error.into(),
        }
    }
}

/// An error reported by an [`Engine`](crate::engine::Engine).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    /// The engine returned a numeric error code.
    #[error("engine returned {}", engine_error_display(*.0))]
    Code(u32),

    /// The engine binding failed for a reason other than an engine error code.
    #[error("engine binding failed: {0}")]
    Binding(String),
}

impl EngineError {
    /// Returns the status string recorded for this error.
    pub fn status(&self) -> String {
        match self {
            Self::Code(code) => engine_error_display(*code),
            Self::Binding(_) => autopts_metadata::FATAL_ERROR.to_owned(),
        }
    }
}

/// A workspace could not be opened by the engine server.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The workspace file does not exist.
    #[error("workspace file `{path}` does not exist")]
    NotFound {
        /// The workspace path.
        path: Utf8PathBuf,
    },

    /// The workspace file has the wrong extension.
    #[error("workspace file `{path}` has the wrong extension, expected `.{expected}`")]
    WrongExtension {
        /// The workspace path.
        path: Utf8PathBuf,

        /// The expected extension.
        expected: String,
    },

    /// The engine failed to open the workspace.
    #[error("engine failed to open workspace `{path}`")]
    Engine {
        /// The workspace path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: EngineError,
    },
}

/// An error that occurred while starting an engine server.
#[derive(Debug, Error)]
pub enum ServerStartError {
    /// The command channel could not be bound.
    #[error("failed to bind command channel on `{addr}`")]
    Bind {
        /// The address.
        addr: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The engine could not be started.
    #[error("failed to start engine")]
    Engine(#[source] EngineError),

    /// The engine was joined after its host thread panicked.
    #[error("engine host task failed")]
    Join(#[source] tokio::task::JoinError),
}

/// An error that caused a running engine server to stop.
#[derive(Debug, Error)]
pub enum ServerRunError {
    /// An unrecoverable fault was reported.
    #[error("engine server shut down")]
    Fatal(#[source] FatalFault),
}

/// An error returned by [`serve`](crate::server::serve).
#[derive(Debug, Error)]
pub enum ServeError {
    /// The server did not start.
    #[error(transparent)]
    Start(#[from] ServerStartError),

    /// The server stopped on a fault.
    #[error(transparent)]
    Run(#[from] ServerRunError),
}
