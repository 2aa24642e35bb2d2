// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for autopts.
//!
//! The embedded default config is layered with an optional user config file.
//! Command-line options are applied on top of the result by the CLI.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};

/// Overall configuration for autopts.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AutoptsConfig {
    /// Engine server settings.
    pub server: ServerConfig,

    /// Client session settings.
    pub client: ClientConfig,

    /// Engine settings applied by the server.
    pub engine: EngineConfig,

    /// Implicit-send relay settings.
    pub implicit_send: ImplicitSendConfig,

    /// Test run settings.
    pub run: RunConfig,
}

impl AutoptsConfig {
    /// The default location of the config, relative to the current directory.
    pub const CONFIG_PATH: &'static str = ".config/autopts.toml";

    /// Contains the default config as a TOML file.
    ///
    /// User configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the autopts config from the given file, or if not specified from
    /// `.config/autopts.toml` relative to `base_dir`.
    ///
    /// Keys that autopts does not recognize are logged as warnings.
    pub fn from_sources(
        base_dir: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = base_dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, ignored) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !ignored.is_empty() {
            let keys = ignored.into_iter().collect::<Vec<_>>().join(", ");
            tracing::warn!(%config_file, "ignoring unknown configuration keys: {keys}");
        }

        Ok(config)
    }

    /// Returns the default autopts config.
    pub fn default_config() -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");

        config
            .try_deserialize()
            .expect("default config is always valid")
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // The config crate reports the key as well: drop it for consistency.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((config, ignored))
    }
}

/// Engine server settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// The address the engine server listens on.
    pub bind: String,

    /// The port the command channel listens on.
    pub port: u16,
}

/// Client session settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// The first port used for callback listeners.
    pub callback_port: u16,

    /// How long each server gets to complete session initialization.
    #[serde(with = "humantime_serde")]
    pub init_timeout: Duration,

    /// The longest a single command-channel call may take.
    #[serde(with = "humantime_serde")]
    pub rpc_timeout: Duration,
}

/// Engine settings applied by the server.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// The timeout the engine applies to a single test case.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// How long to wait between stopping and starting the engine.
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,

    /// The extension workspace files must carry, without the leading dot.
    pub workspace_extension: String,
}

impl EngineConfig {
    /// Returns the call timeout in the engine's unit (milliseconds), saturating
    /// at `u32::MAX`.
    pub fn call_timeout_ms(&self) -> u32 {
        u32::try_from(self.call_timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Implicit-send relay settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImplicitSendConfig {
    /// The pub/sub broker's host name or address.
    pub broker_host: String,

    /// The pub/sub broker's port.
    pub broker_port: u16,

    /// The client identifier presented to the broker.
    pub client_id: String,

    /// Requests from the engine are published on this topic.
    pub request_topic: String,

    /// Answers are read from this topic.
    pub response_topic: String,

    /// How long to wait for an answer.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How often the answer slot is rechecked while waiting.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// Test run settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// The number of times a non-passing test case is re-run.
    pub retries: u32,

    /// The directory per-attempt logs are written under.
    pub log_dir: Utf8PathBuf,

    /// A fixed location for the run statistics ledger.
    #[serde(default)]
    pub ledger_path: Option<Utf8PathBuf>,
}
