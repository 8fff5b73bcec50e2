// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration management for procmux.
//!
//! # Configuration Hierarchy
//!
//! ```text
//! Priority (low → high)
//! 1. defaults
//! 2. procmux.toml (cwd)
//! 3. --config (repeatable, in order)
//! 4. PROCMUX_* env vars
//! 5. CLI overrides
//! ```
//!
//! # Environment Variable Mapping
//!
//! ```text
//! PROCMUX_MUX__ENCODING=latin1      → mux.encoding = "latin1"
//! PROCMUX_MUX__BUFFER_CAPACITY=64   → mux.buffer_capacity = 64
//! PROCMUX_LOG__LEVEL=4              → log.level = 4
//! ```

pub mod loader;
pub mod types;


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;
use crate::mux::MuxOptions;

use loader::ConfigLoader;
use types::{LogSettings, MuxConfig};

/// Config file picked up from the working directory.
pub const CONFIG_FILE_NAME: &str = "procmux.toml";
/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "PROCMUX";

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Multiplexer options.
    pub mux: MuxConfig,
    /// Logging options.
    pub log: LogSettings,
}

impl Config {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use procmux::config::Config;
    ///
    /// let config = Config::builder()
    ///     .add_toml_file("ci/procmux.toml")
    ///     .add_toml_file_optional("procmux.local.toml")
    ///     .with_env_prefix("PROCMUX")
    ///     .build()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    #[must_use]
    pub fn builder() -> ConfigLoader {
        ConfigLoader::new()
    }

    /// Standard layering: `procmux.toml` in `cwd`, then `files`, then env vars.
    #[must_use]
    pub fn standard_loader(cwd: &Path, files: &[PathBuf]) -> ConfigLoader {
        files.iter().fold(
            Self::builder().add_toml_file_optional(cwd.join(CONFIG_FILE_NAME)),
            ConfigLoader::add_toml_file,
        )
        .with_env_prefix(ENV_PREFIX)
    }

    /// Load configuration from a single TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML, or
    /// does not match the `Config` structure.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder().add_toml_file(path).build()
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid TOML or does not match the
    /// `Config` structure.
    pub fn parse(content: &str) -> Result<Self> {
        Self::builder().add_toml_str(content).build()
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range values.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.mux.exit_poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                section: "mux".to_string(),
                key: "exit_poll_ms".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn mux_options(&self) -> MuxOptions {
        self.mux.to_options()
    }

    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig::builder()
            .with_console_level(self.log.level)
            .with_file_level(self.log.file_level)
            .maybe_with_log_file(self.log.file.clone())
            .build()
    }

    /// Format configuration options for display.
    ///
    /// Output is deterministically ordered using `BTreeMap`.
    #[must_use]
    pub fn format_options(&self) -> Vec<String> {
        let mut options = BTreeMap::new();
        self.format_mux_options(&mut options);
        self.format_log_options(&mut options);

        let max_key_len = options.keys().map(String::len).max().unwrap_or(0);

        options
            .into_iter()
            .map(|(key, value)| format!("{key:<max_key_len$} = {value}"))
            .collect()
    }

    fn format_mux_options(&self, options: &mut BTreeMap<String, String>) {
        options.insert("mux.encoding".into(), self.mux.encoding.to_string());
        options.insert(
            "mux.decode_failure".into(),
            self.mux.decode_failure.to_string(),
        );
        options.insert(
            "mux.buffer_capacity".into(),
            self.mux.buffer_capacity.to_string(),
        );
        options.insert("mux.exit_poll_ms".into(), self.mux.exit_poll_ms.to_string());
        options.insert(
            "mux.strip_terminators".into(),
            self.mux.strip_terminators.to_string(),
        );
    }

    fn format_log_options(&self, options: &mut BTreeMap<String, String>) {
        options.insert("log.level".into(), self.log.level.to_string());
        options.insert("log.file_level".into(), self.log.file_level.to_string());
        if let Some(file) = &self.log.file {
            options.insert("log.file".into(), file.display().to_string());
        }
    }
}
