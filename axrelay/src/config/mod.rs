//! Configuration for the `axrelay` binary: TOML file, `.env` and environment
//! overrides, composed into the core's validated types.

use std::path::PathBuf;

use axrelay_core::{
    appliance::{Credentials, HttpClientConfig},
    config::EngineConfig,
};

pub mod loader;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub engine: EngineConfig,
    pub http: HttpClientConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// When set, events are also appended to `directory/file_name`.
    pub directory: Option<PathBuf>,
    pub file_name: String,
    pub max_bytes: u64,
    pub backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: "axrelay.log".to_string(),
            max_bytes: 10 * 1024 * 1024,
            backups: 5,
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|directory| directory.join(&self.file_name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
