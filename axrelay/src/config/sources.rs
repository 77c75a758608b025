use std::{collections::HashMap, env, path::PathBuf};

use axrelay_core::{
    appliance::SeverityCodes, config::ExecutionMode, config::SubmissionOptions,
    hashing::HashAlgorithm,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub credentials: FileCredentialsConfig,
    #[serde(default)]
    pub appliances: Vec<FileApplianceConfig>,
    #[serde(default)]
    pub layout: FileLayoutConfig,
    #[serde(default)]
    pub ledger: FileLedgerConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
    #[serde(default)]
    pub throttle: FileThrottleConfig,
    pub submission: Option<SubmissionOptions>,
    pub severity: Option<SeverityCodes>,
    #[serde(default)]
    pub http: FileHttpConfig,
    #[serde(default)]
    pub execution: FileExecutionConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCredentialsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileApplianceConfig {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLayoutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malicious_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benign_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLedgerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backups: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileThrottleConfig {
    /// Human-readable duration, e.g. `"1day"` or `"12h"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHttpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
    /// Operation name to protocol version, e.g. `submit = "v2.0.0"`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub versions: HashMap<String, String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileExecutionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<HashAlgorithm>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub base_dir: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: read_env("AXRELAY_CONFIG").map(PathBuf::from),
            username: read_env("AXRELAY_USERNAME"),
            password: read_env("AXRELAY_PASSWORD").map(Zeroizing::new),
            base_dir: read_env("AXRELAY_BASE_DIR").map(PathBuf::from),
            ledger_path: read_env("AXRELAY_LEDGER_PATH").map(PathBuf::from),
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
