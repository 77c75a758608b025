//! Validated engine configuration.
//!
//! The binary owns parsing and validation; everything here is already known
//! to be well formed by the time it reaches the engine.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    appliance::{Appliance, SeverityCodes},
    hashing::HashAlgorithm,
    layout::DirectoryLayout,
};

/// Analysis options forwarded verbatim with every upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionOptions {
    pub application: String,
    pub timeout: String,
    pub priority: String,
    #[serde(alias = "analysistype")]
    pub analysis_type: String,
    pub force: String,
    pub prefetch: String,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            application: "0".to_string(),
            timeout: "500".to_string(),
            priority: "0".to_string(),
            analysis_type: "0".to_string(),
            force: "false".to_string(),
            prefetch: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum age of a terminal record before the same identity may be
    /// analysed again.
    pub cooldown: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::days(1),
        }
    }
}

/// How polling and dispatch are scheduled across appliances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    PerAppliance,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::PerAppliance => f.write_str("per-appliance"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Appliances in configuration order; the round-robin follows this order.
    pub appliances: Vec<Appliance>,
    pub layout: DirectoryLayout,
    pub throttle: ThrottleConfig,
    pub submission: SubmissionOptions,
    pub severity: SeverityCodes,
    pub execution: ExecutionMode,
    pub hash_algorithm: HashAlgorithm,
}

impl EngineConfig {
    /// Configuration with defaults for everything but appliances and layout.
    pub fn new(appliances: Vec<Appliance>, layout: DirectoryLayout) -> Self {
        Self {
            appliances,
            layout,
            throttle: ThrottleConfig::default(),
            submission: SubmissionOptions::default(),
            severity: SeverityCodes::default(),
            execution: ExecutionMode::default(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.throttle.cooldown = cooldown;
        self
    }
}
