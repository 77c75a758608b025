use once_cell::sync::Lazy;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

use axrelay_core::{
    appliance::{
        ApiVersion, Appliance, Credentials, HttpClientConfig, Operation,
    },
    config::{EngineConfig, ThrottleConfig},
    layout::{DirectoryLayout, StageDirs},
    types::Profile,
};

use super::{
    Config, ConfigMetadata, ConfigWarnings, LedgerConfig, LoggingConfig,
    sources::{
        EnvConfig, FileConfig, FileHttpConfig, FileLayoutConfig,
        FileLoggingConfig,
    },
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("axrelay.toml"),
        PathBuf::from("config/axrelay.toml"),
    ]
});

const DEFAULT_LEDGER_PATH: &str = "data/axrelay.db";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| ()),
            None => dotenvy::dotenv().map(|_| ()),
        };
        let env_file_loaded = match loaded {
            Ok(()) => true,
            Err(dotenvy::Error::Io(_)) => false,
            Err(err) => return Err(err.into()),
        };

        let env = EnvConfig::gather();
        let (file, config_path) = self.load_file_config(&env)?;

        compose(
            file.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS.iter().find(|c| c.exists()) {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok((Some(file_config), Some(path)))
    }
}

/// Merges file values with environment overrides and validates the result.
pub fn compose(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    if metadata.config_path.is_none() {
        warnings.push_with_hint(
            "No axrelay.toml detected; relying on environment variables",
            "Copy axrelay.example.toml to axrelay.toml and adjust it",
        );
    }

    let FileConfig {
        credentials: file_credentials,
        appliances: file_appliances,
        layout: file_layout,
        ledger: file_ledger,
        logging: file_logging,
        throttle: file_throttle,
        submission: file_submission,
        severity: file_severity,
        http: file_http,
        execution: file_execution,
    } = file;

    let username = env
        .username
        .clone()
        .or(file_credentials.username)
        .ok_or(ConfigLoadError::Invalid {
            field: "credentials.username",
            reason: "missing (set it in the file or AXRELAY_USERNAME)".into(),
        })?;
    let password = match (env.password.as_ref(), file_credentials.password) {
        (Some(password), _) => password.as_str().to_string(),
        (None, Some(password)) => {
            warnings.push_with_hint(
                "Appliance password read from the configuration file",
                "Prefer AXRELAY_PASSWORD in the environment or a .env file",
            );
            password
        }
        (None, None) => {
            return Err(ConfigLoadError::Invalid {
                field: "credentials.password",
                reason: "missing (set it in the file or AXRELAY_PASSWORD)"
                    .into(),
            });
        }
    };
    let credentials = Credentials::new(username, password);

    let appliances = compose_appliances(file_appliances)?;
    let layout = compose_layout(file_layout, &env)?;

    let cooldown = match file_throttle.cooldown {
        Some(raw) => {
            let parsed = parse_duration("throttle.cooldown", &raw)?;
            chrono::Duration::from_std(parsed).map_err(|_| {
                ConfigLoadError::Invalid {
                    field: "throttle.cooldown",
                    reason: format!("'{raw}' is out of range"),
                }
            })?
        }
        None => ThrottleConfig::default().cooldown,
    };

    let mut engine =
        EngineConfig::new(appliances, layout).with_cooldown(cooldown);
    if let Some(submission) = file_submission {
        engine.submission = submission;
    }
    if let Some(severity) = file_severity {
        if severity.major.trim().is_empty()
            || severity.minor.trim().is_empty()
        {
            return Err(ConfigLoadError::Invalid {
                field: "severity",
                reason: "severity codes must not be empty".into(),
            });
        }
        engine.severity = severity;
    }
    if let Some(mode) = file_execution.mode {
        engine.execution = mode;
    }
    if let Some(algorithm) = file_execution.hash_algorithm {
        engine.hash_algorithm = algorithm;
    }

    let http = compose_http(file_http, &mut warnings)?;

    let ledger = LedgerConfig {
        path: env
            .ledger_path
            .clone()
            .or(file_ledger.path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH)),
    };
    let logging = compose_logging(file_logging)?;

    Ok(ConfigLoad {
        config: Config {
            credentials,
            engine,
            http,
            ledger,
            logging,
            metadata,
        },
        warnings,
    })
}

fn compose_appliances(
    file: Vec<super::sources::FileApplianceConfig>,
) -> Result<Vec<Appliance>, ConfigLoadError> {
    if file.is_empty() {
        return Err(ConfigLoadError::Invalid {
            field: "appliances",
            reason: "at least one [[appliances]] entry is required".into(),
        });
    }
    let mut seen = HashSet::new();
    let mut appliances = Vec::with_capacity(file.len());
    for entry in file {
        let name = entry.name.trim();
        let address = entry.address.trim();
        if name.is_empty() || address.is_empty() {
            return Err(ConfigLoadError::Invalid {
                field: "appliances",
                reason: "every appliance needs a name and an address".into(),
            });
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigLoadError::Invalid {
                field: "appliances",
                reason: format!(
                    "appliance name '{name}' is used more than once"
                ),
            });
        }
        appliances.push(Appliance::new(name, address));
    }
    Ok(appliances)
}

fn compose_layout(
    file: FileLayoutConfig,
    env: &EnvConfig,
) -> Result<DirectoryLayout, ConfigLoadError> {
    let base_dir = env
        .base_dir
        .clone()
        .or(file.base_dir)
        .ok_or(ConfigLoadError::Invalid {
            field: "layout.base_dir",
            reason: "missing (set it in the file or AXRELAY_BASE_DIR)".into(),
        })?;

    if file.profiles.is_empty() {
        return Err(ConfigLoadError::Invalid {
            field: "layout.profiles",
            reason: "at least one profile is required".into(),
        });
    }
    let mut profiles = Vec::with_capacity(file.profiles.len());
    for profile in &file.profiles {
        let name = directory_name("layout.profiles", profile)?;
        profiles.push(Profile::new(name));
    }

    let defaults = StageDirs::default();
    let stage_dirs = StageDirs {
        pending: stage_name(
            "layout.pending_dir",
            file.pending_dir,
            defaults.pending,
        )?,
        malicious: stage_name(
            "layout.malicious_dir",
            file.malicious_dir,
            defaults.malicious,
        )?,
        benign: stage_name(
            "layout.benign_dir",
            file.benign_dir,
            defaults.benign,
        )?,
        unknown: stage_name(
            "layout.unknown_dir",
            file.unknown_dir,
            defaults.unknown,
        )?,
    };
    let names: HashSet<&str> = [
        stage_dirs.pending.as_str(),
        stage_dirs.malicious.as_str(),
        stage_dirs.benign.as_str(),
        stage_dirs.unknown.as_str(),
    ]
    .into_iter()
    .collect();
    if names.len() != 4 {
        return Err(ConfigLoadError::Invalid {
            field: "layout",
            reason: "stage directory names must be distinct".into(),
        });
    }

    Ok(DirectoryLayout::new(base_dir, profiles, stage_dirs))
}

fn stage_name(
    field: &'static str,
    value: Option<String>,
    default: String,
) -> Result<String, ConfigLoadError> {
    match value {
        Some(value) => directory_name(field, &value),
        None => Ok(default),
    }
}

/// A single path component: non-empty, no separators, not `.` or `..`.
fn directory_name(
    field: &'static str,
    value: &str,
) -> Result<String, ConfigLoadError> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        return Err(ConfigLoadError::Invalid {
            field,
            reason: format!("'{value}' is not a usable directory name"),
        });
    }
    Ok(trimmed.to_string())
}

fn compose_http(
    file: FileHttpConfig,
    warnings: &mut ConfigWarnings,
) -> Result<HttpClientConfig, ConfigLoadError> {
    let defaults = HttpClientConfig::default();

    let scheme = file
        .scheme
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or(defaults.scheme);
    if scheme != "https" && scheme != "http" {
        return Err(ConfigLoadError::Invalid {
            field: "http.scheme",
            reason: format!("'{scheme}' is not http or https"),
        });
    }
    if scheme == "http" {
        warnings.push("Appliance traffic is sent over plain http");
    }

    let timeout = match file.timeout {
        Some(raw) => parse_duration("http.timeout", &raw)?,
        None => defaults.timeout,
    };

    let verify_tls = file.verify_tls.unwrap_or(defaults.verify_tls);
    if !verify_tls {
        warnings.push_with_hint(
            "TLS certificate verification is disabled",
            "Install the appliance CA and set http.verify_tls = true",
        );
    }

    let mut version_overrides = HashMap::new();
    for (operation, version) in file.versions {
        let invalid = |reason: String| ConfigLoadError::Invalid {
            field: "http.versions",
            reason,
        };
        let operation: Operation =
            operation.parse().map_err(|e| invalid(format!("{e}")))?;
        let version: ApiVersion =
            version.parse().map_err(|e| invalid(format!("{e}")))?;
        version_overrides.insert(operation, version);
    }

    Ok(HttpClientConfig {
        scheme,
        port: file.port.unwrap_or(defaults.port),
        timeout,
        verify_tls,
        version_overrides,
    })
}

fn compose_logging(
    file: FileLoggingConfig,
) -> Result<LoggingConfig, ConfigLoadError> {
    let defaults = LoggingConfig::default();
    let file_name = match file.file_name {
        Some(name) => directory_name("logging.file_name", &name)?,
        None => defaults.file_name,
    };
    Ok(LoggingConfig {
        level: file.level.unwrap_or(defaults.level),
        directory: file.directory,
        file_name,
        max_bytes: file.max_bytes.unwrap_or(defaults.max_bytes),
        backups: file.backups.unwrap_or(defaults.backups),
    })
}

fn parse_duration(
    field: &'static str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| {
        ConfigLoadError::InvalidDuration {
            field,
            value: raw.to_string(),
            source,
        }
    })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
