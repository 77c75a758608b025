use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::LoggingConfig;

/// Installs the global subscriber: stderr always, plus an append-only log
/// file when a directory is configured. `RUST_LOG` overrides the configured
/// level.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let file_layer = match config.file_path() {
        Some(path) => {
            let file = open_log_file(&path, config.max_bytes, config.backups)
                .with_context(|| {
                    format!("failed to open log file {}", path.display())
                })?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn open_log_file(
    path: &Path,
    max_bytes: u64,
    backups: usize,
) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    rotate_if_oversized(path, max_bytes, backups)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Shifts `log`, `log.1`, ... `log.{backups-1}` up by one when `log` has
/// grown past `max_bytes`. The oldest backup is overwritten.
pub fn rotate_if_oversized(
    path: &Path,
    max_bytes: u64,
    backups: usize,
) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size <= max_bytes {
        return Ok(false);
    }
    if backups == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    for index in (1..backups).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            fs::rename(&from, backup_path(path, index + 1))?;
        }
    }
    fs::rename(path, backup_path(path, 1))?;
    Ok(true)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}
