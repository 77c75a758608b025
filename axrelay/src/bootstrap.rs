//! One-off environment preparation: directories, database, schema.

use anyhow::Context;
use axrelay_core::ledger::SqliteSubmissionLedger;
use tracing::info;

use crate::config::Config;

/// Creates every queue directory and the ledger database, then applies
/// migrations. Safe to run repeatedly.
pub async fn prepare(config: &Config) -> anyhow::Result<()> {
    let layout = &config.engine.layout;
    for dir in layout.all_dirs() {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    info!(
        base_dir = %layout.base_dir().display(),
        profiles = layout.profiles().len(),
        "queue directories ready"
    );

    let ledger_dir = config
        .ledger
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = ledger_dir {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let ledger = open_ledger(config, true).await?;
    ledger.close().await;
    info!(path = %config.ledger.path.display(), "ledger ready");
    Ok(())
}

/// Opens the ledger and brings its schema up to date.
pub async fn open_ledger(
    config: &Config,
    create_if_missing: bool,
) -> anyhow::Result<SqliteSubmissionLedger> {
    let path = &config.ledger.path;
    let ledger = SqliteSubmissionLedger::open(path, create_if_missing)
        .await
        .with_context(|| {
            format!(
                "failed to open ledger {} (run `axrelay setup` to create it)",
                path.display()
            )
        })?;
    ledger
        .migrate()
        .await
        .context("failed to apply ledger migrations")?;
    Ok(ledger)
}
