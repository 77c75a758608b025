use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use axrelay_core::{
    appliance::{ApplianceApi, HttpApplianceClient},
    context::EngineContext,
    engine::Engine,
    hashing::hasher_for,
    ledger::SubmissionLedger,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{error, info, warn};

mod bootstrap;
mod config;
mod logging;

use config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "axrelay")]
#[command(
    about = "Spread queued files across malware analysis appliances and \
             file the verdicts"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll pending analyses, then dispatch new files (default)
    Run(RunArgs),
    /// Create queue directories and the ledger database, then exit
    Setup,
    /// Print one appliance's configuration document
    ApplianceConfig {
        /// Appliance name as configured
        name: String,
    },
    /// Print ledger totals per result state
    Status,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct RunArgs {
    /// Run setup before the dispatch pass
    #[arg(long, default_value_t = false)]
    setup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = ConfigLoaderOptions {
        config_path: cli.config,
        env_file: cli.env_file,
    };
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(options)
        .load()
        .context("failed to load configuration")?;

    logging::init(&config.logging)?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration loaded");
    }
    if !warnings.is_empty() {
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => warn!(
                    message = %warning.message,
                    hint = %hint,
                    "configuration warning"
                ),
                None => {
                    warn!(message = %warning.message, "configuration warning")
                }
            }
        }
    }

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run(&config, args).await,
        Command::Setup => bootstrap::prepare(&config).await,
        Command::ApplianceConfig { name } => {
            show_appliance_config(&config, &name).await
        }
        Command::Status => show_status(&config).await,
    }
}

fn http_client(config: &Config) -> anyhow::Result<HttpApplianceClient> {
    HttpApplianceClient::new(config.http.clone())
        .context("failed to build HTTP client")
}

async fn run(config: &Config, args: RunArgs) -> anyhow::Result<()> {
    if args.setup {
        bootstrap::prepare(config).await?;
    }

    let ledger = Arc::new(bootstrap::open_ledger(config, false).await?);
    let ctx = EngineContext::new(
        config.engine.clone(),
        ledger.clone(),
        Arc::new(http_client(config)?),
        hasher_for(config.engine.hash_algorithm),
        config.credentials.clone(),
    );

    let outcome = Engine::new(ctx).run().await;
    ledger.close().await;

    match outcome {
        Ok(_) => Ok(()),
        Err(err) => {
            error!(error = %err, "run aborted");
            Err(err).context("run aborted")
        }
    }
}

async fn show_appliance_config(
    config: &Config,
    name: &str,
) -> anyhow::Result<()> {
    let Some(appliance) = config
        .engine
        .appliances
        .iter()
        .find(|a| a.id.as_str() == name)
    else {
        bail!("no appliance named '{name}' in the configuration");
    };

    let client = http_client(config)?;
    let token = client
        .authenticate(appliance, &config.credentials)
        .await
        .with_context(|| format!("login to {appliance} failed"))?;

    let fetched = client.appliance_config(appliance, &token).await;
    if let Err(err) = client.end_session(appliance, &token).await {
        warn!(appliance = %appliance.id, error = %err, "logout failed");
    }

    let document = fetched
        .with_context(|| format!("failed to fetch config from {appliance}"))?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn show_status(config: &Config) -> anyhow::Result<()> {
    let ledger = bootstrap::open_ledger(config, false).await?;
    let counts = ledger
        .state_counts()
        .await
        .context("failed to read ledger totals")?;
    ledger.close().await;

    for (state, count) in counts {
        println!("{:<10} {count}", state.as_str());
    }
    Ok(())
}
