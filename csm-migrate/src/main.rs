//! Content tree migration (csm-migrate) - Main entry point
//!
//! Reads an exported page document, materializes it into the content store
//! for one target environment, publishes it and prints the run report. The
//! exit code is 0 on success, 2 when the page published with omitted
//! subtrees, 1 otherwise.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use csm_common::config::{load_toml_config, ConfigResolver};
use csm_common::TargetEnvironment;
use csm_migrate::services::{BrandfolderClient, CacheFlusher, ContentstackClient, MatcherRegistry};
use csm_migrate::MigrationRun;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for csm-migrate
#[derive(Parser, Debug)]
#[command(name = "csm-migrate")]
#[command(about = "Migrate a content tree into the content store and publish it")]
#[command(version)]
struct Args {
    /// Exported page document ({"entry": {...}})
    #[arg(short, long, env = "INPUT_JSON_PATH")]
    input: PathBuf,

    /// Target environment: dev, USBC, USBD, CABC or CABD
    #[arg(short, long, default_value = "dev", env = "CSM_ENVIRONMENT")]
    env: String,

    /// Content type of the root entry (defaults to the configured root type)
    #[arg(long)]
    content_type: Option<String>,

    /// Always create new entries instead of reusing matching ones
    #[arg(long)]
    no_reuse: bool,

    /// TOML file with pacing, workflow and materialization settings
    #[arg(short, long, env = "CSM_CONFIG")]
    config: Option<PathBuf>,

    /// Also write the report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let toml = load_toml_config(args.config.as_deref()).context("Failed to load config file")?;

    // Initialize tracing
    let default_filter = format!(
        "csm_migrate={level},csm_common={level}",
        level = toml.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let environment: TargetEnvironment = args.env.parse()?;
    let mut config = ConfigResolver::new(environment)
        .with_toml(toml)
        .resolve()
        .context("Failed to resolve configuration")?;
    if args.no_reuse {
        config.entry_reuse_enabled = false;
    }

    info!("Reading {}", args.input.display());
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", args.input.display()))?;

    let content_store = Arc::new(
        ContentstackClient::new(
            &config.content_store,
            &config.workflow.approved_stage_uid,
            Duration::from_millis(config.pacing.content_store_min_interval_ms),
        )
        .context("Failed to create content store client")?,
    );
    let asset_store = Arc::new(
        BrandfolderClient::new(
            &config.asset_store,
            Duration::from_millis(config.pacing.asset_store_min_interval_ms),
        )
        .context("Failed to create asset store client")?,
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping new work and rolling back");
                cancel.cancel();
            }
        }
    });

    let cache_flush_base_url = config.content_store.cache_flush_base_url.clone();
    let publish_settle = Duration::from_millis(config.pacing.publish_settle_ms);
    let mut run = MigrationRun::new(
        config,
        content_store,
        asset_store,
        MatcherRegistry::default(),
        cancel,
    );
    if let Some(base) = cache_flush_base_url {
        run = run.with_cache_flusher(
            CacheFlusher::new(&base, publish_settle).context("Failed to create cache flush client")?,
        );
    }

    let root = run.parse_document(&document, args.content_type.as_deref())?;
    info!(run_id = %run.run_id(), nodes = root.node_count(), "Content tree parsed");

    let report = run.execute(&root).await;
    println!("{}", report);

    if let Some(path) = &args.report_json {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    std::process::exit(report.exit_code());
}
