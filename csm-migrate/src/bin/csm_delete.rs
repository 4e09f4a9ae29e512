//! Recursive entry deletion (csm-delete)
//!
//! Deletes an entry and everything it references, children first. Use
//! `--dry-run` to list what would be deleted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use csm_common::config::{load_toml_config, ConfigResolver};
use csm_common::TargetEnvironment;
use csm_migrate::services::{ContentstackClient, EntryRepository, MatcherRegistry, RepositoryOptions, TreeDeleter};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for csm-delete
#[derive(Parser, Debug)]
#[command(name = "csm-delete")]
#[command(about = "Delete an entry and every entry it references")]
#[command(version)]
struct Args {
    /// Uid of the entry to delete
    uid: String,

    /// Target environment: dev, USBC, USBD, CABC or CABD
    #[arg(short, long, default_value = "dev", env = "CSM_ENVIRONMENT")]
    env: String,

    /// Content type of the entry
    #[arg(long, default_value = "feature_page")]
    content_type: String,

    /// List what would be deleted without deleting anything
    #[arg(long)]
    dry_run: bool,

    /// TOML file with pacing settings
    #[arg(short, long, env = "CSM_CONFIG")]
    config: Option<PathBuf>,
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
    let config = ConfigResolver::new(environment)
        .with_toml(toml)
        .resolve()
        .context("Failed to resolve configuration")?;

    let store = Arc::new(
        ContentstackClient::new(
            &config.content_store,
            &config.workflow.approved_stage_uid,
            Duration::from_millis(config.pacing.content_store_min_interval_ms),
        )
        .context("Failed to create content store client")?,
    );
    let repository = Arc::new(EntryRepository::new(
        store,
        RepositoryOptions::from_config(&config),
        MatcherRegistry::default(),
    ));

    info!(
        uid = %args.uid,
        content_type = %args.content_type,
        dry_run = args.dry_run,
        "Deleting entry tree"
    );
    let summary = TreeDeleter::new(repository, args.dry_run)
        .delete_tree(&args.content_type, &args.uid)
        .await;

    let listed = if args.dry_run { &summary.would_delete } else { &summary.deleted };
    let verb = if args.dry_run { "Would delete" } else { "Deleted" };
    for entry in listed {
        println!("{} {}", verb, entry);
    }
    for entry in &summary.already_absent {
        println!("Absent  {}", entry);
    }
    for (entry, reason) in &summary.failed {
        println!("FAILED  {}: {}", entry, reason);
    }
    println!(
        "{} {} entries, {} failures",
        verb,
        listed.len(),
        summary.failed.len()
    );

    std::process::exit(if summary.is_success() { 0 } else { 1 });
}
