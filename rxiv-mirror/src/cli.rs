/// # rxiv-mirror CLI
///
/// Command parsing and orchestration for the `rxiv-mirror` binary. All
/// pipeline logic lives in `rxiv-mirror-core`; this module loads config and
/// secrets, builds the shared clients, and starts one pipeline per
/// configured collection.
///
/// ## Commands
/// - `sync --config <file>`: mirror every configured collection concurrently
///   and exit non-zero if any pipeline failed.
/// - `list --config <file>`: print the bundle keys each collection holds,
///   without fetching anything.
///
/// For programmatic use and integration tests call [`run`] with a constructed [`Cli`].
use crate::load_config::{load_config, load_registry_token, load_store_credentials};
use crate::upload::HubClient;
use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use rxiv_mirror_core::config::MirrorConfig;
use rxiv_mirror_core::contract::{BundleStore, DatasetRegistry};
use rxiv_mirror_core::download::{list_bundles, ObjectStoreBundles};
use rxiv_mirror_core::progress::PipelineProgress;
use rxiv_mirror_core::publish::prepare_target;
use rxiv_mirror_core::synchronise::{build_pipelines, join_all};
use std::path::PathBuf;
use std::sync::Arc;

/// Mirror preprint MECA bundles from S3 into a Hugging Face dataset.
#[derive(Parser)]
#[clap(
    name = "rxiv-mirror",
    version,
    about = "Mirror bioRxiv/medRxiv MECA dumps from requester-pays S3 into a Hugging Face dataset"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured pipeline: list, extract, package and publish
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Do not draw progress bars
        #[clap(long)]
        no_progress: bool,
    },
    /// List the bundle keys of every configured collection
    List {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn store_from_env(config: &MirrorConfig) -> Result<ObjectStoreBundles> {
    let credentials = load_store_credentials()?;
    let buckets = config.pipelines.iter().map(|p| p.bucket.as_str());
    Ok(ObjectStoreBundles::s3(&config.store, &credentials, buckets)?)
}

async fn sync(config: MirrorConfig, no_progress: bool) -> Result<()> {
    // Both secrets are checked before any remote call.
    let store = store_from_env(&config)?;
    let token = load_registry_token()?;
    let store: Arc<dyn BundleStore> = Arc::new(store);
    let registry: Arc<dyn DatasetRegistry> = Arc::new(HubClient::new(&config.registry, token)?);

    let target = prepare_target(
        registry.as_ref(),
        &config.registry.repo_name,
        config.registry.private,
    )
    .await?;

    let multi = MultiProgress::new();
    let handles = build_pipelines(&config, store, registry, &target)?
        .into_iter()
        .map(|pipeline| {
            let progress = if no_progress {
                PipelineProgress::hidden()
            } else {
                PipelineProgress::attach(&multi, pipeline.name())
            };
            pipeline.with_progress(progress).spawn()
        })
        .collect::<Vec<_>>();
    tracing::info!(command = "sync", pipelines = handles.len(), "Pipelines started");

    let mut failed = Vec::new();
    for (name, result) in join_all(handles).await {
        match result {
            Ok(report) => {
                println!("{}", report.status_line());
                for failure in &report.failures {
                    println!("  failed {}: {}", failure.key, failure.error);
                }
            }
            Err(e) => {
                println!("{name}: failed during {}: {e}", e.stage());
                failed.push(name);
            }
        }
    }

    if failed.is_empty() {
        tracing::info!(command = "sync", "Synchronisation complete");
        Ok(())
    } else {
        tracing::error!(command = "sync", failed = ?failed, "Synchronisation failed");
        Err(anyhow::anyhow!(
            "{} of {} pipelines failed: {}",
            failed.len(),
            config.pipelines.len(),
            failed.join(", ")
        ))
    }
}

async fn list(config: MirrorConfig) -> Result<()> {
    let store = store_from_env(&config)?;
    for spec in &config.pipelines {
        let collection = spec.collection();
        let listing = list_bundles(&store, &collection, &config.extraction.bundle_suffix).await?;
        println!(
            "{}/{}: {} bundles of {} keys",
            collection.bucket,
            collection.prefix_str(),
            listing.bundles.len(),
            listing.total_keys
        );
        for key in &listing.bundles {
            println!("  {key}");
        }
    }
    Ok(())
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            no_progress,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", "Starting synchronisation");
            sync(config, no_progress).await
        }
        Commands::List { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "list", "Listing bundles");
            list(config).await
        }
    }
}
