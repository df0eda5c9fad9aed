//! High-level pipeline: list → filter → extract (isolated, per item) → package → publish.
//!
//! One [`Pipeline`] mirrors one source collection. The binary builds one per
//! configured collection from the same shared client handles and runs them
//! concurrently; nothing mutable is shared between them.
//!
//! # Stages
//! `Preparing → Listing → Filtering → Extracting(n) → Packaging → Publishing → Done`.
//! Preparing, Listing, Packaging and Publishing are fatal on failure and end
//! the run with a [`PipelineError`]. Individual items in Extracting never are:
//! they become [`ItemFailure`] entries in the [`PipelineReport`].
//!
//! # Output folder
//! The folder is created if absent. Under [`OutputPolicy::Accumulate`] (the
//! default) documents from earlier runs stay and end up in the archive too;
//! [`OutputPolicy::Clear`] empties the folder first.
//!
//! # Running
//! - [`Pipeline::run`] drives one run to completion on the current task.
//! - [`Pipeline::spawn`] starts it on the runtime and returns a [`PipelineHandle`]
//!   the caller can await, abort, or drop to leave it running detached.

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::{
    ExtractionSettings, MirrorConfig, OutputPolicy, PipelineSpec, SourceCollection,
};
use crate::contract::{BundleStore, DatasetRegistry, RemoteDatasetTarget, UploadReceipt};
use crate::download::select_bundles;
use crate::error::{ConfigError, PipelineError};
use crate::extract::{ExtractedDocument, Extractor, ItemOutcome};
use crate::package::{package_folder_async, PackagedArchive};
use crate::progress::PipelineProgress;
use crate::publish::publish_archive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Preparing,
    Listing,
    Filtering,
    Extracting,
    Packaging,
    Publishing,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Preparing => "preparing",
            PipelineStage::Listing => "listing",
            PipelineStage::Filtering => "filtering",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Packaging => "packaging",
            PipelineStage::Publishing => "publishing",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A bundle that could not be turned into a document.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub key: String,
    pub error: String,
}

/// Everything a finished run did.
#[derive(Debug)]
pub struct PipelineReport {
    pub name: String,
    pub bucket: String,
    /// Keys returned by the listing, bundles or not.
    pub listed: usize,
    /// Keys that passed the bundle filter.
    pub bundles: usize,
    pub extracted: Vec<ExtractedDocument>,
    pub failures: Vec<ItemFailure>,
    pub archive: PackagedArchive,
    pub receipt: UploadReceipt,
}

impl PipelineReport {
    /// One-line summary for operators.
    pub fn status_line(&self) -> String {
        format!(
            "{}: {} of {} bundles extracted, {} failed; published {} to {}",
            self.name,
            self.extracted.len(),
            self.bundles,
            self.failures.len(),
            self.receipt.path_in_repo,
            self.receipt.repo_id,
        )
    }
}

pub struct Pipeline {
    name: String,
    collection: SourceCollection,
    remote_path: String,
    output_folder: PathBuf,
    scratch_dir: PathBuf,
    extraction: ExtractionSettings,
    pattern: Regex,
    store: Arc<dyn BundleStore>,
    registry: Arc<dyn DatasetRegistry>,
    target: RemoteDatasetTarget,
    progress: PipelineProgress,
}

impl Pipeline {
    pub fn new(
        config: &MirrorConfig,
        spec: &PipelineSpec,
        store: Arc<dyn BundleStore>,
        registry: Arc<dyn DatasetRegistry>,
        target: RemoteDatasetTarget,
    ) -> Result<Self, ConfigError> {
        let pattern = config.extraction.compile_pattern()?;
        Ok(Self {
            name: spec.relative_output(),
            collection: spec.collection(),
            remote_path: spec.remote_archive_path(),
            output_folder: config.output_folder(spec),
            scratch_dir: config.scratch_dir(spec),
            extraction: config.extraction.clone(),
            pattern,
            store,
            registry,
            target,
            progress: PipelineProgress::hidden(),
        })
    }

    pub fn with_progress(mut self, progress: PipelineProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Drive one full run.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let span = info_span!("pipeline", name = %self.name, bucket = %self.collection.bucket);
        let result = self.run_stages().instrument(span).await;
        match &result {
            Ok(report) => {
                self.progress.finish("done");
                info!(pipeline = %self.name, "{}", report.status_line());
            }
            Err(e) => {
                self.progress.abandon(e.stage());
                error!(pipeline = %self.name, stage = e.stage(), error = %e, "Pipeline failed");
            }
        }
        result
    }

    async fn run_stages(&self) -> Result<PipelineReport, PipelineError> {
        self.enter(PipelineStage::Preparing);
        self.prepare_folders().await?;

        self.enter(PipelineStage::Listing);
        let keys = self
            .store
            .list_keys(&self.collection)
            .await
            .map_err(PipelineError::Listing)?;
        let listed = keys.len();

        self.enter(PipelineStage::Filtering);
        let bundles = select_bundles(keys, &self.extraction.bundle_suffix);
        info!(listed, bundles = bundles.len(), "Selected bundles");

        self.enter(PipelineStage::Extracting);
        let extractor = Extractor::new(
            self.store.clone(),
            self.collection.clone(),
            self.output_folder.clone(),
            self.scratch_dir.clone(),
            self.extraction.document_dir.clone(),
            self.pattern.clone(),
            self.extraction.match_policy(),
        );
        self.progress.start(bundles.len());
        let mut extracted = Vec::new();
        let mut failures = Vec::new();
        for key in &bundles {
            match extractor.isolate(key).await {
                ItemOutcome::Extracted(document) => extracted.push(document),
                ItemOutcome::Failed { key, error } => failures.push(ItemFailure {
                    key,
                    error: error.to_string(),
                }),
            }
            self.progress.item_done(key);
        }
        info!(
            extracted = extracted.len(),
            failed = failures.len(),
            "Extraction finished"
        );

        self.enter(PipelineStage::Packaging);
        let archive = package_folder_async(self.output_folder.clone())
            .await
            .map_err(PipelineError::Packaging)?;

        self.enter(PipelineStage::Publishing);
        let receipt = publish_archive(
            self.registry.as_ref(),
            &self.target,
            &archive.path,
            &self.remote_path,
        )
        .await
        .map_err(PipelineError::Publishing)?;
        debug!(?receipt, "Upload receipt");

        self.enter(PipelineStage::Done);
        Ok(PipelineReport {
            name: self.name.clone(),
            bucket: self.collection.bucket.clone(),
            listed,
            bundles: bundles.len(),
            extracted,
            failures,
            archive,
            receipt,
        })
    }

    fn enter(&self, stage: PipelineStage) {
        info!(pipeline = %self.name, %stage, "Entering stage");
    }

    async fn prepare_folders(&self) -> Result<(), PipelineError> {
        let preparing = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| PipelineError::Preparing { path, source }
        };
        if self.extraction.output_policy() == OutputPolicy::Clear
            && tokio::fs::try_exists(&self.output_folder)
                .await
                .map_err(preparing(&self.output_folder))?
        {
            info!(path = %self.output_folder.display(), "Clearing output folder");
            tokio::fs::remove_dir_all(&self.output_folder)
                .await
                .map_err(preparing(&self.output_folder))?;
        }
        tokio::fs::create_dir_all(&self.output_folder)
            .await
            .map_err(preparing(&self.output_folder))?;
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(preparing(&self.scratch_dir))?;
        Ok(())
    }

    /// Start the run on the tokio runtime.
    pub fn spawn(self) -> PipelineHandle {
        let name = self.name.clone();
        let handle = tokio::spawn(async move { self.run().await });
        PipelineHandle { name, handle }
    }
}

/// A running pipeline. Dropping the handle detaches the task; it keeps running.
pub struct PipelineHandle {
    name: String,
    handle: JoinHandle<Result<PipelineReport, PipelineError>>,
}

impl PipelineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the run to end. A panicked or aborted task becomes
    /// [`PipelineError::Aborted`].
    pub async fn join(self) -> Result<PipelineReport, PipelineError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Aborted(e.to_string())),
        }
    }
}

/// Build one pipeline per configured collection, sharing the client handles.
pub fn build_pipelines(
    config: &MirrorConfig,
    store: Arc<dyn BundleStore>,
    registry: Arc<dyn DatasetRegistry>,
    target: &RemoteDatasetTarget,
) -> Result<Vec<Pipeline>, ConfigError> {
    config.validate()?;
    config
        .pipelines
        .iter()
        .map(|spec| {
            Pipeline::new(
                config,
                spec,
                store.clone(),
                registry.clone(),
                target.clone(),
            )
        })
        .collect()
}

/// Await every handle. A failure in one never cancels the others.
pub async fn join_all(
    handles: Vec<PipelineHandle>,
) -> Vec<(String, Result<PipelineReport, PipelineError>)> {
    let joins = handles.into_iter().map(|handle| async move {
        let name = handle.name().to_string();
        (name, handle.join().await)
    });
    futures::future::join_all(joins).await
}
