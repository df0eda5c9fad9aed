//! Error types for each pipeline concern.
//!
//! Item-level errors ([`StoreError`] during fetch, [`ExtractError`]) are
//! recoverable and end up in a [`crate::extract::ItemOutcome`]. The others
//! terminate the owning pipeline through [`PipelineError`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config declares no pipelines")]
    NoPipelines,
    #[error("config field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("two pipelines write to the same output folder `{0}`")]
    DuplicateOutput(String),
    #[error("output folder `{second}` overlaps output folder `{first}`")]
    NestedOutput { first: String, second: String },
    #[error("invalid document pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to build object store client for bucket {bucket}: {source}")]
    Client {
        bucket: String,
        #[source]
        source: object_store::Error,
    },
    #[error("listing {bucket}/{prefix} failed: {source}")]
    List {
        bucket: String,
        prefix: String,
        #[source]
        source: object_store::Error,
    },
    #[error("fetching {key} failed: {source}")]
    Fetch {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("writing {key} to {path} failed: {source}")]
    Write {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] StoreError),
    #[error("bundle is not a readable zip container: {0}")]
    Unpack(#[from] zip::result::ZipError),
    #[error("no document matching `{pattern}` under {dir}/")]
    NoDocument { dir: String, pattern: String },
    #[error("{count} documents match `{pattern}` under {dir}/ and strict matching is on")]
    AmbiguousDocument {
        dir: String,
        pattern: String,
        count: usize,
    },
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("extraction task panicked or was cancelled: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("output folder {0} does not exist")]
    MissingFolder(PathBuf),
    #[error("walking {path} failed: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("zip write failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("packaging task panicked or was cancelled: {0}")]
    Task(String),
}

/// Errors reported by a [`crate::contract::DatasetRegistry`] implementation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("registry returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("unexpected registry response: {0}")]
    Protocol(String),
    #[error("i/o failure reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal pipeline failures. Each variant names the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("listing failed: {0}")]
    Listing(#[source] StoreError),
    #[error("preparing {path} failed: {source}")]
    Preparing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("packaging failed: {0}")]
    Packaging(#[source] PackageError),
    #[error("publishing failed: {0}")]
    Publishing(#[source] RegistryError),
    #[error("pipeline task ended abnormally: {0}")]
    Aborted(String),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Listing(_) => "listing",
            PipelineError::Preparing { .. } => "preparing",
            PipelineError::Packaging(_) => "packaging",
            PipelineError::Publishing(_) => "publishing",
            PipelineError::Aborted(_) => "aborted",
        }
    }
}
