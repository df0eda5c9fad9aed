#![allow(unused)]

//! # contract: the seams between pipelines and remote services
//!
//! Pipelines never talk to S3 or the dataset registry directly. They hold an
//! `Arc<dyn BundleStore>` and an `Arc<dyn DatasetRegistry>` handed to them at
//! construction, so the same pipeline code runs against the real clients, an
//! in-memory object store, or `mockall` mocks.
//!
//! ## Implementations
//! - [`BundleStore`]: [`crate::download::ObjectStoreBundles`] (S3 via `object_store`).
//! - [`DatasetRegistry`]: the Hub client in the `rxiv-mirror` binary crate.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`; the mocks are exported when the
//! `test-export-mocks` feature is on (the default) so integration tests and
//! downstream crates can use them.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use mockall::{automock, predicate::*};

use crate::config::SourceCollection;
use crate::error::{RegistryError, StoreError};

/// Read access to remote bundle collections.
///
/// Implementors must be safe to share between concurrently running pipelines.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Every key in the collection (scoped by its prefix), in listing order,
    /// following pagination to the end. Any page failure fails the whole call.
    async fn list_keys(&self, collection: &SourceCollection) -> Result<Vec<String>, StoreError>;

    /// Download one object to `dest`, returning the number of bytes written.
    async fn fetch_to(
        &self,
        collection: &SourceCollection,
        key: &str,
        dest: &Path,
    ) -> Result<u64, StoreError>;
}

/// Destination repository for packaged archives: `<namespace>/<repo_name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDatasetTarget {
    pub namespace: String,
    pub repo_name: String,
}

impl RemoteDatasetTarget {
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.namespace, self.repo_name)
    }
}

/// Outcome of an idempotent repository creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoCreation {
    Created,
    AlreadyExists,
}

/// What the registry acknowledged after an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub repo_id: String,
    pub path_in_repo: String,
    pub size: u64,
    /// Commit identifier, when the registry reports one.
    pub commit: Option<String>,
}

/// Remote dataset registry operations used by the mirror.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DatasetRegistry: Send + Sync {
    /// Namespace (user name) of the authenticated principal.
    async fn whoami(&self) -> Result<String, RegistryError>;

    /// Create a dataset repository under the caller's namespace.
    /// An existing repository is not an error.
    async fn create_dataset_repo(
        &self,
        repo_name: &str,
        private: bool,
    ) -> Result<RepoCreation, RegistryError>;

    /// Upload `local_path` to `path_in_repo`, replacing whatever is there.
    async fn upload_file(
        &self,
        target: &RemoteDatasetTarget,
        local_path: &Path,
        path_in_repo: &str,
    ) -> Result<UploadReceipt, RegistryError>;
}
