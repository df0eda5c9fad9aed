//! Registry-side steps: resolving the destination repository once at startup
//! and uploading each packaged archive.

use std::path::Path;
use tracing::{error, info};

use crate::contract::{DatasetRegistry, RemoteDatasetTarget, RepoCreation, UploadReceipt};
use crate::error::RegistryError;

/// Ensure the dataset repository exists (tolerating "already exists") and
/// resolve the caller's namespace to form the full target.
pub async fn prepare_target(
    registry: &dyn DatasetRegistry,
    repo_name: &str,
    private: bool,
) -> Result<RemoteDatasetTarget, RegistryError> {
    match registry.create_dataset_repo(repo_name, private).await? {
        RepoCreation::Created => info!(repo_name, private, "Created dataset repository"),
        RepoCreation::AlreadyExists => info!(repo_name, "Dataset repository already exists"),
    }
    let namespace = registry.whoami().await?;
    let target = RemoteDatasetTarget {
        namespace,
        repo_name: repo_name.to_string(),
    };
    info!(repo_id = %target.repo_id(), "Resolved dataset target");
    Ok(target)
}

/// Upload one archive, replacing whatever sits at `path_in_repo`.
pub async fn publish_archive(
    registry: &dyn DatasetRegistry,
    target: &RemoteDatasetTarget,
    archive: &Path,
    path_in_repo: &str,
) -> Result<UploadReceipt, RegistryError> {
    info!(
        archive = %archive.display(),
        repo_id = %target.repo_id(),
        path_in_repo,
        "Uploading archive"
    );
    registry
        .upload_file(target, archive, path_in_repo)
        .await
        .map_err(|e| {
            error!(repo_id = %target.repo_id(), path_in_repo, error = %e, "Upload failed");
            e
        })
}
