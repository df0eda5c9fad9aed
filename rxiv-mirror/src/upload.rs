//! # Hub client
//!
//! [`HubClient`] is the registry the binary hands to every pipeline. It speaks
//! the Hub's REST API directly with `reqwest`:
//!
//! - identity: `GET /api/whoami-v2`
//! - repository creation: `POST /api/repos/create` (HTTP 409 means it exists)
//! - upload: `preupload` to learn whether the file goes inline or through LFS,
//!   the git-LFS batch API for large files (single PUT or multipart), then one
//!   NDJSON `commit` that adds or replaces the file at its path.
//!
//! Construct it with [`HubClient::new`] from the registry settings and the
//! token read by [`crate::load_config::load_registry_token`].

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub use rxiv_mirror_core::contract::{RemoteDatasetTarget, RepoCreation, UploadReceipt};
use rxiv_mirror_core::config::RegistrySettings;
use rxiv_mirror_core::contract::DatasetRegistry;
use rxiv_mirror_core::error::RegistryError;

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";
const SAMPLE_LEN: usize = 512;

pub struct HubClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    revision: String,
}

impl HubClient {
    pub fn new(settings: &RegistrySettings, token: String) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("rxiv-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Http {
                url: settings.endpoint.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(
            endpoint = %settings.endpoint,
            revision = %settings.revision,
            token_set = !token.is_empty(),
            "Initialised HubClient"
        );
        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            token,
            revision: settings.revision.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.endpoint, path)
    }

    fn lfs_batch_url(&self, target: &RemoteDatasetTarget) -> String {
        format!(
            "{}/datasets/{}.git/info/lfs/objects/batch",
            self.endpoint,
            target.repo_id()
        )
    }
}

fn transport(url: &str) -> impl FnOnce(reqwest::Error) -> RegistryError + '_ {
    move |e| RegistryError::Http {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Turn a non-success status into [`RegistryError::Status`] with the body attached.
async fn check(response: Response, url: &str) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
    tracing::error!(%status, url, body = %body, "Registry returned error");
    Err(RegistryError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn json_body<T: for<'de> Deserialize<'de>>(response: Response, url: &str) -> Result<T, RegistryError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RegistryError::Protocol(format!("decoding response from {url}: {e}")))
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path: String,
    upload_mode: String,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    #[serde(default)]
    upload: Option<LfsAction>,
    #[serde(default)]
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    commit_oid: Option<String>,
}

/// Size, sha256 and leading sample of a local file.
#[derive(Debug, Clone)]
struct FileInfo {
    path: PathBuf,
    size: u64,
    sha256: String,
    sample: Vec<u8>,
}

fn inspect_file(path: &Path) -> std::io::Result<FileInfo> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let mut sample = vec![0u8; SAMPLE_LEN.min(size as usize)];
    file.read_exact(&mut sample)?;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(FileInfo {
        path: path.to_path_buf(),
        size,
        sha256: format!("{:x}", hasher.finalize()),
        sample,
    })
}

/// Body of a commit: a header line followed by one operation line.
fn commit_payload(summary: &str, operation: serde_json::Value) -> String {
    let header = json!({
        "key": "header",
        "value": { "summary": summary, "description": "" }
    });
    format!("{header}\n{operation}\n")
}

fn regular_file_operation(path_in_repo: &str, content: &[u8]) -> serde_json::Value {
    json!({
        "key": "file",
        "value": {
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "path": path_in_repo,
            "encoding": "base64"
        }
    })
}

fn lfs_file_operation(path_in_repo: &str, sha256: &str) -> serde_json::Value {
    json!({
        "key": "lfsFile",
        "value": { "path": path_in_repo, "algo": "sha256", "oid": sha256 }
    })
}

/// Split a multipart upload header into the chunk size and the part URLs,
/// ordered by part number.
fn multipart_plan(header: &HashMap<String, String>) -> Result<(u64, Vec<(u32, String)>), RegistryError> {
    let chunk_size = header
        .get("chunk_size")
        .ok_or_else(|| RegistryError::Protocol("multipart header without chunk_size".into()))?
        .parse::<u64>()
        .map_err(|e| RegistryError::Protocol(format!("invalid chunk_size: {e}")))?;
    if chunk_size == 0 {
        return Err(RegistryError::Protocol("chunk_size of zero".into()));
    }
    let mut parts = header
        .iter()
        .filter_map(|(k, v)| k.parse::<u32>().ok().map(|n| (n, v.clone())))
        .collect::<Vec<_>>();
    parts.sort_by_key(|(n, _)| *n);
    if parts.is_empty() {
        return Err(RegistryError::Protocol("multipart header lists no parts".into()));
    }
    Ok((chunk_size, parts))
}

impl HubClient {
    async fn upload_mode(
        &self,
        target: &RemoteDatasetTarget,
        info: &FileInfo,
        path_in_repo: &str,
    ) -> Result<String, RegistryError> {
        let url = self.api_url(&format!(
            "datasets/{}/preupload/{}",
            target.repo_id(),
            self.revision
        ));
        let body = json!({
            "files": [{
                "path": path_in_repo,
                "sample": base64::engine::general_purpose::STANDARD.encode(&info.sample),
                "size": info.size,
            }]
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(transport(&url))?;
        let parsed: PreuploadResponse = json_body(check(response, &url).await?, &url).await?;
        parsed
            .files
            .into_iter()
            .find(|f| f.path == path_in_repo)
            .map(|f| f.upload_mode)
            .ok_or_else(|| RegistryError::Protocol(format!("preupload did not mention {path_in_repo}")))
    }

    /// Push the file content to LFS storage. Returns without uploading when the
    /// server already holds the object.
    async fn upload_lfs(&self, target: &RemoteDatasetTarget, info: &FileInfo) -> Result<(), RegistryError> {
        let url = self.lfs_batch_url(target);
        let body = json!({
            "operation": "upload",
            "transfers": ["basic", "multipart"],
            "objects": [{ "oid": info.sha256, "size": info.size }],
            "hash_algo": "sha256",
            "ref": { "name": self.revision },
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, LFS_CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .map_err(transport(&url))?;
        let batch: LfsBatchResponse = json_body(check(response, &url).await?, &url).await?;
        let object = batch
            .objects
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::Protocol("LFS batch returned no objects".into()))?;
        if let Some(err) = object.error {
            return Err(RegistryError::Protocol(format!(
                "LFS rejected object {}: {} ({})",
                info.sha256, err.message, err.code
            )));
        }
        let Some(actions) = object.actions else {
            tracing::info!(oid = %info.sha256, "LFS object already present, skipping content upload");
            return Ok(());
        };

        if let Some(upload) = &actions.upload {
            if upload.header.contains_key("chunk_size") {
                self.upload_multipart(info, upload).await?;
            } else {
                self.upload_single(info, upload).await?;
            }
        }
        if let Some(verify) = &actions.verify {
            let mut request = self
                .http
                .post(&verify.href)
                .bearer_auth(&self.token)
                .json(&json!({ "oid": info.sha256, "size": info.size }));
            for (k, v) in &verify.header {
                request = request.header(k.as_str(), v.as_str());
            }
            let response = request.send().await.map_err(transport(&verify.href))?;
            check(response, &verify.href).await?;
        }
        Ok(())
    }

    async fn upload_single(&self, info: &FileInfo, action: &LfsAction) -> Result<(), RegistryError> {
        let bytes = tokio::fs::read(&info.path).await.map_err(|source| RegistryError::Io {
            path: info.path.clone(),
            source,
        })?;
        let mut request = self.http.put(&action.href).body(bytes);
        for (k, v) in &action.header {
            request = request.header(k.as_str(), v.as_str());
        }
        let response = request.send().await.map_err(transport(&action.href))?;
        check(response, &action.href).await?;
        tracing::info!(oid = %info.sha256, size = info.size, "Uploaded LFS object");
        Ok(())
    }

    async fn upload_multipart(&self, info: &FileInfo, action: &LfsAction) -> Result<(), RegistryError> {
        let (chunk_size, parts) = multipart_plan(&action.header)?;
        let io_err = |source| RegistryError::Io {
            path: info.path.clone(),
            source,
        };
        let mut file = tokio::fs::File::open(&info.path).await.map_err(io_err)?;
        let mut completed = Vec::with_capacity(parts.len());

        for (index, (part_number, part_url)) in parts.iter().enumerate() {
            let offset = index as u64 * chunk_size;
            file.seek(std::io::SeekFrom::Start(offset))
                .await
                .map_err(|source| RegistryError::Io {
                    path: info.path.clone(),
                    source,
                })?;
            let mut chunk = Vec::with_capacity(chunk_size.min(info.size) as usize);
            (&mut file)
                .take(chunk_size)
                .read_to_end(&mut chunk)
                .await
                .map_err(|source| RegistryError::Io {
                    path: info.path.clone(),
                    source,
                })?;

            let response = self
                .http
                .put(part_url)
                .body(chunk)
                .send()
                .await
                .map_err(transport(part_url))?;
            let response = check(response, part_url).await?;
            let etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| RegistryError::Protocol(format!("part {part_number} response has no ETag")))?
                .to_string();
            tracing::debug!(part = part_number, parts = parts.len(), "Uploaded LFS part");
            completed.push(json!({ "partNumber": part_number, "etag": etag }));
        }

        let response = self
            .http
            .post(&action.href)
            .json(&json!({ "oid": info.sha256, "parts": completed }))
            .send()
            .await
            .map_err(transport(&action.href))?;
        check(response, &action.href).await?;
        tracing::info!(oid = %info.sha256, parts = parts.len(), "Completed multipart LFS upload");
        Ok(())
    }

    async fn commit(
        &self,
        target: &RemoteDatasetTarget,
        payload: String,
    ) -> Result<Option<String>, RegistryError> {
        let url = self.api_url(&format!(
            "datasets/{}/commit/{}",
            target.repo_id(),
            self.revision
        ));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .map_err(transport(&url))?;
        let parsed: CommitResponse = json_body(check(response, &url).await?, &url).await?;
        Ok(parsed.commit_oid)
    }
}

#[async_trait]
impl DatasetRegistry for HubClient {
    async fn whoami(&self) -> Result<String, RegistryError> {
        let url = self.api_url("whoami-v2");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport(&url))?;
        let me: WhoAmI = json_body(check(response, &url).await?, &url).await?;
        tracing::info!(name = %me.name, "Resolved registry identity");
        Ok(me.name)
    }

    async fn create_dataset_repo(
        &self,
        repo_name: &str,
        private: bool,
    ) -> Result<RepoCreation, RegistryError> {
        let url = self.api_url("repos/create");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "type": "dataset", "name": repo_name, "private": private }))
            .send()
            .await
            .map_err(transport(&url))?;
        if response.status() == StatusCode::CONFLICT {
            tracing::info!(repo_name, "Dataset repository already exists");
            return Ok(RepoCreation::AlreadyExists);
        }
        check(response, &url).await?;
        tracing::info!(repo_name, private, "Created dataset repository");
        Ok(RepoCreation::Created)
    }

    async fn upload_file(
        &self,
        target: &RemoteDatasetTarget,
        local_path: &Path,
        path_in_repo: &str,
    ) -> Result<UploadReceipt, RegistryError> {
        let path = local_path.to_path_buf();
        let info = tokio::task::spawn_blocking(move || inspect_file(&path))
            .await
            .map_err(|e| RegistryError::Protocol(format!("hashing task failed: {e}")))?
            .map_err(|source| RegistryError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
        tracing::info!(
            repo_id = %target.repo_id(),
            path_in_repo,
            size = info.size,
            sha256 = %info.sha256,
            "Uploading file to registry"
        );

        let mode = self.upload_mode(target, &info, path_in_repo).await?;
        let operation = if mode == "lfs" {
            self.upload_lfs(target, &info).await?;
            lfs_file_operation(path_in_repo, &info.sha256)
        } else {
            let content = tokio::fs::read(local_path).await.map_err(|source| RegistryError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
            regular_file_operation(path_in_repo, &content)
        };

        let summary = format!("Upload {path_in_repo} with rxiv-mirror");
        let commit = self.commit(target, commit_payload(&summary, operation)).await?;
        tracing::info!(path_in_repo, commit = ?commit, mode = %mode, "Committed file to registry");
        Ok(UploadReceipt {
            repo_id: target.repo_id(),
            path_in_repo: path_in_repo.to_string(),
            size: info.size,
            commit,
        })
    }
}
