#![allow(dead_code)]

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use rxiv_mirror_core::config::{
    ExtractionSettings, MirrorConfig, PipelineSpec, RegistrySettings, StoreSettings,
};
use rxiv_mirror_core::contract::{
    DatasetRegistry, RemoteDatasetTarget, RepoCreation, UploadReceipt,
};
use rxiv_mirror_core::error::RegistryError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Build a MECA-like zip in memory.
pub fn meca(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("manifest.xml", options).unwrap();
    zip.write_all(b"<manifest/>").unwrap();
    for (name, body) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A bundle with a single article document.
pub fn article(file_name: &str, body: &str) -> Vec<u8> {
    meca(&[(&format!("content/{file_name}"), body.as_bytes())])
}

pub async fn bucket(objects: &[(&str, Vec<u8>)]) -> Arc<InMemory> {
    let store = Arc::new(InMemory::new());
    for (key, body) in objects {
        store
            .put(&ObjectPath::from(*key), PutPayload::from(body.clone()))
            .await
            .unwrap();
    }
    store
}

pub fn spec(bucket: &str, prefix: Option<&str>, output_name: &str) -> PipelineSpec {
    PipelineSpec {
        bucket: bucket.to_string(),
        prefix: prefix.map(str::to_string),
        output_name: output_name.to_string(),
    }
}

pub fn mirror_config(work_dir: &Path, pipelines: Vec<PipelineSpec>) -> MirrorConfig {
    MirrorConfig {
        work_dir: work_dir.to_path_buf(),
        store: StoreSettings::default(),
        registry: RegistrySettings::default(),
        extraction: ExtractionSettings::default(),
        pipelines,
    }
}

pub fn target() -> RemoteDatasetTarget {
    RemoteDatasetTarget {
        namespace: "tester".to_string(),
        repo_name: "xml-dump-monthly".to_string(),
    }
}

/// File names inside a zip archive, directories excluded.
pub fn zip_names(path: &Path) -> BTreeSet<String> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .filter(|n| !n.ends_with('/'))
        .collect()
}

pub fn zip_entry(path: &Path, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut body = String::new();
    archive.by_name(name).unwrap().read_to_string(&mut body).unwrap();
    body
}

/// Registry that keeps uploaded files in memory, keyed by (repo id, path).
#[derive(Default)]
pub struct RecordingRegistry {
    pub objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl RecordingRegistry {
    pub fn paths(&self) -> Vec<(String, String)> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, repo_id: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(repo_id.to_string(), path.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DatasetRegistry for RecordingRegistry {
    async fn whoami(&self) -> Result<String, RegistryError> {
        Ok("tester".to_string())
    }

    async fn create_dataset_repo(
        &self,
        _repo_name: &str,
        _private: bool,
    ) -> Result<RepoCreation, RegistryError> {
        Ok(RepoCreation::AlreadyExists)
    }

    async fn upload_file(
        &self,
        target: &RemoteDatasetTarget,
        local_path: &Path,
        path_in_repo: &str,
    ) -> Result<UploadReceipt, RegistryError> {
        let bytes = std::fs::read(local_path).map_err(|source| RegistryError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;
        let size = bytes.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert((target.repo_id(), path_in_repo.to_string()), bytes);
        Ok(UploadReceipt {
            repo_id: target.repo_id(),
            path_in_repo: path_in_repo.to_string(),
            size,
            commit: None,
        })
    }
}

/// Remaining entries in a pipeline's scratch root.
pub fn scratch_entries(dir: &PathBuf) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}
