//! Per-bundle extraction and failure isolation.
//!
//! A bundle is fetched into its own temporary directory under the pipeline's
//! scratch root, unpacked there, searched for the document, and the document is
//! copied into the output folder under its original file name. The temporary
//! directory is removed when the item finishes, whether it succeeded or not.
//!
//! With [`MatchPolicy::FirstMatch`] the first candidate in directory enumeration
//! order wins. That order is whatever the filesystem yields, not a sort, so a
//! bundle with several documents may pick a different one on another machine.
//! Use [`MatchPolicy::Strict`] to fail such bundles instead.

use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::{MatchPolicy, SourceCollection};
use crate::contract::BundleStore;
use crate::error::ExtractError;

/// A document copied out of a bundle into the output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub key: String,
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Result of one isolated extraction. Failures carry the key and the error and
/// never abort the run.
#[derive(Debug)]
pub enum ItemOutcome {
    Extracted(ExtractedDocument),
    Failed { key: String, error: ExtractError },
}

impl ItemOutcome {
    pub fn is_extracted(&self) -> bool {
        matches!(self, ItemOutcome::Extracted(_))
    }
}

/// Everything needed to turn one bundle key into a document in the output folder.
pub struct Extractor {
    store: Arc<dyn BundleStore>,
    collection: SourceCollection,
    output_folder: PathBuf,
    scratch_dir: PathBuf,
    document_dir: String,
    pattern: Regex,
    policy: MatchPolicy,
}

impl Extractor {
    pub fn new(
        store: Arc<dyn BundleStore>,
        collection: SourceCollection,
        output_folder: PathBuf,
        scratch_dir: PathBuf,
        document_dir: impl Into<String>,
        pattern: Regex,
        policy: MatchPolicy,
    ) -> Self {
        Self {
            store,
            collection,
            output_folder,
            scratch_dir,
            document_dir: document_dir.into(),
            pattern,
            policy,
        }
    }

    /// Fetch, unpack, match and copy one bundle.
    pub async fn extract(&self, key: &str) -> Result<ExtractedDocument, ExtractError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let workspace = tempfile::Builder::new()
            .prefix("bundle-")
            .tempdir_in(&self.scratch_dir)?;
        let bundle_path = workspace.path().join("bundle.zip");
        let unpack_dir = workspace.path().join("unpacked");

        let bytes = self
            .store
            .fetch_to(&self.collection, key, &bundle_path)
            .await?;
        debug!(key, bytes, "Bundle downloaded");

        let document_dir = self.document_dir.clone();
        let pattern = self.pattern.clone();
        let policy = self.policy;
        let output_folder = self.output_folder.clone();
        let (file_name, path, size) = tokio::task::spawn_blocking(move || {
            unpack_bundle(&bundle_path, &unpack_dir)?;
            let candidates = locate_documents(&unpack_dir, &document_dir, &pattern)?;
            let document = select_document(candidates, policy, &document_dir, &pattern)?;
            copy_into(&document, &output_folder).map_err(ExtractError::from)
        })
        .await
        .map_err(|e| ExtractError::Task(e.to_string()))??;

        let scratch = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!(path = %scratch.display(), error = %e, "Failed to remove bundle scratch dir");
        }

        Ok(ExtractedDocument {
            key: key.to_string(),
            file_name,
            path,
            size,
        })
    }

    /// Run [`Extractor::extract`] and fold any failure into an [`ItemOutcome`].
    pub async fn isolate(&self, key: &str) -> ItemOutcome {
        match self.extract(key).await {
            Ok(document) => {
                debug!(key, file = %document.file_name, "Extracted document");
                ItemOutcome::Extracted(document)
            }
            Err(error) => {
                error!(bucket = %self.collection.bucket, key, error = %error, "Error processing bundle");
                ItemOutcome::Failed {
                    key: key.to_string(),
                    error,
                }
            }
        }
    }
}

/// Extract every entry of the zip at `bundle` into `dest`.
pub fn unpack_bundle(bundle: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = fs::File::open(bundle)?;
    let mut archive = zip::ZipArchive::new(io::BufReader::new(file))?;
    fs::create_dir_all(dest)?;
    archive.extract(dest)?;
    Ok(())
}

/// Files directly under `root/document_dir` whose name matches `pattern`, in
/// directory enumeration order. A missing directory yields no candidates.
pub fn locate_documents(root: &Path, document_dir: &str, pattern: &Regex) -> io::Result<Vec<PathBuf>> {
    let dir = root.join(document_dir);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if pattern.is_match(&entry.file_name().to_string_lossy()) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

/// Apply the match policy to the candidate list.
pub fn select_document(
    candidates: Vec<PathBuf>,
    policy: MatchPolicy,
    document_dir: &str,
    pattern: &Regex,
) -> Result<PathBuf, ExtractError> {
    let count = candidates.len();
    match (policy, candidates.into_iter().next()) {
        (_, None) => Err(ExtractError::NoDocument {
            dir: document_dir.to_string(),
            pattern: pattern.to_string(),
        }),
        (MatchPolicy::Strict, Some(_)) if count > 1 => Err(ExtractError::AmbiguousDocument {
            dir: document_dir.to_string(),
            pattern: pattern.to_string(),
            count,
        }),
        (MatchPolicy::FirstMatch, Some(first)) if count > 1 => {
            warn!(count, chosen = %first.display(), "Several documents matched; taking the first");
            Ok(first)
        }
        (_, Some(only)) => Ok(only),
    }
}

/// Copy `document` into `folder`, keeping its file name. An existing file of
/// the same name is overwritten.
///
/// The bytes go to a hidden temp file in `folder` first and are renamed into
/// place, so a failed copy never leaves a truncated document behind.
pub fn copy_into(document: &Path, folder: &Path) -> io::Result<(String, PathBuf, u64)> {
    let file_name = document
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "document path has no file name"))?;
    let target = folder.join(file_name);
    let mut source = fs::File::open(document)?;
    let mut staged = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(folder)?;
    let size = io::copy(&mut source, staged.as_file_mut())?;
    staged.persist(&target).map_err(|e| e.error)?;
    Ok((file_name.to_string_lossy().into_owned(), target, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    fn xml() -> Regex {
        Regex::new(r"\.xml$").unwrap()
    }

    #[test]
    fn locates_only_matching_files_in_document_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("b.meca");
        write_zip(
            &bundle,
            &[
                ("manifest.xml", b"<manifest/>"),
                ("content/article.xml", b"<article/>"),
                ("content/article.pdf", b"%PDF"),
                ("content/figures/fig1.xml", b"<fig/>"),
            ],
        );
        let out = tmp.path().join("unpacked");
        unpack_bundle(&bundle, &out).unwrap();

        let found = locate_documents(&out, "content", &xml()).unwrap();
        assert_eq!(found, vec![out.join("content/article.xml")]);
    }

    #[test]
    fn missing_document_dir_yields_no_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(locate_documents(tmp.path(), "content", &xml()).unwrap().is_empty());
    }

    #[test]
    fn strict_policy_rejects_multiple_candidates() {
        let candidates = vec![PathBuf::from("content/a.xml"), PathBuf::from("content/b.xml")];
        let err = select_document(candidates.clone(), MatchPolicy::Strict, "content", &xml())
            .unwrap_err();
        assert!(matches!(err, ExtractError::AmbiguousDocument { count: 2, .. }));

        let chosen = select_document(candidates, MatchPolicy::FirstMatch, "content", &xml()).unwrap();
        assert_eq!(chosen, PathBuf::from("content/a.xml"));
    }

    #[test]
    fn zero_candidates_is_an_item_error_under_both_policies() {
        for policy in [MatchPolicy::FirstMatch, MatchPolicy::Strict] {
            let err = select_document(Vec::new(), policy, "content", &xml()).unwrap_err();
            assert!(matches!(err, ExtractError::NoDocument { .. }));
        }
    }

    #[test]
    fn garbage_bundle_fails_to_unpack() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("bad.meca");
        fs::write(&bundle, b"definitely not a zip").unwrap();
        let err = unpack_bundle(&bundle, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::Unpack(_)));
    }

    #[test]
    fn copy_keeps_name_and_overwrites_previous_document() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("article.xml"), "<old/>").unwrap();
        let document = tmp.path().join("article.xml");
        fs::write(&document, "<article>new</article>").unwrap();

        let (name, path, size) = copy_into(&document, &out).unwrap();

        assert_eq!(name, "article.xml");
        assert_eq!(path, out.join("article.xml"));
        assert_eq!(size, 22);
        assert_eq!(fs::read_to_string(&path).unwrap(), "<article>new</article>");
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn failed_copy_leaves_nothing_in_output_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        // Opening a directory succeeds but reading it fails mid-copy.
        let unreadable = tmp.path().join("content").join("article.xml");
        fs::create_dir_all(&unreadable).unwrap();

        assert!(copy_into(&unreadable, &out).is_err());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }
}
