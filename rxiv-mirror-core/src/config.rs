//! Mirror configuration: which collections to read, how bundles are unpacked,
//! and where the archives go.
//!
//! Everything here is plain, immutable data. Secrets never live in these
//! structs; the CLI reads them from the environment and hands them to the
//! client constructors directly.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigError;

/// One remote bucket of bundles, optionally scoped by a key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCollection {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl SourceCollection {
    pub fn new(bucket: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix,
        }
    }

    /// The prefix as a plain string, empty when unscoped.
    pub fn prefix_str(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

/// A single pipeline declaration: the collection it reads and the name of the
/// folder its documents accumulate in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub output_name: String,
}

impl PipelineSpec {
    pub fn collection(&self) -> SourceCollection {
        SourceCollection::new(self.bucket.clone(), self.prefix.clone())
    }

    /// Path of the output folder relative to the work dir: `<prefix><output_name>`.
    pub fn relative_output(&self) -> String {
        format!("{}{}", self.prefix.as_deref().unwrap_or(""), self.output_name)
    }

    /// Remote path of the packaged archive inside the dataset repository.
    pub fn remote_archive_path(&self) -> String {
        format!("{}.zip", self.relative_output())
    }
}

/// What to do with documents left in the output folder by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Keep prior documents; the archive holds the union of all runs.
    Accumulate,
    /// Empty the folder before listing.
    Clear,
}

/// How to treat bundles whose `content/` dir holds more than one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Take the first candidate in directory enumeration order.
    FirstMatch,
    /// Fail the item unless exactly one candidate exists.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub bundle_suffix: String,
    pub document_dir: String,
    pub document_pattern: String,
    pub strict_match: bool,
    pub clear_output: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            bundle_suffix: ".meca".to_string(),
            document_dir: "content".to_string(),
            document_pattern: r"\.xml$".to_string(),
            strict_match: false,
            clear_output: false,
        }
    }
}

impl ExtractionSettings {
    pub fn match_policy(&self) -> MatchPolicy {
        if self.strict_match {
            MatchPolicy::Strict
        } else {
            MatchPolicy::FirstMatch
        }
    }

    pub fn output_policy(&self) -> OutputPolicy {
        if self.clear_output {
            OutputPolicy::Clear
        } else {
            OutputPolicy::Accumulate
        }
    }

    pub fn compile_pattern(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.document_pattern).map_err(|source| ConfigError::Pattern {
            pattern: self.document_pattern.clone(),
            source,
        })
    }
}

/// Object store connection settings. Credentials are supplied separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub region: String,
    pub requester_pays: bool,
    pub endpoint: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            requester_pays: true,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub repo_name: String,
    pub private: bool,
    pub endpoint: String,
    pub revision: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            repo_name: "xml-dump-monthly".to_string(),
            private: false,
            endpoint: "https://huggingface.co".to_string(),
            revision: "main".to_string(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    pub pipelines: Vec<PipelineSpec>,
}

impl MirrorConfig {
    /// Rejects configs that would make pipelines collide or never match anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipelines.is_empty() {
            return Err(ConfigError::NoPipelines);
        }
        let mut seen: Vec<String> = Vec::with_capacity(self.pipelines.len());
        for spec in &self.pipelines {
            if spec.bucket.trim().is_empty() {
                return Err(ConfigError::EmptyField("bucket"));
            }
            if spec.output_name.trim().is_empty() {
                return Err(ConfigError::EmptyField("output_name"));
            }
            let output = spec.relative_output();
            for earlier in &seen {
                let (a, b) = (Path::new(earlier), Path::new(&output));
                if a == b {
                    return Err(ConfigError::DuplicateOutput(output));
                }
                if a.starts_with(b) || b.starts_with(a) {
                    return Err(ConfigError::NestedOutput {
                        first: earlier.clone(),
                        second: output,
                    });
                }
            }
            seen.push(output);
        }
        if self.extraction.bundle_suffix.is_empty() {
            return Err(ConfigError::EmptyField("bundle_suffix"));
        }
        self.extraction.compile_pattern()?;
        Ok(())
    }

    pub fn output_folder(&self, spec: &PipelineSpec) -> PathBuf {
        self.work_dir.join(spec.relative_output())
    }

    /// Per-pipeline scratch root; item temp dirs are created beneath it.
    pub fn scratch_dir(&self, spec: &PipelineSpec) -> PathBuf {
        scratch_root(&self.work_dir).join(spec.relative_output())
    }

    pub fn trace_loaded(&self) {
        info!(
            work_dir = %self.work_dir.display(),
            pipelines = self.pipelines.len(),
            repo_name = %self.registry.repo_name,
            "Loaded MirrorConfig"
        );
        debug!(?self, "MirrorConfig loaded (full debug)");
    }
}

pub fn scratch_root(work_dir: &Path) -> PathBuf {
    work_dir.join(".scratch")
}
