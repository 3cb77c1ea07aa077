//! Assessment cache: one artifact file per assessed record.
//!
//! The presence of `<dir>/<id>.ttl` means the record has been assessed and
//! must not be assessed again. Artifacts never expire.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::StoreError;

const ARTIFACT_EXTENSION: &str = "ttl";

/// Archived result of one assessment.
#[derive(Debug, Clone, Serialize)]
pub struct CacheArtifact {
    pub id: String,
    pub score: f64,
    /// RFC 3339 timestamp string.
    pub assessed_at: String,
    /// Full textual result returned by the evaluator.
    pub report: String,
}

impl CacheArtifact {
    /// Artifact stamped with the current time.
    pub fn new(id: impl Into<String>, score: f64, report: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            score,
            assessed_at: chrono::Utc::now().to_rfc3339(),
            report: report.into(),
        }
    }
}

/// Filesystem-backed assessment cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct AssessmentCache {
    dir: PathBuf,
}

impl AssessmentCache {
    /// The directory is created on the first write, not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for `id`, whether or not it exists.
    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ARTIFACT_EXTENSION}", encode_file_stem(id)))
    }

    /// Whether an artifact exists for `id`. Content and age are not checked.
    pub fn is_cached(&self, id: &str) -> bool {
        self.artifact_path(id).is_file()
    }

    /// Write the artifact for `artifact.id`, replacing any existing one.
    ///
    /// A partially written artifact is never visible under its final name.
    pub fn store(&self, artifact: &CacheArtifact) -> Result<PathBuf, StoreError> {
        let path = self.artifact_path(&artifact.id);
        let body = serde_json::to_vec_pretty(artifact)?;
        let write_err = |source| StoreError::CacheWrite {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(&body).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(id = %artifact.id, path = %path.display(), "cached assessment");
        Ok(path)
    }
}

/// Turn a record id into a file stem that stays inside the cache directory.
fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for (i, c) in id.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '.' if i == 0 => out.push_str("%2E"),
            _ => out.push(c),
        }
    }
    out
}
