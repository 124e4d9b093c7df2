//! Section checkpoints.
//!
//! After a section completes its result is written to
//! `<dir>/section_<id>.json`. A resumed run only trusts a checkpoint that
//! parses, belongs to the same model and catalog version, matches the
//! section's items and is internally consistent. Anything else re-runs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use finreg_core::{Section, SectionResult, Thresholds, Verdict};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from checkpoint persistence.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted result of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionCheckpoint {
    pub section_id: String,
    pub model: String,
    pub catalog_version: String,
    pub written_at: DateTime<Utc>,
    pub result: SectionResult,
}

impl SectionCheckpoint {
    pub fn new(
        result: SectionResult,
        model: impl Into<String>,
        catalog_version: impl Into<String>,
    ) -> Self {
        Self {
            section_id: result.section_id.clone(),
            model: model.into(),
            catalog_version: catalog_version.into(),
            written_at: Utc::now(),
            result,
        }
    }
}

/// Run identity a checkpoint must match to be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub model: String,
    pub catalog_version: String,
}

/// Outcome of inspecting a section's checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointStatus {
    Valid,
    Missing,
    Invalid(String),
}

impl CheckpointStatus {
    pub fn label(&self) -> String {
        match self {
            CheckpointStatus::Valid => "valid".to_string(),
            CheckpointStatus::Missing => "missing".to_string(),
            CheckpointStatus::Invalid(reason) => format!("invalid ({})", reason),
        }
    }
}

/// Directory of section checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a section id.
    ///
    /// ASCII letters, digits and `-` are kept; every other byte is written
    /// as `_XX` hex, so distinct ids never share a file.
    pub fn path(&self, section_id: &str) -> PathBuf {
        let mut safe = String::with_capacity(section_id.len());
        for byte in section_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                safe.push(char::from(byte));
            } else {
                safe.push_str(&format!("_{:02X}", byte));
            }
        }
        self.dir.join(format!("section_{}.json", safe))
    }

    /// Write a checkpoint. The file is replaced atomically so a crash never
    /// leaves a half-written checkpoint under the final name.
    pub fn save(&self, checkpoint: &SectionCheckpoint) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path(&checkpoint.section_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        tracing::debug!(section = %checkpoint.section_id, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    /// Load a checkpoint that is safe to reuse for `section`.
    pub fn load(
        &self,
        section: &Section,
        key: &CheckpointKey,
        thresholds: &Thresholds,
    ) -> Result<SectionCheckpoint, CheckpointStatus> {
        let path = self.path(&section.id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointStatus::Missing)
            }
            Err(e) => return Err(CheckpointStatus::Invalid(e.to_string())),
        };

        let checkpoint: SectionCheckpoint = serde_json::from_str(&contents)
            .map_err(|e| CheckpointStatus::Invalid(format!("unreadable: {}", e)))?;

        check(&checkpoint, section, key, thresholds).map_err(CheckpointStatus::Invalid)?;
        Ok(checkpoint)
    }

    pub fn inspect(
        &self,
        section: &Section,
        key: &CheckpointKey,
        thresholds: &Thresholds,
    ) -> CheckpointStatus {
        match self.load(section, key, thresholds) {
            Ok(_) => CheckpointStatus::Valid,
            Err(status) => status,
        }
    }
}

fn check(
    checkpoint: &SectionCheckpoint,
    section: &Section,
    key: &CheckpointKey,
    thresholds: &Thresholds,
) -> Result<(), String> {
    let result = &checkpoint.result;

    if checkpoint.section_id != section.id || result.section_id != section.id {
        return Err(format!("section id {} does not match", checkpoint.section_id));
    }
    if checkpoint.model != key.model {
        return Err(format!("written by model {}", checkpoint.model));
    }
    if checkpoint.catalog_version != key.catalog_version {
        return Err(format!("catalog version {}", checkpoint.catalog_version));
    }

    let expected = section.items.iter().map(|i| i.id.as_str());
    let found = result.findings.iter().map(|f| f.item_id.as_str());
    if !expected.eq(found) {
        return Err("findings do not match the section's checklist items".to_string());
    }

    if let Some(finding) = result
        .findings
        .iter()
        .find(|f| f.overridden && f.verdict != Verdict::NotAssessable)
    {
        return Err(format!("overridden finding {} is not nicht_prüfbar", finding.item_id));
    }

    if !result.is_consistent(thresholds) {
        return Err("aggregate flags do not match findings".to_string());
    }

    Ok(())
}
