//! Validated-input manifest: the only hand-off between validate and collect.
//!
//! A manifest records, for every dataset, which files passed validation, how
//! their headers map to canonical fields and the [`Fingerprint`] each file had
//! at validation time, alongside the hash of the schema configuration. The
//! collector refuses a manifest whose hash or fingerprints no longer match
//! what is on disk.
//!
//! Manifests are written once and never mutated. Each run lands in
//! `<state>/manifests/manifest-<run_id>.json` and is mirrored to
//! `<state>/latest.json`; both writes go through a temp file and a rename.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use chrono::{SecondsFormat, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{LoadedConfig, Role},
    error::{PipelineError, StaleReason},
    fingerprint::Fingerprint,
    io_utils,
};

pub const LATEST_FILE: &str = "latest.json";
pub const HISTORY_DIR: &str = "manifests";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    /// No fields configured.
    Skipped,
    /// Fields configured but no CSV files found.
    Empty,
    Ok,
    /// Files found but none passed validation.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub rows: u64,
    pub headers_map: BTreeMap<String, String>,
    pub columns_present: Vec<String>,
    pub columns_missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestDataset {
    pub dir: String,
    pub role: Role,
    pub status: DatasetStatus,
    pub files: Vec<FileEntry>,
}

impl ManifestDataset {
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub run_id: String,
    pub created_at: String,
    pub schemas_hash: String,
    pub settings_fingerprint: String,
    pub datasets: BTreeMap<String, ManifestDataset>,
}

impl Manifest {
    pub fn new(config: &LoadedConfig, datasets: BTreeMap<String, ManifestDataset>) -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            run_id: format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8]),
            created_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            schemas_hash: config.schemas_hash.clone(),
            settings_fingerprint: config.settings_fingerprint.clone(),
            datasets,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening manifest {path:?}"))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing manifest {path:?}"))
    }

    pub fn file_count(&self) -> usize {
        self.datasets.values().map(|ds| ds.files.len()).sum()
    }

    /// Fails with [`PipelineError::StaleManifest`] unless the schema hash and
    /// every referenced file still match.
    pub fn verify(&self, config: &LoadedConfig) -> Result<()> {
        if self.schemas_hash != config.schemas_hash {
            bail!(PipelineError::StaleManifest(StaleReason::SchemaChanged));
        }
        for dataset in self.datasets.values() {
            for entry in &dataset.files {
                let path = config.resolve_path(&entry.path);
                let metadata = match fs::metadata(&path) {
                    Ok(metadata) => metadata,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        bail!(PipelineError::StaleManifest(StaleReason::InputMissing(
                            entry.path.clone()
                        )));
                    }
                    Err(err) => {
                        return Err(err).with_context(|| format!("Reading metadata for {path:?}"));
                    }
                };
                let current = Fingerprint::from_metadata(&metadata)?;
                if current != entry.fingerprint {
                    debug!(
                        "manifest: {} fingerprint {:?} != recorded {:?}",
                        entry.path, current, entry.fingerprint
                    );
                    bail!(PipelineError::StaleManifest(StaleReason::InputChanged(
                        entry.path.clone()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Durable location for manifests: history plus a `latest.json` pointer.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
    history_limit: usize,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>, history_limit: usize) -> Self {
        Self {
            dir: dir.into(),
            history_limit,
        }
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.dir.join(HISTORY_DIR)
    }

    pub fn manifest_path(&self, run_id: &str) -> PathBuf {
        self.history_dir().join(format!("manifest-{run_id}.json"))
    }

    /// Writes the manifest to history and to the latest pointer, then prunes.
    pub fn persist(&self, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.manifest_path(&manifest.run_id);
        write_json_atomic(&path, manifest)?;
        write_json_atomic(&self.latest_path(), manifest)?;
        let removed = self.prune();
        if removed > 0 {
            debug!("manifest: pruned {removed} old manifest(s)");
        }
        info!(
            "manifest: {} written ({} file(s), schemas_hash={})",
            path.display(),
            manifest.file_count(),
            manifest.schemas_hash
        );
        Ok(path)
    }

    pub fn load_latest(&self) -> Result<Manifest> {
        let path = self.latest_path();
        if !path.is_file() {
            bail!(PipelineError::ManifestMissing(path));
        }
        Manifest::load(&path)
    }

    /// Keeps the newest `history_limit` manifests by modification time.
    /// Deletion failures are ignored.
    pub fn prune(&self) -> usize {
        let Ok(entries) = fs::read_dir(self.history_dir()) else {
            return 0;
        };
        let mut manifests: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
            })
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();
        manifests.sort_by(|a, b| b.cmp(a));
        manifests
            .into_iter()
            .skip(self.history_limit)
            .filter(|(_, path)| fs::remove_file(path).is_ok())
            .count()
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    io_utils::write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value).context("Serializing manifest JSON")?;
        Ok(())
    })
    .with_context(|| format!("Writing manifest {path:?}"))
}
