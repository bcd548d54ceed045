use std::path::PathBuf;

use thiserror::Error;

/// Structural failures that abort a pipeline stage.
///
/// Per-row and per-file problems are accumulated as [`crate::validate::Issue`]s
/// instead; only their totals surface here through `ValidationFailed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("schema configuration not found at {0:?}")]
    ConfigMissing(PathBuf),
    #[error("invalid schema configuration: {0}")]
    ConfigInvalid(String),
    #[error("no datasets declared under validate.datasets in {0:?}")]
    NoDatasets(PathBuf),
    #[error("primary dataset(s) [{0}] contributed no CSV files; nothing to reconcile against")]
    NoPrimaryData(String),
    #[error(
        "validation failed: {missing} missing required field(s), {content} content error(s)"
    )]
    ValidationFailed { missing: usize, content: usize },
    #[error("manifest missing at {0:?}; run 'validate' first")]
    ManifestMissing(PathBuf),
    #[error("manifest stale ({0}); run 'validate' again")]
    StaleManifest(StaleReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StaleReason {
    #[error("schema configuration changed")]
    SchemaChanged,
    #[error("input missing: {0}")]
    InputMissing(String),
    #[error("input changed: {0}")]
    InputChanged(String),
    #[error("column '{header}' no longer present in {path}")]
    HeaderMissing { path: String, header: String },
}

impl PipelineError {
    pub fn stale_reason(&self) -> Option<&StaleReason> {
        match self {
            PipelineError::StaleManifest(reason) => Some(reason),
            _ => None,
        }
    }
}
