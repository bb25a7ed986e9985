// SYNOID Restore Errors
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::agent::orchestrator::JobStage;

/// A job request rejected before any resource was allocated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// All download attempts for a variant were exhausted.
#[derive(Debug, Clone, Error)]
#[error("failed to acquire model {variant} after {attempts} attempt(s): {last_reason}")]
pub struct AcquisitionError {
    pub variant: String,
    pub attempts: u32,
    pub last_reason: String,
}

/// No runnable entry point could be found or healed into place.
#[derive(Debug, Clone, Error)]
#[error("entry point for {variant} not found; checked: {}", display_paths(.checked_paths))]
pub struct ResolutionError {
    pub variant: String,
    pub checked_paths: Vec<PathBuf>,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("failed to stage input: {reason}")]
    Staging { reason: String },

    #[error("failed to launch inference: {reason}")]
    Launch { reason: String },

    #[error("inference timed out after {}s", .deadline.as_secs())]
    Timeout { deadline: Duration },

    #[error("inference exited with code {exit_code}: {diagnostics}")]
    Inference { exit_code: i32, diagnostics: String },

    #[error("inference succeeded but wrote no video to {}", .output_dir.display())]
    EmptyOutput { output_dir: PathBuf },

    #[error("failed to persist result: {reason}")]
    Persist { reason: String },
}

impl JobError {
    /// The stage in which the job failed.
    pub fn stage(&self) -> JobStage {
        match self {
            JobError::Validation(_) => JobStage::Validating,
            JobError::Acquisition(_) => JobStage::Acquiring,
            JobError::Resolution(_) => JobStage::Resolving,
            JobError::Staging { .. } => JobStage::Staging,
            JobError::Launch { .. } => JobStage::Launching,
            JobError::Timeout { .. } | JobError::Inference { .. } => JobStage::Running,
            JobError::EmptyOutput { .. } => JobStage::Collecting,
            JobError::Persist { .. } => JobStage::Persisting,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::Validation(_))
    }
}
