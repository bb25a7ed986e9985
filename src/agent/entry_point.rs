// SYNOID Entry-Point Resolver
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// The inference script can live in several places depending on how the
// container was assembled, or arrive bundled inside the downloaded model
// directory. Candidates are checked in a fixed order; when none exists the
// dependency tree is healed into the workspace from the first known-good
// source that carries the script, then resolution runs again.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::agent::artifact_store::ArtifactStore;
use crate::agent::model_registry::ModelVariant;
use crate::error::ResolutionError;

/// Directories the entry point imports from, copied together when healing.
pub const DEPENDENCY_DIRS: &[&str] = &[
    "projects", "models", "data", "scripts", "configs", "common", "utils",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    pub variant: String,
    /// Absolute path of the script.
    pub script: PathBuf,
    /// Directory the launcher runs in.
    pub working_dir: PathBuf,
    /// Script path as handed to the launcher, relative to `working_dir`.
    pub relative_script: PathBuf,
    pub healed: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    working_dir: PathBuf,
    relative: PathBuf,
}

impl Candidate {
    fn absolute(&self) -> PathBuf {
        self.working_dir.join(&self.relative)
    }
}

#[derive(Debug, Clone)]
pub struct EntryPointResolver {
    workspace_dir: PathBuf,
    repo_dir: PathBuf,
    store: ArtifactStore,
}

impl EntryPointResolver {
    pub fn new(workspace_dir: PathBuf, repo_dir: PathBuf, store: ArtifactStore) -> Self {
        Self {
            workspace_dir,
            repo_dir,
            store,
        }
    }

    /// Candidate locations, highest priority first.
    fn candidates(&self, variant: &ModelVariant) -> Vec<Candidate> {
        let script = PathBuf::from(&variant.entry_script);
        vec![
            Candidate {
                working_dir: self.workspace_dir.clone(),
                relative: script.clone(),
            },
            Candidate {
                working_dir: self.workspace_dir.clone(),
                relative: Path::new("projects").join(&script),
            },
            Candidate {
                working_dir: self.repo_dir.clone(),
                relative: Path::new("projects").join(&script),
            },
        ]
    }

    /// Known-good trees to heal from, in order of preference.
    fn heal_sources(&self, variant: &ModelVariant) -> Vec<PathBuf> {
        vec![self.store.variant_dir(variant), self.repo_dir.clone()]
    }

    pub fn resolve(&self, variant: &ModelVariant) -> Result<EntryPoint, ResolutionError> {
        if let Some(found) = self.find_existing(variant) {
            return Ok(found);
        }

        warn!(
            "[RESOLVE] Inference script {} not found, attempting recovery...",
            variant.entry_script
        );
        let mut checked: Vec<PathBuf> = self
            .candidates(variant)
            .iter()
            .map(Candidate::absolute)
            .collect();

        for source in self.heal_sources(variant) {
            let nested = source.join("projects").join(&variant.entry_script);
            let flat = source.join(&variant.entry_script);
            checked.push(nested.clone());
            checked.push(flat.clone());
            if !nested.is_file() && !flat.is_file() {
                continue;
            }

            match self.heal_from(&source, variant) {
                Ok(copied) => {
                    info!(
                        "[RESOLVE] ✅ Copied {} dependency tree(s) from {:?} into {:?}",
                        copied, source, self.workspace_dir
                    );
                    if let Some(mut found) = self.find_existing(variant) {
                        found.healed = true;
                        return Ok(found);
                    }
                }
                Err(e) => error!("[RESOLVE] Error copying from {:?}: {}", source, e),
            }
        }

        error!(
            "[RESOLVE] Inference script {} not found in any expected location:",
            variant.entry_script
        );
        for path in &checked {
            error!("[RESOLVE]   - {}", path.display());
        }
        Err(ResolutionError {
            variant: variant.id.clone(),
            checked_paths: checked,
        })
    }

    fn find_existing(&self, variant: &ModelVariant) -> Option<EntryPoint> {
        self.candidates(variant)
            .into_iter()
            .find(|c| c.absolute().is_file())
            .map(|c| {
                info!("[RESOLVE] ✅ Found script at: {}", c.absolute().display());
                EntryPoint {
                    variant: variant.id.clone(),
                    script: c.absolute(),
                    working_dir: c.working_dir,
                    relative_script: c.relative,
                    healed: false,
                }
            })
    }

    /// Copy the entry point and its sibling trees from one source only.
    fn heal_from(&self, source: &Path, variant: &ModelVariant) -> io::Result<usize> {
        let mut copied = 0;
        for dir in DEPENDENCY_DIRS {
            let from = source.join(dir);
            if from.is_dir() {
                copy_tree(&from, &self.workspace_dir.join(dir))?;
                copied += 1;
            }
        }
        let flat = source.join(&variant.entry_script);
        if flat.is_file() {
            fs::create_dir_all(&self.workspace_dir)?;
            fs::copy(&flat, self.workspace_dir.join(&variant.entry_script))?;
            copied += 1;
        }
        Ok(copied)
    }
}

/// Merge `from` into `to`, overwriting files that already exist.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
