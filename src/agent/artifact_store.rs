// SYNOID Artifact Store
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Filesystem area holding one directory per model variant. Readiness is a
// pure predicate over what is on disk right now; nothing is cached between
// calls.

use serde::Serialize;
use std::path::{Path, PathBuf};
use sysinfo::{DiskExt, System, SystemExt};
use walkdir::WalkDir;

use crate::agent::model_registry::{FilePattern, ModelCatalog, ModelVariant};

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub relative: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantStatus {
    pub id: String,
    pub label: String,
    pub description: String,
    pub ready: bool,
    pub local_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSummary {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn variant_dir(&self, variant: &ModelVariant) -> PathBuf {
        self.root.join(&variant.id)
    }

    /// Every regular file under the variant directory, relative to it.
    /// Symlinks count when they resolve to a file.
    pub fn list_files(&self, variant: &ModelVariant) -> Vec<StoredFile> {
        let dir = self.variant_dir(variant);
        if !dir.is_dir() {
            return Vec::new();
        }
        let mut files: Vec<StoredFile> = WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(&dir).ok()?.to_path_buf();
                let size_bytes = std::fs::metadata(e.path()).map(|m| m.len()).unwrap_or(0);
                Some(StoredFile {
                    relative,
                    size_bytes,
                })
            })
            .collect();
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        files
    }

    /// Required patterns with no matching file on disk.
    pub fn missing_required<'a>(&self, variant: &'a ModelVariant) -> Vec<&'a FilePattern> {
        let files = self.list_files(variant);
        variant
            .required
            .iter()
            .filter(|pattern| !files.iter().any(|f| pattern.matches_path(&f.relative)))
            .collect()
    }

    /// A variant is ready iff every required pattern matches a present file.
    pub fn is_ready(&self, variant: &ModelVariant) -> bool {
        self.missing_required(variant).is_empty()
    }

    pub fn statuses(&self, catalog: &ModelCatalog) -> Vec<VariantStatus> {
        catalog
            .variants()
            .iter()
            .map(|v| VariantStatus {
                id: v.id.clone(),
                label: v.label.clone(),
                description: v.description.clone(),
                ready: self.is_ready(v),
                local_dir: self.variant_dir(v),
            })
            .collect()
    }

    /// Free and total space of the disk holding the store root, when known.
    pub fn storage_summary(&self) -> Option<StorageSummary> {
        let target = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let mut sys = System::new();
        sys.refresh_disks_list();
        sys.refresh_disks();
        sys.disks()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| StorageSummary {
                free_bytes: disk.available_space(),
                total_bytes: disk.total_space(),
            })
    }
}
