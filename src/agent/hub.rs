// SYNOID Model Hub Client
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Read-only access to the remote model registry. Only files on the allow-list
// are pulled, through a per-variant cache, and copied into the variant
// directory as real files. Files already present with the right size are
// left alone, so an interrupted fetch resumes where it stopped.

use anyhow::{Context, Result};
use hf_hub::api::sync::ApiBuilder;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::agent::model_registry::ModelVariant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Seam between the Acquisition Manager and whatever serves model files.
pub trait ArtifactRegistry: Send + Sync {
    /// Fetch the allow-listed files of `variant` into `dest`, using
    /// `cache_dir` for partial transfers.
    fn fetch(&self, variant: &ModelVariant, dest: &Path, cache_dir: &Path) -> Result<FetchSummary>;
}

/// HuggingFace Hub backed registry.
pub struct HfHubRegistry {
    token: Option<String>,
}

impl HfHubRegistry {
    pub fn new(token: Option<String>) -> Self {
        if token.is_some() {
            info!("[HUB] 🔐 Using HF_TOKEN for authentication");
        } else {
            info!("[HUB] No HF_TOKEN provided, public models only");
        }
        Self { token }
    }
}

impl ArtifactRegistry for HfHubRegistry {
    fn fetch(&self, variant: &ModelVariant, dest: &Path, cache_dir: &Path) -> Result<FetchSummary> {
        fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("create cache {}", cache_dir.display()))?;

        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_token(self.token.clone())
            .with_progress(false)
            .build()
            .context("build hub client")?;
        let repo = api.model(variant.repo_id.clone());
        let info = repo
            .info()
            .with_context(|| format!("list files of {}", variant.repo_id))?;

        let mut summary = FetchSummary::default();
        for sibling in info.siblings {
            let name = sibling.rfilename;
            if !variant.is_allowed(&name) {
                continue;
            }

            let cached = repo
                .get(&name)
                .with_context(|| format!("download {}/{}", variant.repo_id, name))?;
            let cached_len = fs::metadata(&cached)
                .with_context(|| format!("stat cached {}", cached.display()))?
                .len();

            let target = dest.join(&name);
            if let Ok(meta) = fs::metadata(&target) {
                if meta.is_file() && meta.len() == cached_len {
                    debug!("[HUB] {} already present, skipping", name);
                    summary.skipped += 1;
                    continue;
                }
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            // Cache entries are symlinks into the blob store; copy resolves them.
            fs::copy(&cached, &target)
                .with_context(|| format!("copy {} into {}", name, dest.display()))?;
            summary.fetched += 1;
            summary.bytes += cached_len;
        }

        info!(
            "[HUB] {}: {} fetched ({:.1} MB), {} already present",
            variant.repo_id,
            summary.fetched,
            summary.bytes as f64 / 1_048_576.0,
            summary.skipped
        );
        Ok(summary)
    }
}
