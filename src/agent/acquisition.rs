// SYNOID Acquisition Manager
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Makes sure a model variant is fully present in the Artifact Store before a
// job touches it. Ready variants cost one directory scan and no network.
// Otherwise the registry is retried with capped exponential backoff, and a
// transfer only counts once the required files are actually on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::agent::artifact_store::ArtifactStore;
use crate::agent::hub::ArtifactRegistry;
use crate::agent::model_registry::ModelVariant;
use crate::agent::path_alias::{normalize_aliases, AliasMode, AliasReport};
use crate::agent::retry::RetryConfig;
use crate::error::AcquisitionError;

/// One retry iteration. Lives only for the duration of a single call.
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub attempt: u32,
    pub delay_before: Duration,
    pub outcome: Result<(), String>,
}

#[derive(Debug, Clone)]
pub struct Ready {
    pub variant: String,
    pub local_dir: PathBuf,
    /// Registry attempts made; zero when the store was already complete.
    pub attempts: u32,
    pub aliases: AliasReport,
}

pub struct AcquisitionManager {
    store: ArtifactStore,
    registry: Arc<dyn ArtifactRegistry>,
    retry: RetryConfig,
    alias_mode: AliasMode,
    cache_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Aliases live at the store root and are shared across variants.
    alias_lock: tokio::sync::Mutex<()>,
}

impl AcquisitionManager {
    pub fn new(
        store: ArtifactStore,
        registry: Arc<dyn ArtifactRegistry>,
        retry: RetryConfig,
        alias_mode: AliasMode,
    ) -> Self {
        let cache_root = store.root().join("cache");
        Self {
            store,
            registry,
            retry,
            alias_mode,
            cache_root,
            locks: Mutex::new(HashMap::new()),
            alias_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Ensure `variant` is complete locally and its aliases resolve.
    pub async fn ensure_ready(&self, variant: &ModelVariant) -> Result<Ready, AcquisitionError> {
        // Writers to one variant directory are serialized.
        let lock = self.variant_lock(&variant.id);
        let _guard = lock.lock().await;

        let local_dir = self.store.variant_dir(variant);
        let attempts = if self.store.is_ready(variant) {
            info!("[ACQUIRE] ✅ {} already present at {:?}", variant.label, local_dir);
            0
        } else {
            self.download_with_retry(variant).await?
        };

        let aliases = {
            let _alias_guard = self.alias_lock.lock().await;
            normalize_aliases(
                &variant.aliases,
                self.store.root(),
                &local_dir,
                self.alias_mode,
            )
        }
        .map_err(|e| AcquisitionError {
            variant: variant.id.clone(),
            attempts,
            last_reason: format!("alias normalization failed: {}", e),
        })?;

        Ok(Ready {
            variant: variant.id.clone(),
            local_dir,
            attempts,
            aliases,
        })
    }

    async fn download_with_retry(&self, variant: &ModelVariant) -> Result<u32, AcquisitionError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut history: Vec<DownloadAttempt> = Vec::new();
        let mut delay_before = Duration::ZERO;

        for attempt in 1..=max_attempts {
            if !delay_before.is_zero() {
                info!("[ACQUIRE] ⏳ Retrying {} in {:?}...", variant.label, delay_before);
                tokio::time::sleep(delay_before).await;
            }

            info!(
                "[ACQUIRE] 📥 Downloading {} (attempt {}/{})...",
                variant.repo_id, attempt, max_attempts
            );
            let outcome = self.fetch_once(variant).await;
            match &outcome {
                Ok(()) => info!("[ACQUIRE] ✅ Successfully downloaded {}", variant.repo_id),
                Err(reason) => warn!("[ACQUIRE] ❌ Attempt {} failed: {}", attempt, reason),
            }
            let succeeded = outcome.is_ok();
            history.push(DownloadAttempt {
                attempt,
                delay_before,
                outcome,
            });
            if succeeded {
                return Ok(attempt);
            }
            delay_before = self.retry.delay_after(attempt);
        }

        let last_reason = history
            .last()
            .and_then(|a| a.outcome.clone().err())
            .unwrap_or_else(|| "no attempts made".to_string());
        error!(
            "[ACQUIRE] ❌ Failed to download {} after {} attempts",
            variant.repo_id,
            history.len()
        );
        Err(AcquisitionError {
            variant: variant.id.clone(),
            attempts: history.len() as u32,
            last_reason,
        })
    }

    /// One registry transfer followed by the readiness re-check.
    async fn fetch_once(&self, variant: &ModelVariant) -> Result<(), String> {
        let registry = self.registry.clone();
        let owned = variant.clone();
        let dest = self.store.variant_dir(variant);
        let cache_dir = self.cache_root.join(&variant.id);

        tokio::task::spawn_blocking(move || registry.fetch(&owned, &dest, &cache_dir))
            .await
            .map_err(|e| format!("download task crashed: {}", e))?
            .map_err(|e| format!("{:#}", e))?;

        let missing = self.store.missing_required(variant);
        if missing.is_empty() {
            Ok(())
        } else {
            let names: Vec<&str> = missing.iter().map(|p| p.as_str()).collect();
            Err(format!(
                "download completed but required files are missing: {}",
                names.join(", ")
            ))
        }
    }

    fn variant_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::hub::FetchSummary;
    use crate::agent::model_registry::ModelCatalog;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Writes only the files it is given; never fails.
    struct PartialRegistry {
        calls: AtomicU32,
        files: Vec<&'static str>,
    }

    impl ArtifactRegistry for PartialRegistry {
        fn fetch(
            &self,
            _variant: &ModelVariant,
            dest: &Path,
            _cache: &Path,
        ) -> anyhow::Result<FetchSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(dest)?;
            for f in &self.files {
                std::fs::write(dest.join(f), b"x")?;
            }
            Ok(FetchSummary::default())
        }
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_incomplete_transfer_counts_as_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(PartialRegistry {
            calls: AtomicU32::new(0),
            files: vec!["seedvr2_ema_3b.pth"],
        });
        let manager = AcquisitionManager::new(
            ArtifactStore::new(tmp.path()),
            registry.clone(),
            fast_retry(3),
            AliasMode::Copy,
        );
        let catalog = ModelCatalog::seedvr2().unwrap();

        let err = manager
            .ensure_ready(catalog.find("3B").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.variant, "3B");
        assert!(err.last_reason.contains("ema_vae.pth"), "{}", err.last_reason);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lock_is_per_variant() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = AcquisitionManager::new(
            ArtifactStore::new(tmp.path()),
            Arc::new(PartialRegistry {
                calls: AtomicU32::new(0),
                files: vec![],
            }),
            fast_retry(1),
            AliasMode::Copy,
        );
        let a = manager.variant_lock("3B");
        let b = manager.variant_lock("3B");
        let c = manager.variant_lock("7B");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
