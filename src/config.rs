// SYNOID Restore Configuration
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Every path and tunable the restore pipeline touches, derived from the
// environment with container-friendly defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::agent::path_alias::AliasMode;
use crate::agent::retry::RetryConfig;

pub const DEFAULT_WORKSPACE: &str = "/workspace";
pub const DEFAULT_LAUNCHER: &str = "torchrun";
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_INITIAL_SECS: u64 = 10;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
pub const DEFAULT_PORT: u16 = 7860;

/// Inclusive bounds the UI declares for job request parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestBounds {
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    /// Guidance scale is 0.0..=max_cfg_scale.
    pub max_cfg_scale: f32,
    pub max_cfg_rescale: f32,
    /// Sample steps are 1..=max_sample_steps.
    pub max_sample_steps: u32,
}

impl Default for RequestBounds {
    fn default() -> Self {
        Self {
            min_dimension: 512,
            max_dimension: 2048,
            min_fps: 1,
            max_fps: 120,
            max_cfg_scale: 2.0,
            max_cfg_rescale: 1.0,
            max_sample_steps: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Top-level workspace; primary entry-point location and job cwd.
    pub workspace_dir: PathBuf,
    /// Artifact Store root, one directory per variant.
    pub store_dir: PathBuf,
    /// Secondary repository checkout used as a candidate and heal source.
    pub repo_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub env_file: PathBuf,
    pub ui_dir: PathBuf,
    pub launcher: String,
    pub job_deadline: Duration,
    pub retry: RetryConfig,
    pub alias_mode: AliasMode,
    pub bounds: RequestBounds,
    /// Max characters of child diagnostics carried in an inference error.
    pub diagnostics_limit: usize,
    pub hf_token: Option<String>,
    pub host: String,
    pub port: u16,
}

impl RestoreConfig {
    /// Build a configuration with every directory derived from `root`.
    pub fn for_workspace(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            store_dir: root.join("ckpts"),
            repo_dir: root.join("SeedVR"),
            outputs_dir: root.join("outputs"),
            temp_dir: root.join("temp"),
            env_file: root.join(".env"),
            ui_dir: PathBuf::from("dashboard"),
            workspace_dir: root,
            launcher: DEFAULT_LAUNCHER.to_string(),
            job_deadline: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            retry: RetryConfig {
                max_attempts: DEFAULT_DOWNLOAD_ATTEMPTS,
                initial_delay: Duration::from_secs(DEFAULT_BACKOFF_INITIAL_SECS),
                max_delay: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
                backoff_multiplier: 2.0,
            },
            alias_mode: AliasMode::Link,
            bounds: RequestBounds::default(),
            diagnostics_limit: 4000,
            hf_token: None,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }

    /// Read the configuration from `SEEDVR_*` environment variables.
    pub fn from_env() -> Self {
        let workspace =
            std::env::var("SEEDVR_WORKSPACE").unwrap_or_else(|_| DEFAULT_WORKSPACE.to_string());
        let mut config = Self::for_workspace(workspace);

        if let Some(dir) = env_path("SEEDVR_CKPTS_DIR") {
            config.store_dir = dir;
        }
        if let Some(dir) = env_path("SEEDVR_REPO_DIR") {
            config.repo_dir = dir;
        }
        if let Some(dir) = env_path("SEEDVR_OUTPUTS_DIR") {
            config.outputs_dir = dir;
        }
        if let Some(dir) = env_path("SEEDVR_TEMP_DIR") {
            config.temp_dir = dir;
        }
        if let Some(file) = env_path("SEEDVR_ENV_FILE") {
            config.env_file = file;
        }
        if let Some(dir) = env_path("SEEDVR_UI_DIR") {
            config.ui_dir = dir;
        }
        if let Ok(launcher) = std::env::var("SEEDVR_LAUNCHER") {
            if !launcher.trim().is_empty() {
                config.launcher = launcher;
            }
        }

        config.job_deadline = Duration::from_secs(env_number(
            "SEEDVR_JOB_TIMEOUT_SECS",
            DEFAULT_JOB_TIMEOUT_SECS,
        ));
        config.retry.max_attempts =
            env_number("SEEDVR_DOWNLOAD_ATTEMPTS", DEFAULT_DOWNLOAD_ATTEMPTS).max(1);
        config.retry.initial_delay = Duration::from_secs(env_number(
            "SEEDVR_BACKOFF_INITIAL_SECS",
            DEFAULT_BACKOFF_INITIAL_SECS,
        ));
        config.retry.max_delay = Duration::from_secs(env_number(
            "SEEDVR_BACKOFF_MAX_SECS",
            DEFAULT_BACKOFF_MAX_SECS,
        ));

        if let Ok(mode) = std::env::var("SEEDVR_ALIAS_MODE") {
            match mode.parse::<AliasMode>() {
                Ok(parsed) => config.alias_mode = parsed,
                Err(e) => warn!("[CONFIG] {}; keeping {:?}", e, config.alias_mode),
            }
        }

        config.hf_token = std::env::var("HF_TOKEN").ok().filter(|t| !t.trim().is_empty());
        if let Ok(host) = std::env::var("SEEDVR_HOST") {
            config.host = host;
        }
        config.port = env_number("SEEDVR_PORT", DEFAULT_PORT);

        config
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn env_number<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match std::env::var(key) {
        Ok(raw) => parse_or_default(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or_default<T>(key: &str, raw: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!("[CONFIG] Ignoring malformed {}='{}', using {}", key, raw, default);
            default
        }
    }
}
