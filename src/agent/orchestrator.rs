// SYNOID Restore Job Orchestrator
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Drives one restoration job through its stages:
//
//   Validating → Acquiring → Resolving → Staging → Launching → Running
//     → Collecting → Persisting → Cleanup → Done | Failed
//
// Stages run strictly in order. The scoped input/output directories are
// removed on every path out of Staging, whether the job succeeded or not.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::agent::acquisition::AcquisitionManager;
use crate::agent::artifact_store::ArtifactStore;
use crate::agent::entry_point::{EntryPoint, EntryPointResolver};
use crate::agent::hub::ArtifactRegistry;
use crate::agent::launcher::{run_with_deadline, LaunchCommand, LaunchParams, RunError};
use crate::agent::model_registry::{ModelCatalog, ModelVariant};
use crate::agent::progress::{Milestone, ProgressSink};
use crate::config::RestoreConfig;
use crate::error::{JobError, ResolutionError, ValidationError};
use crate::gpu_backend;

/// Extensions recognised as inference output.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStage {
    Validating,
    Acquiring,
    Resolving,
    Staging,
    Launching,
    Running,
    Collecting,
    Persisting,
    Cleanup,
    Done,
    Failed,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStage::Validating => "validating",
            JobStage::Acquiring => "acquiring",
            JobStage::Resolving => "resolving",
            JobStage::Staging => "staging",
            JobStage::Launching => "launching",
            JobStage::Running => "running",
            JobStage::Collecting => "collecting",
            JobStage::Persisting => "persisting",
            JobStage::Cleanup => "cleanup",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub video: PathBuf,
    pub variant: String,
    pub height: u32,
    pub width: u32,
    #[serde(default)]
    pub seed: i64,
    #[serde(default)]
    pub fps: Option<u32>,
    /// Overrides detected device count.
    #[serde(default)]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub cfg_scale: Option<f32>,
    #[serde(default)]
    pub cfg_rescale: Option<f32>,
    #[serde(default)]
    pub sample_steps: Option<u32>,
}

impl JobRequest {
    pub fn new(
        video: impl Into<PathBuf>,
        variant: impl Into<String>,
        height: u32,
        width: u32,
        seed: i64,
    ) -> Self {
        Self {
            video: video.into(),
            variant: variant.into(),
            height,
            width,
            seed,
            fps: None,
            parallelism: None,
            cfg_scale: None,
            cfg_rescale: None,
            sample_steps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistedResult {
    pub path: PathBuf,
    pub variant: String,
    pub size_bytes: u64,
    pub elapsed_secs: f64,
}

/// Scoped directories for one job.
struct Scratch {
    input: TempDir,
    output: TempDir,
}

impl Scratch {
    fn cleanup(self) {
        info!("[JOB] 🧹 Cleaning up temporary directories");
        remove_scoped(self.input);
        remove_scoped(self.output);
    }
}

fn remove_scoped(dir: TempDir) {
    let path = dir.path().to_path_buf();
    match dir.close() {
        Ok(()) => debug!("[JOB] Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("[JOB] Could not remove {}: {}", path.display(), e),
    }
}

pub struct JobOrchestrator {
    config: Arc<RestoreConfig>,
    catalog: Arc<ModelCatalog>,
    acquisition: Arc<AcquisitionManager>,
    resolver: EntryPointResolver,
}

impl JobOrchestrator {
    pub fn new(
        config: Arc<RestoreConfig>,
        catalog: Arc<ModelCatalog>,
        registry: Arc<dyn ArtifactRegistry>,
    ) -> Self {
        let store = ArtifactStore::new(config.store_dir.clone());
        let acquisition = Arc::new(AcquisitionManager::new(
            store.clone(),
            registry,
            config.retry.clone(),
            config.alias_mode,
        ));
        let resolver = EntryPointResolver::new(
            config.workspace_dir.clone(),
            config.repo_dir.clone(),
            store,
        );
        Self {
            config,
            catalog,
            acquisition,
            resolver,
        }
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Run one job to completion.
    pub async fn run(
        &self,
        request: JobRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PersistedResult, JobError> {
        let started = Instant::now();
        progress.milestone(Milestone::Started);

        let result = self.run_stages(&request, progress, started).await;
        match &result {
            Ok(persisted) => {
                progress.milestone(Milestone::Done);
                info!(
                    "[JOB] ✅ Done in {:.1}s: {}",
                    persisted.elapsed_secs,
                    persisted.path.display()
                );
            }
            Err(e) => error!("[JOB] ❌ Failed during {}: {}", e.stage(), e),
        }
        result
    }

    async fn run_stages(
        &self,
        request: &JobRequest,
        progress: &dyn ProgressSink,
        started: Instant,
    ) -> Result<PersistedResult, JobError> {
        debug!("[JOB] stage: {}", JobStage::Validating);
        let variant = self.validate(request)?;

        debug!("[JOB] stage: {}", JobStage::Acquiring);
        let ready = self.acquisition.ensure_ready(variant).await?;
        info!(
            "[JOB] Model {} ready at {} ({} download attempt(s))",
            variant.label,
            ready.local_dir.display(),
            ready.attempts
        );
        progress.milestone(Milestone::Acquired);

        debug!("[JOB] stage: {}", JobStage::Resolving);
        let entry = self.resolve(variant).await?;

        debug!("[JOB] stage: {}", JobStage::Staging);
        let scratch = self.stage(&request.video)?;
        progress.milestone(Milestone::Staged);

        let outcome = self
            .launch_and_collect(request, variant, &entry, &scratch, progress, started)
            .await;
        scratch.cleanup();
        outcome
    }

    /// Reject malformed requests before touching the network or the store.
    pub fn validate(&self, request: &JobRequest) -> Result<&ModelVariant, ValidationError> {
        let variant = self.catalog.find(&request.variant).ok_or_else(|| {
            ValidationError::new(
                "variant",
                format!(
                    "unknown model '{}' (expected one of: {})",
                    request.variant,
                    self.catalog.ids().join(", ")
                ),
            )
        })?;

        let bounds = &self.config.bounds;
        for (field, value) in [("height", request.height), ("width", request.width)] {
            if value < bounds.min_dimension || value > bounds.max_dimension {
                return Err(ValidationError::new(
                    field,
                    format!(
                        "{} is outside {}..={}",
                        value, bounds.min_dimension, bounds.max_dimension
                    ),
                ));
            }
        }
        if let Some(fps) = request.fps {
            if fps < bounds.min_fps || fps > bounds.max_fps {
                return Err(ValidationError::new(
                    "fps",
                    format!("{} is outside {}..={}", fps, bounds.min_fps, bounds.max_fps),
                ));
            }
        }
        if request.parallelism == Some(0) {
            return Err(ValidationError::new("parallelism", "must be at least 1"));
        }
        if let Some(steps) = request.sample_steps {
            if steps < 1 || steps > bounds.max_sample_steps {
                return Err(ValidationError::new(
                    "sample_steps",
                    format!("{} is outside 1..={}", steps, bounds.max_sample_steps),
                ));
            }
        }
        for (field, value, max) in [
            ("cfg_scale", request.cfg_scale, bounds.max_cfg_scale),
            ("cfg_rescale", request.cfg_rescale, bounds.max_cfg_rescale),
        ] {
            // NaN fails the range check too.
            if let Some(v) = value {
                if !(0.0..=max).contains(&v) {
                    return Err(ValidationError::new(
                        field,
                        format!("{} is outside 0..={}", v, max),
                    ));
                }
            }
        }

        if request.video.as_os_str().is_empty() {
            return Err(ValidationError::new("video", "no input video given"));
        }
        if !request.video.is_file() {
            return Err(ValidationError::new(
                "video",
                format!("{} does not exist", request.video.display()),
            ));
        }
        Ok(variant)
    }

    async fn resolve(&self, variant: &ModelVariant) -> Result<EntryPoint, JobError> {
        let resolver = self.resolver.clone();
        let owned = variant.clone();
        let entry = match tokio::task::spawn_blocking(move || resolver.resolve(&owned)).await {
            Ok(resolved) => resolved?,
            Err(e) => {
                error!("[JOB] Entry point resolution crashed: {}", e);
                return Err(ResolutionError {
                    variant: variant.id.clone(),
                    checked_paths: Vec::new(),
                }
                .into());
            }
        };
        info!("[JOB] Using inference script: {}", entry.script.display());
        Ok(entry)
    }

    fn stage(&self, video: &Path) -> Result<Scratch, JobError> {
        let staging_err = |what: &str, e: io::Error| JobError::Staging {
            reason: format!("{}: {}", what, e),
        };
        let temp_root = &self.config.temp_dir;
        fs::create_dir_all(temp_root).map_err(|e| staging_err("create temp root", e))?;

        let input = tempfile::Builder::new()
            .prefix("seedvr_input_")
            .tempdir_in(temp_root)
            .map_err(|e| staging_err("create input directory", e))?;
        let output = tempfile::Builder::new()
            .prefix("seedvr_output_")
            .tempdir_in(temp_root)
            .map_err(|e| staging_err("create output directory", e))?;

        let name = video
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "input.mp4".to_string());
        let staged = input.path().join(name);
        fs::copy(video, &staged).map_err(|e| staging_err("copy input video", e))?;
        info!("[JOB] Staged input at {}", staged.display());

        Ok(Scratch { input, output })
    }

    async fn launch_and_collect(
        &self,
        request: &JobRequest,
        variant: &ModelVariant,
        entry: &EntryPoint,
        scratch: &Scratch,
        progress: &dyn ProgressSink,
        started: Instant,
    ) -> Result<PersistedResult, JobError> {
        debug!("[JOB] stage: {}", JobStage::Launching);
        let processes = match request.parallelism {
            Some(n) => n,
            None => tokio::task::spawn_blocking(gpu_backend::detect_device_count)
                .await
                .unwrap_or(1),
        };
        let params = LaunchParams {
            input_dir: scratch.input.path(),
            output_dir: scratch.output.path(),
            seed: request.seed,
            height: request.height,
            width: request.width,
            processes,
            out_fps: request.fps,
        };
        let command = self.build_command(request, entry, &params);
        info!(
            "[JOB] 🎬 Restoring with {} on {} process(es)",
            variant.label, processes
        );
        progress.milestone(Milestone::Launching);

        debug!("[JOB] stage: {}", JobStage::Running);
        let outcome = run_with_deadline(&command, self.config.job_deadline)
            .await
            .map_err(|e| match e {
                RunError::TimedOut(deadline) => JobError::Timeout { deadline },
                RunError::Spawn(e) => JobError::Launch {
                    reason: format!("could not start '{}': {}", command.program, e),
                },
                RunError::Wait(e) => JobError::Launch {
                    reason: format!("lost track of '{}': {}", command.program, e),
                },
            })?;
        progress.milestone(Milestone::Finished);

        debug!("[JOB] stage: {}", JobStage::Collecting);
        if !outcome.success() {
            error!("[JOB] Inference stdout:\n{}", outcome.stdout);
            error!("[JOB] Inference stderr:\n{}", outcome.stderr);
            return Err(JobError::Inference {
                exit_code: outcome.exit_code,
                diagnostics: outcome.diagnostics(self.config.diagnostics_limit),
            });
        }
        debug!("[JOB] Inference stdout:\n{}", outcome.stdout);
        debug!("[JOB] Inference stderr:\n{}", outcome.stderr);

        let produced = find_output_videos(scratch.output.path());
        let first = produced
            .into_iter()
            .next()
            .ok_or_else(|| JobError::EmptyOutput {
                output_dir: scratch.output.path().to_path_buf(),
            })?;

        debug!("[JOB] stage: {}", JobStage::Persisting);
        let path = persist(&first, &self.config.outputs_dir).map_err(|e| JobError::Persist {
            reason: e.to_string(),
        })?;
        let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        Ok(PersistedResult {
            path,
            variant: variant.id.clone(),
            size_bytes,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn build_command(
        &self,
        request: &JobRequest,
        entry: &EntryPoint,
        params: &LaunchParams<'_>,
    ) -> LaunchCommand {
        let mut command = LaunchCommand::build(&self.config.launcher, entry, params);
        for (key, value) in load_env_file(&self.config.env_file) {
            command = command.with_env(key, value);
        }
        if let Some(scale) = request.cfg_scale {
            command = command.with_env("CFG_SCALE", scale.to_string());
        }
        if let Some(rescale) = request.cfg_rescale {
            command = command.with_env("CFG_RESCALE", rescale.to_string());
        }
        if let Some(steps) = request.sample_steps {
            command = command.with_env("SAMPLE_STEPS", steps.to_string());
        }
        command
    }
}

/// Variables from the optional env file; a missing file yields none.
fn load_env_file(path: &Path) -> Vec<(String, String)> {
    if !path.is_file() {
        return Vec::new();
    }
    match dotenv::from_path_iter(path) {
        Ok(iter) => iter
            .filter_map(|item| match item {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!("[JOB] Skipping bad line in {}: {}", path.display(), e);
                    None
                }
            })
            .collect(),
        Err(e) => {
            warn!("[JOB] Could not read {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Video files directly inside `dir`, sorted by name.
pub fn find_output_videos(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| has_video_extension(p))
        .collect();
    found.sort();
    found
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Copy `produced` into `outputs_dir` under a name unique across jobs.
fn persist(produced: &Path, outputs_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(outputs_dir)?;
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let token = Uuid::new_v4().simple().to_string();
    let ext = produced
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    let dest = outputs_dir.join(format!("restored_{}_{}.{}", ts, &token[..8], ext));
    fs::copy(produced, &dest)?;
    info!("[JOB] 💾 Saved result to {}", dest.display());
    Ok(dest)
}

/// Strip path separators and shell-hostile characters from a file name.
pub fn sanitize_filename(name: &str) -> String {
    name.replace("..", "")
        .replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
        .replace('\0', "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::hub::FetchSummary;

    struct NoRegistry;

    impl ArtifactRegistry for NoRegistry {
        fn fetch(&self, _: &ModelVariant, _: &Path, _: &Path) -> anyhow::Result<FetchSummary> {
            anyhow::bail!("offline")
        }
    }

    fn orchestrator(root: &Path) -> JobOrchestrator {
        JobOrchestrator::new(
            Arc::new(RestoreConfig::for_workspace(root)),
            Arc::new(ModelCatalog::seedvr2().unwrap()),
            Arc::new(NoRegistry),
        )
    }

    #[test]
    fn test_unknown_variant_rejected_first() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = orchestrator(tmp.path());
        // Video is also missing; the variant is reported.
        let req = JobRequest::new("/nope.mp4", "unknown", 720, 1280, 42);
        let err = orch.validate(&req).unwrap_err();
        assert_eq!(err.field, "variant");
    }

    #[test]
    fn test_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("clip.mp4");
        fs::write(&video, b"v").unwrap();
        let orch = orchestrator(tmp.path());

        let ok = JobRequest::new(&video, "3b", 512, 2048, 0);
        assert!(orch.validate(&ok).is_ok());

        let err = orch
            .validate(&JobRequest::new(&video, "3B", 511, 1280, 0))
            .unwrap_err();
        assert_eq!(err.field, "height");

        let mut fps = JobRequest::new(&video, "7B", 720, 1280, 0);
        fps.fps = Some(121);
        assert_eq!(orch.validate(&fps).unwrap_err().field, "fps");

        let mut par = JobRequest::new(&video, "7B", 720, 1280, 0);
        par.parallelism = Some(0);
        assert_eq!(orch.validate(&par).unwrap_err().field, "parallelism");

        let mut steps = JobRequest::new(&video, "3B", 720, 1280, 0);
        steps.sample_steps = Some(11);
        assert_eq!(orch.validate(&steps).unwrap_err().field, "sample_steps");
        steps.sample_steps = Some(10);
        assert!(orch.validate(&steps).is_ok());

        let mut cfg = JobRequest::new(&video, "3B", 720, 1280, 0);
        cfg.cfg_scale = Some(2.0);
        cfg.cfg_rescale = Some(0.0);
        assert!(orch.validate(&cfg).is_ok());
        cfg.cfg_scale = Some(f32::NAN);
        assert_eq!(orch.validate(&cfg).unwrap_err().field, "cfg_scale");
        cfg.cfg_scale = Some(1.0);
        cfg.cfg_rescale = Some(-0.5);
        assert_eq!(orch.validate(&cfg).unwrap_err().field, "cfg_rescale");

        let missing = JobRequest::new(tmp.path().join("gone.mp4"), "3B", 720, 1280, 0);
        assert_eq!(orch.validate(&missing).unwrap_err().field, "video");
    }

    #[test]
    fn test_output_scan_and_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(out.join("nested")).unwrap();
        fs::write(out.join("b.mp4"), b"b").unwrap();
        fs::write(out.join("a.MKV"), b"a").unwrap();
        fs::write(out.join("log.txt"), b"l").unwrap();
        fs::write(out.join("nested/c.mp4"), b"c").unwrap();

        let found = find_output_videos(&out);
        assert_eq!(found, vec![out.join("a.MKV"), out.join("b.mp4")]);

        let saved_a = persist(&found[1], &tmp.path().join("outputs")).unwrap();
        let saved_b = persist(&found[1], &tmp.path().join("outputs")).unwrap();
        assert_ne!(saved_a, saved_b);
        assert_eq!(fs::read(&saved_a).unwrap(), b"b");
        assert!(saved_a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("restored_"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "__etc_passwd");
        assert_eq!(sanitize_filename("my clip?.mp4"), "my clip_.mp4");
    }

    #[test]
    fn test_env_file_and_sampling_env() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".env"), "HF_HOME=/cache\nPYTHONPATH=/workspace\n").unwrap();
        let orch = orchestrator(tmp.path());
        let entry = EntryPoint {
            variant: "3B".to_string(),
            script: tmp.path().join("inference_seedvr2_3b.py"),
            working_dir: tmp.path().to_path_buf(),
            relative_script: PathBuf::from("inference_seedvr2_3b.py"),
            healed: false,
        };
        let mut req = JobRequest::new("clip.mp4", "3B", 720, 1280, 1);
        req.cfg_scale = Some(1.5);
        req.sample_steps = Some(4);
        let params = LaunchParams {
            input_dir: Path::new("/in"),
            output_dir: Path::new("/out"),
            seed: 1,
            height: 720,
            width: 1280,
            processes: 1,
            out_fps: None,
        };
        let cmd = orch.build_command(&req, &entry, &params);
        assert_eq!(cmd.envs.get("HF_HOME").map(String::as_str), Some("/cache"));
        assert_eq!(cmd.envs.get("CFG_SCALE").map(String::as_str), Some("1.5"));
        assert_eq!(cmd.envs.get("SAMPLE_STEPS").map(String::as_str), Some("4"));
        assert!(!cmd.envs.contains_key("CFG_RESCALE"));
    }
}
