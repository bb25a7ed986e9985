// End-to-end restore jobs driven by small shell scripts standing in for the
// distributed launcher.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use synoid_restore::agent::hub::{ArtifactRegistry, FetchSummary};
use synoid_restore::agent::model_registry::{ModelCatalog, ModelVariant};
use synoid_restore::agent::orchestrator::{JobOrchestrator, JobRequest, JobStage};
use synoid_restore::agent::progress::ProgressRecorder;
use synoid_restore::agent::retry::RetryConfig;
use synoid_restore::config::RestoreConfig;
use synoid_restore::error::JobError;

/// Copies the staged input to out.mp4 and records its argv and cwd.
const WELL_BEHAVED: &str = r#"#!/bin/sh
printf '%s\n' "$*" > launcher_args.log
while [ $# -gt 0 ]; do
  case "$1" in
    --video_path) inp="$2"; shift 2 ;;
    --output_dir) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat "$inp"/* > "$out/out.mp4"
echo "restoration finished"
"#;

const CRASHING: &str = r#"#!/bin/sh
echo "loading weights"
echo "RuntimeError: CUDA out of memory" >&2
exit 2
"#;

const SILENT: &str = "#!/bin/sh\nexit 0\n";

const HANGING: &str = "#!/bin/sh\nexec sleep 5\n";

struct CountingRegistry {
    calls: AtomicU32,
}

impl ArtifactRegistry for CountingRegistry {
    fn fetch(&self, _: &ModelVariant, _: &Path, _: &Path) -> anyhow::Result<FetchSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("registry unreachable")
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    registry: Arc<CountingRegistry>,
    orchestrator: JobOrchestrator,
}

impl Harness {
    fn new(script: &str, deadline: Duration) -> Self {
        Self::build(script, deadline, true, true)
    }

    fn build(script: &str, deadline: Duration, model_ready: bool, entry_present: bool) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();

        let launcher = root.join("fake_torchrun.sh");
        fs::write(&launcher, script).unwrap();
        fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755)).unwrap();

        if model_ready {
            let dir = root.join("ckpts/3B");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("seedvr2_ema_3b.pth"), b"dit").unwrap();
            fs::write(dir.join("ema_vae.pth"), b"vae").unwrap();
        }
        if entry_present {
            fs::create_dir_all(root.join("projects")).unwrap();
            fs::write(root.join("projects/inference_seedvr2_3b.py"), b"# entry").unwrap();
        }

        let mut config = RestoreConfig::for_workspace(&root);
        config.launcher = launcher.to_string_lossy().into_owned();
        config.job_deadline = deadline;
        config.retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        };

        let registry = Arc::new(CountingRegistry {
            calls: AtomicU32::new(0),
        });
        let orchestrator = JobOrchestrator::new(
            Arc::new(config),
            Arc::new(ModelCatalog::seedvr2().unwrap()),
            registry.clone(),
        );
        Self {
            _tmp: tmp,
            root,
            registry,
            orchestrator,
        }
    }

    fn video(&self) -> PathBuf {
        let video = self.root.join("clip.mp4");
        fs::write(&video, b"frames of a noisy clip").unwrap();
        video
    }

    fn request(&self) -> JobRequest {
        JobRequest::new(self.video(), "3B", 720, 1280, 42)
    }

    fn scratch_is_gone(&self) -> bool {
        let temp = self.root.join("temp");
        !temp.exists() || fs::read_dir(&temp).unwrap().next().is_none()
    }

    fn persisted_count(&self) -> usize {
        let outputs = self.root.join("outputs");
        if !outputs.exists() {
            return 0;
        }
        fs::read_dir(outputs).unwrap().count()
    }
}

#[tokio::test]
async fn test_successful_restore() {
    let h = Harness::new(WELL_BEHAVED, Duration::from_secs(30));
    let mut request = h.request();
    request.parallelism = Some(1);
    let progress = ProgressRecorder::new();

    let result = h.orchestrator.run(request, &progress).await.unwrap();

    assert!(result.path.starts_with(h.root.join("outputs")));
    assert_eq!(fs::read(&result.path).unwrap(), b"frames of a noisy clip");
    assert_eq!(result.variant, "3B");
    assert!(h.scratch_is_gone());
    assert_eq!(h.registry.calls.load(Ordering::SeqCst), 0);
    assert_eq!(progress.fractions(), vec![0.0, 0.1, 0.3, 0.4, 0.9, 1.0]);

    // The launcher ran in the workspace with the script relative to it.
    let args = fs::read_to_string(h.root.join("launcher_args.log")).unwrap();
    assert!(args.starts_with("--nproc-per-node=1 projects/inference_seedvr2_3b.py"));
    assert!(args.contains("--seed 42 --res_h 720 --res_w 1280 --sp_size 1"));
    assert!(!args.contains("--out_fps"));
}

#[tokio::test]
async fn test_frame_rate_and_parallelism_are_forwarded() {
    let h = Harness::new(WELL_BEHAVED, Duration::from_secs(30));
    let mut request = h.request();
    request.fps = Some(30);
    request.parallelism = Some(4);

    h.orchestrator
        .run(request, &ProgressRecorder::new())
        .await
        .unwrap();

    let args = fs::read_to_string(h.root.join("launcher_args.log")).unwrap();
    assert!(args.contains("--nproc-per-node=4"));
    assert!(args.contains("--sp_size 4"));
    assert!(args.trim_end().ends_with("--out_fps 30"));
}

#[tokio::test]
async fn test_two_jobs_never_share_a_result_path() {
    let h = Harness::new(WELL_BEHAVED, Duration::from_secs(30));
    let mut a = h.request();
    a.parallelism = Some(1);
    let mut b = h.request();
    b.parallelism = Some(1);

    let progress = ProgressRecorder::new();
    let (ra, rb) = tokio::join!(h.orchestrator.run(a, &progress), h.orchestrator.run(b, &progress));
    assert_ne!(ra.unwrap().path, rb.unwrap().path);
    assert_eq!(h.persisted_count(), 2);
    assert!(h.scratch_is_gone());
}

#[tokio::test]
async fn test_nonzero_exit_reports_diagnostics() {
    let h = Harness::new(CRASHING, Duration::from_secs(30));
    let mut request = h.request();
    request.parallelism = Some(1);
    let progress = ProgressRecorder::new();

    let err = h.orchestrator.run(request, &progress).await.unwrap_err();
    match &err {
        JobError::Inference {
            exit_code,
            diagnostics,
        } => {
            assert_eq!(*exit_code, 2);
            assert!(diagnostics.contains("CUDA out of memory"));
        }
        other => panic!("expected inference failure, got {:?}", other),
    }
    assert_eq!(err.stage(), JobStage::Running);
    assert!(h.scratch_is_gone());
    assert_eq!(h.persisted_count(), 0);
    assert!(!progress.fractions().contains(&1.0));
}

#[tokio::test]
async fn test_clean_exit_without_output_is_empty_output() {
    let h = Harness::new(SILENT, Duration::from_secs(30));
    let mut request = h.request();
    request.parallelism = Some(1);

    let err = h
        .orchestrator
        .run(request, &ProgressRecorder::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::EmptyOutput { .. }), "{:?}", err);
    assert_eq!(err.stage(), JobStage::Collecting);
    assert!(h.scratch_is_gone());
}

#[tokio::test]
async fn test_deadline_breach_is_a_timeout() {
    let h = Harness::new(HANGING, Duration::from_millis(300));
    let mut request = h.request();
    request.parallelism = Some(1);

    let err = h
        .orchestrator
        .run(request, &ProgressRecorder::new())
        .await
        .unwrap_err();
    match err {
        JobError::Timeout { deadline } => assert_eq!(deadline, Duration::from_millis(300)),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(h.scratch_is_gone());
    assert_eq!(h.persisted_count(), 0);
}

#[tokio::test]
async fn test_acquisition_failure_is_terminal() {
    let h = Harness::build(WELL_BEHAVED, Duration::from_secs(30), false, true);
    let err = h
        .orchestrator
        .run(h.request(), &ProgressRecorder::new())
        .await
        .unwrap_err();
    match &err {
        JobError::Acquisition(e) => {
            assert_eq!(e.variant, "3B");
            assert_eq!(e.attempts, 2);
            assert!(e.last_reason.contains("registry unreachable"));
        }
        other => panic!("expected acquisition failure, got {:?}", other),
    }
    assert_eq!(h.registry.calls.load(Ordering::SeqCst), 2);
    assert!(h.scratch_is_gone());
}

#[tokio::test]
async fn test_missing_entry_point_is_a_resolution_failure() {
    let h = Harness::build(WELL_BEHAVED, Duration::from_secs(30), true, false);
    let err = h
        .orchestrator
        .run(h.request(), &ProgressRecorder::new())
        .await
        .unwrap_err();
    match &err {
        JobError::Resolution(e) => assert!(!e.checked_paths.is_empty()),
        other => panic!("expected resolution failure, got {:?}", other),
    }
    assert_eq!(err.stage(), JobStage::Resolving);
    assert!(h.scratch_is_gone());
}

#[tokio::test]
async fn test_unknown_variant_touches_nothing() {
    let h = Harness::new(WELL_BEHAVED, Duration::from_secs(30));
    let request = JobRequest::new(h.video(), "unknown", 720, 1280, 42);

    let err = h
        .orchestrator
        .run(request, &ProgressRecorder::new())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.stage(), JobStage::Validating);
    assert_eq!(h.registry.calls.load(Ordering::SeqCst), 0);
    assert!(!h.root.join("temp").exists());
}
