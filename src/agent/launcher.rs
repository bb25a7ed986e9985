// SYNOID Distributed Launcher
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Builds the single multi-process invocation of the inference entry point
// and runs it under a wall-clock deadline with both output streams captured.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::agent::entry_point::EntryPoint;

/// Flag the launcher takes for processes per node.
pub const NPROC_FLAG: &str = "--nproc-per-node";

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub envs: BTreeMap<String, String>,
}

/// Parameters forwarded to the entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParams<'a> {
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub seed: i64,
    pub height: u32,
    pub width: u32,
    pub processes: u32,
    pub out_fps: Option<u32>,
}

impl LaunchCommand {
    pub fn build(launcher: &str, entry: &EntryPoint, params: &LaunchParams<'_>) -> Self {
        let mut args = vec![
            format!("{}={}", NPROC_FLAG, params.processes),
            entry.relative_script.to_string_lossy().into_owned(),
            "--video_path".to_string(),
            params.input_dir.to_string_lossy().into_owned(),
            "--output_dir".to_string(),
            params.output_dir.to_string_lossy().into_owned(),
            "--seed".to_string(),
            params.seed.to_string(),
            "--res_h".to_string(),
            params.height.to_string(),
            "--res_w".to_string(),
            params.width.to_string(),
            "--sp_size".to_string(),
            params.processes.to_string(),
        ];
        if let Some(fps) = params.out_fps {
            args.push("--out_fps".to_string());
            args.push(fps.to_string());
        }

        Self {
            program: launcher.to_string(),
            args,
            working_dir: entry.working_dir.clone(),
            envs: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Human-readable form for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Tail of the diagnostics, preferring stderr, at most `limit` chars.
    pub fn diagnostics(&self, limit: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        tail_chars(text, limit)
    }
}

#[derive(Debug)]
pub enum RunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut(Duration),
}

/// Run `cmd`, killing its whole process group once `deadline` passes.
///
/// The deadline covers the launcher's exit and the draining of its output.
/// Workers that keep the pipes open after the launcher exits count against it.
pub async fn run_with_deadline(
    cmd: &LaunchCommand,
    deadline: Duration,
) -> Result<ProcessOutcome, RunError> {
    info!("[LAUNCH] 🚀 Full command: {}", cmd.display());
    info!("[LAUNCH] 📂 Working directory: {}", cmd.working_dir.display());

    let started = Instant::now();
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .current_dir(&cmd.working_dir)
        .envs(&cmd.envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // The launcher leads a fresh group so its workers can be stopped with it.
    #[cfg(unix)]
    command.process_group(0);
    let mut child = command.spawn().map_err(RunError::Spawn)?;
    let group = child.id();

    let mut stdout_task = child.stdout.take().map(spawn_reader);
    let mut stderr_task = child.stderr.take().map(spawn_reader);

    let status = match tokio::time::timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            kill_process_group(group);
            abort_readers([stdout_task, stderr_task]);
            return Err(RunError::Wait(e));
        }
        Err(_) => {
            warn!("[LAUNCH] ⏰ Deadline of {:?} exceeded, killing process group", deadline);
            kill_process_group(group);
            if let Err(e) = child.kill().await {
                warn!("[LAUNCH] Failed to kill timed-out process: {}", e);
            }
            abort_readers([stdout_task, stderr_task]);
            return Err(RunError::TimedOut(deadline));
        }
    };

    let remaining = deadline.saturating_sub(started.elapsed());
    let drained = tokio::time::timeout(remaining, async {
        (
            join_reader(stdout_task.as_mut()).await,
            join_reader(stderr_task.as_mut()).await,
        )
    })
    .await;
    let (stdout, stderr) = match drained {
        Ok(streams) => streams,
        Err(_) => {
            warn!(
                "[LAUNCH] ⏰ Output still held open by workers after {:?}, killing process group",
                deadline
            );
            kill_process_group(group);
            abort_readers([stdout_task, stderr_task]);
            return Err(RunError::TimedOut(deadline));
        }
    };

    let elapsed = started.elapsed();
    // Killed by a signal has no code.
    let exit_code = status.code().unwrap_or(-1);
    debug!("[LAUNCH] exit code {} after {:.1}s", exit_code, elapsed.as_secs_f64());

    Ok(ProcessOutcome {
        exit_code,
        stdout,
        stderr,
        elapsed,
    })
}

type Reader = tokio::task::JoinHandle<Vec<u8>>;

fn spawn_reader<R>(mut stream: R) -> Reader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        buf
    })
}

async fn join_reader(task: Option<&mut Reader>) -> String {
    match task {
        Some(handle) => match handle.await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}

fn abort_readers(tasks: [Option<Reader>; 2]) {
    for task in tasks.into_iter().flatten() {
        task.abort();
    }
}

/// SIGKILL every process in the launcher's group. A group that is already
/// gone is not an error.
#[cfg(unix)]
fn kill_process_group(group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => debug!("[LAUNCH] Killed process group {}", pgid),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("[LAUNCH] Failed to kill process group {}: {}", pgid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: Option<u32>) {}

fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - limit).collect();
    format!("...{}", skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> EntryPoint {
        EntryPoint {
            variant: "3B".to_string(),
            script: PathBuf::from("/workspace/projects/inference_seedvr2_3b.py"),
            working_dir: PathBuf::from("/workspace"),
            relative_script: PathBuf::from("projects/inference_seedvr2_3b.py"),
            healed: false,
        }
    }

    #[test]
    fn test_command_layout() {
        let params = LaunchParams {
            input_dir: Path::new("/tmp/in"),
            output_dir: Path::new("/tmp/out"),
            seed: 42,
            height: 720,
            width: 1280,
            processes: 2,
            out_fps: None,
        };
        let cmd = LaunchCommand::build("torchrun", &entry(), &params);
        assert_eq!(
            cmd.display(),
            "torchrun --nproc-per-node=2 projects/inference_seedvr2_3b.py \
             --video_path /tmp/in --output_dir /tmp/out --seed 42 \
             --res_h 720 --res_w 1280 --sp_size 2"
        );
        assert_eq!(cmd.working_dir, PathBuf::from("/workspace"));
    }

    #[test]
    fn test_fps_only_when_given() {
        let params = LaunchParams {
            input_dir: Path::new("/i"),
            output_dir: Path::new("/o"),
            seed: -7,
            height: 512,
            width: 512,
            processes: 1,
            out_fps: Some(24),
        };
        let cmd = LaunchCommand::build("torchrun", &entry(), &params);
        assert_eq!(&cmd.args[cmd.args.len() - 2..], ["--out_fps", "24"]);
        assert!(cmd.args.contains(&"-7".to_string()));
    }

    #[test]
    fn test_diagnostics_are_bounded() {
        let outcome = ProcessOutcome {
            exit_code: 1,
            stdout: "ignored".to_string(),
            stderr: "x".repeat(100) + "CUDA out of memory",
            elapsed: Duration::ZERO,
        };
        let d = outcome.diagnostics(20);
        assert!(d.ends_with("CUDA out of memory"));
        assert_eq!(d.chars().count(), 23);

        let quiet = ProcessOutcome {
            exit_code: 1,
            stdout: "only stdout".to_string(),
            stderr: "  ".to_string(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(quiet.diagnostics(100), "only stdout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills_process() {
        let cmd = LaunchCommand {
            program: "sleep".to_string(),
            args: vec!["5".to_string()],
            working_dir: std::env::temp_dir(),
            envs: BTreeMap::new(),
        };
        let started = Instant::now();
        let result = run_with_deadline(&cmd, Duration::from_millis(150)).await;
        assert!(matches!(result, Err(RunError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    /// Alive and not a zombie awaiting its reaper.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_deadline_kills_worker_processes() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = LaunchCommand {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "sleep 30 & echo $! > workers.pid; sleep 30 & echo $! >> workers.pid; wait"
                    .to_string(),
            ],
            working_dir: dir.path().to_path_buf(),
            envs: BTreeMap::new(),
        };
        let result = run_with_deadline(&cmd, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(RunError::TimedOut(_))));

        let pids = std::fs::read_to_string(dir.path().join("workers.pid")).unwrap();
        let pids: Vec<&str> = pids.split_whitespace().collect();
        assert_eq!(pids.len(), 2);

        let mut survivors = pids.clone();
        for _ in 0..40 {
            survivors.retain(|pid| is_running(pid));
            if survivors.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(survivors.is_empty(), "workers still running: {:?}", survivors);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_held_by_worker_counts_against_deadline() {
        let cmd = LaunchCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5 & echo hi".to_string()],
            working_dir: std::env::temp_dir(),
            envs: BTreeMap::new(),
        };
        let started = Instant::now();
        let result = run_with_deadline(&cmd, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(RunError::TimedOut(_))), "{:?}", result);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_streams_and_exit_code() {
        let cmd = LaunchCommand {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo out; echo \"$GREETING\" >&2; exit 3".to_string(),
            ],
            working_dir: std::env::temp_dir(),
            envs: BTreeMap::new(),
        }
        .with_env("GREETING", "bad things");
        let outcome = run_with_deadline(&cmd, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "bad things");
    }
}
