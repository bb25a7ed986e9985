// SYNOID Health Check & Watchdog
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Startup dependency probe for the external tools a restore job shells out
// to, plus a light heartbeat for the long-running dashboard server.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::SystemExt;
use tracing::{info, warn};

/// Executables a restore job needs besides the launcher itself.
pub const REQUIRED_TOOLS: &[&str] = &["nvidia-smi"];

/// Names of required executables not found on PATH.
pub fn check_dependencies(launcher: &str) -> Vec<String> {
    std::iter::once(launcher)
        .chain(REQUIRED_TOOLS.iter().copied())
        .filter(|tool| !executable_exists(tool))
        .map(str::to_string)
        .collect()
}

/// True if `name` is an existing path or resolves through PATH.
pub fn executable_exists(name: &str) -> bool {
    if name.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(name).is_file();
    }
    let Some(path_env) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_env).any(|dir| candidate_exists(&dir, name))
}

fn candidate_exists(dir: &Path, name: &str) -> bool {
    if dir.join(name).is_file() {
        return true;
    }
    cfg!(windows) && dir.join(format!("{}.exe", name)).is_file()
}

/// Periodic liveness check for the presentation server.
pub struct HealthMonitor {
    start_time: Instant,
    is_running: Arc<AtomicBool>,
    heartbeat_count: Arc<AtomicU64>,
    check_interval: Duration,
    watched_dir: PathBuf,
}

impl HealthMonitor {
    /// `watched_dir` is probed for writability on each heartbeat.
    pub fn new(check_interval_secs: u64, watched_dir: impl Into<PathBuf>) -> Self {
        Self {
            start_time: Instant::now(),
            is_running: Arc::new(AtomicBool::new(false)),
            heartbeat_count: Arc::new(AtomicU64::new(0)),
            check_interval: Duration::from_secs(check_interval_secs.max(1)),
            watched_dir: watched_dir.into(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat_count.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn start(&self) {
        let is_running = self.is_running.clone();
        let heartbeat_count = self.heartbeat_count.clone();
        let interval = self.check_interval;
        let watched = self.watched_dir.clone();

        is_running.store(true, Ordering::Relaxed);
        tokio::spawn(async move {
            info!("[HEALTH] Watchdog started (interval: {:?})", interval);
            while is_running.load(Ordering::Relaxed) {
                tokio::time::sleep(interval).await;
                let count = heartbeat_count.fetch_add(1, Ordering::Relaxed) + 1;

                let mem_ok = check_memory_health();
                let disk_ok = check_dir_writable(&watched);
                if !mem_ok {
                    warn!("[HEALTH] ⚠️ Memory pressure detected (heartbeat #{})", count);
                }
                if !disk_ok {
                    warn!(
                        "[HEALTH] ⚠️ {} is not writable (heartbeat #{})",
                        watched.display(),
                        count
                    );
                }
                if count % 60 == 0 {
                    info!(
                        "[HEALTH] ♥ Alive | Heartbeat #{} | Memory: {} | Outputs: {}",
                        count,
                        if mem_ok { "OK" } else { "WARN" },
                        if disk_ok { "OK" } else { "WARN" },
                    );
                }
            }
            info!("[HEALTH] Watchdog stopped.");
        });
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub fn status_report(&self) -> String {
        let uptime = self.uptime_secs();
        format!(
            "Health Report\n  Uptime: {}h {}m {}s\n  Heartbeats: {}\n  Status: {}",
            uptime / 3600,
            (uptime % 3600) / 60,
            uptime % 60,
            self.heartbeat_count(),
            if self.is_running() { "MONITORING" } else { "STOPPED" },
        )
    }
}

fn check_memory_health() -> bool {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return true;
    }
    (sys.used_memory() as f64 / total as f64) < 0.95
}

fn check_dir_writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    tempfile::NamedTempFile::new_in(dir).is_ok()
}
