// SYNOID Restore Dashboard State
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::agent::orchestrator::{JobOrchestrator, JobStage, PersistedResult};
use crate::agent::progress::ProgressSink;
use crate::error::JobError;

/// Log lines kept for the dashboard.
const MAX_LOG_LINES: usize = 200;

pub struct KernelState {
    pub orchestrator: Arc<JobOrchestrator>,
    /// Held for the duration of a restore; one job at a time.
    pub job_lock: tokio::sync::Mutex<()>,
    pub status: Arc<Mutex<JobStatus>>,
}

impl KernelState {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            orchestrator,
            job_lock: tokio::sync::Mutex::new(()),
            status: Arc::new(Mutex::new(JobStatus::default())),
        }
    }

    pub fn status(&self) -> MutexGuard<'_, JobStatus> {
        lock_status(&self.status)
    }

    pub fn snapshot(&self) -> JobStatus {
        self.status().clone()
    }

    /// Progress sink that writes into the shared status.
    pub fn progress_sink(&self) -> StatusSink {
        StatusSink {
            status: self.status.clone(),
        }
    }

    pub fn begin_job(&self, variant: &str) {
        let mut status = self.status();
        status.is_running = true;
        status.fraction = 0.0;
        status.label = format!("Queued {}", variant);
        status.last_error = None;
        status.push_log(format!("[JOB] Started restore with {}", variant));
    }

    pub fn finish_job(&self, result: &Result<PersistedResult, JobError>) {
        let mut status = self.status();
        status.is_running = false;
        match result {
            Ok(persisted) => {
                status.push_log(format!("[JOB] Saved {}", persisted.path.display()));
                status.last_result = Some(persisted.clone());
                status.last_error = None;
            }
            Err(e) => {
                status.label = format!("Failed during {}", e.stage());
                status.push_log(format!("[JOB] Failed during {}: {}", e.stage(), e));
                status.last_error = Some(JobFailure::from(e));
            }
        }
    }
}

fn lock_status(status: &Mutex<JobStatus>) -> MutexGuard<'_, JobStatus> {
    match status.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub is_running: bool,
    pub fraction: f32,
    pub label: String,
    pub last_result: Option<PersistedResult>,
    pub last_error: Option<JobFailure>,
    pub logs: Vec<String>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            is_running: false,
            fraction: 0.0,
            label: "⚡ System Ready".to_string(),
            last_result: None,
            last_error: None,
            logs: vec!["[SYSTEM] Restore service initialized.".to_string()],
        }
    }
}

impl JobStatus {
    pub fn push_log(&mut self, line: String) {
        self.logs.push(line);
        if self.logs.len() > MAX_LOG_LINES {
            let excess = self.logs.len() - MAX_LOG_LINES;
            self.logs.drain(..excess);
        }
    }
}

/// Structured failure as reported to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub stage: JobStage,
    pub error: String,
}

impl From<&JobError> for JobFailure {
    fn from(e: &JobError) -> Self {
        Self {
            stage: e.stage(),
            error: e.to_string(),
        }
    }
}

pub struct StatusSink {
    status: Arc<Mutex<JobStatus>>,
}

impl ProgressSink for StatusSink {
    fn report(&self, fraction: f32, label: &str) {
        let mut status = lock_status(&self.status);
        status.fraction = fraction;
        status.label = label.to_string();
        status.push_log(format!("[JOB] {:>3.0}% {}", fraction * 100.0, label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut status = JobStatus::default();
        for i in 0..(MAX_LOG_LINES + 10) {
            status.push_log(format!("line {}", i));
        }
        assert_eq!(status.logs.len(), MAX_LOG_LINES);
        assert_eq!(status.logs.last().unwrap(), &format!("line {}", MAX_LOG_LINES + 9));
    }

    #[test]
    fn test_sink_updates_status() {
        let status = Arc::new(Mutex::new(JobStatus::default()));
        let sink = StatusSink {
            status: status.clone(),
        };
        sink.report(0.4, "Running inference");
        let snapshot = status.lock().unwrap().clone();
        assert_eq!(snapshot.fraction, 0.4);
        assert_eq!(snapshot.label, "Running inference");
    }
}
