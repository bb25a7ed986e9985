// SYNOID Job Progress
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Coarse milestone reporting for a single restoration job.

use std::sync::Mutex;

/// Fixed points at which a job reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Started,
    Acquired,
    Staged,
    Launching,
    Finished,
    Done,
}

impl Milestone {
    pub fn fraction(self) -> f32 {
        match self {
            Milestone::Started => 0.0,
            Milestone::Acquired => 0.1,
            Milestone::Staged => 0.3,
            Milestone::Launching => 0.4,
            Milestone::Finished => 0.9,
            Milestone::Done => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Milestone::Started => "Starting job",
            Milestone::Acquired => "Model ready",
            Milestone::Staged => "Input staged",
            Milestone::Launching => "Running inference",
            Milestone::Finished => "Collecting output",
            Milestone::Done => "Complete",
        }
    }
}

/// Receives `(fraction, label)` at each milestone.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f32, label: &str);

    fn milestone(&self, milestone: Milestone) {
        self.report(milestone.fraction().clamp(0.0, 1.0), milestone.label());
    }
}

impl<F> ProgressSink for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn report(&self, fraction: f32, label: &str) {
        self(fraction, label)
    }
}

/// Keeps every report, in order.
#[derive(Default)]
pub struct ProgressRecorder {
    events: Mutex<Vec<(f32, String)>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(f32, String)> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn fractions(&self) -> Vec<f32> {
        self.events().into_iter().map(|(f, _)| f).collect()
    }
}

impl ProgressSink for ProgressRecorder {
    fn report(&self, fraction: f32, label: &str) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push((fraction, label.to_string()));
    }
}
