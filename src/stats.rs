//! Pipeline counters for observability

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live pipeline counters, shared between the orchestrator and its worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    busy_drops: AtomicU64,
    capture_empty: AtomicU64,
    transcription_empty: AtomicU64,
    dispatch_failures: AtomicU64,
    playback_interrupted: AtomicU64,
    engine_failures: AtomicU64,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub busy_drops: u64,
    pub capture_empty: u64,
    pub transcription_empty: u64,
    pub dispatch_failures: u64,
    pub playback_interrupted: u64,
    pub engine_failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl PipelineStats {
    pub(crate) fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_run_at.lock() {
            *last = Some(Utc::now());
        }
    }

    pub(crate) fn run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn busy_drop(&self) {
        self.busy_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn capture_empty(&self) {
        self.capture_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transcription_empty(&self) {
        self.transcription_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn playback_interrupted(&self) {
        self.playback_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn engine_failure(&self) {
        self.engine_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            busy_drops: self.busy_drops.load(Ordering::Relaxed),
            capture_empty: self.capture_empty.load(Ordering::Relaxed),
            transcription_empty: self.transcription_empty.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            playback_interrupted: self.playback_interrupted.load(Ordering::Relaxed),
            engine_failures: self.engine_failures.load(Ordering::Relaxed),
            last_run_at: self.last_run_at.lock().ok().and_then(|l| *l),
        }
    }
}
