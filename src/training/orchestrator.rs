// Training run coordination
//
// Owns the single process-wide status record and the in-progress guard.
// Both live behind one mutex so the guard check-and-set and every status
// mutation are atomic with respect to each other; overlapping start
// attempts are rejected, never raced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;

/// Phase of the current (or most recent) training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Idle,
    Starting,
    Training,
    Completed,
    Failed,
}

/// Parameters for one training run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrainingParams {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl TrainingParams {
    /// Resolve request values against configured defaults, clamping the
    /// epoch count to the configured maximum.
    pub fn resolve(
        epochs: Option<usize>,
        learning_rate: Option<f64>,
        config: &crate::config::TrainingConfig,
    ) -> Self {
        Self {
            epochs: epochs.unwrap_or(config.default_epochs).min(config.max_epochs),
            learning_rate: learning_rate.unwrap_or(config.default_learning_rate),
        }
    }
}

/// A run was requested while another is still in progress.
#[derive(Debug, thiserror::Error)]
#[error("Training already in progress")]
pub struct TrainingBusy;

/// Wire snapshot of the status record.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub status: TrainingPhase,
    pub progress: u8,
    pub message: String,
    pub elapsed_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time_str: Option<String>,
    pub metrics: HashMap<String, f64>,
}

struct StatusRecord {
    phase: TrainingPhase,
    progress: u8,
    message: String,
    start_time: Option<DateTime<Utc>>,
    elapsed_secs: f64,
    metrics: HashMap<String, f64>,
}

impl StatusRecord {
    fn idle() -> Self {
        Self {
            phase: TrainingPhase::Idle,
            progress: 0,
            message: String::new(),
            start_time: None,
            elapsed_secs: 0.0,
            metrics: HashMap::new(),
        }
    }

    /// Recompute elapsed time from the run start. Called on every update so
    /// a completed or failed run freezes at its final duration.
    fn touch_elapsed(&mut self) {
        if let Some(start) = self.start_time {
            let elapsed = Utc::now() - start;
            self.elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
        }
    }
}

struct OrchestratorState {
    in_progress: bool,
    status: StatusRecord,
    /// Supervisor handle for the most recent run; retained so failures are
    /// queryable instead of silently lost with a detached task.
    supervisor: Option<JoinHandle<()>>,
}

/// Coordinates background training runs and publishes their progress.
pub struct TrainingOrchestrator {
    state: Mutex<OrchestratorState>,
}

impl Default for TrainingOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingOrchestrator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OrchestratorState {
                in_progress: false,
                status: StatusRecord::idle(),
                supervisor: None,
            }),
        }
    }

    /// Atomically claim the run slot. On success the status is reset to
    /// `starting`/0% and the caller must eventually reach `complete` or
    /// `fail`, which release the slot.
    pub fn try_start(&self) -> Result<(), TrainingBusy> {
        let mut state = self.lock();
        if state.in_progress {
            return Err(TrainingBusy);
        }
        state.in_progress = true;
        state.status = StatusRecord {
            phase: TrainingPhase::Starting,
            progress: 0,
            message: "Initializing training...".to_string(),
            start_time: Some(Utc::now()),
            elapsed_secs: 0.0,
            metrics: HashMap::new(),
        };
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().in_progress
    }

    /// Retain the supervisor task handle for the active run.
    pub fn supervise(&self, handle: JoinHandle<()>) {
        self.lock().supervisor = Some(handle);
    }

    /// Take the retained supervisor handle, e.g. to await run teardown.
    pub fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.lock().supervisor.take()
    }

    /// Publish per-epoch progress; merges `metrics` into the record.
    pub fn update(&self, progress: u8, message: impl Into<String>, metrics: HashMap<String, f64>) {
        let mut state = self.lock();
        let status = &mut state.status;
        status.phase = TrainingPhase::Training;
        status.progress = progress.min(100);
        status.message = message.into();
        status.metrics.extend(metrics);
        status.touch_elapsed();
        tracing::debug!(
            progress = status.progress,
            message = %status.message,
            "Training progress"
        );
    }

    /// Record a successful run and release the run slot.
    pub fn complete(&self, message: impl Into<String>, metrics: HashMap<String, f64>) {
        let mut state = self.lock();
        let status = &mut state.status;
        status.phase = TrainingPhase::Completed;
        status.progress = 100;
        status.message = message.into();
        status.metrics.extend(metrics);
        status.touch_elapsed();
        state.in_progress = false;
        tracing::info!(message = %state.status.message, "Training completed");
    }

    /// Record a failed run and release the run slot. Idempotent, so the
    /// supervisor can call it after a panic without clobbering an earlier
    /// failure message.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if !state.in_progress && state.status.phase == TrainingPhase::Failed {
            return;
        }
        let status = &mut state.status;
        status.phase = TrainingPhase::Failed;
        status.progress = 0;
        status.message = message.into();
        status.touch_elapsed();
        state.in_progress = false;
        tracing::error!(message = %state.status.message, "Training failed");
    }

    /// Copy of the current status for polling clients.
    pub fn snapshot(&self) -> TrainingReport {
        let state = self.lock();
        let status = &state.status;
        TrainingReport {
            status: status.phase,
            progress: status.progress,
            message: status.message.clone(),
            elapsed_time: status.elapsed_secs,
            elapsed_time_str: status
                .start_time
                .map(|_| format_elapsed(status.elapsed_secs)),
            metrics: status.metrics.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OrchestratorState> {
        // A poisoned lock means a panic mid-update; the record is still
        // coherent (every mutation is a full-field write), so keep serving.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Render elapsed seconds as `"{m}m {s}s"`, truncating sub-second noise.
pub fn format_elapsed(elapsed_secs: f64) -> String {
    let secs = elapsed_secs.max(0.0) as u64;
    format!("{}m {}s", secs / 60, secs % 60)
}
