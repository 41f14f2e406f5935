//! Global pause/resume/step/reset control plane.
//!
//! A single [`ControlState`] instance is consulted by every in-flight job.
//! It carries its own lock, separate from cache and queue state, so
//! control commands never wait on scheduling activity.
//!
//! Invariant: `step_mode` is true only while the status is `paused` or
//! `stepping`; `resume` and `reset` both clear it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// Capacity of the step-signal channel.
const CONTROL_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// Commands and Status
// =============================================================================

/// A control-plane command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Pause,
    Resume,
    Step,
    Reset,
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "step" => Ok(Self::Step),
            "reset" => Ok(Self::Reset),
            other => Err(ControlError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }
}

/// Process-wide execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Running,
    Paused,
    Stepping,
}

/// Snapshot of the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    pub status: SystemStatus,
    pub step_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    pub message: String,
    pub last_updated: DateTime<Utc>,
}

impl SystemState {
    fn initial() -> Self {
        Self {
            status: SystemStatus::Running,
            step_mode: false,
            current_step: None,
            pending_steps: Vec::new(),
            paused_at: None,
            message: String::new(),
            last_updated: Utc::now(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Control-plane misuse. State is left unchanged on every variant.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("system already paused")]
    AlreadyPaused,

    #[error("system already running")]
    AlreadyRunning,

    #[error("system must be paused to step")]
    NotPaused,

    #[error("unknown control command '{command}'")]
    UnknownCommand { command: String },
}

// =============================================================================
// Control State
// =============================================================================

/// Outcome of a step-mode rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSignal {
    /// An explicit step command arrived; continue with the next step.
    Advance,
    /// Timeout or a non-step condition; abort the run.
    Abort,
}

/// The control state machine plus the step-signal channel.
pub struct ControlState {
    inner: parking_lot::RwLock<SystemState>,
    step_tx: mpsc::Sender<ControlCommand>,
    step_rx: Mutex<mpsc::Receiver<ControlCommand>>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    /// Creates the control plane in the `running` state.
    pub fn new() -> Self {
        let (step_tx, step_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        Self {
            inner: parking_lot::RwLock::new(SystemState::initial()),
            step_tx,
            step_rx: Mutex::new(step_rx),
        }
    }

    /// Applies a control command.
    ///
    /// Transitions: `pause` (running/stepping to paused), `resume`
    /// (paused/stepping to running, clears step mode), `step` (paused
    /// only; arms step mode and signals the control channel), `reset`
    /// (force running, clears step fields). Every successful transition
    /// stamps `last_updated`.
    ///
    /// # Errors
    ///
    /// Misuse (pause while paused, resume while running, step while not
    /// paused) returns a [`ControlError`] and leaves state untouched.
    pub fn apply(&self, cmd: ControlCommand) -> Result<SystemState, ControlError> {
        let mut state = self.inner.write();
        match cmd {
            ControlCommand::Pause => {
                if state.status == SystemStatus::Paused {
                    return Err(ControlError::AlreadyPaused);
                }
                state.status = SystemStatus::Paused;
                state.paused_at = Some(Utc::now());
                state.message = "System paused".to_string();
            }
            ControlCommand::Resume => {
                if state.status == SystemStatus::Running {
                    return Err(ControlError::AlreadyRunning);
                }
                state.status = SystemStatus::Running;
                state.step_mode = false;
                state.paused_at = None;
                state.message = "System resumed".to_string();
            }
            ControlCommand::Step => {
                if state.status != SystemStatus::Paused {
                    return Err(ControlError::NotPaused);
                }
                state.status = SystemStatus::Stepping;
                state.step_mode = true;
                state.message = "Executing one step".to_string();
                // Non-blocking signal; a waiting job picks it up.
                let _ = self.step_tx.try_send(ControlCommand::Step);
            }
            ControlCommand::Reset => {
                state.status = SystemStatus::Running;
                state.step_mode = false;
                state.current_step = None;
                state.pending_steps.clear();
                state.paused_at = None;
                state.message = "System reset".to_string();
            }
        }
        state.last_updated = Utc::now();
        info!(command = ?cmd, status = ?state.status, "control command applied");
        Ok(state.clone())
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> SystemState {
        self.inner.read().clone()
    }

    /// The (status, step_mode) pair jobs consult between steps.
    pub fn flags(&self) -> (SystemStatus, bool) {
        let state = self.inner.read();
        (state.status, state.step_mode)
    }

    /// Records the step currently executing.
    pub fn set_current_step(&self, step_id: &str) {
        let mut state = self.inner.write();
        state.current_step = Some(step_id.to_string());
        state.last_updated = Utc::now();
    }

    /// Step-mode rendezvous: waits up to `timeout` for an explicit step
    /// command. Anything else (timeout, channel close, non-step command)
    /// aborts the run.
    pub async fn wait_for_step(&self, timeout: Duration) -> StepSignal {
        let mut rx = self.step_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(ControlCommand::Step)) => StepSignal::Advance,
            _ => StepSignal::Abort,
        }
    }
}
