//! Run lifecycle: states, wire shapes shared by client and server, and the
//! coordinator that drives one run attempt.

pub mod coordinator;
pub mod transport;

pub use coordinator::{RunCoordinator, RunWatch};
pub use transport::{BenchTransport, ChunkStream, HttpTransport, TransportError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a run attempt. Exactly one exists per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Prechecking,
    /// Precheck found occupied nodes; terminal for this attempt.
    Busy,
    Running,
    Success,
    Error,
    /// The remote confirmed cancellation and the stream has ended.
    Stopped,
}

impl RunState {
    /// A run attempt is in flight; a second start must be rejected.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Prechecking | RunState::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Busy | RunState::Success | RunState::Error | RunState::Stopped
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Prechecking => "prechecking",
            RunState::Busy => "busy",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Error => "error",
            RunState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Frame-by-frame delivery vs. one blocking terminal response. Both modes
/// honor the same state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Stream,
    Blocking,
}

/// A node already running a conflicting GPU workload, or one the precheck
/// could not reach (`error` set, process count zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusyNode {
    pub ip: String,
    pub process_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Precheck response: per-node GPU occupancy over a host list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecheckReport {
    #[serde(default)]
    pub total_nodes: u32,
    #[serde(default)]
    pub busy_count: u32,
    #[serde(default)]
    pub busy_nodes: Vec<BusyNode>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_nodes: Vec<BusyNode>,
}

/// Terminal response of a blocking (non-stream) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    /// `success`, `error` or `timeout`.
    pub status: String,
    pub output: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResponse {
    pub const STATUS_SUCCESS: &'static str = "success";
    pub const STATUS_ERROR: &'static str = "error";
    pub const STATUS_TIMEOUT: &'static str = "timeout";
}

/// Response to a stop request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    /// `stopped` when a run was killed, `no_task` when nothing was running.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StopResponse {
    pub const STATUS_STOPPED: &'static str = "stopped";
    pub const STATUS_NO_TASK: &'static str = "no_task";

    pub fn stopped(message: impl Into<String>) -> Self {
        Self {
            status: Self::STATUS_STOPPED.to_string(),
            message: Some(message.into()),
        }
    }

    pub fn no_task(message: impl Into<String>) -> Self {
        Self {
            status: Self::STATUS_NO_TASK.to_string(),
            message: Some(message.into()),
        }
    }
}

/// Local outcome of a stop request, distinct from the run's own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The remote acknowledged and is tearing the run down.
    Stopped,
    /// Nothing was running; the request was a no-op.
    NoTask,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a run attempt is already in flight")]
    AttemptInFlight,
}
