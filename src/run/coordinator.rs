//! The run coordinator: one precheck -> run -> terminal-state lifecycle.
//!
//! The coordinator is an observable state holder. `start` drives a whole
//! attempt on the calling task -- the read loop suspends at each chunk
//! await, and between chunks no state changes -- while any other task may
//! poll the shared snapshot through a [`RunWatch`]. There is never more
//! than one active attempt; accumulated output is keyed to the attempt
//! with no multiplexing.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{
    BenchTransport, BusyNode, RunError, RunMode, RunResponse, RunState, StopOutcome, StopResponse,
    TransportError,
};
use crate::params::BenchParams;
use crate::parser::{self, BandwidthRecord};
use crate::stream::{EventKind, FrameDecoder, LineBuffer, Payload, StreamEvent};

#[derive(Debug)]
struct Attempt {
    state: RunState,
    output: String,
    command: String,
    message: Option<String>,
    busy_nodes: Vec<BusyNode>,
    /// Set once the remote acknowledges a stop; the next terminal event
    /// lands the attempt in `stopped` instead of `success`/`error`.
    stop_acknowledged: bool,
}

impl Attempt {
    fn fresh() -> Self {
        Self {
            state: RunState::Idle,
            output: String::new(),
            command: String::new(),
            message: None,
            busy_nodes: Vec::new(),
            stop_acknowledged: false,
        }
    }
}

/// Drives run attempts against a [`BenchTransport`].
pub struct RunCoordinator<T> {
    transport: T,
    attempt: Arc<Mutex<Attempt>>,
}

/// Read-only handle onto a coordinator's current attempt, cheap to clone
/// and safe to poll from another task while the attempt is in flight.
#[derive(Clone)]
pub struct RunWatch {
    attempt: Arc<Mutex<Attempt>>,
}

impl RunWatch {
    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().expect("run state lock poisoned")
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    /// Accumulated output text. Append-only until the attempt terminates.
    pub fn output(&self) -> String {
        self.lock().output.clone()
    }

    /// The command the remote reported it is executing.
    pub fn command(&self) -> String {
        self.lock().command.clone()
    }

    /// Human-readable detail for `error` and `busy` outcomes.
    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    /// The busy nodes a precheck rejection surfaced, as structured data.
    pub fn busy_nodes(&self) -> Vec<BusyNode> {
        self.lock().busy_nodes.clone()
    }

    /// Bandwidth records derived from the accumulated output. Recomputed
    /// fresh on every call; never persisted.
    pub fn records(&self) -> Vec<BandwidthRecord> {
        parser::parse_bandwidth_table(&self.lock().output)
    }
}

impl<T: BenchTransport> RunCoordinator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            attempt: Arc::new(Mutex::new(Attempt::fresh())),
        }
    }

    /// The transport this coordinator drives.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Observation handle for polling from another task.
    pub fn watch(&self) -> RunWatch {
        RunWatch {
            attempt: Arc::clone(&self.attempt),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().expect("run state lock poisoned")
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn output(&self) -> String {
        self.lock().output.clone()
    }

    pub fn command(&self) -> String {
        self.lock().command.clone()
    }

    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    pub fn busy_nodes(&self) -> Vec<BusyNode> {
        self.lock().busy_nodes.clone()
    }

    pub fn records(&self) -> Vec<BandwidthRecord> {
        parser::parse_bandwidth_table(&self.lock().output)
    }

    /// Clear a finished attempt back to `idle`. Rejected while active.
    pub fn reset(&self) -> Result<(), RunError> {
        let mut attempt = self.lock();
        if attempt.state.is_active() {
            return Err(RunError::AttemptInFlight);
        }
        *attempt = Attempt::fresh();
        Ok(())
    }

    /// Drive one run attempt to its terminal state and return it.
    ///
    /// Every failure past admission is absorbed into the attempt's state;
    /// the only `Err` is a second start while one is in flight, which
    /// leaves the current attempt untouched.
    pub async fn start(&self, params: &BenchParams, mode: RunMode) -> Result<RunState, RunError> {
        {
            let mut attempt = self.lock();
            if attempt.state.is_active() {
                return Err(RunError::AttemptInFlight);
            }
            *attempt = Attempt::fresh();

            // Precondition: a host list must be selected before any
            // network interaction happens.
            let missing = params
                .hostlist
                .as_deref()
                .map_or(true, |name| name.trim().is_empty());
            if missing {
                attempt.state = RunState::Error;
                attempt.message = Some("no host list selected for this run".to_string());
                return Ok(RunState::Error);
            }
            attempt.state = RunState::Prechecking;
        }
        let hostlist = params.hostlist.as_deref().unwrap_or_default();

        info!(%hostlist, "prechecking nodes");
        let report = match self.transport.precheck(hostlist).await {
            Ok(report) => report,
            Err(err) => {
                // Prefixed so a precheck failure reads differently from a
                // run-time one.
                return Ok(self.finish(RunState::Error, Some(format!("precheck failed: {err}"))));
            }
        };

        if report.busy_count > 0 {
            let mut attempt = self.lock();
            attempt.state = RunState::Busy;
            attempt.message = Some(format!(
                "{} of {} nodes are running GPU workloads",
                report.busy_count, report.total_nodes
            ));
            attempt.busy_nodes = report.busy_nodes;
            warn!(busy = attempt.busy_nodes.len(), "run rejected by precheck");
            return Ok(RunState::Busy);
        }

        self.lock().state = RunState::Running;
        info!(?mode, "starting benchmark run");

        let terminal = match mode {
            RunMode::Stream => self.drive_stream(params).await,
            RunMode::Blocking => self.drive_blocking(params).await,
        };
        Ok(terminal)
    }

    /// Request cancellation of the active run.
    ///
    /// Cooperative: the remote kills the process, but the read loop stays
    /// open and keeps consuming frames until the remote closes the stream.
    /// With no active run this is a local no-op.
    pub async fn stop(&self) -> Result<StopOutcome, TransportError> {
        if !self.state().is_active() {
            return Ok(StopOutcome::NoTask);
        }

        let resp = self.transport.stop().await?;
        if resp.status == StopResponse::STATUS_STOPPED {
            self.lock().stop_acknowledged = true;
            info!("remote acknowledged stop request");
            Ok(StopOutcome::Stopped)
        } else {
            debug!(status = %resp.status, "stop request found no running task");
            Ok(StopOutcome::NoTask)
        }
    }

    async fn drive_stream(&self, params: &BenchParams) -> RunState {
        let mut chunks = match self.transport.run_stream(params).await {
            Ok(chunks) => chunks,
            Err(err) => return self.finish(RunState::Error, Some(err.to_string())),
        };

        let mut lines = LineBuffer::new();
        let mut decoder = FrameDecoder::new();

        while let Some(item) = chunks.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => return self.finish(RunState::Error, Some(err.to_string())),
            };
            for line in lines.push(&chunk) {
                if let Some(frame) = decoder.feed_line(&line) {
                    if let Some(terminal) = self.apply_frame(frame) {
                        return terminal;
                    }
                }
            }
        }

        if let Some(partial) = lines.finish() {
            debug!(bytes = partial.len(), "discarding partial trailing line");
        }
        // The transport completed without a terminal frame: the remote is
        // done and everything it sent was delivered.
        self.finish(RunState::Success, None)
    }

    /// Apply one frame; returns the terminal state once one is reached.
    fn apply_frame(&self, frame: StreamEvent) -> Option<RunState> {
        match frame.kind {
            EventKind::Command => {
                // At most one meaningful value is expected; later frames
                // replace earlier ones.
                self.lock().command = Payload::decode(&frame.payload).into_text();
                None
            }
            EventKind::Output => {
                let line = Payload::decode(&frame.payload).into_text();
                let mut attempt = self.lock();
                attempt.output.push_str(&line);
                attempt.output.push('\n');
                None
            }
            EventKind::Done => Some(self.finish(RunState::Success, None)),
            EventKind::Error => {
                let payload = Payload::decode(&frame.payload);
                let message = payload
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.payload.clone());
                Some(self.finish(RunState::Error, Some(message)))
            }
        }
    }

    async fn drive_blocking(&self, params: &BenchParams) -> RunState {
        match self.transport.run_blocking(params).await {
            Ok(resp) => {
                let success = resp.status == RunResponse::STATUS_SUCCESS;
                let RunResponse {
                    status,
                    output,
                    command,
                    error,
                } = resp;
                {
                    let mut attempt = self.lock();
                    attempt.command = command;
                    attempt.output = output;
                }
                if success {
                    self.finish(RunState::Success, None)
                } else {
                    self.finish(RunState::Error, Some(error.unwrap_or(status)))
                }
            }
            Err(err) => self.finish(RunState::Error, Some(err.to_string())),
        }
    }

    fn finish(&self, state: RunState, message: Option<String>) -> RunState {
        let mut attempt = self.lock();
        attempt.state = if attempt.stop_acknowledged {
            RunState::Stopped
        } else {
            state
        };
        attempt.message = message;
        info!(state = %attempt.state, "run attempt finished");
        attempt.state
    }
}
