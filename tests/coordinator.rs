//! Lifecycle tests for the run coordinator against an in-process transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream;

use fabricbench::params::BenchParams;
use fabricbench::run::{
    BenchTransport, BusyNode, ChunkStream, PrecheckReport, RunCoordinator, RunError, RunMode,
    RunResponse, RunState, StopOutcome, StopResponse, TransportError,
};

/// Scripted transport: hands out one precheck report, one body (stream or
/// blocking), and one stop response, counting the calls it receives.
struct MockTransport {
    precheck_report: PrecheckReport,
    precheck_fails: bool,
    precheck_calls: AtomicUsize,
    chunks: Mutex<Option<ChunkStream>>,
    blocking: Mutex<Option<RunResponse>>,
    stop_response: Mutex<Option<StopResponse>>,
    stop_calls: AtomicUsize,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            precheck_report: PrecheckReport::default(),
            precheck_fails: false,
            precheck_calls: AtomicUsize::new(0),
            chunks: Mutex::new(None),
            blocking: Mutex::new(None),
            stop_response: Mutex::new(None),
            stop_calls: AtomicUsize::new(0),
        }
    }

    fn streaming(chunks: Vec<String>) -> Self {
        let items: Vec<Result<Bytes, TransportError>> =
            chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        Self::with_stream(Box::pin(stream::iter(items)))
    }

    fn with_stream(chunks: ChunkStream) -> Self {
        let transport = Self::new();
        *transport.chunks.lock().unwrap() = Some(chunks);
        transport
    }

    fn blocking(resp: RunResponse) -> Self {
        let transport = Self::new();
        *transport.blocking.lock().unwrap() = Some(resp);
        transport
    }
}

#[async_trait]
impl BenchTransport for MockTransport {
    async fn precheck(&self, _hostlist: &str) -> Result<PrecheckReport, TransportError> {
        self.precheck_calls.fetch_add(1, Ordering::SeqCst);
        if self.precheck_fails {
            return Err(TransportError::Read("ssh dial failed".to_string()));
        }
        Ok(self.precheck_report.clone())
    }

    async fn run_stream(&self, _params: &BenchParams) -> Result<ChunkStream, TransportError> {
        self.chunks
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Read("no stream scripted".to_string()))
    }

    async fn run_blocking(&self, _params: &BenchParams) -> Result<RunResponse, TransportError> {
        self.blocking
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Read("no response scripted".to_string()))
    }

    async fn stop(&self) -> Result<StopResponse, TransportError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .stop_response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| StopResponse::no_task("no task running")))
    }
}

fn params() -> BenchParams {
    BenchParams {
        hostlist: Some("default".to_string()),
        ..BenchParams::default()
    }
}

fn frame(kind: &str, payload: &str) -> String {
    format!("event: {kind}\ndata: {payload}\n\n")
}

async fn wait_for_state(watch: &fabricbench::run::RunWatch, state: RunState) {
    for _ in 0..100 {
        if watch.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state never reached {state}, currently {}", watch.state());
}

#[tokio::test]
async fn stream_run_reaches_success_with_records() {
    let chunks = vec![
        frame("command", "\"mpirun --allow-run-as-root ...\""),
        frame(
            "output",
            "#       size         count      type   redop    root     time   algbw   busbw #wrong     time   algbw   busbw",
        ),
        frame(
            "output",
            "     1048576         16384     float     sum      -1    102.3   10.25   19.22      0    101.8   10.30   19.31",
        ),
        frame("output", "# Avg bus bandwidth    : 19.26"),
        frame("done", "benchmark completed"),
    ];
    let coordinator = RunCoordinator::new(MockTransport::streaming(chunks));

    let state = coordinator.start(&params(), RunMode::Stream).await.unwrap();

    assert_eq!(state, RunState::Success);
    assert_eq!(coordinator.command(), "mpirun --allow-run-as-root ...");
    assert!(coordinator.output().contains("1048576"));

    let records = coordinator.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].size, 1048576);
    assert_eq!(records[0].count, 16384);
    assert!((records[0].out_bus_bw - 19.22).abs() < f64::EPSILON);
    assert!((records[0].in_bus_bw - 19.31).abs() < f64::EPSILON);
}

#[tokio::test]
async fn frames_survive_arbitrary_chunk_boundaries() {
    let transcript = format!(
        "{}{}{}{}",
        frame("command", "\"mpirun -np 16\""),
        frame("output", "line one"),
        frame("output", "bw \u{603b}\u{5e26}\u{5bbd} 19.2 GB/s"),
        frame("done", "benchmark completed"),
    );

    // Split the transcript at every third byte, which lands some cuts
    // inside the multi-byte characters; the decoder must not care.
    let chunks: Vec<Result<Bytes, TransportError>> = transcript
        .as_bytes()
        .chunks(3)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let coordinator =
        RunCoordinator::new(MockTransport::with_stream(Box::pin(stream::iter(chunks))));

    let state = coordinator.start(&params(), RunMode::Stream).await.unwrap();

    assert_eq!(state, RunState::Success);
    assert_eq!(coordinator.command(), "mpirun -np 16");
    assert_eq!(
        coordinator.output(),
        "line one\nbw \u{603b}\u{5e26}\u{5bbd} 19.2 GB/s\n"
    );
    assert!(!coordinator.output().contains('\u{fffd}'));
}

#[tokio::test]
async fn error_frame_surfaces_structured_message() {
    let chunks = vec![
        frame("output", "partial line of output"),
        frame("error", r#"{"message": "command failed: exit status 1"}"#),
    ];
    let coordinator = RunCoordinator::new(MockTransport::streaming(chunks));

    let state = coordinator.start(&params(), RunMode::Stream).await.unwrap();

    assert_eq!(state, RunState::Error);
    assert_eq!(
        coordinator.message().as_deref(),
        Some("command failed: exit status 1")
    );
    // Output gathered before the failure is kept.
    assert_eq!(coordinator.output(), "partial line of output\n");
}

#[tokio::test]
async fn eof_without_terminal_frame_is_success() {
    let chunks = vec![frame("output", "only line")];
    let coordinator = RunCoordinator::new(MockTransport::streaming(chunks));

    let state = coordinator.start(&params(), RunMode::Stream).await.unwrap();

    assert_eq!(state, RunState::Success);
    assert_eq!(coordinator.output(), "only line\n");
}

#[tokio::test]
async fn busy_nodes_reject_the_run() {
    let mut transport = MockTransport::streaming(vec![frame("done", "x")]);
    transport.precheck_report = PrecheckReport {
        total_nodes: 4,
        busy_count: 2,
        busy_nodes: vec![
            BusyNode {
                ip: "10.0.0.1".to_string(),
                process_count: 3,
                error: None,
            },
            BusyNode {
                ip: "10.0.0.2".to_string(),
                process_count: 1,
                error: None,
            },
        ],
        error_count: 0,
        error_nodes: Vec::new(),
    };
    let coordinator = RunCoordinator::new(transport);

    let state = coordinator.start(&params(), RunMode::Stream).await.unwrap();

    assert_eq!(state, RunState::Busy);
    let nodes = coordinator.busy_nodes();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].ip, "10.0.0.1");
    assert_eq!(nodes[0].process_count, 3);
    assert_eq!(
        coordinator.message().as_deref(),
        Some("2 of 4 nodes are running GPU workloads")
    );
    // No output was produced for this attempt.
    assert!(coordinator.output().is_empty());
}

#[tokio::test]
async fn precheck_failure_lands_in_error_state() {
    let mut transport = MockTransport::new();
    transport.precheck_fails = true;
    let coordinator = RunCoordinator::new(transport);

    let state = coordinator.start(&params(), RunMode::Stream).await.unwrap();

    assert_eq!(state, RunState::Error);
    let message = coordinator.message().unwrap();
    assert!(message.starts_with("precheck failed:"), "got: {message}");
}

#[tokio::test]
async fn missing_hostlist_fails_before_any_network_call() {
    let transport = MockTransport::new();
    let coordinator = RunCoordinator::new(transport);

    let state = coordinator
        .start(&BenchParams::default(), RunMode::Stream)
        .await
        .unwrap();

    assert_eq!(state, RunState::Error);
    assert_eq!(
        coordinator.message().as_deref(),
        Some("no host list selected for this run")
    );
    assert_eq!(coordinator.transport().precheck_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_without_active_run_is_local_no_task() {
    let coordinator = RunCoordinator::new(MockTransport::new());

    let outcome = coordinator.stop().await.unwrap();

    assert_eq!(outcome, StopOutcome::NoTask);
    assert_eq!(coordinator.state(), RunState::Idle);
    assert_eq!(coordinator.transport().stop_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_during_run_lands_in_stopped_state() {
    let (tx, rx) = mpsc::unbounded::<Result<Bytes, TransportError>>();
    let transport = MockTransport::with_stream(Box::pin(rx));
    *transport.stop_response.lock().unwrap() =
        Some(StopResponse::stopped("process group killed"));

    let coordinator = Arc::new(RunCoordinator::new(transport));
    let watch = coordinator.watch();

    let driver = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.start(&params(), RunMode::Stream).await })
    };

    tx.unbounded_send(Ok(Bytes::from(frame("output", "still going"))))
        .unwrap();
    wait_for_state(&watch, RunState::Running).await;
    for _ in 0..100 {
        if !watch.output().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A second start while one is in flight must be rejected without
    // touching the active attempt.
    let second = coordinator.start(&params(), RunMode::Stream).await;
    assert!(matches!(second, Err(RunError::AttemptInFlight)));
    assert_eq!(watch.output(), "still going\n");

    let outcome = coordinator.stop().await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped);

    // The remote tears the stream down after the kill.
    drop(tx);

    let state = driver.await.unwrap().unwrap();
    assert_eq!(state, RunState::Stopped);
    assert_eq!(watch.state(), RunState::Stopped);
}

#[tokio::test]
async fn blocking_run_success_and_error_paths() {
    let coordinator = RunCoordinator::new(MockTransport::blocking(RunResponse {
        status: RunResponse::STATUS_SUCCESS.to_string(),
        output: "all done\n".to_string(),
        command: "mpirun -np 8".to_string(),
        error: None,
    }));
    let state = coordinator
        .start(&params(), RunMode::Blocking)
        .await
        .unwrap();
    assert_eq!(state, RunState::Success);
    assert_eq!(coordinator.command(), "mpirun -np 8");
    assert_eq!(coordinator.output(), "all done\n");

    let coordinator = RunCoordinator::new(MockTransport::blocking(RunResponse {
        status: RunResponse::STATUS_TIMEOUT.to_string(),
        output: String::new(),
        command: "mpirun -np 8".to_string(),
        error: Some("command timed out after 600 seconds".to_string()),
    }));
    let state = coordinator
        .start(&params(), RunMode::Blocking)
        .await
        .unwrap();
    assert_eq!(state, RunState::Error);
    assert_eq!(
        coordinator.message().as_deref(),
        Some("command timed out after 600 seconds")
    );
}

#[tokio::test]
async fn reset_clears_a_finished_attempt() {
    let chunks = vec![frame("output", "line"), frame("done", "benchmark completed")];
    let coordinator = RunCoordinator::new(MockTransport::streaming(chunks));

    coordinator.start(&params(), RunMode::Stream).await.unwrap();
    assert_eq!(coordinator.state(), RunState::Success);

    coordinator.reset().unwrap();
    assert_eq!(coordinator.state(), RunState::Idle);
    assert!(coordinator.output().is_empty());
    assert!(coordinator.command().is_empty());
}
