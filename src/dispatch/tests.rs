use super::*;
use crate::error::{ExecutionError, ReportError, TransportError, ValidationError};
use crate::goalstate::{ExtensionGoalState, ExtensionState, VmSettingsSnapshot};
use crate::status::{ErrorClarification, ImmediateTopLevelStatus, StatusSink};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::Semaphore;

const EXTENSION: &str = "Microsoft.CPlat.Core.RunCommandHandlerLinux";

#[derive(Default)]
struct ScriptedTransport {
    snapshot: Mutex<VmSettingsSnapshot>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedTransport {
    fn serve(&self, token: &str, goal_states: Vec<ExtensionGoalState>) {
        *self.snapshot.lock().unwrap() = VmSettingsSnapshot {
            change_token: Some(token.to_string()),
            goal_states,
        };
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GoalStateTransport for ScriptedTransport {
    fn get_immediate_vm_settings<'a>(
        &'a self,
        change_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<VmSettingsSnapshot, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::RetriesExhausted {
                    url: "http://host/immediateVMSettings".into(),
                    status: 503,
                    attempts: 7,
                });
            }
            let snapshot = self.snapshot.lock().unwrap().clone();
            if snapshot.change_token.as_deref() == change_token {
                return Ok(VmSettingsSnapshot {
                    change_token: snapshot.change_token,
                    goal_states: Vec::new(),
                });
            }
            Ok(snapshot)
        })
    }
}

/// Rejects goal states at version `forged`; errors on version `broken`.
struct NameValidator;

impl SignatureValidator for NameValidator {
    fn validate_signature<'a>(
        &'a self,
        goal_state: &'a ExtensionGoalState,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ValidationError>> + Send + 'a>> {
        Box::pin(async move {
            if goal_state.version.as_deref() == Some("broken") {
                return Err(ValidationError::CertificateStore {
                    path: "/var/lib/waagent".into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(goal_state.version.as_deref() != Some("forged"))
        })
    }
}

/// Each execution waits for a permit so tests can hold tasks in flight.
struct GatedEngine {
    gate: Semaphore,
    executed: Mutex<Vec<i64>>,
    fail_with: Option<ErrorClarification>,
}

impl GatedEngine {
    fn open() -> Self {
        Self {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            executed: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
            ..Self::open()
        }
    }

    fn failing(code: ErrorClarification) -> Self {
        Self {
            fail_with: Some(code),
            ..Self::open()
        }
    }

    fn executed(&self) -> Vec<i64> {
        let mut seen = self.executed.lock().unwrap().clone();
        seen.sort_unstable();
        seen
    }
}

impl ExecutionEngine for GatedEngine {
    fn execute_goal_state<'a>(
        &'a self,
        settings: &'a SettingsCommon,
    ) -> Pin<Box<dyn Future<Output = Result<i32, ExecutionError>> + Send + 'a>> {
        Box::pin(async move {
            let _permit = self.gate.acquire().await.unwrap();
            self.executed.lock().unwrap().push(settings.seq_no);
            match self.fail_with {
                Some(code) => Err(ExecutionError::new(code, "download failed")),
                None => Ok(0),
            }
        })
    }
}

#[derive(Default)]
struct CapturingSink {
    pushes: Mutex<Vec<ImmediateTopLevelStatus>>,
}

impl StatusSink for CapturingSink {
    fn put_status<'a>(
        &'a self,
        payload: &'a ImmediateTopLevelStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>> {
        self.pushes.lock().unwrap().push(payload.clone());
        Box::pin(async { Ok(()) })
    }
}

struct Harness {
    dispatcher: Dispatcher,
    transport: Arc<ScriptedTransport>,
    engine: Arc<GatedEngine>,
    observer: Arc<StatusObserver>,
    executing: Arc<ExecutingTasks>,
    _state: TempDir,
}

fn harness(max_concurrent_tasks: usize, engine: GatedEngine) -> Harness {
    let state = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::default());
    let engine = Arc::new(engine);
    let observer = Arc::new(StatusObserver::new(Arc::new(CapturingSink::default())));
    let notifier = Arc::new(Notifier::new());
    notifier.register(observer.clone());
    let executing = Arc::new(ExecutingTasks::new());

    let dispatcher = Dispatcher::new(
        EXTENSION,
        &DispatcherConfig {
            max_concurrent_tasks,
            poll_interval_secs: 120,
        },
        DispatcherDeps {
            transport: transport.clone(),
            validator: Arc::new(NameValidator),
            engine: engine.clone(),
            notifier,
            observer: Some(observer.clone()),
            sequence_guard: Some(Arc::new(SequenceGuard::new(state.path()))),
            executing: executing.clone(),
        },
    );

    Harness {
        dispatcher,
        transport,
        engine,
        observer,
        executing,
        _state: state,
    }
}

fn settings(seq: i64) -> SettingsCommon {
    SettingsCommon {
        public_settings: serde_json::Map::new(),
        protected_settings_base64: None,
        protected_settings_cert_thumbprint: None,
        seq_no: seq,
        // One run-command resource per sequence number.
        extension_name: format!("{EXTENSION}.run{seq}"),
        extension_state: ExtensionState::Enabled,
    }
}

fn goal_state(version: &str, seqs: &[i64]) -> ExtensionGoalState {
    ExtensionGoalState {
        name: EXTENSION.into(),
        version: Some(version.into()),
        settings: seqs.iter().copied().map(settings).collect(),
    }
}

fn key(seq: i64) -> GoalStateKey {
    settings(seq).key()
}

async fn join(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn full_capacity_skips_the_fetch_and_keeps_the_token() {
    let h = harness(2, GatedEngine::open());
    h.transport.serve("etag-2", vec![goal_state("1.0", &[1])]);
    let held = (h.executing.acquire(), h.executing.acquire());

    let iteration = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();

    assert_eq!(iteration.outcome, IterationOutcome::Backpressure);
    assert_eq!(iteration.change_token.as_deref(), Some("etag-1"));
    assert_eq!(h.transport.calls(), 0);
    drop(held);
}

#[tokio::test]
async fn admits_up_to_capacity_and_reports_the_rest_as_skipped() {
    let h = harness(2, GatedEngine::closed());
    h.transport.serve("etag-1", vec![goal_state("1.0", &[1, 2, 3])]);

    let iteration = h.dispatcher.poll_once(None).await.unwrap();

    assert_eq!(
        iteration.outcome,
        IterationOutcome::Dispatched {
            admitted: 2,
            dropped: 1
        }
    );
    assert_eq!(iteration.change_token.as_deref(), Some("etag-1"));
    assert_eq!(h.executing.current(), 2);
    assert_eq!(h.dispatcher.capacity(), 0);

    // The skipped status is visible before poll_once returned.
    let skipped = h.observer.get_status_for_key(&key(3)).unwrap();
    assert_eq!(skipped.value(), StatusValue::Skipped);
    assert_eq!(skipped.status.code, ErrorClarification::MAX_TASKS_EXCEEDED);

    h.engine.gate.add_permits(2);
    join(iteration.workers).await;
    assert_eq!(h.executing.current(), 0);
    assert_eq!(h.engine.executed(), vec![1, 2]);
}

#[tokio::test]
async fn executing_count_never_exceeds_the_limit_across_iterations() {
    let h = harness(3, GatedEngine::closed());
    h.transport.serve("etag-1", vec![goal_state("1.0", &[1, 2])]);
    let first = h.dispatcher.poll_once(None).await.unwrap();
    assert_eq!(h.executing.current(), 2);

    h.transport.serve("etag-2", vec![goal_state("1.0", &[3, 4, 5, 6, 7])]);
    let second = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();

    assert_eq!(
        second.outcome,
        IterationOutcome::Dispatched {
            admitted: 1,
            dropped: 4
        }
    );
    assert_eq!(h.executing.current(), 3);

    h.engine.gate.add_permits(8);
    join(first.workers).await;
    join(second.workers).await;
    assert_eq!(h.executing.current(), 0);
}

#[tokio::test]
async fn unchanged_token_dispatches_nothing() {
    let h = harness(2, GatedEngine::open());
    h.transport.serve("etag-1", vec![goal_state("1.0", &[1])]);

    let iteration = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();

    assert_eq!(iteration.outcome, IterationOutcome::Unchanged);
    assert_eq!(h.transport.calls(), 1);
    assert!(iteration.workers.is_empty());
    assert!(h.engine.executed().is_empty());
}

#[tokio::test]
async fn engine_error_is_back_filled_as_error_status() {
    let h = harness(2, GatedEngine::failing(ErrorClarification::SPAWN_FAILED));
    h.transport.serve("etag-1", vec![goal_state("1.0", &[7])]);

    let iteration = h.dispatcher.poll_once(None).await.unwrap();
    join(iteration.workers).await;

    let item = h.observer.get_status_for_key(&key(7)).unwrap();
    assert_eq!(item.value(), StatusValue::Error);
    assert_eq!(item.status.code, ErrorClarification::SPAWN_FAILED);
    assert_eq!(item.message(), "download failed");
}

#[tokio::test]
async fn forged_goal_states_are_dropped_silently() {
    let h = harness(5, GatedEngine::open());
    h.transport.serve(
        "etag-1",
        vec![goal_state("forged", &[1]), goal_state("1.0", &[2])],
    );

    let iteration = h.dispatcher.poll_once(None).await.unwrap();
    join(iteration.workers).await;

    assert_eq!(h.engine.executed(), vec![2]);
    assert!(h.observer.get_status_for_key(&key(1)).is_none());
}

#[tokio::test]
async fn validator_error_aborts_without_advancing_the_token() {
    let h = harness(5, GatedEngine::open());
    h.transport.serve(
        "etag-2",
        vec![goal_state("1.0", &[1]), goal_state("broken", &[2])],
    );

    let err = h.dispatcher.poll_once(Some("etag-1")).await.unwrap_err();

    assert!(matches!(err, AgentError::Validation(_)));
    assert!(h.engine.executed().is_empty());
    assert_eq!(h.executing.current(), 0);
    assert!(h.observer.is_empty());
}

#[tokio::test]
async fn transport_error_is_returned_to_the_loop() {
    let h = harness(2, GatedEngine::open());
    h.transport.failing.store(true, Ordering::SeqCst);

    let err = h.dispatcher.poll_once(Some("etag-1")).await.unwrap_err();

    assert!(matches!(err, AgentError::Transport(_)));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn redelivered_sequence_number_is_not_executed_again() {
    let h = harness(2, GatedEngine::open());
    h.transport.serve("etag-1", vec![goal_state("1.0", &[4])]);
    let first = h.dispatcher.poll_once(None).await.unwrap();
    join(first.workers).await;

    h.transport.serve("etag-2", vec![goal_state("1.0", &[4])]);
    let second = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();
    join(second.workers).await;

    assert_eq!(h.engine.executed(), vec![4]);
}

#[tokio::test]
async fn token_change_prunes_retired_statuses() {
    let h = harness(2, GatedEngine::failing(ErrorClarification::EXECUTION_FAILED));
    h.transport.serve("etag-1", vec![goal_state("1.0", &[1])]);
    let first = h.dispatcher.poll_once(None).await.unwrap();
    join(first.workers).await;
    assert!(h.observer.get_status_for_key(&key(1)).is_some());

    h.transport.serve("etag-2", vec![goal_state("1.0", &[2])]);
    let second = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();
    join(second.workers).await;

    assert!(h.observer.get_status_for_key(&key(1)).is_none());
    assert!(h.observer.get_status_for_key(&key(2)).is_some());
}

#[tokio::test]
async fn relisted_applied_item_does_not_take_the_slot_from_new_work() {
    let h = harness(1, GatedEngine::open());
    h.transport.serve("etag-1", vec![goal_state("1.0", &[4])]);
    let first = h.dispatcher.poll_once(None).await.unwrap();
    join(first.workers).await;

    h.transport.serve("etag-2", vec![goal_state("1.0", &[4, 5])]);
    let second = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();

    assert_eq!(
        second.outcome,
        IterationOutcome::Dispatched {
            admitted: 1,
            dropped: 0
        }
    );
    join(second.workers).await;
    assert_eq!(h.engine.executed(), vec![4, 5]);
    assert!(h.observer.get_status_for_key(&key(5)).is_none());
}

#[tokio::test]
async fn relisted_applied_item_keeps_its_terminal_status() {
    let h = harness(1, GatedEngine::open());
    h.transport.serve("etag-1", vec![goal_state("1.0", &[4])]);
    let first = h.dispatcher.poll_once(None).await.unwrap();
    join(first.workers).await;
    h.observer
        .notify(
            &key(4),
            StatusItem::new(Operation::Enable, StatusValue::Success, "done"),
        )
        .await
        .unwrap();

    h.transport.serve("etag-2", vec![goal_state("1.0", &[6, 4])]);
    let second = h.dispatcher.poll_once(Some("etag-1")).await.unwrap();
    join(second.workers).await;

    assert_eq!(
        second.outcome,
        IterationOutcome::Dispatched {
            admitted: 1,
            dropped: 0
        }
    );
    assert_eq!(
        h.observer.get_status_for_key(&key(4)).unwrap().value(),
        StatusValue::Success
    );
    assert_eq!(h.engine.executed(), vec![4, 6]);
}

#[tokio::test]
async fn older_item_overtaken_by_a_newer_one_is_reported_skipped() {
    let h = harness(2, GatedEngine::open());
    let shared = |seq| SettingsCommon {
        extension_name: format!("{EXTENSION}.shared"),
        ..settings(seq)
    };
    h.transport.serve(
        "etag-1",
        vec![ExtensionGoalState {
            name: EXTENSION.into(),
            version: Some("1.0".into()),
            settings: vec![shared(2), shared(1)],
        }],
    );

    let iteration = h.dispatcher.poll_once(None).await.unwrap();
    assert_eq!(
        iteration.outcome,
        IterationOutcome::Dispatched {
            admitted: 2,
            dropped: 0
        }
    );
    join(iteration.workers).await;

    assert_eq!(h.engine.executed(), vec![2]);
    let older = h.observer.get_status_for_key(&shared(1).key()).unwrap();
    assert_eq!(older.value(), StatusValue::Skipped);
    assert_eq!(older.status.code, ErrorClarification::SUPERSEDED);
}

#[tokio::test]
async fn validator_error_leaves_recorded_statuses_in_place() {
    let h = harness(2, GatedEngine::failing(ErrorClarification::EXECUTION_FAILED));
    h.transport.serve("etag-1", vec![goal_state("1.0", &[1])]);
    let first = h.dispatcher.poll_once(None).await.unwrap();
    join(first.workers).await;
    assert!(h.observer.get_status_for_key(&key(1)).is_some());

    h.transport.serve("etag-2", vec![goal_state("broken", &[2])]);
    let err = h.dispatcher.poll_once(Some("etag-1")).await.unwrap_err();

    assert!(matches!(err, AgentError::Validation(_)));
    assert!(h.observer.get_status_for_key(&key(1)).is_some());
}
