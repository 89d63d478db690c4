//! The immediate goal-state poll loop.
//!
//! Each iteration sizes admission from the executing-task counter, fetches the
//! host snapshot, sets aside sequence numbers already applied, authenticates
//! the rest, reports capacity drops as skipped, and fires admitted work onto
//! detached tasks. The loop itself never waits for a
//! task to finish.

mod counter;

pub use counter::{ExecutingTasks, TaskSlot};

use crate::config::DispatcherConfig;
use crate::engine::ExecutionEngine;
use crate::error::AgentError;
use crate::goalstate::{
    self, ExtensionGoalState, GoalStateKey, GoalStateTransport, SettingsCommon,
    SignatureValidator,
};
use crate::seqnum::SequenceGuard;
use crate::status::{
    ErrorClarification, Notifier, Operation, StatusItem, StatusObserver, StatusValue,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Collaborators the dispatcher is built from.
pub struct DispatcherDeps {
    pub transport: Arc<dyn GoalStateTransport>,
    pub validator: Arc<dyn SignatureValidator>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub notifier: Arc<Notifier>,
    /// Pruned of retired keys whenever the change token advances.
    pub observer: Option<Arc<StatusObserver>>,
    pub sequence_guard: Option<Arc<SequenceGuard>>,
    pub executing: Arc<ExecutingTasks>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No free slot; nothing was fetched.
    Backpressure,
    /// The host reported no new information.
    Unchanged,
    Dispatched { admitted: usize, dropped: usize },
}

/// Result of one poll iteration.
#[derive(Debug)]
pub struct Iteration {
    pub change_token: Option<String>,
    pub outcome: IterationOutcome,
    /// Admitted workers. The loop detaches them; tests may await them.
    pub workers: Vec<JoinHandle<()>>,
}

pub struct Dispatcher {
    extension_name: String,
    max_concurrent_tasks: usize,
    poll_interval: Duration,
    transport: Arc<dyn GoalStateTransport>,
    validator: Arc<dyn SignatureValidator>,
    engine: Arc<dyn ExecutionEngine>,
    notifier: Arc<Notifier>,
    observer: Option<Arc<StatusObserver>>,
    sequence_guard: Option<Arc<SequenceGuard>>,
    executing: Arc<ExecutingTasks>,
}

impl Dispatcher {
    pub fn new(
        extension_name: impl Into<String>,
        config: &DispatcherConfig,
        deps: DispatcherDeps,
    ) -> Self {
        Self {
            extension_name: extension_name.into(),
            max_concurrent_tasks: config.max_concurrent_tasks,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            transport: deps.transport,
            validator: deps.validator,
            engine: deps.engine,
            notifier: deps.notifier,
            observer: deps.observer,
            sequence_guard: deps.sequence_guard,
            executing: deps.executing,
        }
    }

    pub fn capacity(&self) -> usize {
        self.executing.capacity(self.max_concurrent_tasks)
    }

    /// Poll forever with a fixed pause between iterations. A failed iteration
    /// is logged and retried from the last good change token.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let mut change_token: Option<String> = None;
        tracing::info!(
            extension = %self.extension_name,
            max_concurrent_tasks = self.max_concurrent_tasks,
            poll_interval_secs = self.poll_interval.as_secs(),
            "immediate goal state poller started"
        );

        loop {
            match self.poll_once(change_token.as_deref()).await {
                Ok(iteration) => {
                    if let IterationOutcome::Dispatched { admitted, dropped } = iteration.outcome
                    {
                        tracing::info!(admitted, dropped, "dispatched goal states");
                    }
                    change_token = iteration.change_token;
                }
                Err(error) => {
                    tracing::error!(%error, "goal state poll iteration failed");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One pass of fetch, authenticate, admit. Errors leave the caller's change
    /// token in place.
    pub async fn poll_once(&self, change_token: Option<&str>) -> Result<Iteration, AgentError> {
        let unchanged = |outcome| Iteration {
            change_token: change_token.map(str::to_string),
            outcome,
            workers: Vec::new(),
        };

        let capacity = self.capacity();
        if capacity == 0 {
            tracing::debug!(
                executing = self.executing.current(),
                "all execution slots busy; skipping fetch"
            );
            return Ok(unchanged(IterationOutcome::Backpressure));
        }

        let polled =
            goalstate::poll(self.transport.as_ref(), &self.extension_name, change_token).await?;
        if polled.is_unchanged(change_token) {
            return Ok(unchanged(IterationOutcome::Unchanged));
        }

        let live: HashSet<GoalStateKey> = polled
            .goal_states
            .iter()
            .flat_map(|gs| gs.settings.iter().map(SettingsCommon::key))
            .collect();
        let candidates = self.without_applied(polled.goal_states).await;

        let selection = goalstate::select(candidates, capacity, self.validator.as_ref()).await?;

        if let Some(observer) = &self.observer {
            observer.prune_except(&live);
        }

        let dropped = selection.dropped.len();
        for settings in selection.dropped {
            let key = settings.key();
            tracing::warn!(
                extension = %key.extension_name,
                seq = key.sequence_number,
                capacity,
                "no execution slot free; skipping goal state"
            );
            let item = StatusItem::skipped(format!(
                "Skipped: the limit of {} concurrently executing tasks was reached",
                self.max_concurrent_tasks
            ));
            if let Err(error) = self.notifier.notify(&key, item).await {
                tracing::warn!(%error, seq = key.sequence_number, "failed to report skipped status");
            }
        }

        let admitted = selection.admitted.len();
        let workers = selection
            .admitted
            .into_iter()
            .map(|settings| {
                let slot = self.executing.acquire();
                let engine = Arc::clone(&self.engine);
                let notifier = Arc::clone(&self.notifier);
                let observer = self.observer.clone();
                let guard = self.sequence_guard.clone();
                tokio::spawn(run_task(engine, notifier, observer, guard, settings, slot))
            })
            .collect();

        Ok(Iteration {
            change_token: polled.change_token,
            outcome: IterationOutcome::Dispatched { admitted, dropped },
            workers,
        })
    }

    /// Remove settings whose sequence number has already been applied so a
    /// relisted goal state costs no execution slot. An unreadable sequence
    /// file keeps the item; the worker's check reports it.
    async fn without_applied(
        &self,
        goal_states: Vec<ExtensionGoalState>,
    ) -> Vec<ExtensionGoalState> {
        let Some(guard) = &self.sequence_guard else {
            return goal_states;
        };

        let mut kept = Vec::with_capacity(goal_states.len());
        for mut goal_state in goal_states {
            let listed = std::mem::take(&mut goal_state.settings);
            let mut pending = Vec::with_capacity(listed.len());
            for settings in listed {
                match guard
                    .is_applied(&settings.extension_name, settings.seq_no)
                    .await
                {
                    Ok(true) => tracing::debug!(
                        extension = %settings.extension_name,
                        seq = settings.seq_no,
                        "relisted goal state already applied"
                    ),
                    Ok(false) => pending.push(settings),
                    Err(error) => {
                        tracing::warn!(%error, seq = settings.seq_no, "could not read sequence number");
                        pending.push(settings);
                    }
                }
            }
            if !pending.is_empty() {
                goal_state.settings = pending;
                kept.push(goal_state);
            }
        }
        kept
    }
}

async fn report_terminal(notifier: &Notifier, key: &GoalStateKey, item: StatusItem) {
    if let Err(error) = notifier.notify(key, item).await {
        tracing::warn!(%error, seq = key.sequence_number, "failed to report terminal status");
    }
}

async fn run_task(
    engine: Arc<dyn ExecutionEngine>,
    notifier: Arc<Notifier>,
    observer: Option<Arc<StatusObserver>>,
    guard: Option<Arc<SequenceGuard>>,
    settings: SettingsCommon,
    _slot: TaskSlot,
) {
    let key = settings.key();

    if let Some(guard) = guard {
        match guard
            .should_skip(&key.extension_name, key.sequence_number)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    extension = %key.extension_name,
                    seq = key.sequence_number,
                    "sequence number already applied; not executing"
                );
                let recorded = observer
                    .as_ref()
                    .and_then(|observer| observer.get_status_for_key(&key));
                if recorded.is_none() {
                    let item = StatusItem::new(
                        Operation::Enable,
                        StatusValue::Skipped,
                        "Skipped: a newer sequence number for this extension was already applied",
                    )
                    .with_clarification(ErrorClarification::SUPERSEDED);
                    report_terminal(&notifier, &key, item).await;
                }
                return;
            }
            Ok(false) => {}
            Err(error) => {
                tracing::error!(%error, seq = key.sequence_number, "sequence number check failed");
                let item = StatusItem::new(
                    Operation::Enable,
                    StatusValue::Error,
                    format!("Could not verify sequence number: {error}"),
                )
                .with_clarification(ErrorClarification::EXECUTION_FAILED);
                report_terminal(&notifier, &key, item).await;
                return;
            }
        }
    }

    match engine.execute_goal_state(&settings).await {
        Ok(exit_code) => {
            tracing::info!(
                extension = %key.extension_name,
                seq = key.sequence_number,
                exit_code,
                "goal state finished"
            );
        }
        Err(error) => {
            tracing::warn!(
                extension = %key.extension_name,
                seq = key.sequence_number,
                %error,
                "goal state execution failed"
            );
            let item = StatusItem::new(Operation::Enable, StatusValue::Error, error.message)
                .with_clarification(error.clarification);
            report_terminal(&notifier, &key, item).await;
        }
    }
}

#[cfg(test)]
mod tests;
