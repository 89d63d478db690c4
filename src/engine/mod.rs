//! Execution engine contract and the per-mode strategies it runs with.

mod script;

pub use script::ScriptEngine;

use crate::error::ExecutionError;
use crate::goalstate::{GoalStateKey, SettingsCommon};
use crate::status::{FileStatusReporter, Notifier, StatusReporter};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Runs one goal state to completion.
///
/// Implementations report their own progress and terminal status through the
/// reporter they were built with. An `Err` means no terminal status was
/// reported and the caller should back-fill one.
pub trait ExecutionEngine: Send + Sync {
    fn execute_goal_state<'a>(
        &'a self,
        settings: &'a SettingsCommon,
    ) -> Pin<Box<dyn Future<Output = Result<i32, ExecutionError>> + Send + 'a>>;
}

/// Post-execution cleanup of a task's working directory.
pub trait Cleaner: Send + Sync {
    fn cleanup<'a>(
        &'a self,
        key: &'a GoalStateKey,
        work_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Synchronous runs keep their working directory for post-mortem inspection.
pub struct KeepArtifacts;

impl Cleaner for KeepArtifacts {
    fn cleanup<'a>(
        &'a self,
        _key: &'a GoalStateKey,
        _work_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

pub struct RemoveWorkDir;

impl Cleaner for RemoveWorkDir {
    fn cleanup<'a>(
        &'a self,
        key: &'a GoalStateKey,
        work_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match tokio::fs::remove_dir_all(work_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => tracing::warn!(
                    extension = %key.extension_name,
                    seq = key.sequence_number,
                    %error,
                    "failed to remove working directory"
                ),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    /// One goal state per process invocation, status written to files.
    Synchronous,
    /// Goal states from the polling pipeline, status aggregated and pushed.
    Immediate,
}

/// Reporter and cleaner chosen once per execution mode.
#[derive(Clone)]
pub struct ExecutionStrategies {
    pub mode: ExecutionMode,
    pub reporter: Arc<dyn StatusReporter>,
    pub cleaner: Arc<dyn Cleaner>,
}

impl ExecutionStrategies {
    pub fn synchronous(status_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: ExecutionMode::Synchronous,
            reporter: Arc::new(FileStatusReporter::new(status_dir)),
            cleaner: Arc::new(KeepArtifacts),
        }
    }

    pub fn immediate(notifier: Arc<Notifier>) -> Self {
        Self {
            mode: ExecutionMode::Immediate,
            reporter: notifier,
            cleaner: Arc::new(RemoveWorkDir),
        }
    }
}
