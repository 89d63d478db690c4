use super::{ExecutionEngine, ExecutionStrategies};
use crate::error::ExecutionError;
use crate::goalstate::{GoalStateKey, SettingsCommon};
use crate::status::{ErrorClarification, Operation, StatusItem, StatusValue};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

/// Tail of stdout/stderr kept in a status message.
const MAX_MESSAGE_BYTES: usize = 4096;
/// Used when the settings carry no `timeoutInSeconds`.
const DEFAULT_TIMEOUT_SECS: u64 = 3600;
/// Environment passed through to scripts; everything else is cleared.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TERM"];

/// Runs the inline `script` from public settings with `sh -c`.
pub struct ScriptEngine {
    download_dir: PathBuf,
    strategies: ExecutionStrategies,
}

impl ScriptEngine {
    pub fn new(download_dir: impl Into<PathBuf>, strategies: ExecutionStrategies) -> Self {
        Self {
            download_dir: download_dir.into(),
            strategies,
        }
    }

    fn work_dir(&self, key: &GoalStateKey) -> PathBuf {
        let name: String = key
            .extension_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.download_dir
            .join(name)
            .join(key.sequence_number.to_string())
    }

    async fn report(&self, key: &GoalStateKey, item: StatusItem) {
        if let Err(error) = self.strategies.reporter.report(key, item).await {
            tracing::warn!(
                extension = %key.extension_name,
                seq = key.sequence_number,
                mode = %self.strategies.mode,
                %error,
                "status report failed"
            );
        }
    }

    async fn run(
        &self,
        key: &GoalStateKey,
        settings: &SettingsCommon,
    ) -> Result<i32, ExecutionError> {
        let script = settings
            .public_settings
            .get("script")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ExecutionError::new(
                    ErrorClarification::MISSING_SCRIPT,
                    "public settings carry no script",
                )
            })?;
        let timeout = settings
            .public_settings
            .get("timeoutInSeconds")
            .and_then(serde_json::Value::as_u64)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let work_dir = self.work_dir(key);
        tokio::fs::create_dir_all(&work_dir).await.map_err(|e| {
            ExecutionError::new(
                ErrorClarification::SPAWN_FAILED,
                format!("cannot create {}: {e}", work_dir.display()),
            )
        })?;

        self.report(
            key,
            StatusItem::new(
                Operation::Enable,
                StatusValue::Transitioning,
                "Execution in progress",
            ),
        )
        .await;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&work_dir)
            .env_clear()
            .kill_on_drop(true);
        for var in SAFE_ENV_VARS {
            if let Ok(val) = std::env::var(var) {
                cmd.env(var, val);
            }
        }

        let result = tokio::time::timeout(Duration::from_secs(timeout), cmd.output()).await;
        let outcome = match result {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let message = render_output(&output.stdout, &output.stderr);
                let item = if output.status.success() {
                    StatusItem::new(Operation::Enable, StatusValue::Success, message)
                } else {
                    StatusItem::new(Operation::Enable, StatusValue::Error, message)
                        .with_clarification(ErrorClarification::EXECUTION_FAILED)
                };
                self.report(key, item.with_exit_code(exit_code)).await;
                Ok(exit_code)
            }
            Ok(Err(e)) => Err(ExecutionError::new(
                ErrorClarification::SPAWN_FAILED,
                format!("failed to start script: {e}"),
            )),
            Err(_) => Err(ExecutionError::new(
                ErrorClarification::TIMED_OUT,
                format!("script timed out after {timeout}s"),
            )),
        };

        self.strategies.cleaner.cleanup(key, &work_dir).await;
        outcome
    }
}

impl ExecutionEngine for ScriptEngine {
    fn execute_goal_state<'a>(
        &'a self,
        settings: &'a SettingsCommon,
    ) -> Pin<Box<dyn Future<Output = Result<i32, ExecutionError>> + Send + 'a>> {
        Box::pin(async move {
            let key = settings.key();
            tracing::info!(
                extension = %key.extension_name,
                seq = key.sequence_number,
                mode = %self.strategies.mode,
                "executing goal state"
            );
            self.run(&key, settings).await
        })
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_MESSAGE_BYTES {
        return text.into_owned();
    }
    let mut start = text.len() - MAX_MESSAGE_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

fn render_output(stdout: &[u8], stderr: &[u8]) -> String {
    format!(
        "[stdout]\n{}\n[stderr]\n{}",
        tail(stdout).trim_end(),
        tail(stderr).trim_end()
    )
}
