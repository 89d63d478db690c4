use anyhow::Result;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Run `run_component` on its own task, restarting it with exponential
/// backoff whenever it returns. `max_restarts == 0` restarts forever.
pub(super) fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    max_restarts: u32,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = initial_backoff_secs.max(1);
        let max_backoff = max_backoff_secs.max(backoff);
        let mut consecutive_failures: u32 = 0;

        loop {
            tracing::info!(component = name, "daemon component starting");
            match run_component().await {
                Ok(()) => {
                    tracing::warn!(component = name, "daemon component exited unexpectedly");
                    backoff = initial_backoff_secs.max(1);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                }
                Err(e) => {
                    tracing::error!(component = name, error = %e, "daemon component failed");
                    consecutive_failures = consecutive_failures.saturating_add(1);
                }
            }

            if max_restarts > 0 && consecutive_failures > max_restarts {
                tracing::error!(
                    component = name,
                    max_restarts,
                    "daemon component exceeded max restarts, circuit open"
                );
                break;
            }
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}
