use super::Config;

pub(super) const HOST_GA_URL: &str = "RUNCOMMAND_HOST_GA_URL";
pub(super) const MAX_CONCURRENT_TASKS: &str = "RUNCOMMAND_MAX_CONCURRENT_TASKS";
pub(super) const POLL_INTERVAL_SECS: &str = "RUNCOMMAND_POLL_INTERVAL_SECS";
pub(super) const LOG_LEVEL: &str = "RUNCOMMAND_LOG_LEVEL";

impl Config {
    /// Invalid or empty values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(HOST_GA_URL)
            && !url.is_empty()
        {
            self.host_ga.base_url = url;
        }

        if let Ok(raw) = std::env::var(MAX_CONCURRENT_TASKS)
            && let Ok(max) = raw.parse::<usize>()
            && max > 0
        {
            self.dispatcher.max_concurrent_tasks = max;
        }

        if let Ok(raw) = std::env::var(POLL_INTERVAL_SECS)
            && let Ok(secs) = raw.parse::<u64>()
        {
            self.dispatcher.poll_interval_secs = secs;
        }

        if let Ok(level) = std::env::var(LOG_LEVEL)
            && level.parse::<tracing::Level>().is_ok()
        {
            self.log_level = level;
        }
    }
}
