use runcommand::Config;
use runcommand::seqnum::SequenceGuard;

pub async fn render_status(config: &Config) -> String {
    let guard = SequenceGuard::new(&config.paths.state_dir);
    let last_enabled = match guard.last_applied(&config.extension.name).await {
        Ok(Some(seq)) => seq.to_string(),
        Ok(None) => "(none)".into(),
        Err(e) => format!("(unreadable: {e})"),
    };

    let mut lines = vec![
        "◆ runcommand status".to_string(),
        String::new(),
        format!("Version       {}", env!("CARGO_PKG_VERSION")),
        format!("Config        {}", config.config_path.display()),
        format!(
            "Extension     {} {}",
            config.extension.name, config.extension.version
        ),
        String::new(),
        format!("Host agent    {}", config.host_ga.vm_settings_url()),
        format!("Status PUT    {}", config.host_ga.status_url()),
        format!(
            "Concurrency   {} tasks, polled every {}s",
            config.dispatcher.max_concurrent_tasks, config.dispatcher.poll_interval_secs
        ),
        format!(
            "Retries       {} attempts, {}s base backoff",
            config.reliability.max_attempts, config.reliability.base_backoff_secs
        ),
        String::new(),
        format!("State dir     {}", config.paths.state_dir.display()),
        format!("Status dir    {}", config.paths.status_dir.display()),
        format!("Last enable   {last_enabled}"),
    ];

    // Immediate-mode runs are tracked per run-command resource, not under the
    // handler name the enable command uses.
    let own_file = guard
        .path_for(&config.extension.name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string);
    match guard.applied().await {
        Ok(applied) => {
            let immediate: Vec<_> = applied
                .into_iter()
                .filter(|(name, _)| Some(name) != own_file.as_ref())
                .collect();
            if immediate.is_empty() {
                lines.push("Immediate     (none)".into());
            }
            for (name, seq) in immediate {
                lines.push(format!("Immediate     {name} #{seq}"));
            }
        }
        Err(e) => lines.push(format!("Immediate     (unreadable: {e})")),
    }

    lines.join("\n")
}
