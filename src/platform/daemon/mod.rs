use crate::config::Config;
use crate::dispatch::{Dispatcher, DispatcherDeps, ExecutingTasks};
use crate::engine::{ExecutionStrategies, ScriptEngine};
use crate::goalstate::{CertificateValidator, HostGaCommunicator};
use crate::seqnum::SequenceGuard;
use crate::status::{HostGaStatusSink, Notifier, StatusObserver};
use crate::transport::{RetryPolicy, RetryingClient, build_host_client};
use anyhow::{Context, Result};
use std::sync::Arc;

mod supervisor;

use supervisor::spawn_component_supervisor;

/// The wired immediate-mode pipeline.
pub struct Pipeline {
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Arc<Notifier>,
    pub observer: Arc<StatusObserver>,
    pub executing: Arc<ExecutingTasks>,
}

pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let client =
        build_host_client(&config.reliability).context("failed to build host agent client")?;
    let retrying = Arc::new(RetryingClient::new(
        client.clone(),
        RetryPolicy::from_config(&config.reliability),
    ));

    let transport = Arc::new(HostGaCommunicator::new(
        retrying,
        config.host_ga.vm_settings_url(),
    ));
    let sink = Arc::new(HostGaStatusSink::new(client, config.host_ga.status_url()));
    let observer = Arc::new(StatusObserver::new(sink));
    let notifier = Arc::new(Notifier::new());
    notifier.register(observer.clone());

    let engine = Arc::new(ScriptEngine::new(
        &config.paths.download_dir,
        ExecutionStrategies::immediate(Arc::clone(&notifier)),
    ));
    let executing = Arc::new(ExecutingTasks::new());

    let dispatcher = Dispatcher::new(
        &config.extension.name,
        &config.dispatcher,
        DispatcherDeps {
            transport,
            validator: Arc::new(CertificateValidator::new(&config.paths.cert_dir)),
            engine,
            notifier: Arc::clone(&notifier),
            observer: Some(Arc::clone(&observer)),
            sequence_guard: Some(Arc::new(SequenceGuard::new(&config.paths.state_dir))),
            executing: Arc::clone(&executing),
        },
    );

    Ok(Pipeline {
        dispatcher: Arc::new(dispatcher),
        notifier,
        observer,
        executing,
    })
}

pub async fn run(config: Arc<Config>) -> Result<()> {
    let pipeline = build_pipeline(&config)?;
    let initial_backoff = config.reliability.restart_initial_backoff_secs.max(1);
    let max_backoff = config
        .reliability
        .restart_max_backoff_secs
        .max(initial_backoff);

    let dispatcher = Arc::clone(&pipeline.dispatcher);
    let handle = spawn_component_supervisor(
        "immediate-dispatcher",
        initial_backoff,
        max_backoff,
        0,
        move || {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.run().await }
        },
    );

    tracing::info!(
        extension = %config.extension.name,
        version = %config.extension.version,
        host = %config.host_ga.base_url,
        "run-command daemon started; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        executing = pipeline.executing.current(),
        statuses = pipeline.observer.len(),
        "shutdown requested"
    );

    handle.abort();
    let _ = handle.await;
    pipeline.notifier.unregister();

    Ok(())
}
