//! Synchronous command path: one settings file, one execution, one status file.

use crate::config::Config;
use crate::engine::{ExecutionEngine, ExecutionStrategies, ScriptEngine};
use crate::error::ExecutionError;
use crate::goalstate::{ExtensionState, SettingsCommon};
use crate::seqnum::SequenceGuard;
use crate::status::{Operation, StatusItem, StatusValue};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub enum EnableOutcome {
    /// The sequence number was not newer than the last one applied.
    AlreadyApplied,
    /// The engine ran and reported its own terminal status.
    Completed { exit_code: i32 },
    /// The engine failed; an error status was written on its behalf.
    Failed(ExecutionError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandlerSettingsFile {
    #[serde(default)]
    runtime_settings: Vec<RuntimeSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeSettings {
    handler_settings: HandlerSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandlerSettings {
    #[serde(default)]
    public_settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    protected_settings: Option<String>,
    #[serde(default)]
    protected_settings_cert_thumbprint: Option<String>,
}

pub fn settings_path(config: &Config, sequence_number: i64) -> PathBuf {
    config
        .paths
        .config_dir
        .join(format!("{sequence_number}.settings"))
}

/// Parse a handler settings document. Only the first runtime settings entry
/// is used; a document with none yields empty public settings.
fn parse_settings(
    raw: &str,
    extension_name: &str,
    sequence_number: i64,
) -> Result<SettingsCommon> {
    let file: HandlerSettingsFile =
        serde_json::from_str(raw).context("settings file is not valid handler settings JSON")?;
    let handler = file
        .runtime_settings
        .into_iter()
        .next()
        .map(|rs| rs.handler_settings)
        .unwrap_or_default();

    Ok(SettingsCommon {
        public_settings: handler.public_settings,
        protected_settings_base64: handler.protected_settings,
        protected_settings_cert_thumbprint: handler.protected_settings_cert_thumbprint,
        seq_no: sequence_number,
        extension_name: extension_name.to_string(),
        extension_state: ExtensionState::Enabled,
    })
}

pub async fn run(config: &Config, sequence_number: i64) -> Result<EnableOutcome> {
    let path = settings_path(config, sequence_number);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let settings = parse_settings(&raw, &config.extension.name, sequence_number)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let guard = SequenceGuard::new(&config.paths.state_dir);
    if guard
        .should_skip(&config.extension.name, sequence_number)
        .await?
    {
        return Ok(EnableOutcome::AlreadyApplied);
    }

    let strategies = ExecutionStrategies::synchronous(&config.paths.status_dir);
    let reporter = Arc::clone(&strategies.reporter);
    let engine = ScriptEngine::new(&config.paths.download_dir, strategies);

    match engine.execute_goal_state(&settings).await {
        Ok(exit_code) => Ok(EnableOutcome::Completed { exit_code }),
        Err(error) => {
            tracing::warn!(seq = sequence_number, %error, "enable failed");
            let item = StatusItem::new(Operation::Enable, StatusValue::Error, &error.message)
                .with_clarification(error.clarification);
            reporter
                .report(&settings.key(), item)
                .await
                .context("failed to write error status")?;
            Ok(EnableOutcome::Failed(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ErrorClarification;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.extension.name = "rc".into();
        config.paths.state_dir = tmp.path().join("state");
        config.paths.config_dir = tmp.path().join("config");
        config.paths.status_dir = tmp.path().join("status");
        config.paths.download_dir = tmp.path().join("download");
        std::fs::create_dir_all(&config.paths.config_dir).unwrap();
        config
    }

    fn write_settings(config: &Config, seq: i64, public: serde_json::Value) {
        let doc = serde_json::json!({
            "runtimeSettings": [{"handlerSettings": {"publicSettings": public}}]
        });
        std::fs::write(settings_path(config, seq), doc.to_string()).unwrap();
    }

    fn read_status(config: &Config, seq: i64) -> Vec<StatusItem> {
        let raw = std::fs::read_to_string(config.paths.status_dir.join(format!("{seq}.status")))
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn parses_first_runtime_settings_entry() {
        let raw = r#"{"runtimeSettings":[{"handlerSettings":{
            "publicSettings":{"script":"echo hi"},
            "protectedSettings":"MIIB",
            "protectedSettingsCertThumbprint":"ABC123"}}]}"#;

        let settings = parse_settings(raw, "rc", 7).unwrap();

        assert_eq!(settings.seq_no, 7);
        assert_eq!(settings.extension_name, "rc");
        assert_eq!(settings.public_settings["script"], "echo hi");
        assert_eq!(settings.protected_settings_base64.as_deref(), Some("MIIB"));
        assert_eq!(
            settings.protected_settings_cert_thumbprint.as_deref(),
            Some("ABC123")
        );
    }

    #[tokio::test]
    async fn runs_script_and_writes_status_file() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        write_settings(&config, 1, serde_json::json!({"script": "echo enabled"}));

        let outcome = run(&config, 1).await.unwrap();

        assert!(matches!(outcome, EnableOutcome::Completed { exit_code: 0 }));
        let items = read_status(&config, 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value(), StatusValue::Success);
        assert!(items[0].message().contains("enabled"));
    }

    #[tokio::test]
    async fn repeated_sequence_number_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        write_settings(&config, 2, serde_json::json!({"script": "echo once"}));

        assert!(matches!(
            run(&config, 2).await.unwrap(),
            EnableOutcome::Completed { .. }
        ));
        assert!(matches!(
            run(&config, 2).await.unwrap(),
            EnableOutcome::AlreadyApplied
        ));
    }

    #[tokio::test]
    async fn engine_error_is_written_to_status_file() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        write_settings(&config, 3, serde_json::json!({}));

        let outcome = run(&config, 3).await.unwrap();

        let EnableOutcome::Failed(error) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(error.clarification, ErrorClarification::MISSING_SCRIPT);
        let items = read_status(&config, 3);
        assert_eq!(items[0].value(), StatusValue::Error);
        assert_eq!(items[0].status.code, ErrorClarification::MISSING_SCRIPT);
    }

    #[tokio::test]
    async fn missing_settings_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);

        assert!(run(&config, 9).await.is_err());
    }
}
