use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExtensionState {
    #[default]
    Enabled,
    Disabled,
}

/// Identity of one unit of work. Used as the status map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalStateKey {
    pub extension_name: String,
    pub sequence_number: i64,
    pub runtime_settings_state: ExtensionState,
}

impl GoalStateKey {
    pub fn new(
        extension_name: impl Into<String>,
        sequence_number: i64,
        runtime_settings_state: ExtensionState,
    ) -> Self {
        Self {
            extension_name: extension_name.into(),
            sequence_number,
            runtime_settings_state,
        }
    }
}

/// Work item payload handed to the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsCommon {
    #[serde(default)]
    pub public_settings: serde_json::Map<String, serde_json::Value>,
    /// Base64 ciphertext; decrypted by the engine, never here.
    #[serde(default, rename = "protectedSettings")]
    pub protected_settings_base64: Option<String>,
    #[serde(default)]
    pub protected_settings_cert_thumbprint: Option<String>,
    #[serde(rename = "seqNo")]
    pub seq_no: i64,
    pub extension_name: String,
    #[serde(default)]
    pub extension_state: ExtensionState,
}

impl SettingsCommon {
    pub fn key(&self) -> GoalStateKey {
        GoalStateKey::new(&self.extension_name, self.seq_no, self.extension_state)
    }

    fn has_protected_settings(&self) -> bool {
        self.protected_settings_base64
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

/// A named, versioned container of settings delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionGoalState {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub settings: Vec<SettingsCommon>,
}

impl ExtensionGoalState {
    /// Check that every protected payload names a certificate present in
    /// `cert_dir` (`<THUMBPRINT>.crt`).
    ///
    /// `Ok(false)` means the goal state is not authentic and must be discarded;
    /// `Err` means the certificate store itself could not be inspected.
    pub async fn validate_signature(&self, cert_dir: &Path) -> Result<bool, ValidationError> {
        for settings in self.settings.iter().filter(|s| s.has_protected_settings()) {
            let Some(thumbprint) = settings
                .protected_settings_cert_thumbprint
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
            else {
                return Ok(false);
            };

            if thumbprint.contains(['/', '\\']) || thumbprint.contains("..") {
                return Ok(false);
            }

            let cert = cert_dir.join(format!("{}.crt", thumbprint.to_ascii_uppercase()));
            let present = tokio::fs::try_exists(&cert).await.map_err(|source| {
                ValidationError::CertificateStore {
                    path: cert.display().to_string(),
                    source,
                }
            })?;
            if !present {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Body of the host's immediate goal-state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmediateVmSettings {
    #[serde(default)]
    pub immediate_extension_goal_states: Vec<ExtensionGoalState>,
}

/// Result of one goal-state fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmSettingsSnapshot {
    pub change_token: Option<String>,
    pub goal_states: Vec<ExtensionGoalState>,
}
