use super::types::{ExtensionGoalState, SettingsCommon};
use crate::error::ValidationError;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Authenticates a goal state before any of its settings may run.
pub trait SignatureValidator: Send + Sync {
    fn validate_signature<'a>(
        &'a self,
        goal_state: &'a ExtensionGoalState,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ValidationError>> + Send + 'a>>;
}

/// Checks the local certificate store for the thumbprints a goal state names.
pub struct CertificateValidator {
    cert_dir: PathBuf,
}

impl CertificateValidator {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }
}

impl SignatureValidator for CertificateValidator {
    fn validate_signature<'a>(
        &'a self,
        goal_state: &'a ExtensionGoalState,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ValidationError>> + Send + 'a>> {
        Box::pin(goal_state.validate_signature(&self.cert_dir))
    }
}

/// Outcome of one admission pass. No settings item appears in both lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub admitted: Vec<SettingsCommon>,
    pub dropped: Vec<SettingsCommon>,
}

/// Authenticate `candidates` and admit up to `capacity` settings items in
/// encounter order; the valid remainder is dropped.
///
/// Goal states that fail validation are discarded silently. A validator error
/// aborts the whole pass so nothing is admitted or dropped.
pub async fn select(
    candidates: Vec<ExtensionGoalState>,
    capacity: usize,
    validator: &dyn SignatureValidator,
) -> Result<Selection, ValidationError> {
    let mut selection = Selection::default();

    for goal_state in candidates {
        if !validator.validate_signature(&goal_state).await? {
            tracing::warn!(
                goal_state = %goal_state.name,
                settings = goal_state.settings.len(),
                "discarding goal state with invalid signature"
            );
            continue;
        }

        for settings in goal_state.settings {
            if selection.admitted.len() < capacity {
                selection.admitted.push(settings);
            } else {
                selection.dropped.push(settings);
            }
        }
    }

    Ok(selection)
}
