use super::types::{ExtensionGoalState, ImmediateVmSettings, VmSettingsSnapshot};
use crate::error::TransportError;
use crate::transport::RetryingClient;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Goal-state transport: one conditional fetch of the host's immediate
/// goal-state document.
pub trait GoalStateTransport: Send + Sync {
    /// Returns the snapshot together with the change token it was served
    /// under. An unchanged document comes back with `change_token` echoed
    /// and no goal states.
    fn get_immediate_vm_settings<'a>(
        &'a self,
        change_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<VmSettingsSnapshot, TransportError>> + Send + 'a>>;
}

/// Talks to the host GA plugin endpoint over the retrying client.
pub struct HostGaCommunicator {
    retrying: Arc<RetryingClient>,
    url: String,
}

impl HostGaCommunicator {
    pub fn new(retrying: Arc<RetryingClient>, url: impl Into<String>) -> Self {
        Self {
            retrying,
            url: url.into(),
        }
    }
}

impl GoalStateTransport for HostGaCommunicator {
    fn get_immediate_vm_settings<'a>(
        &'a self,
        change_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<VmSettingsSnapshot, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            let url = self.url.as_str();
            let response = self
                .retrying
                .fetch(
                    |client, token| {
                        let request = client.get(url).header(ACCEPT, "application/json");
                        match token {
                            Some(token) => request.header(IF_NONE_MATCH, token),
                            None => request,
                        }
                    },
                    change_token,
                )
                .await?;

            match response.status() {
                StatusCode::NOT_MODIFIED => {
                    return Ok(VmSettingsSnapshot {
                        change_token: change_token.map(str::to_string),
                        goal_states: Vec::new(),
                    });
                }
                StatusCode::NOT_FOUND => {
                    tracing::debug!(url, "host lists no immediate goal states");
                    return Ok(VmSettingsSnapshot::default());
                }
                _ => {}
            }

            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let document: ImmediateVmSettings = response
                .json()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()))?;

            Ok(VmSettingsSnapshot {
                change_token: etag,
                goal_states: document.immediate_extension_goal_states,
            })
        })
    }
}

/// Goal states for this extension plus the change token to poll with next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalStatePoll {
    pub goal_states: Vec<ExtensionGoalState>,
    pub change_token: Option<String>,
}

impl GoalStatePoll {
    /// Without a token on both sides nothing can be assumed unchanged.
    pub fn is_unchanged(&self, last_change_token: Option<&str>) -> bool {
        last_change_token.is_some() && self.change_token.as_deref() == last_change_token
    }
}

/// Fetch the current snapshot and keep only goal states addressed to
/// `extension_name` (case-insensitive). An unchanged token yields no goal
/// states; a transport failure leaves the caller's token untouched.
pub async fn poll(
    transport: &dyn GoalStateTransport,
    extension_name: &str,
    last_change_token: Option<&str>,
) -> Result<GoalStatePoll, TransportError> {
    let snapshot = transport
        .get_immediate_vm_settings(last_change_token)
        .await?;

    if last_change_token.is_some() && snapshot.change_token.as_deref() == last_change_token {
        return Ok(GoalStatePoll {
            goal_states: Vec::new(),
            change_token: snapshot.change_token,
        });
    }

    let total = snapshot.goal_states.len();
    let goal_states: Vec<ExtensionGoalState> = snapshot
        .goal_states
        .into_iter()
        .filter(|gs| gs.name.eq_ignore_ascii_case(extension_name))
        .collect();
    tracing::debug!(
        total,
        matched = goal_states.len(),
        change_token = ?snapshot.change_token,
        "goal state snapshot changed"
    );

    Ok(GoalStatePoll {
        goal_states,
        change_token: snapshot.change_token,
    })
}
