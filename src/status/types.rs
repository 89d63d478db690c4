use crate::goalstate::GoalStateKey;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Machine-readable reason attached to a terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorClarification(pub i32);

impl ErrorClarification {
    pub const NONE: Self = Self(0);
    /// Goal state was valid but no execution slot was free.
    pub const MAX_TASKS_EXCEEDED: Self = Self(1);
    pub const EXECUTION_FAILED: Self = Self(2);
    pub const MISSING_SCRIPT: Self = Self(3);
    pub const TIMED_OUT: Self = Self(4);
    pub const SPAWN_FAILED: Self = Self(5);
    /// A newer sequence number for the same extension ran first.
    pub const SUPERSEDED: Self = Self(6);
}

impl fmt::Display for ErrorClarification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum Operation {
    #[default]
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatusValue {
    #[default]
    Transitioning,
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedMessage {
    pub lang: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub operation: Operation,
    pub status: StatusValue,
    pub code: ErrorClarification,
    pub formatted_message: FormattedMessage,
}

/// One reportable outcome for a goal state.
///
/// `StatusItem::default()` is the "nothing recorded yet" sentinel and is never
/// rendered into an aggregate payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusItem {
    pub version: u32,
    #[serde(rename = "timestampUTC")]
    pub timestamp_utc: String,
    pub status: StatusBody,
    pub exit_code: i32,
}

impl StatusItem {
    pub fn new(operation: Operation, status: StatusValue, message: impl Into<String>) -> Self {
        Self {
            version: 1,
            timestamp_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            status: StatusBody {
                operation,
                status,
                code: ErrorClarification::NONE,
                formatted_message: FormattedMessage {
                    lang: "en-US".into(),
                    message: message.into(),
                },
            },
            exit_code: 0,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(Operation::Enable, StatusValue::Skipped, message)
            .with_clarification(ErrorClarification::MAX_TASKS_EXCEEDED)
    }

    pub fn with_clarification(mut self, code: ErrorClarification) -> Self {
        self.status.code = code;
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::default()
    }

    pub fn value(&self) -> StatusValue {
        self.status.status
    }

    pub fn message(&self) -> &str {
        &self.status.formatted_message.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmediateStatus {
    pub sequence_number: i64,
    #[serde(rename = "timestampUTC")]
    pub timestamp_utc: String,
    pub status: StatusItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerImmediateStatus {
    pub handler_name: String,
    pub aggregate_immediate_status: Vec<ImmediateStatus>,
}

/// Wire payload pushed to the host status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmediateTopLevelStatus {
    pub aggregate_handler_immediate_status: Vec<HandlerImmediateStatus>,
}

impl ImmediateTopLevelStatus {
    /// Render a fresh aggregate from every known entry, grouped by handler
    /// name and ordered by sequence number. Sentinel items are skipped.
    pub fn render<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a GoalStateKey, &'a StatusItem)>,
    {
        let mut by_handler: BTreeMap<&str, Vec<ImmediateStatus>> = BTreeMap::new();
        for (key, item) in entries {
            if item.is_sentinel() {
                continue;
            }
            by_handler
                .entry(key.extension_name.as_str())
                .or_default()
                .push(ImmediateStatus {
                    sequence_number: key.sequence_number,
                    timestamp_utc: item.timestamp_utc.clone(),
                    status: item.clone(),
                });
        }

        let aggregate_handler_immediate_status = by_handler
            .into_iter()
            .map(|(handler_name, mut statuses)| {
                statuses.sort_by_key(|s| s.sequence_number);
                HandlerImmediateStatus {
                    handler_name: handler_name.to_string(),
                    aggregate_immediate_status: statuses,
                }
            })
            .collect();

        Self {
            aggregate_handler_immediate_status,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.aggregate_handler_immediate_status
            .iter()
            .map(|h| h.aggregate_immediate_status.len())
            .sum()
    }
}
