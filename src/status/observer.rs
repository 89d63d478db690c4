use super::notifier::StatusListener;
use super::reporter::StatusSink;
use super::types::{ImmediateTopLevelStatus, StatusItem};
use crate::error::ReportError;
use crate::goalstate::GoalStateKey;
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Latest known status per goal state, pushed as one aggregate on every change.
///
/// Many workers write concurrently; the map guards itself so callers never hold
/// a lock. Every push renders the full map, so a failed push is repaired by
/// whichever notification comes next. Pushes are serialized and each one
/// renders the map only after taking its turn, so the last PUT to complete
/// always carries the latest entries.
pub struct StatusObserver {
    entries: DashMap<GoalStateKey, StatusItem>,
    sink: Arc<dyn StatusSink>,
    push: Mutex<()>,
}

impl StatusObserver {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            entries: DashMap::new(),
            sink,
            push: Mutex::new(()),
        }
    }

    /// Store `item` for `key` (last write wins) and push the full aggregate.
    /// A push failure is returned but the stored entry stays.
    pub async fn notify(&self, key: &GoalStateKey, item: StatusItem) -> Result<(), ReportError> {
        tracing::debug!(
            extension = %key.extension_name,
            seq = key.sequence_number,
            status = %item.value(),
            "status updated"
        );
        self.entries.insert(key.clone(), item);

        let _turn = self.push.lock().await;
        let payload = self.aggregate();
        if let Err(error) = self.sink.put_status(&payload).await {
            tracing::warn!(
                %error,
                entries = payload.entry_count(),
                "failed to push aggregated status; will retry on next update"
            );
            return Err(error);
        }
        Ok(())
    }

    pub fn get_status_for_key(&self, key: &GoalStateKey) -> Option<StatusItem> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Drop entries for goal states the host no longer lists.
    pub fn prune_except(&self, live: &HashSet<GoalStateKey>) {
        let before = self.entries.len();
        self.entries.retain(|key, _| live.contains(key));
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            tracing::debug!(pruned, "pruned status entries for retired goal states");
        }
    }

    /// Render the current map without pushing it.
    pub fn aggregate(&self) -> ImmediateTopLevelStatus {
        let entries: Vec<(GoalStateKey, StatusItem)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ImmediateTopLevelStatus::render(entries.iter().map(|(k, v)| (k, v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StatusListener for StatusObserver {
    fn on_notify<'a>(
        &'a self,
        key: &'a GoalStateKey,
        item: StatusItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>> {
        Box::pin(self.notify(key, item))
    }
}
