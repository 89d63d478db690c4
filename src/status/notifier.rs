use super::reporter::StatusReporter;
use super::types::StatusItem;
use crate::error::ReportError;
use crate::goalstate::GoalStateKey;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Receiver of status notifications.
pub trait StatusListener: Send + Sync {
    fn on_notify<'a>(
        &'a self,
        key: &'a GoalStateKey,
        item: StatusItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>>;
}

/// Single-consumer broadcast: at most one listener is registered at a time
/// and registering replaces the previous one.
#[derive(Default)]
pub struct Notifier {
    listener: Mutex<Option<Arc<dyn StatusListener>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn StatusListener>) {
        let mut slot = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.replace(listener).is_some() {
            tracing::debug!("replaced registered status listener");
        }
    }

    pub fn unregister(&self) {
        self.listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    pub fn is_registered(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    pub async fn notify(&self, key: &GoalStateKey, item: StatusItem) -> Result<(), ReportError> {
        // Never hold the lock across the listener's network call.
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        match listener {
            Some(listener) => listener.on_notify(key, item).await,
            None => Err(ReportError::NoListener),
        }
    }
}

impl StatusReporter for Notifier {
    fn report<'a>(
        &'a self,
        key: &'a GoalStateKey,
        item: StatusItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>> {
        Box::pin(self.notify(key, item))
    }
}
