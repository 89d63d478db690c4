//! Status items, the aggregated immediate status, and the paths that publish
//! them.

mod notifier;
mod observer;
mod reporter;
mod types;

pub use notifier::{Notifier, StatusListener};
pub use observer::StatusObserver;
pub use reporter::{FileStatusReporter, HostGaStatusSink, StatusReporter, StatusSink};
pub use types::{
    ErrorClarification, FormattedMessage, HandlerImmediateStatus, ImmediateStatus,
    ImmediateTopLevelStatus, Operation, StatusBody, StatusItem, StatusValue,
};
