//! Immediate goal states: wire types, the polling source, and admission.

mod source;
mod types;
mod validate;

pub use source::{GoalStatePoll, GoalStateTransport, HostGaCommunicator, poll};
pub use types::{
    ExtensionGoalState, ExtensionState, GoalStateKey, ImmediateVmSettings, SettingsCommon,
    VmSettingsSnapshot,
};
pub use validate::{CertificateValidator, Selection, SignatureValidator, select};
