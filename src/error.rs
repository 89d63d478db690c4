use crate::status::ErrorClarification;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for the run-command agent.
///
/// Each subsystem defines its own error variant. The dispatcher matches on
/// these to decide whether an iteration is aborted or a single task fails;
/// application entry points continue to use `anyhow::Result` for context chains.
#[derive(Debug, Error)]
pub enum AgentError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Host transport ──────────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Signature validation ────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    // ── Status reporting ────────────────────────────────────────────────
    #[error("report: {0}")]
    Report(#[from] ReportError),

    // ── Script execution ────────────────────────────────────────────────
    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    // ── Sequence number guard ───────────────────────────────────────────
    #[error("sequence: {0}")]
    Sequence(#[from] SequenceError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request could not be built: {0}")]
    InvalidRequest(String),

    #[error("{url} returned non-retryable status {status}")]
    PermanentStatus { url: String, status: u16 },

    #[error("{url} still returned status {status} after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed response body: {0}")]
    Decode(String),
}

// ─── Validation errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("certificate store {path}: {source}")]
    CertificateStore {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ─── Report errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no status listener registered")]
    NoListener,

    #[error("status endpoint returned {status}")]
    Status { status: u16 },

    #[error("status endpoint unreachable: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("status file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ─── Execution errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("{message} (clarification {clarification})")]
pub struct ExecutionError {
    pub clarification: ErrorClarification,
    pub message: String,
}

impl ExecutionError {
    pub fn new(clarification: ErrorClarification, message: impl Into<String>) -> Self {
        Self {
            clarification,
            message: message.into(),
        }
    }
}

// ─── Sequence number errors ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("sequence file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sequence file {path} holds a non-numeric value {value:?}")]
    Corrupt { path: String, value: String },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, AgentError>;
