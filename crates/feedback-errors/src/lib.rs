//! Shared error taxonomy for the feedback pipeline.
//!
//! Each component crate defines its own `thiserror` enum for the errors it can
//! produce, then converts into [`PipelineErrorKind`] at whatever boundary needs
//! to reason about the error by *kind* rather than by concrete type (the
//! orchestrator's retry-vs-terminate decision, the HTTP layer's status mapping).

use thiserror::Error;

/// The five error kinds the pipeline distinguishes, independent of which
/// component raised them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Malformed webhook, empty text, bad signature. Surfaced as 4xx; never enqueued.
    #[error("input invalid: {0}")]
    InputInvalid(String),

    /// Transport error, timeout, or 5xx from a downstream dependency. Retriable.
    #[error("transient dependency error: {0}")]
    TransientDependency(String),

    /// 4xx from an external API that is not itself an input-validation problem
    /// (auth denied, a resource expected to exist was not found).
    #[error("permanent dependency error: {0}")]
    PermanentDependency(String),

    /// The credential required for this activity is absent. Per-activity policy
    /// decides whether this is a soft-skip or a fatal startup error.
    #[error("credential absent: {0}")]
    CredentialAbsent(String),

    /// Malformed state journal, impossible state transition, checksum mismatch
    /// on checkpoint load. The workflow never attempts to catch this; the
    /// process terminates and durable state is the recovery point on restart.
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),
}

impl PipelineErrorKind {
    /// Whether the workflow engine should retry the step that produced this
    /// error, as opposed to terminating or requiring an external decision.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PipelineErrorKind::TransientDependency(_))
    }
}

/// Errors surfaced by the ingestion gateway's HTTP handlers.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request body exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    #[error("feedback text is empty")]
    EmptyText,

    #[error("signature verification failed")]
    BadSignature,

    #[error("request timestamp is outside the replay window")]
    StaleTimestamp,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("broker write failed: {0}")]
    BrokerWriteFailed(#[from] anyhow::Error),
}

impl From<&GatewayError> for PipelineErrorKind {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::BodyTooLarge { .. }
            | GatewayError::EmptyText
            | GatewayError::BadSignature
            | GatewayError::StaleTimestamp
            | GatewayError::MalformedPayload(_) => {
                PipelineErrorKind::InputInvalid(err.to_string())
            }
            GatewayError::BrokerWriteFailed(_) => {
                PipelineErrorKind::TransientDependency(err.to_string())
            }
        }
    }
}

/// Errors surfaced by activity implementations (analyzer, chat, tracker).
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dependency quota exhausted: {0}")]
    ResourceExhausted(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("credential not configured for {activity}")]
    CredentialAbsent { activity: &'static str },

    #[error("unexpected response from dependency: {0}")]
    UnexpectedResponse(String),
}

impl ActivityError {
    /// §5: whether the workflow engine should retry this activity invocation.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ActivityError::Unavailable(_) | ActivityError::ResourceExhausted(_)
        )
    }
}

impl From<&ActivityError> for PipelineErrorKind {
    fn from(err: &ActivityError) -> Self {
        match err {
            ActivityError::Unavailable(_) | ActivityError::ResourceExhausted(_) => {
                PipelineErrorKind::TransientDependency(err.to_string())
            }
            ActivityError::InvalidArgument(_) => PipelineErrorKind::InputInvalid(err.to_string()),
            ActivityError::PermissionDenied(_) => {
                PipelineErrorKind::PermanentDependency(err.to_string())
            }
            ActivityError::CredentialAbsent { .. } => {
                PipelineErrorKind::CredentialAbsent(err.to_string())
            }
            ActivityError::UnexpectedResponse(_) => {
                PipelineErrorKind::PermanentDependency(err.to_string())
            }
        }
    }
}

/// Errors surfaced by the durable orchestrator's public contract and journal.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow {workflow_id} not found")]
    NotFound { workflow_id: String },

    #[error("checkpoint corrupted for workflow {workflow_id}: {reason}")]
    CheckpointCorrupted { workflow_id: String, reason: String },

    #[error("checkpoint checksum mismatch for workflow {workflow_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        workflow_id: String,
        expected: String,
        actual: String,
    },

    #[error("activity {activity} failed: {source}")]
    ActivityFailed {
        activity: &'static str,
        #[source]
        source: ActivityError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&OrchestratorError> for PipelineErrorKind {
    fn from(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound { .. } => PipelineErrorKind::InputInvalid(err.to_string()),
            OrchestratorError::CheckpointCorrupted { .. }
            | OrchestratorError::ChecksumMismatch { .. } => {
                PipelineErrorKind::InvariantViolation(err.to_string())
            }
            OrchestratorError::ActivityFailed { source, .. } => PipelineErrorKind::from(source),
            OrchestratorError::Io(_) => PipelineErrorKind::TransientDependency(err.to_string()),
        }
    }
}
