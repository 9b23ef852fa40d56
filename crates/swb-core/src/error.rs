//! Error types for the Spec Workbench
//!
//! Provides error handling for:
//! - Backend transport and API failures
//! - Local input validation
//! - Persistence, phase, enhancement and delegation failures
//! - Configuration loading

use crate::model::{Phase, TaskId};

/// Failure reported by a [`SpecBackend`](crate::backend::SpecBackend) call
///
/// `Timeout` and `Cancelled` are produced locally when a call is
/// interrupted before the backend answers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Target resource does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend answered with a non-success status
    #[error("backend API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error detail returned by the backend
        message: String,
    },

    /// Request could not be delivered or the connection dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// The request method did not yield a streamable body
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),

    /// No answer within the configured limit
    #[error("timed out after {duration_secs}s")]
    Timeout {
        /// Limit that elapsed
        duration_secs: u64,
    },

    /// Cancelled through the workbench cancellation token
    #[error("cancelled")]
    Cancelled,
}

impl BackendError {
    /// Check if this is the "target not found" signal
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if the call was interrupted locally
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Required input missing or malformed; the operation is not attempted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Specification content is empty
    #[error("specification content is empty; provide requirements first")]
    EmptyContent,

    /// No plan artifact has been generated yet
    #[error("no plan artifacts available; generate a plan first")]
    NoPlanArtifacts,

    /// Delegation requested with an empty selection
    #[error("no tasks selected")]
    NoTasksSelected,

    /// Task id is not part of the current task list
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// Agent configuration lacks an agent id
    #[error("no coding agent selected")]
    MissingAgent,

    /// Tag input is blank after trimming
    #[error("tag is empty")]
    EmptyTag,

    /// Credential input is blank
    #[error("token is empty")]
    EmptyToken,
}

/// Main workbench error type
///
/// Every public operation converts its failures into one of these at the
/// operation boundary.
#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    /// Input validation failed before any request was issued
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Save failed (stale identity recovery included)
    #[error("persistence failed: {0}")]
    PersistenceFailure(#[source] BackendError),

    /// Phase endpoint failed; phase unchanged
    #[error("{phase} phase failed: {source}")]
    PhaseTransitionFailure {
        /// Phase whose endpoint failed
        phase: Phase,
        /// Underlying backend failure
        #[source]
        source: BackendError,
    },

    /// No enhancement stream could be established, or it broke mid-way
    #[error("enhancement failed: {0}")]
    EnhancementFailure(#[source] BackendError),

    /// A delegated task failed
    #[error("delegation of task {task_id} failed: {source}")]
    DelegationFailure {
        /// First failing task in selection order
        task_id: TaskId,
        /// Underlying backend failure
        #[source]
        source: BackendError,
    },

    /// Template could not be fetched; no planning defaults applied
    #[error("template fetch failed: {0}")]
    TemplateFetchFailure(#[source] BackendError),

    /// Generic backend failure outside the phase workflow
    #[error("backend request failed: {0}")]
    Backend(#[source] BackendError),

    /// Forward-only phase rule violated
    #[error("illegal phase transition: {from} -> {to}")]
    IllegalTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },

    /// Action is not enabled in the current phase
    #[error("{action} is not enabled in the {phase} phase")]
    ActionNotEnabled {
        /// Requested action
        action: crate::phase::Action,
        /// Current phase
        phase: Phase,
    },

    /// The same operation is already in flight
    #[error("{operation} already in progress")]
    Busy {
        /// Operation name
        operation: &'static str,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkbenchError {
    /// Check if the user may simply retry the operation
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailure(_)
                | Self::PhaseTransitionFailure { .. }
                | Self::EnhancementFailure(_)
                | Self::DelegationFailure { .. }
                | Self::TemplateFetchFailure(_)
                | Self::Backend(_)
                | Self::Busy { .. }
        )
    }

    /// Underlying backend failure, if any
    #[must_use]
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::PersistenceFailure(e)
            | Self::EnhancementFailure(e)
            | Self::TemplateFetchFailure(e)
            | Self::Backend(e)
            | Self::PhaseTransitionFailure { source: e, .. }
            | Self::DelegationFailure { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Check if the failure came from a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.backend_error(), Some(BackendError::Cancelled))
    }

    /// Check if the failure came from a timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.backend_error(), Some(BackendError::Timeout { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workbench_error_display() {
        let err = WorkbenchError::from(ValidationError::EmptyContent);
        assert!(err.to_string().contains("validation failed"));

        let err = WorkbenchError::PhaseTransitionFailure {
            phase: Phase::Plan,
            source: BackendError::Api {
                status: 500,
                message: "boom".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "plan phase failed: backend API error (500): boom"
        );
    }

    #[test]
    fn workbench_error_is_retryable() {
        assert!(WorkbenchError::PersistenceFailure(BackendError::Transport("x".into())).is_retryable());
        assert!(WorkbenchError::Busy { operation: "save" }.is_retryable());
        assert!(!WorkbenchError::from(ValidationError::MissingAgent).is_retryable());
        assert!(!WorkbenchError::IllegalTransition {
            from: Phase::Completed,
            to: Phase::Plan,
        }
        .is_retryable());
    }

    #[test]
    fn interrupted_classification() {
        let err = WorkbenchError::EnhancementFailure(BackendError::Cancelled);
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());

        let err = WorkbenchError::DelegationFailure {
            task_id: TaskId::from("t1"),
            source: BackendError::Timeout { duration_secs: 5 },
        };
        assert!(err.is_timeout());
        assert!(BackendError::Cancelled.is_interrupted());
        assert!(!BackendError::NotFound("x".into()).is_interrupted());
    }
}
