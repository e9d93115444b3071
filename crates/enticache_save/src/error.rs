//! Error types for the save coordinator.

use crate::memo::SaveMemo;
use enticache_core::{CacheError, EntityKey};
use std::fmt;
use thiserror::Error;

/// Result type for save operations.
pub type SaveResult<T> = Result<T, SaveError>;

/// Errors that can occur while saving.
#[derive(Error, Debug)]
pub enum SaveError {
    /// Cache error, including validation failures.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The underlying save was rejected.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the save can be retried.
        retryable: bool,
    },

    /// A save round with queued requests failed.
    #[error("queued save failed: {0}")]
    QueuedSave(Box<QueuedSaveFailure>),

    /// A save is in flight and queuing is disabled.
    #[error("a save is already in progress and queuing is disabled")]
    ConcurrentSave,

    /// Queued requests outgrew the follow-up round limit.
    #[error("follow-up save limit of {rounds} rounds reached")]
    FollowUpLimit {
        /// Configured limit.
        rounds: u32,
    },

    /// The coordinator went away before answering.
    #[error("save cancelled")]
    Cancelled,
}

impl SaveError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying the same save may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SaveError::Transport { retryable, .. } => *retryable,
            SaveError::QueuedSave(failure) => failure.cause.is_retryable(),
            SaveError::ConcurrentSave => true,
            _ => false,
        }
    }

    /// Returns true for validation failures.
    pub fn is_validation(&self) -> bool {
        match self {
            SaveError::Cache(CacheError::Validation { .. }) => true,
            SaveError::QueuedSave(failure) => {
                matches!(failure.cause, FailureCause::Validation { .. })
            }
            _ => false,
        }
    }
}

/// Why a save round failed, in a form every waiter can own.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// The transport rejected the save.
    Transport {
        /// Error message.
        message: String,
        /// Whether the save can be retried.
        retryable: bool,
    },
    /// The validator rejected an entity; nothing was sent.
    Validation {
        /// Invalid entity.
        key: EntityKey,
        /// Validation messages.
        errors: Vec<String>,
    },
    /// Any other failure.
    Other {
        /// Error message.
        message: String,
    },
}

impl FailureCause {
    /// Returns true if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureCause::Transport { retryable: true, .. })
    }
}

impl From<&SaveError> for FailureCause {
    fn from(err: &SaveError) -> Self {
        match err {
            SaveError::Transport { message, retryable } => FailureCause::Transport {
                message: message.clone(),
                retryable: *retryable,
            },
            SaveError::Cache(CacheError::Validation { key, errors }) => FailureCause::Validation {
                key: key.clone(),
                errors: errors.clone(),
            },
            SaveError::QueuedSave(failure) => failure.cause.clone(),
            other => FailureCause::Other {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Transport { message, .. } => write!(f, "transport error: {message}"),
            FailureCause::Validation { key, errors } => {
                write!(f, "validation failed for {key}: {}", errors.join("; "))
            }
            FailureCause::Other { message } => f.write_str(message),
        }
    }
}

/// A failed save round together with the edits that were riding on it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSaveFailure {
    /// What went wrong.
    pub cause: FailureCause,
    /// Memos of the round that failed.
    pub failed_round: SaveMemo,
    /// Memos queued for the round after it.
    pub queued: SaveMemo,
}

impl fmt::Display for QueuedSaveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} failed, {} queued edits)",
            self.cause,
            self.failed_round.entity_memos.len(),
            self.queued.entity_memos.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SaveError::transport_retryable("timeout").is_retryable());
        assert!(!SaveError::transport_fatal("bad request").is_retryable());
        assert!(!SaveError::Cancelled.is_retryable());
    }

    #[test]
    fn validation_cause_survives_queueing() {
        let err = SaveError::from(CacheError::validation(
            EntityKey::single("Customer", 1),
            vec!["name is required".into()],
        ));
        assert!(err.is_validation());
        let queued = SaveError::QueuedSave(Box::new(QueuedSaveFailure {
            cause: FailureCause::from(&err),
            failed_round: SaveMemo::default(),
            queued: SaveMemo::default(),
        }));
        assert!(queued.is_validation());
        assert!(queued.to_string().contains("name is required"));
    }
}
