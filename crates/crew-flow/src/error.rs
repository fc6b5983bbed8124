//! Error types for the dispatch domain.

use crew_core::{ContractorId, NotificationId, TaskId};

use crate::task::TaskStatus;

/// The result type used throughout crew-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dispatch domain operations.
///
/// Claim conflicts are deliberately *not* represented here: losing a claim
/// race is a business outcome callers branch on, surfaced as
/// [`crate::store::ClaimOutcome::Conflict`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// The current status.
        from: TaskStatus,
        /// The attempted target status.
        to: TaskStatus,
    },

    /// A task was not found.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The task ID that was not found.
        task_id: TaskId,
    },

    /// A notification was not found.
    #[error("notification not found: {notification_id}")]
    NotificationNotFound {
        /// The notification ID that was not found.
        notification_id: NotificationId,
    },

    /// A notification mutation was attempted by a contractor that does not
    /// own the record.
    #[error("notification {notification_id} is not owned by contractor {contractor_id}")]
    NotOwner {
        /// The notification in question.
        notification_id: NotificationId,
        /// The contractor that attempted the mutation.
        contractor_id: ContractorId,
    },

    /// Input failed validation.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An error from crew-core.
    #[error("core error: {0}")]
    Core(#[from] crew_core::Error),
}

impl Error {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
