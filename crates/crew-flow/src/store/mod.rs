//! Pluggable storage for tasks and their audit history.
//!
//! The [`TaskStore`] trait defines the persistence layer for tasks. The claim
//! operation is the subsystem's one linearizability point: it must be a
//! single conditional update at the storage layer ("assign me where status is
//! still pending"), never an application-level read followed by a write,
//! because multiple server instances may race against shared storage.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: claims and status transitions are conditional updates
//! - **Business outcomes**: losing a race returns an outcome, not an error
//! - **Testability**: in-memory implementation for tests and development

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crew_core::{ContractorId, GeoPoint, TaskId};

use crate::error::Result;
use crate::task::{PaymentChangeRecord, StatusChangeRecord, Task, TaskStatus};

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller won: the task is now Assigned to them.
    Claimed(Task),
    /// Someone else got there first (or the task left Pending another way).
    Conflict {
        /// The status observed instead of Pending.
        actual: TaskStatus,
    },
    /// The task does not exist.
    NotFound,
}

impl ClaimOutcome {
    /// Returns true if the claim succeeded.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Result of a conditional status update.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The transition was applied; carries the updated task.
    Applied(Task),
    /// The current status didn't match the expected value.
    StateMismatch {
        /// The status actually observed.
        actual: TaskStatus,
    },
    /// The task does not exist.
    NotFound,
}

impl CasOutcome {
    /// Returns true if the update was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of a delete attempt, which is only legal while Pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The task was deleted.
    Deleted,
    /// The task was not Pending; nothing was deleted.
    NotPending {
        /// The status actually observed.
        actual: TaskStatus,
    },
    /// The task does not exist.
    NotFound,
}

/// Storage abstraction for tasks and audit history.
///
/// ## CAS Semantics
///
/// `claim` is the core primitive for claim correctness: under N concurrent
/// claims for the same Pending task, implementations must guarantee exactly
/// one `Claimed` outcome and N−1 `Conflict` outcomes, with no partial
/// assignment visible to readers.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from many
/// connection sessions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // --- Task CRUD ---

    /// Inserts a new task.
    async fn insert(&self, task: &Task) -> Result<()>;

    /// Gets a task by ID. Returns `None` if it does not exist.
    async fn get(&self, id: &TaskId) -> Result<Option<Task>>;

    /// Saves a task (full replacement).
    ///
    /// For concurrent status changes use [`TaskStore::cas_status`]; this is
    /// for non-contended field updates (payment, photos, schedule).
    async fn update(&self, task: &Task) -> Result<()>;

    /// Deletes a task, permitted only while its status is Pending.
    async fn delete_pending(&self, id: &TaskId) -> Result<DeleteOutcome>;

    // --- Claim and status CAS ---

    /// Atomically claims a Pending task for a contractor.
    ///
    /// Equivalent to the single conditional update "set status=Assigned,
    /// `assigned_to`=X, `assigned_contractors`+=X where status=Pending".
    async fn claim(
        &self,
        id: &TaskId,
        contractor: &ContractorId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Atomically transitions status if the current status matches `expected`.
    ///
    /// The transition table is still enforced: an expected/target pair the
    /// table forbids fails with `InvalidTransition` even when `expected`
    /// matches.
    async fn cas_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        target: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome>;

    // --- Queries ---

    /// Finds Pending tasks whose location lies within `radius_km` of
    /// `center` (boundary inclusive). Tasks with no location are skipped.
    async fn find_pending_near(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<Task>>;

    /// Finds tasks associated with a contractor.
    async fn find_by_contractor(&self, contractor: &ContractorId) -> Result<Vec<Task>>;

    // --- Audit history (append-only) ---

    /// Appends a status change record.
    async fn append_status_change(&self, record: StatusChangeRecord) -> Result<()>;

    /// Appends a payment change record.
    async fn append_payment_change(&self, record: PaymentChangeRecord) -> Result<()>;

    /// Returns the status history for a task, oldest first.
    async fn status_history(&self, id: &TaskId) -> Result<Vec<StatusChangeRecord>>;

    /// Returns the payment history for a task, oldest first.
    async fn payment_history(&self, id: &TaskId) -> Result<Vec<PaymentChangeRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_outcome_is_claimed() {
        assert!(!ClaimOutcome::NotFound.is_claimed());
        assert!(!ClaimOutcome::Conflict {
            actual: TaskStatus::Assigned
        }
        .is_claimed());
    }

    #[test]
    fn cas_outcome_is_applied() {
        assert!(!CasOutcome::NotFound.is_applied());
        assert!(!CasOutcome::StateMismatch {
            actual: TaskStatus::Completed
        }
        .is_applied());
    }
}
