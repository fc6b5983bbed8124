//! In-memory task store for testing and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: the claim CAS is linearizable within one
//!   process because all mutations share one lock

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crew_core::{geo, ContractorId, GeoPoint, TaskId};

use super::{CasOutcome, ClaimOutcome, DeleteOutcome, TaskStore};
use crate::error::{Error, Result};
use crate::task::{PaymentChangeRecord, StatusChangeRecord, Task, TaskStatus};

/// Internal store state protected by a single lock.
#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    status_history: HashMap<TaskId, Vec<StatusChangeRecord>>,
    payment_history: HashMap<TaskId, Vec<PaymentChangeRecord>>,
}

/// In-memory task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: RwLock<StoreState>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("task store lock poisoned")
}

impl InMemoryTaskStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn task_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.tasks.len())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.tasks.insert(task.id, task.clone());
        drop(state);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.tasks.get(id).cloned())
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if !state.tasks.contains_key(&task.id) {
            drop(state);
            return Err(Error::TaskNotFound { task_id: task.id });
        }
        state.tasks.insert(task.id, task.clone());
        drop(state);
        Ok(())
    }

    async fn delete_pending(&self, id: &TaskId) -> Result<DeleteOutcome> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(task) = state.tasks.get(id) else {
            drop(state);
            return Ok(DeleteOutcome::NotFound);
        };
        if task.status != TaskStatus::Pending {
            let actual = task.status;
            drop(state);
            return Ok(DeleteOutcome::NotPending { actual });
        }
        state.tasks.remove(id);
        drop(state);
        Ok(DeleteOutcome::Deleted)
    }

    async fn claim(
        &self,
        id: &TaskId,
        contractor: &ContractorId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        // Single write lock: the check and the mutation are one atomic step.
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(task) = state.tasks.get_mut(id) else {
            drop(state);
            return Ok(ClaimOutcome::NotFound);
        };
        if task.status != TaskStatus::Pending {
            let actual = task.status;
            drop(state);
            return Ok(ClaimOutcome::Conflict { actual });
        }
        task.transition_to(TaskStatus::Assigned, now)?;
        task.assign(*contractor, now);
        let claimed = task.clone();
        drop(state);
        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn cas_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        target: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(task) = state.tasks.get_mut(id) else {
            drop(state);
            return Ok(CasOutcome::NotFound);
        };
        if task.status != expected {
            let actual = task.status;
            drop(state);
            return Ok(CasOutcome::StateMismatch { actual });
        }
        task.transition_to(target, now)?;
        let updated = task.clone();
        drop(state);
        Ok(CasOutcome::Applied(updated))
    }

    async fn find_pending_near(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<Task>> {
        let state = self.state.read().map_err(poison_err)?;
        let tasks = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.location
                    .is_some_and(|loc| geo::haversine_km(center, loc) <= radius_km)
            })
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn find_by_contractor(&self, contractor: &ContractorId) -> Result<Vec<Task>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.is_associated_with(contractor))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.scheduled_at);
        Ok(tasks)
    }

    async fn append_status_change(&self, record: StatusChangeRecord) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .status_history
            .entry(record.task_id)
            .or_default()
            .push(record);
        drop(state);
        Ok(())
    }

    async fn append_payment_change(&self, record: PaymentChangeRecord) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .payment_history
            .entry(record.task_id)
            .or_default()
            .push(record);
        drop(state);
        Ok(())
    }

    async fn status_history(&self, id: &TaskId) -> Result<Vec<StatusChangeRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.status_history.get(id).cloned().unwrap_or_default())
    }

    async fn payment_history(&self, id: &TaskId) -> Result<Vec<PaymentChangeRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.payment_history.get(id).cloned().unwrap_or_default())
    }
}
