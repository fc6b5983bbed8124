//! Task lifecycle operations.
//!
//! Every outward-facing task mutation (claim, status change, completion,
//! payment change, delete) goes through [`TaskLifecycle`] so that each
//! accepted mutation appends its audit record and passes through the
//! Dispatch Coordinator. REST handlers and connection sessions must call
//! this service, never the store directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crew_core::{ContractorId, GeoPoint};

use crate::directory::ContractorDirectory;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::store::{CasOutcome, ClaimOutcome, DeleteOutcome, TaskStore};
use crate::task::{
    validate_schedule, NewTask, PaymentAmount, PaymentChangeRecord, StatusChangeRecord, Task,
    TaskStatus, MAX_COMPLETION_PHOTOS,
};

/// Coordinated task lifecycle operations.
pub struct TaskLifecycle {
    store: Arc<dyn TaskStore>,
    directory: Arc<dyn ContractorDirectory>,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for TaskLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycle").finish_non_exhaustive()
    }
}

impl TaskLifecycle {
    /// Creates the lifecycle service.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        directory: Arc<dyn ContractorDirectory>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            directory,
            dispatcher,
        }
    }

    /// Access to the underlying store for read-only queries.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Creates a Pending task and broadcasts `task:new`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the schedule is in the past.
    pub async fn create(&self, new: NewTask) -> Result<Task> {
        let task = Task::create(new, Utc::now())?;
        self.store.insert(&task).await?;
        tracing::info!(task = %task.id, task_type = %task.task_type, "task created");
        self.dispatcher.task_created(&task).await?;
        Ok(task)
    }

    /// Fetches a task or fails with `TaskNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` when the id is unknown.
    pub async fn get(&self, id: &crew_core::TaskId) -> Result<Task> {
        self.store
            .get(id)
            .await?
            .ok_or(Error::TaskNotFound { task_id: *id })
    }

    /// Attempts to claim a Pending task for a contractor.
    ///
    /// The contractor's declared skills must fuzzy-match the task type; the
    /// claim itself is a single conditional update at the store, so under
    /// concurrent claims exactly one caller gets `Claimed` and the rest get
    /// `Conflict`. A conflict is a business outcome: callers branch on it
    /// and refresh, they don't retry the same task.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for unknown ids and a validation error when
    /// the contractor's skills don't match the task type.
    pub async fn claim(
        &self,
        id: &crew_core::TaskId,
        contractor: &ContractorId,
    ) -> Result<ClaimOutcome> {
        let task = self.get(id).await?;
        let skills = self.directory.skills(contractor).await?;
        if !task.claimable_by(&skills) {
            return Err(Error::validation(format!(
                "contractor skills do not match task type '{}'",
                task.task_type
            )));
        }

        let now = Utc::now();
        let outcome = self.store.claim(id, contractor, now).await?;
        match &outcome {
            ClaimOutcome::Claimed(claimed) => {
                self.store
                    .append_status_change(StatusChangeRecord {
                        task_id: claimed.id,
                        previous: TaskStatus::Pending,
                        new: TaskStatus::Assigned,
                        actor: contractor.to_string(),
                        reason: Some("claimed".into()),
                        at: now,
                    })
                    .await?;
                tracing::info!(task = %claimed.id, contractor = %contractor, "task claimed");
                self.dispatcher.task_claimed(claimed, contractor).await?;
            }
            ClaimOutcome::Conflict { actual } => {
                tracing::debug!(task = %id, actual = %actual, "claim lost");
            }
            ClaimOutcome::NotFound => return Err(Error::TaskNotFound { task_id: *id }),
        }
        Ok(outcome)
    }

    /// Applies a status transition and dispatches the matching event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the table forbids the edge (including
    /// when a concurrent writer moved the task first) and `TaskNotFound` for
    /// unknown ids.
    pub async fn update_status(
        &self,
        id: &crew_core::TaskId,
        target: TaskStatus,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Task> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let now = Utc::now();
        let outcome = self
            .store
            .cas_status(id, current.status, target, now)
            .await?;
        let task = match outcome {
            CasOutcome::Applied(task) => task,
            // Someone else transitioned first; report from what is true now.
            CasOutcome::StateMismatch { actual } => {
                return Err(Error::InvalidTransition {
                    from: actual,
                    to: target,
                })
            }
            CasOutcome::NotFound => return Err(Error::TaskNotFound { task_id: *id }),
        };

        self.store
            .append_status_change(StatusChangeRecord {
                task_id: task.id,
                previous: current.status,
                new: target,
                actor: actor.to_string(),
                reason,
                at: now,
            })
            .await?;
        tracing::info!(task = %task.id, from = %current.status, to = %target, "status changed");

        match target {
            TaskStatus::Completed => self.dispatcher.task_completed(&task, actor).await,
            TaskStatus::Cancelled => self.dispatcher.task_cancelled(&task, actor).await,
            _ => self.dispatcher.task_updated(&task, actor).await,
        }
        Ok(task)
    }

    /// Completes an InProgress task with photos and notes.
    ///
    /// # Errors
    ///
    /// Returns a validation error for more than [`MAX_COMPLETION_PHOTOS`]
    /// photos, `InvalidTransition` when the task isn't InProgress, and
    /// `TaskNotFound` for unknown ids.
    pub async fn complete(
        &self,
        id: &crew_core::TaskId,
        contractor: &ContractorId,
        photos: Vec<String>,
        notes: Option<String>,
    ) -> Result<Task> {
        if photos.len() > MAX_COMPLETION_PHOTOS {
            return Err(Error::validation(format!(
                "at most {MAX_COMPLETION_PHOTOS} completion photos are allowed"
            )));
        }

        let now = Utc::now();
        let outcome = self
            .store
            .cas_status(id, TaskStatus::InProgress, TaskStatus::Completed, now)
            .await?;
        let mut task = match outcome {
            CasOutcome::Applied(task) => task,
            CasOutcome::StateMismatch { actual } => {
                return Err(Error::InvalidTransition {
                    from: actual,
                    to: TaskStatus::Completed,
                })
            }
            CasOutcome::NotFound => return Err(Error::TaskNotFound { task_id: *id }),
        };

        // The status flip is the guarded step; attaching the evidence after
        // it cannot race another completion because Completed is terminal.
        task.completion_photos = photos;
        task.completion_notes = notes;
        self.store.update(&task).await?;

        self.store
            .append_status_change(StatusChangeRecord {
                task_id: task.id,
                previous: TaskStatus::InProgress,
                new: TaskStatus::Completed,
                actor: contractor.to_string(),
                reason: None,
                at: now,
            })
            .await?;
        tracing::info!(task = %task.id, contractor = %contractor, "task completed");
        self.dispatcher
            .task_completed(&task, &contractor.to_string())
            .await;
        Ok(task)
    }

    /// Changes (or clears) the payment amount, appending an audit record.
    ///
    /// # Errors
    ///
    /// Rejects no-op changes and mutations of Completed tasks with a
    /// validation error; returns `TaskNotFound` for unknown ids.
    pub async fn set_payment(
        &self,
        id: &crew_core::TaskId,
        amount: Option<PaymentAmount>,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Task> {
        let mut task = self.get(id).await?;
        if task.status.is_terminal() {
            return Err(Error::validation(
                "completed tasks are immutable except for audit history",
            ));
        }
        if task.payment_amount == amount {
            return Err(Error::validation("payment amount unchanged"));
        }

        let now = Utc::now();
        let previous = task.payment_amount;
        task.payment_amount = amount;
        task.updated_at = now;
        self.store.update(&task).await?;

        self.store
            .append_payment_change(PaymentChangeRecord {
                task_id: task.id,
                previous,
                new: amount,
                actor: actor.to_string(),
                reason,
                at: now,
            })
            .await?;
        tracing::info!(task = %task.id, actor, "payment amount changed");
        self.dispatcher.task_updated(&task, actor).await;
        Ok(task)
    }

    /// Reschedules a task, applying the same grace-window validation as
    /// creation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for past schedules or terminal tasks and
    /// `TaskNotFound` for unknown ids.
    pub async fn reschedule(
        &self,
        id: &crew_core::TaskId,
        scheduled_at: DateTime<Utc>,
        actor: &str,
    ) -> Result<Task> {
        let now = Utc::now();
        validate_schedule(scheduled_at, now)?;

        let mut task = self.get(id).await?;
        if task.status.is_terminal() {
            return Err(Error::validation(
                "completed tasks are immutable except for audit history",
            ));
        }
        task.scheduled_at = scheduled_at;
        task.updated_at = now;
        self.store.update(&task).await?;
        self.dispatcher.task_updated(&task, actor).await;
        Ok(task)
    }

    /// Deletes a task, permitted only while Pending.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the task has left Pending and
    /// `TaskNotFound` for unknown ids.
    pub async fn delete(&self, id: &crew_core::TaskId) -> Result<()> {
        match self.store.delete_pending(id).await? {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::NotPending { actual } => Err(Error::validation(format!(
                "only pending tasks can be deleted (status is {actual})"
            ))),
            DeleteOutcome::NotFound => Err(Error::TaskNotFound { task_id: *id }),
        }
    }

    /// Finds claimable tasks near a position for a contractor.
    ///
    /// Restricted to task types matching the contractor's skills by the
    /// fuzzy rule, excluding tasks the contractor is already associated
    /// with, sorted by priority (High first) then schedule (soonest first).
    ///
    /// # Errors
    ///
    /// Returns storage errors from the underlying queries.
    pub async fn nearest(
        &self,
        contractor: &ContractorId,
        position: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Task>> {
        let skills = self.directory.skills(contractor).await?;
        let mut tasks: Vec<Task> = self
            .store
            .find_pending_near(position, radius_km)
            .await?
            .into_iter()
            .filter(|t| t.claimable_by(&skills))
            .filter(|t| !t.is_associated_with(contractor))
            .collect();
        tasks.sort_by_key(|t| (t.priority.rank(), t.scheduled_at));
        Ok(tasks)
    }
}
