//! Dispatch coordination: routing lifecycle events to the right contractors.
//!
//! This module provides:
//!
//! - [`LivePush`]: the seam between the domain and the connection layer
//! - [`Dispatcher`]: audience computation and broadcast with durable fallback
//! - [`RecordingPush`]: in-memory push implementation for tests
//!
//! ## At-least-once
//!
//! Every dispatch either reaches a live connection or becomes a durable
//! notification record. A Notification Ledger outage during the fallback is
//! logged and swallowed so the task mutation that triggered the dispatch is
//! never blocked; delivery then degrades to best-effort live push.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crew_core::ContractorId;

use crate::error::Result;
use crate::events::{OutboundEvent, TaskSummary};
use crate::notify::{NewNotification, NotificationKind, NotificationLedger, NotificationPriority};
use crate::rooms::{RoomDirectory, RoomName};
use crate::task::Task;

pub use memory::RecordingPush;

/// Result of a live push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The event reached a live connection.
    Delivered,
    /// No live connection (or it was closing); caller should fall back.
    Offline,
}

impl PushOutcome {
    /// Returns true if the event was delivered live.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Delivery to live connections.
///
/// A send that races a closing connection must report `Offline` rather than
/// error: the Coordinator treats it as a fallback case, not a failure.
#[async_trait]
pub trait LivePush: Send + Sync {
    /// Attempts to deliver one event to one contractor's live connection.
    async fn push(&self, contractor: &ContractorId, event: &OutboundEvent) -> Result<PushOutcome>;
}

/// Dispatcher tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Radius used to match a task's location against contractor positions.
    pub match_radius_km: f64,
    /// Page size for backlog replay on reconnect.
    pub replay_page_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            match_radius_km: 50.0,
            replay_page_size: 50,
        }
    }
}

/// Routes task lifecycle events and notifications to connected contractors,
/// falling back to the Notification Ledger for anyone offline.
pub struct Dispatcher {
    rooms: Arc<RoomDirectory>,
    ledger: Arc<dyn NotificationLedger>,
    push: Arc<dyn LivePush>,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        rooms: Arc<RoomDirectory>,
        ledger: Arc<dyn NotificationLedger>,
        push: Arc<dyn LivePush>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            rooms,
            ledger,
            push,
            config,
        }
    }

    /// A task was created: broadcast `task:new` to the union of the matching
    /// skill room and contractors near the task's location.
    ///
    /// # Errors
    ///
    /// Returns an error only for room directory failures; per-target delivery
    /// problems degrade to durable notifications.
    pub async fn task_created(&self, task: &Task) -> Result<()> {
        let audience = self.audience_for(task)?;
        let event = OutboundEvent::TaskNew {
            task: TaskSummary::from(task),
        };
        tracing::info!(task = %task.id, targets = audience.len(), "dispatching task:new");
        for contractor in audience {
            self.deliver_or_persist(&contractor, &event).await;
        }
        Ok(())
    }

    /// A claim succeeded: `task:claimed` to everyone who could see the task
    /// except the claimant, and `task:assigned` to the claimant.
    ///
    /// # Errors
    ///
    /// Returns an error only for room directory failures.
    pub async fn task_claimed(&self, task: &Task, claimant: &ContractorId) -> Result<()> {
        let mut audience = self.audience_for(task)?;
        audience.remove(claimant);

        let claimed = OutboundEvent::TaskClaimed {
            task_id: task.id,
            task_type: task.task_type,
            status: task.status,
            claimed_by: *claimant,
        };
        for contractor in audience {
            self.deliver_or_persist(&contractor, &claimed).await;
        }

        let assigned = OutboundEvent::TaskAssigned {
            task: TaskSummary::from(task),
            assigned_to: *claimant,
        };
        self.deliver_or_persist(claimant, &assigned).await;
        Ok(())
    }

    /// A status or payment change: `task:updated` to the assigned contractors.
    pub async fn task_updated(&self, task: &Task, actor: &str) {
        let event = OutboundEvent::TaskUpdated {
            task: TaskSummary::from(task),
            actor: actor.to_string(),
        };
        self.to_assigned(task, &event).await;
    }

    /// A task was completed: `task:completed` to the assigned contractors.
    pub async fn task_completed(&self, task: &Task, actor: &str) {
        let Some(completed_at) = task.completed_at else {
            tracing::warn!(task = %task.id, "task:completed dispatch without completion stamp");
            return;
        };
        let event = OutboundEvent::TaskCompleted {
            task_id: task.id,
            task_type: task.task_type,
            status: task.status,
            actor: actor.to_string(),
            completed_at,
        };
        self.to_assigned(task, &event).await;
    }

    /// A task was cancelled: `task:cancelled` to the assigned contractors.
    pub async fn task_cancelled(&self, task: &Task, actor: &str) {
        let event = OutboundEvent::TaskCancelled {
            task_id: task.id,
            task_type: task.task_type,
            status: task.status,
            actor: actor.to_string(),
        };
        self.to_assigned(task, &event).await;
    }

    /// Creates a notification and attempts immediate live delivery, marking
    /// it delivered on success.
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger cannot persist the record (unlike
    /// the broadcast fallback the record *is* the operation here).
    pub async fn notify(&self, new: NewNotification) -> Result<()> {
        let notification = self.ledger.create(new).await?;
        let contractor = notification.contractor_id;
        let id = notification.id;
        let event = OutboundEvent::for_notification(notification);
        if self.try_push(&contractor, &event).await.is_delivered() {
            if let Err(err) = self.ledger.mark_delivered(&id, None).await {
                tracing::warn!(notification = %id, error = %err, "failed to mark delivered");
            }
        }
        Ok(())
    }

    /// Replays a contractor's undelivered backlog, page by page, oldest
    /// first. Each replayed record is marked delivered (idempotently).
    ///
    /// Stops early when the connection goes offline mid-replay. Returns the
    /// number of notifications delivered.
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger cannot be read.
    pub async fn replay_backlog(&self, contractor: &ContractorId) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let page = self
                .ledger
                .undelivered_for(contractor, self.config.replay_page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            for notification in page {
                let id = notification.id;
                let event = OutboundEvent::for_notification(notification);
                if !self.try_push(contractor, &event).await.is_delivered() {
                    tracing::debug!(contractor = %contractor, "connection lost mid-replay");
                    return Ok(delivered);
                }
                self.ledger.mark_delivered(&id, None).await?;
                delivered += 1;
            }
            if page_len < self.config.replay_page_size {
                break;
            }
        }
        tracing::info!(contractor = %contractor, delivered, "backlog replay finished");
        Ok(delivered)
    }

    /// Computes the broadcast audience for a task: contractors in the
    /// matching skill room plus anyone located within the match radius.
    fn audience_for(&self, task: &Task) -> Result<HashSet<ContractorId>> {
        let mut audience: HashSet<ContractorId> = self
            .rooms
            .members(&RoomName::for_skill(task.task_type.label()))?
            .into_iter()
            .collect();
        if let Some(location) = task.location {
            audience.extend(
                self.rooms
                    .contractors_near(location, self.config.match_radius_km)?,
            );
        }
        Ok(audience)
    }

    async fn to_assigned(&self, task: &Task, event: &OutboundEvent) {
        for contractor in task.assigned_contractors.clone() {
            self.deliver_or_persist(&contractor, event).await;
        }
    }

    async fn try_push(&self, contractor: &ContractorId, event: &OutboundEvent) -> PushOutcome {
        match self.push.push(contractor, event).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(contractor = %contractor, error = %err, "live push errored");
                PushOutcome::Offline
            }
        }
    }

    /// Delivers live, or persists a durable task notification instead.
    ///
    /// The fallback path swallows ledger errors: a ledger outage must not
    /// block the task mutation that triggered this dispatch.
    async fn deliver_or_persist(&self, contractor: &ContractorId, event: &OutboundEvent) {
        if self.try_push(contractor, event).await.is_delivered() {
            return;
        }

        tracing::info!(
            contractor = %contractor,
            event = event.name(),
            "target offline; falling back to durable notification"
        );
        let fallback = fallback_notification(*contractor, event);
        if let Err(err) = self.ledger.create(fallback).await {
            tracing::error!(
                contractor = %contractor,
                event = event.name(),
                error = %err,
                "fallback persistence failed; delivery degraded to live-only"
            );
        }
    }
}

/// Builds the durable stand-in for an undeliverable event.
fn fallback_notification(contractor: ContractorId, event: &OutboundEvent) -> NewNotification {
    let (title, priority) = match event {
        OutboundEvent::TaskNew { .. } => ("New task available", NotificationPriority::High),
        OutboundEvent::TaskAssigned { .. } => ("Task assigned to you", NotificationPriority::High),
        OutboundEvent::TaskClaimed { .. } => ("Task claimed", NotificationPriority::Low),
        OutboundEvent::TaskUpdated { .. } => ("Task updated", NotificationPriority::Normal),
        OutboundEvent::TaskCompleted { .. } => ("Task completed", NotificationPriority::Normal),
        OutboundEvent::TaskCancelled { .. } => ("Task cancelled", NotificationPriority::High),
        OutboundEvent::NotificationSystem { notification }
        | OutboundEvent::NotificationPersonal { notification } => {
            // Already a notification: re-home the content instead of nesting.
            return NewNotification::new(
                contractor,
                notification.kind,
                notification.title.clone(),
                notification.message.clone(),
            )
            .with_priority(notification.priority)
            .with_data(notification.data.clone());
        }
    };
    NewNotification::new(contractor, NotificationKind::Task, title, event.name())
        .with_priority(priority)
        .with_data(json!(event))
}
