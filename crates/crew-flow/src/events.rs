//! Outbound dispatch events.
//!
//! Wire envelopes pushed to live connections. Serialized with an `event`
//! discriminator and a `data` payload, matching what the mobile clients
//! already consume (`{"event": "task:new", "data": {...}}`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crew_core::{ContractorId, GeoPoint, OrderId, TaskId};

use crate::notify::Notification;
use crate::task::{PaymentAmount, Task, TaskPriority, TaskStatus, TaskType};

/// The portion of a task carried inside dispatch events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// Task identifier.
    pub task_id: TaskId,
    /// Owning order.
    pub order_id: OrderId,
    /// Kind of field work.
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: TaskPriority,
    /// Scheduled time.
    pub scheduled_at: DateTime<Utc>,
    /// Work site coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Work site address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Agreed payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_amount: Option<PaymentAmount>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            order_id: task.order_id,
            task_type: task.task_type,
            status: task.status,
            priority: task.priority,
            scheduled_at: task.scheduled_at,
            location: task.location,
            address: task.address.clone(),
            payment_amount: task.payment_amount,
        }
    }
}

/// Events the Dispatch Coordinator routes to live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// A new claimable task matching the receiver's skills or area.
    #[serde(rename = "task:new")]
    TaskNew {
        /// The new task.
        task: TaskSummary,
    },

    /// Sent to the claimant when their claim succeeds.
    #[serde(rename = "task:assigned")]
    TaskAssigned {
        /// The claimed task.
        task: TaskSummary,
        /// Who it is now assigned to.
        assigned_to: ContractorId,
    },

    /// Sent to everyone else who could see the task when someone claims it.
    #[serde(rename = "task:claimed")]
    TaskClaimed {
        /// The claimed task's id.
        task_id: TaskId,
        /// Kind of field work.
        task_type: TaskType,
        /// Status after the claim (Assigned).
        status: TaskStatus,
        /// The winning contractor.
        claimed_by: ContractorId,
    },

    /// A status or payment change on a task the receiver is assigned to.
    #[serde(rename = "task:updated")]
    TaskUpdated {
        /// The updated task.
        task: TaskSummary,
        /// Who made the change.
        actor: String,
    },

    /// A task the receiver is assigned to was completed.
    #[serde(rename = "task:completed")]
    TaskCompleted {
        /// The completed task's id.
        task_id: TaskId,
        /// Kind of field work.
        task_type: TaskType,
        /// Status after the transition (Completed).
        status: TaskStatus,
        /// Who completed it.
        actor: String,
        /// The completion stamp.
        completed_at: DateTime<Utc>,
    },

    /// A task the receiver is assigned to was cancelled.
    #[serde(rename = "task:cancelled")]
    TaskCancelled {
        /// The cancelled task's id.
        task_id: TaskId,
        /// Kind of field work.
        task_type: TaskType,
        /// Status after the transition (Cancelled).
        status: TaskStatus,
        /// Who cancelled it.
        actor: String,
    },

    /// A system notification (also used when replaying task-kind backlog).
    #[serde(rename = "notification:system")]
    NotificationSystem {
        /// The notification record.
        notification: Notification,
    },

    /// A personal notification.
    #[serde(rename = "notification:personal")]
    NotificationPersonal {
        /// The notification record.
        notification: Notification,
    },
}

impl OutboundEvent {
    /// The wire event name of this envelope.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TaskNew { .. } => "task:new",
            Self::TaskAssigned { .. } => "task:assigned",
            Self::TaskClaimed { .. } => "task:claimed",
            Self::TaskUpdated { .. } => "task:updated",
            Self::TaskCompleted { .. } => "task:completed",
            Self::TaskCancelled { .. } => "task:cancelled",
            Self::NotificationSystem { .. } => "notification:system",
            Self::NotificationPersonal { .. } => "notification:personal",
        }
    }

    /// Wraps a notification record in its replay/push envelope.
    #[must_use]
    pub fn for_notification(notification: Notification) -> Self {
        match notification.kind {
            crate::notify::NotificationKind::Personal => {
                Self::NotificationPersonal { notification }
            }
            _ => Self::NotificationSystem { notification },
        }
    }
}
