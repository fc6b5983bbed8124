//! Task model, state machine, and audit records.
//!
//! This module provides:
//! - `Task`: a unit of field work tied to an order
//! - `TaskStatus`: the task state machine
//! - `PaymentAmount`: validated monetary values stored as cents
//! - `StatusChangeRecord` / `PaymentChangeRecord`: append-only audit entries

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crew_core::{skill, ContractorId, GeoPoint, OrderId, TaskId};

use crate::error::{Error, Result};

/// Grace period allowed when scheduling a task slightly in the past.
///
/// Clock skew between admin clients and the server makes an exact "not in
/// the past" check reject legitimate requests; five minutes absorbs it.
pub const SCHEDULE_GRACE_MINUTES: i64 = 5;

/// Maximum number of completion photos a task may carry.
pub const MAX_COMPLETION_PHOTOS: usize = 5;

// ============================================================================
// Enums
// ============================================================================

/// The kind of field work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Deliver equipment to the customer site.
    Delivery,
    /// Set up equipment on site.
    Setup,
    /// Pick equipment back up after the event.
    Pickup,
    /// Service or repair equipment.
    Maintenance,
}

impl TaskType {
    /// Returns the lowercase label used for skill matching and room names.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Setup => "setup",
            Self::Pickup => "pickup",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Task execution state machine.
///
/// ```text
///            ┌──────────────────────────────┐
///            ▼                              │
/// ┌─────────┐    claim     ┌──────────┐  release
/// │ PENDING │─────────────►│ ASSIGNED │─────┘
/// └─────────┘              └──────────┘
///      ▲  │                     │ start
///      │  │cancel               ▼
/// react│  │           ┌─────────────┐  pause  ┌──────────┐
/// ivate│  │           │ IN_PROGRESS │────────►│ ASSIGNED │
///      │  ▼           └─────────────┘         └──────────┘
/// ┌───────────┐             │ finish
/// │ CANCELLED │             ▼
/// └───────────┘       ┌───────────┐
///      ▲              │ COMPLETED │  (terminal)
///      └── any active └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, visible to matching contractors, claimable.
    Pending,
    /// Claimed by (or assigned to) one or more contractors.
    Assigned,
    /// A contractor is actively working the task.
    InProgress,
    /// Finished. Terminal; only audit history may grow afterwards.
    Completed,
    /// Cancelled. May be reactivated back to Pending.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Assigned | Self::Cancelled),
            Self::Assigned => matches!(target, Self::InProgress | Self::Pending | Self::Cancelled),
            Self::InProgress => matches!(target, Self::Completed | Self::Assigned | Self::Cancelled),
            Self::Completed => false,
            Self::Cancelled => matches!(target, Self::Pending),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Task priority for ordering nearby-task results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Urgent work, listed first.
    High,
    /// Standard work.
    Medium,
    /// Fill-in work, listed last.
    Low,
}

impl TaskPriority {
    /// Sort rank: lower rank sorts first (highest priority).
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

// ============================================================================
// Payment amounts
// ============================================================================

/// Maximum payment amount in cents (999,999.99).
const MAX_PAYMENT_CENTS: u64 = 99_999_999;

/// A validated monetary amount, stored as whole cents.
///
/// Construction enforces the contract: between 0 and 999,999.99 inclusive
/// with at most two decimal places. Serialized on the wire as dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentAmount(u64);

impl PaymentAmount {
    /// Creates an amount from whole cents.
    ///
    /// # Errors
    ///
    /// Returns a core `InvalidAmount` error if the value exceeds 999,999.99.
    pub fn from_cents(cents: u64) -> crew_core::Result<Self> {
        if cents > MAX_PAYMENT_CENTS {
            return Err(crew_core::Error::InvalidAmount {
                message: format!("{} cents exceeds the 999,999.99 maximum", cents),
            });
        }
        Ok(Self(cents))
    }

    /// Creates an amount from a dollar value.
    ///
    /// # Errors
    ///
    /// Returns a core `InvalidAmount` error if the value is negative, not
    /// finite, above the maximum, or has more than two decimal places.
    pub fn from_dollars(dollars: f64) -> crew_core::Result<Self> {
        if !dollars.is_finite() || dollars < 0.0 {
            return Err(crew_core::Error::InvalidAmount {
                message: format!("{dollars} is not a valid non-negative amount"),
            });
        }
        let scaled = dollars * 100.0;
        let cents = scaled.round();
        if (scaled - cents).abs() > 1e-6 {
            return Err(crew_core::Error::InvalidAmount {
                message: format!("{dollars} has more than two decimal places"),
            });
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self::from_cents(cents as u64)
    }

    /// Returns the amount in whole cents.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in dollars.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for PaymentAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for PaymentAmount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.dollars())
    }
}

impl<'de> Deserialize<'de> for PaymentAmount {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let dollars = f64::deserialize(deserializer)?;
        Self::from_dollars(dollars).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Task
// ============================================================================

/// A unit of field work tied to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// The order this task fulfils. Immutable after creation.
    pub order_id: OrderId,
    /// Kind of field work.
    pub task_type: TaskType,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Priority for nearby-task ordering.
    pub priority: TaskPriority,
    /// When the work is scheduled to happen.
    pub scheduled_at: DateTime<Utc>,
    /// Legacy single-assignee field, kept in sync with `assigned_contractors`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<ContractorId>,
    /// All contractors assigned to the task (multi-assignment supported).
    pub assigned_contractors: Vec<ContractorId>,
    /// Work site coordinates, when geocoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Free-text work site address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Agreed payment for the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_amount: Option<PaymentAmount>,
    /// Photos uploaded at completion, at most [`MAX_COMPLETION_PHOTOS`].
    pub completion_photos: Vec<String>,
    /// Notes recorded at completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_notes: Option<String>,
    /// Set exactly once, when the task first becomes Completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// The order the task fulfils.
    pub order_id: OrderId,
    /// Kind of field work.
    pub task_type: TaskType,
    /// Priority for nearby-task ordering.
    pub priority: TaskPriority,
    /// When the work is scheduled to happen.
    pub scheduled_at: DateTime<Utc>,
    /// Work site coordinates.
    pub location: Option<GeoPoint>,
    /// Free-text work site address.
    pub address: Option<String>,
    /// Agreed payment.
    pub payment_amount: Option<PaymentAmount>,
}

impl Task {
    /// Creates a new Pending task, validating the schedule.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `scheduled_at` is more than
    /// [`SCHEDULE_GRACE_MINUTES`] in the past.
    pub fn create(new: NewTask, now: DateTime<Utc>) -> Result<Self> {
        validate_schedule(new.scheduled_at, now)?;
        Ok(Self {
            id: TaskId::generate(),
            order_id: new.order_id,
            task_type: new.task_type,
            status: TaskStatus::Pending,
            priority: new.priority,
            scheduled_at: new.scheduled_at,
            assigned_to: None,
            assigned_contractors: Vec::new(),
            location: new.location,
            address: new.address,
            payment_amount: new.payment_amount,
            completion_photos: Vec::new(),
            completion_notes: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a status transition, enforcing the transition table.
    ///
    /// Returning to Pending (release or reactivation) clears the assignment
    /// fields; the first transition into Completed stamps `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the table does not list the
    /// `(current, target)` pair.
    pub fn transition_to(&mut self, target: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = now;
        match target {
            TaskStatus::Pending => {
                self.assigned_to = None;
                self.assigned_contractors.clear();
            }
            TaskStatus::Completed => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Assigns a contractor, keeping the legacy single-assignee field in sync.
    pub fn assign(&mut self, contractor: ContractorId, now: DateTime<Utc>) {
        if !self.assigned_contractors.contains(&contractor) {
            self.assigned_contractors.push(contractor);
        }
        self.assigned_to = Some(contractor);
        self.updated_at = now;
    }

    /// Returns true when the contractor's skills fuzzy-match this task's type.
    #[must_use]
    pub fn claimable_by(&self, skills: &[String]) -> bool {
        skill::any_match(skills, self.task_type.label())
    }

    /// Returns true when the contractor is already associated with the task.
    #[must_use]
    pub fn is_associated_with(&self, contractor: &ContractorId) -> bool {
        self.assigned_to.as_ref() == Some(contractor)
            || self.assigned_contractors.contains(contractor)
    }
}

/// Validates a scheduled time against the five-minute grace window.
///
/// # Errors
///
/// Returns a validation error when the time is too far in the past.
pub fn validate_schedule(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    let earliest = now - Duration::minutes(SCHEDULE_GRACE_MINUTES);
    if scheduled_at < earliest {
        return Err(Error::validation(format!(
            "scheduled time {scheduled_at} is in the past"
        )));
    }
    Ok(())
}

// ============================================================================
// Audit records
// ============================================================================

/// Append-only audit entry for a status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRecord {
    /// The task that changed.
    pub task_id: TaskId,
    /// Status before the change.
    pub previous: TaskStatus,
    /// Status after the change.
    pub new: TaskStatus,
    /// Who made the change (contractor id or admin user).
    pub actor: String,
    /// Optional free-text reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// Append-only audit entry for a payment amount change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChangeRecord {
    /// The task that changed.
    pub task_id: TaskId,
    /// Amount before the change (`None` when previously unset).
    pub previous: Option<PaymentAmount>,
    /// Amount after the change (`None` when cleared).
    pub new: Option<PaymentAmount>,
    /// Who made the change.
    pub actor: String,
    /// Optional free-text reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    fn new_task() -> NewTask {
        NewTask {
            order_id: OrderId::generate(),
            task_type: TaskType::Delivery,
            priority: TaskPriority::Medium,
            scheduled_at: Utc::now() + Duration::hours(2),
            location: None,
            address: Some("123 Bounce St".into()),
            payment_amount: None,
        }
    }

    #[test]
    fn transition_table_is_exact() {
        // The nine allowed edges; every other ordered pair must fail.
        let allowed = [
            (TaskStatus::Pending, TaskStatus::Assigned),
            (TaskStatus::Pending, TaskStatus::Cancelled),
            (TaskStatus::Assigned, TaskStatus::InProgress),
            (TaskStatus::Assigned, TaskStatus::Pending),
            (TaskStatus::Assigned, TaskStatus::Cancelled),
            (TaskStatus::InProgress, TaskStatus::Completed),
            (TaskStatus::InProgress, TaskStatus::Assigned),
            (TaskStatus::InProgress, TaskStatus::Cancelled),
            (TaskStatus::Cancelled, TaskStatus::Pending),
        ];
        for from in ALL_STATUSES {
            for to in ALL_STATUSES {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} expected {expected}"
                );
            }
        }
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let mut task = Task::create(new_task(), Utc::now()).unwrap();
        let err = task
            .transition_to(TaskStatus::Completed, Utc::now())
            .unwrap_err();
        match err {
            Error::InvalidTransition { from, to } => {
                assert_eq!(from, TaskStatus::Pending);
                assert_eq!(to, TaskStatus::Completed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn completed_at_is_set_exactly_once() {
        let now = Utc::now();
        let mut task = Task::create(new_task(), now).unwrap();
        task.transition_to(TaskStatus::Assigned, now).unwrap();
        task.transition_to(TaskStatus::InProgress, now).unwrap();

        let completion = now + Duration::minutes(30);
        task.transition_to(TaskStatus::Completed, completion).unwrap();
        assert_eq!(task.completed_at, Some(completion));

        // Completed is terminal; no further transition can touch the stamp.
        assert!(task
            .transition_to(TaskStatus::Pending, completion)
            .is_err());
        assert_eq!(task.completed_at, Some(completion));
    }

    #[test]
    fn returning_to_pending_clears_assignment() {
        let now = Utc::now();
        let mut task = Task::create(new_task(), now).unwrap();
        let contractor = ContractorId::generate();
        task.transition_to(TaskStatus::Assigned, now).unwrap();
        task.assign(contractor, now);
        assert!(task.is_associated_with(&contractor));

        task.transition_to(TaskStatus::Pending, now).unwrap();
        assert!(task.assigned_to.is_none());
        assert!(task.assigned_contractors.is_empty());
    }

    #[test]
    fn schedule_grace_window() {
        let now = Utc::now();
        assert!(validate_schedule(now - Duration::minutes(4), now).is_ok());
        assert!(validate_schedule(now - Duration::minutes(6), now).is_err());
    }

    #[test]
    fn claimable_by_uses_fuzzy_rule() {
        let task = Task::create(new_task(), Utc::now()).unwrap();
        assert!(task.claimable_by(&["Delivery".into()]));
        assert!(task.claimable_by(&["Deliveries".into()]));
        assert!(task.claimable_by(&["del".into()]));
        assert!(!task.claimable_by(&["Maintenance".into()]));
    }

    #[test]
    fn payment_amount_bounds() {
        assert!(PaymentAmount::from_dollars(0.0).is_ok());
        assert!(PaymentAmount::from_dollars(999_999.99).is_ok());
        assert!(PaymentAmount::from_dollars(1_000_000.0).is_err());
        assert!(PaymentAmount::from_dollars(-0.01).is_err());
        assert!(PaymentAmount::from_dollars(10.999).is_err());
        assert!(PaymentAmount::from_dollars(f64::NAN).is_err());
    }

    #[test]
    fn payment_amount_serializes_as_dollars() {
        let amount = PaymentAmount::from_dollars(125.5).unwrap();
        assert_eq!(amount.cents(), 12550);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "125.5");
        let parsed: PaymentAmount = serde_json::from_str("125.50").unwrap();
        assert_eq!(parsed, amount);
        assert_eq!(amount.to_string(), "125.50");
    }

    #[test]
    fn assign_deduplicates_contractors() {
        let now = Utc::now();
        let mut task = Task::create(new_task(), now).unwrap();
        let contractor = ContractorId::generate();
        task.assign(contractor, now);
        task.assign(contractor, now);
        assert_eq!(task.assigned_contractors.len(), 1);
        assert_eq!(task.assigned_to, Some(contractor));
    }

    #[test]
    fn task_serializes_camel_case() {
        let task = Task::create(new_task(), Utc::now()).unwrap();
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("orderId").is_some());
        assert!(json.get("scheduledAt").is_some());
        assert!(json.get("assignedContractors").is_some());
    }
}
