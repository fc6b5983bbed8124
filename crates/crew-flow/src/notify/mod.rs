//! Persisted notifications with delivery and read tracking.
//!
//! The Notification Ledger is the durable half of the at-least-once
//! guarantee: whenever the Dispatch Coordinator cannot reach a live
//! connection, it writes a ledger record instead, and the backlog is
//! replayed when the contractor reconnects.
//!
//! The Ledger exclusively owns notification persistence; the Coordinator
//! only reads and writes through the [`NotificationLedger`] trait.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crew_core::{ContractorId, NotificationId};

use crate::error::Result;

/// Default page size for list queries.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// The category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Task dispatch fallback (new/claimed/updated task events).
    Task,
    /// Operational announcements.
    System,
    /// Messages addressed to one contractor specifically.
    Personal,
}

/// Delivery priority. Affects presentation, not replay order: backlog
/// replay is FIFO by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Must be seen immediately.
    Critical,
    /// Important.
    High,
    /// Default.
    Normal,
    /// Informational.
    Low,
}

impl Default for NotificationPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A persisted notification owned by exactly one contractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique identifier.
    pub id: NotificationId,
    /// The owning contractor.
    pub contractor_id: ContractorId,
    /// Category.
    pub kind: NotificationKind,
    /// Presentation priority.
    pub priority: NotificationPriority,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Free-form structured payload (e.g. the original dispatch event).
    #[serde(default)]
    pub data: serde_json::Value,
    /// Whether the notification reached the contractor.
    pub delivered: bool,
    /// When it was delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Whether the contractor explicitly read it.
    pub read: bool,
    /// When it was read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Optional expiry for garbage collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    /// The owning contractor.
    pub contractor_id: ContractorId,
    /// Category.
    pub kind: NotificationKind,
    /// Presentation priority; defaults to Normal.
    pub priority: Option<NotificationPriority>,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Free-form structured payload.
    pub data: serde_json::Value,
    /// Hours until expiry, when set.
    pub expires_in_hours: Option<u32>,
}

impl NewNotification {
    /// Creates parameters with default priority, no data, and no expiry.
    #[must_use]
    pub fn new(
        contractor_id: ContractorId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            contractor_id,
            kind,
            priority: None,
            title: title.into(),
            message: message.into(),
            data: serde_json::Value::Null,
            expires_in_hours: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the structured payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Sets the expiry horizon.
    #[must_use]
    pub const fn with_expiry_hours(mut self, hours: u32) -> Self {
        self.expires_in_hours = Some(hours);
        self
    }

    /// Materializes the notification record at `now`.
    #[must_use]
    pub fn into_notification(self, now: DateTime<Utc>) -> Notification {
        Notification {
            id: NotificationId::generate(),
            contractor_id: self.contractor_id,
            kind: self.kind,
            priority: self.priority.unwrap_or_default(),
            title: self.title,
            message: self.message,
            data: self.data,
            delivered: false,
            delivered_at: None,
            read: false,
            read_at: None,
            expires_at: self
                .expires_in_hours
                .map(|h| now + Duration::hours(i64::from(h))),
            created_at: now,
        }
    }
}

/// Filters for list queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    /// Restrict to one contractor.
    pub contractor_id: Option<ContractorId>,
    /// Restrict to one category.
    pub kind: Option<NotificationKind>,
    /// Restrict to one priority.
    pub priority: Option<NotificationPriority>,
    /// Restrict by delivered flag.
    pub delivered: Option<bool>,
    /// Restrict by read flag.
    pub read: Option<bool>,
    /// 1-based page number; defaults to 1.
    pub page: Option<usize>,
    /// Page size; defaults to [`DEFAULT_PAGE_SIZE`].
    pub page_size: Option<usize>,
}

impl NotificationFilter {
    /// Filter for one contractor's notifications.
    #[must_use]
    pub fn for_contractor(contractor_id: ContractorId) -> Self {
        Self {
            contractor_id: Some(contractor_id),
            ..Self::default()
        }
    }

    /// Returns true when a notification passes the non-paging filters.
    #[must_use]
    pub fn accepts(&self, n: &Notification) -> bool {
        self.contractor_id.is_none_or(|c| c == n.contractor_id)
            && self.kind.is_none_or(|k| k == n.kind)
            && self.priority.is_none_or(|p| p == n.priority)
            && self.delivered.is_none_or(|d| d == n.delivered)
            && self.read.is_none_or(|r| r == n.read)
    }
}

/// Aggregate counts for one contractor's notifications.
///
/// Internally consistent by construction: `unread <= total` and the
/// per-kind / per-priority maps each sum to `total`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    /// All notifications owned by the contractor.
    pub total: u64,
    /// Notifications not yet read.
    pub unread: u64,
    /// Notifications not yet delivered.
    pub undelivered: u64,
    /// Counts per category.
    pub by_kind: BTreeMap<NotificationKind, u64>,
    /// Counts per priority.
    pub by_priority: BTreeMap<NotificationPriority, u64>,
}

/// Persistence interface for notifications.
///
/// ## Idempotency
///
/// `mark_delivered` and `mark_read` are idempotent per record: repeating
/// them changes nothing and keeps the original timestamps.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Persists one notification with `delivered=false, read=false`.
    async fn create(&self, new: NewNotification) -> Result<Notification>;

    /// Fan-out creation: one record per contractor, sharing content.
    ///
    /// Failure to persist one record must not block the others; failed
    /// records are logged and skipped, and the successes are returned.
    async fn create_bulk(
        &self,
        contractors: &[ContractorId],
        template: NewNotification,
    ) -> Result<Vec<Notification>>;

    /// Paginated query, newest first.
    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>>;

    /// Marks a notification delivered (idempotent). When `contractor` is
    /// given, ownership is checked first.
    async fn mark_delivered(
        &self,
        id: &NotificationId,
        contractor: Option<&ContractorId>,
    ) -> Result<Notification>;

    /// Marks a notification read by its owner (idempotent).
    async fn mark_read(
        &self,
        id: &NotificationId,
        contractor: &ContractorId,
    ) -> Result<Notification>;

    /// Marks many notifications read. Records not owned by `contractor` or
    /// not found are skipped; returns the number actually updated.
    async fn mark_many_read(
        &self,
        ids: &[NotificationId],
        contractor: &ContractorId,
    ) -> Result<u64>;

    /// Returns up to `limit` undelivered notifications for a contractor,
    /// oldest first (reconnect replay is FIFO by creation, not re-sorted by
    /// priority).
    async fn undelivered_for(
        &self,
        contractor: &ContractorId,
        limit: usize,
    ) -> Result<Vec<Notification>>;

    /// Aggregate counts for one contractor.
    async fn stats(&self, contractor: &ContractorId) -> Result<NotificationStats>;

    /// Deletes records more than `days_old` days past their expiry, or
    /// past creation when no expiry is set, regardless of delivery and
    /// read state. Returns the number deleted. Storage hygiene, not
    /// correctness.
    async fn cleanup(&self, days_old: u32) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_defaults_to_normal() {
        let new = NewNotification::new(
            ContractorId::generate(),
            NotificationKind::System,
            "title",
            "message",
        );
        let n = new.into_notification(Utc::now());
        assert_eq!(n.priority, NotificationPriority::Normal);
        assert!(!n.delivered);
        assert!(!n.read);
        assert!(n.expires_at.is_none());
    }

    #[test]
    fn expiry_hours_compute_expires_at() {
        let now = Utc::now();
        let n = NewNotification::new(
            ContractorId::generate(),
            NotificationKind::System,
            "t",
            "m",
        )
        .with_expiry_hours(24)
        .into_notification(now);
        assert_eq!(n.expires_at, Some(now + Duration::hours(24)));
    }

    #[test]
    fn filter_accepts_matches_each_dimension() {
        let contractor = ContractorId::generate();
        let n = NewNotification::new(contractor, NotificationKind::Task, "t", "m")
            .with_priority(NotificationPriority::High)
            .into_notification(Utc::now());

        let mut filter = NotificationFilter::for_contractor(contractor);
        assert!(filter.accepts(&n));

        filter.kind = Some(NotificationKind::Personal);
        assert!(!filter.accepts(&n));

        filter.kind = Some(NotificationKind::Task);
        filter.read = Some(true);
        assert!(!filter.accepts(&n));
    }
}
