//! In-memory notification ledger for testing and development.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crew_core::{ContractorId, NotificationId};

use super::{
    NewNotification, Notification, NotificationFilter, NotificationLedger, NotificationStats,
    DEFAULT_PAGE_SIZE,
};
use crate::error::{Error, Result};

/// In-memory notification ledger.
///
/// Thread-safe behind a single lock. Ordering queries sort by creation
/// timestamp with the id as a tiebreaker.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<NotificationId, Notification>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("notification ledger lock poisoned")
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn record_count(&self) -> Result<usize> {
        let records = self.records.read().map_err(poison_err)?;
        Ok(records.len())
    }
}

#[async_trait]
impl NotificationLedger for InMemoryLedger {
    async fn create(&self, new: NewNotification) -> Result<Notification> {
        let notification = new.into_notification(Utc::now());
        let mut records = self.records.write().map_err(poison_err)?;
        records.insert(notification.id, notification.clone());
        drop(records);
        Ok(notification)
    }

    async fn create_bulk(
        &self,
        contractors: &[ContractorId],
        template: NewNotification,
    ) -> Result<Vec<Notification>> {
        let mut created = Vec::with_capacity(contractors.len());
        for contractor in contractors {
            let mut new = template.clone();
            new.contractor_id = *contractor;
            match self.create(new).await {
                Ok(n) => created.push(n),
                Err(err) => {
                    // One failed record must not block the rest of the fan-out.
                    tracing::warn!(
                        contractor = %contractor,
                        error = %err,
                        "bulk notification record failed; continuing"
                    );
                }
            }
        }
        Ok(created)
    }

    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        let records = self.records.read().map_err(poison_err)?;
        let mut matched: Vec<Notification> =
            records.values().filter(|n| filter.accepts(n)).cloned().collect();
        drop(records);

        // Newest first; ids break ties within one timestamp.
        matched.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        Ok(matched
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect())
    }

    async fn mark_delivered(
        &self,
        id: &NotificationId,
        contractor: Option<&ContractorId>,
    ) -> Result<Notification> {
        let mut records = self.records.write().map_err(poison_err)?;
        let Some(record) = records.get_mut(id) else {
            drop(records);
            return Err(Error::NotificationNotFound { notification_id: *id });
        };
        if let Some(owner) = contractor {
            if record.contractor_id != *owner {
                let err = Error::NotOwner {
                    notification_id: *id,
                    contractor_id: *owner,
                };
                drop(records);
                return Err(err);
            }
        }
        if !record.delivered {
            record.delivered = true;
            record.delivered_at = Some(Utc::now());
        }
        let updated = record.clone();
        drop(records);
        Ok(updated)
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        contractor: &ContractorId,
    ) -> Result<Notification> {
        let mut records = self.records.write().map_err(poison_err)?;
        let Some(record) = records.get_mut(id) else {
            drop(records);
            return Err(Error::NotificationNotFound { notification_id: *id });
        };
        if record.contractor_id != *contractor {
            let err = Error::NotOwner {
                notification_id: *id,
                contractor_id: *contractor,
            };
            drop(records);
            return Err(err);
        }
        if !record.read {
            record.read = true;
            record.read_at = Some(Utc::now());
        }
        let updated = record.clone();
        drop(records);
        Ok(updated)
    }

    async fn mark_many_read(
        &self,
        ids: &[NotificationId],
        contractor: &ContractorId,
    ) -> Result<u64> {
        let mut updated = 0;
        for id in ids {
            match self.mark_read(id, contractor).await {
                Ok(_) => updated += 1,
                Err(Error::NotificationNotFound { .. } | Error::NotOwner { .. }) => {
                    tracing::debug!(notification = %id, "skipping record in bulk read");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(updated)
    }

    async fn undelivered_for(
        &self,
        contractor: &ContractorId,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let records = self.records.read().map_err(poison_err)?;
        let mut backlog: Vec<Notification> = records
            .values()
            .filter(|n| n.contractor_id == *contractor && !n.delivered)
            .cloned()
            .collect();
        drop(records);

        // Oldest first: replay preserves creation order, not priority.
        backlog.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        backlog.truncate(limit);
        Ok(backlog)
    }

    async fn stats(&self, contractor: &ContractorId) -> Result<NotificationStats> {
        let records = self.records.read().map_err(poison_err)?;
        let mut stats = NotificationStats::default();
        for n in records.values().filter(|n| n.contractor_id == *contractor) {
            stats.total += 1;
            if !n.read {
                stats.unread += 1;
            }
            if !n.delivered {
                stats.undelivered += 1;
            }
            *stats.by_kind.entry(n.kind).or_default() += 1;
            *stats.by_priority.entry(n.priority).or_default() += 1;
        }
        drop(records);
        Ok(stats)
    }

    async fn cleanup(&self, days_old: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));
        let mut records = self.records.write().map_err(poison_err)?;
        let before = records.len();
        // Retention is anchored on expiry when set, creation otherwise.
        records.retain(|_, n| n.expires_at.unwrap_or(n.created_at) >= cutoff);
        let deleted = (before - records.len()) as u64;
        drop(records);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationKind, NotificationPriority};

    fn system_note(contractor: ContractorId, title: &str) -> NewNotification {
        NewNotification::new(contractor, NotificationKind::System, title, "body")
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let ledger = InMemoryLedger::new();
        let contractor = ContractorId::generate();
        let n = ledger.create(system_note(contractor, "a")).await.unwrap();

        let first = ledger.mark_delivered(&n.id, Some(&contractor)).await.unwrap();
        assert!(first.delivered);
        let stamp = first.delivered_at;

        let second = ledger.mark_delivered(&n.id, None).await.unwrap();
        assert_eq!(second.delivered_at, stamp);
    }

    #[tokio::test]
    async fn mark_read_enforces_ownership() {
        let ledger = InMemoryLedger::new();
        let owner = ContractorId::generate();
        let stranger = ContractorId::generate();
        let n = ledger.create(system_note(owner, "a")).await.unwrap();

        let err = ledger.mark_read(&n.id, &stranger).await.unwrap_err();
        assert!(matches!(err, Error::NotOwner { .. }));

        let read = ledger.mark_read(&n.id, &owner).await.unwrap();
        assert!(read.read);
    }

    #[tokio::test]
    async fn mark_many_read_skips_foreign_records() {
        let ledger = InMemoryLedger::new();
        let owner = ContractorId::generate();
        let other = ContractorId::generate();
        let mine = ledger.create(system_note(owner, "mine")).await.unwrap();
        let theirs = ledger.create(system_note(other, "theirs")).await.unwrap();

        let updated = ledger
            .mark_many_read(&[mine.id, theirs.id, NotificationId::generate()], &owner)
            .await
            .unwrap();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let ledger = InMemoryLedger::new();
        let contractor = ContractorId::generate();
        for i in 0..5 {
            ledger
                .create(system_note(contractor, &format!("n{i}")))
                .await
                .unwrap();
        }

        let filter = NotificationFilter {
            page_size: Some(2),
            ..NotificationFilter::for_contractor(contractor)
        };
        let first_page = ledger.list(&filter).await.unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].title, "n4");
        assert_eq!(first_page[1].title, "n3");

        let filter = NotificationFilter {
            page: Some(3),
            page_size: Some(2),
            ..NotificationFilter::for_contractor(contractor)
        };
        let last_page = ledger.list(&filter).await.unwrap();
        assert_eq!(last_page.len(), 1);
        assert_eq!(last_page[0].title, "n0");
    }

    #[tokio::test]
    async fn undelivered_backlog_is_fifo_not_priority_sorted() {
        let ledger = InMemoryLedger::new();
        let contractor = ContractorId::generate();

        let low_first = ledger
            .create(
                system_note(contractor, "low-first").with_priority(NotificationPriority::Low),
            )
            .await
            .unwrap();
        let critical_second = ledger
            .create(
                system_note(contractor, "critical-second")
                    .with_priority(NotificationPriority::Critical),
            )
            .await
            .unwrap();

        let backlog = ledger.undelivered_for(&contractor, 10).await.unwrap();
        assert_eq!(backlog[0].id, low_first.id);
        assert_eq!(backlog[1].id, critical_second.id);
    }

    #[tokio::test]
    async fn stats_are_internally_consistent() {
        let ledger = InMemoryLedger::new();
        let contractor = ContractorId::generate();

        for kind in [
            NotificationKind::Task,
            NotificationKind::Task,
            NotificationKind::System,
            NotificationKind::Personal,
        ] {
            ledger
                .create(NewNotification::new(contractor, kind, "t", "m"))
                .await
                .unwrap();
        }
        let delivered = ledger
            .create(system_note(contractor, "seen"))
            .await
            .unwrap();
        ledger.mark_delivered(&delivered.id, None).await.unwrap();
        ledger.mark_read(&delivered.id, &contractor).await.unwrap();

        let stats = ledger.stats(&contractor).await.unwrap();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.unread, 4);
        assert_eq!(stats.undelivered, 4);
        assert!(stats.unread <= stats.total);
        assert_eq!(stats.by_kind.values().sum::<u64>(), stats.total);
        assert_eq!(stats.by_priority.values().sum::<u64>(), stats.total);
    }

    #[tokio::test]
    async fn create_bulk_fans_out_one_record_per_contractor() {
        let ledger = InMemoryLedger::new();
        let contractors = [
            ContractorId::generate(),
            ContractorId::generate(),
            ContractorId::generate(),
        ];
        let created = ledger
            .create_bulk(
                &contractors,
                NewNotification::new(
                    contractors[0],
                    NotificationKind::System,
                    "maintenance window",
                    "the portal is down tonight",
                ),
            )
            .await
            .unwrap();

        assert_eq!(created.len(), 3);
        let owners: Vec<_> = created.iter().map(|n| n.contractor_id).collect();
        assert_eq!(owners, contractors);
    }

    #[tokio::test]
    async fn cleanup_reports_deleted_count() {
        let ledger = InMemoryLedger::new();
        let contractor = ContractorId::generate();
        ledger.create(system_note(contractor, "fresh")).await.unwrap();

        // Nothing is older than 30 days in a fresh ledger.
        assert_eq!(ledger.cleanup(30).await.unwrap(), 0);
        // A zero-day horizon deletes everything created before "now".
        assert_eq!(ledger.cleanup(0).await.unwrap(), 1);
        assert_eq!(ledger.record_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_keeps_unexpired_records() {
        let ledger = InMemoryLedger::new();
        let contractor = ContractorId::generate();
        ledger.create(system_note(contractor, "plain")).await.unwrap();
        ledger
            .create(system_note(contractor, "expiring").with_expiry_hours(24))
            .await
            .unwrap();

        // A zero-day horizon reaps by creation age, but a record whose
        // expiry is still in the future survives.
        assert_eq!(ledger.cleanup(0).await.unwrap(), 1);
        let remaining = ledger
            .list(&NotificationFilter::for_contractor(contractor))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "expiring");
    }
}
