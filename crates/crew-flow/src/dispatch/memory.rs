//! In-memory push implementation for testing.
//!
//! [`RecordingPush`] stands in for the gateway's connection registry:
//! tests flip contractors online/offline and assert on the events that
//! would have crossed the wire.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crew_core::ContractorId;

use super::{LivePush, PushOutcome};
use crate::error::{Error, Result};
use crate::events::OutboundEvent;

#[derive(Debug, Default)]
struct PushState {
    online: HashSet<ContractorId>,
    sent: Vec<(ContractorId, OutboundEvent)>,
}

/// Recording push for tests: delivers to "online" contractors and records
/// every delivered event.
#[derive(Debug, Default)]
pub struct RecordingPush {
    state: RwLock<PushState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("recording push lock poisoned")
}

impl RecordingPush {
    /// Creates a push with no one online.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a contractor online or offline.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned (test helper).
    pub fn set_online(&self, contractor: ContractorId, online: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if online {
            state.online.insert(contractor);
        } else {
            state.online.remove(&contractor);
        }
    }

    /// Returns every event delivered so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned (test helper).
    #[must_use]
    pub fn sent(&self) -> Vec<(ContractorId, OutboundEvent)> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.sent.clone()
    }

    /// Returns the events delivered to one contractor, in order.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned (test helper).
    #[must_use]
    pub fn sent_to(&self, contractor: &ContractorId) -> Vec<OutboundEvent> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .sent
            .iter()
            .filter(|(id, _)| id == contractor)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Clears the delivery record (keeps online state).
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned (test helper).
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.sent.clear();
    }
}

#[async_trait]
impl LivePush for RecordingPush {
    async fn push(&self, contractor: &ContractorId, event: &OutboundEvent) -> Result<PushOutcome> {
        let mut state = self.state.write().map_err(poison_err)?;
        if !state.online.contains(contractor) {
            drop(state);
            return Ok(PushOutcome::Offline);
        }
        state.sent.push((*contractor, event.clone()));
        drop(state);
        Ok(PushOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TaskSummary;
    use crate::task::{NewTask, Task, TaskPriority, TaskType};
    use chrono::{Duration, Utc};
    use crew_core::OrderId;

    fn sample_event() -> OutboundEvent {
        let task = Task::create(
            NewTask {
                order_id: OrderId::generate(),
                task_type: TaskType::Pickup,
                priority: TaskPriority::Low,
                scheduled_at: Utc::now() + Duration::hours(1),
                location: None,
                address: None,
                payment_amount: None,
            },
            Utc::now(),
        )
        .unwrap();
        OutboundEvent::TaskNew {
            task: TaskSummary::from(&task),
        }
    }

    #[tokio::test]
    async fn offline_by_default() {
        let push = RecordingPush::new();
        let contractor = ContractorId::generate();
        let outcome = push.push(&contractor, &sample_event()).await.unwrap();
        assert_eq!(outcome, PushOutcome::Offline);
        assert!(push.sent().is_empty());
    }

    #[tokio::test]
    async fn records_deliveries_in_order() {
        let push = RecordingPush::new();
        let contractor = ContractorId::generate();
        push.set_online(contractor, true);

        push.push(&contractor, &sample_event()).await.unwrap();
        push.push(&contractor, &sample_event()).await.unwrap();
        assert_eq!(push.sent_to(&contractor).len(), 2);

        push.clear();
        assert!(push.sent().is_empty());
    }
}
