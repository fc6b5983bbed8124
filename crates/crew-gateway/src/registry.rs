//! Live connection registry.
//!
//! Maps contractor ids to the outbound channel of their active WebSocket
//! session. This is the gateway's implementation of the dispatch layer's
//! [`LivePush`] seam: a missing or closing connection reports
//! [`PushOutcome::Offline`], and the Dispatch Coordinator falls back to a
//! durable notification.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crew_core::ContractorId;
use crew_flow::dispatch::{LivePush, PushOutcome};
use crew_flow::error::{Error as FlowError, Result as FlowResult};
use crew_flow::events::OutboundEvent;

use crate::protocol::ServerEvent;

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    senders: RwLock<HashMap<ContractorId, mpsc::UnboundedSender<ServerEvent>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> FlowError {
    FlowError::storage("connection registry lock poisoned")
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, returning both halves of its outbound
    /// channel: the sender for session-local replies and the receiver the
    /// session loop drains. A newer connection for the same contractor
    /// replaces the old one; the stale session's receiver closes and its
    /// loop winds down.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry lock is poisoned.
    pub fn register(
        &self,
        contractor: ContractorId,
    ) -> FlowResult<(
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    )> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut senders = self.senders.write().map_err(poison_err)?;
        if senders.insert(contractor, tx.clone()).is_some() {
            tracing::info!(contractor = %contractor, "replaced existing connection");
        }
        drop(senders);
        Ok((tx, rx))
    }

    /// Removes a connection. A session only removes itself if it is still
    /// the registered one, so a replacement connection is never torn down
    /// by its predecessor's cleanup.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry lock is poisoned.
    pub fn unregister(
        &self,
        contractor: &ContractorId,
        sender: &mpsc::UnboundedSender<ServerEvent>,
    ) -> FlowResult<()> {
        let mut senders = self.senders.write().map_err(poison_err)?;
        if senders
            .get(contractor)
            .is_some_and(|current| current.same_channel(sender))
        {
            senders.remove(contractor);
        }
        drop(senders);
        Ok(())
    }

    /// Returns the sender for a contractor's live connection, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry lock is poisoned.
    pub fn sender_for(
        &self,
        contractor: &ContractorId,
    ) -> FlowResult<Option<mpsc::UnboundedSender<ServerEvent>>> {
        let senders = self.senders.read().map_err(poison_err)?;
        Ok(senders.get(contractor).cloned())
    }

    /// Whether a contractor currently has a live connection.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry lock is poisoned.
    pub fn is_connected(&self, contractor: &ContractorId) -> FlowResult<bool> {
        let senders = self.senders.read().map_err(poison_err)?;
        Ok(senders.contains_key(contractor))
    }

    /// Number of live connections.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry lock is poisoned.
    pub fn len(&self) -> FlowResult<usize> {
        let senders = self.senders.read().map_err(poison_err)?;
        Ok(senders.len())
    }

    /// Whether no connections are live.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry lock is poisoned.
    pub fn is_empty(&self) -> FlowResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl LivePush for ConnectionRegistry {
    async fn push(
        &self,
        contractor: &ContractorId,
        event: &OutboundEvent,
    ) -> FlowResult<PushOutcome> {
        let Some(sender) = self.sender_for(contractor)? else {
            return Ok(PushOutcome::Offline);
        };
        // A send error means the session loop already dropped its receiver;
        // the connection is closing and counts as offline.
        match sender.send(ServerEvent::Flow(event.clone())) {
            Ok(()) => Ok(PushOutcome::Delivered),
            Err(_) => Ok(PushOutcome::Offline),
        }
    }
}
