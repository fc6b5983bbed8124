//! WebSocket session lifecycle.
//!
//! A session runs: handshake (register, room joins, `connection:established`,
//! backlog replay, all under a timeout) then the event loop, multiplexing
//! outbound pushes from the registry channel with inbound client frames.
//! Disconnect cleanup (leave rooms, unregister) runs on every exit path,
//! aborted handshakes included, so a reconnecting client never races its
//! own stale membership.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crew_core::{ContractorId, GeoPoint};
use crew_flow::directory::{ContractorDirectory, ContractorProfile};
use crew_flow::rooms::DEFAULT_RADIUS_KM;

use crate::auth::ConnectionIdentity;
use crate::protocol::{ClientEvent, LocalEvent, PositionPayload, ServerEvent};
use crate::server::AppState;

/// Runs one authenticated WebSocket session to completion.
pub async fn run(socket: WebSocket, state: Arc<AppState>, identity: ConnectionIdentity) {
    let contractor = identity.contractor_id;
    tracing::info!(contractor = %contractor, "session starting");

    let (sender, outbound) = match state.registry.register(contractor) {
        Ok(channel) => channel,
        Err(err) => {
            tracing::error!(contractor = %contractor, error = %err, "registration failed");
            return;
        }
    };

    let handshake_window = Duration::from_secs(state.config.handshake_timeout_secs);
    match tokio::time::timeout(handshake_window, handshake(&state, &identity, &sender)).await {
        Ok(Ok(())) => event_loop(socket, &state, &identity, &sender, outbound).await,
        Ok(Err(err)) => {
            tracing::warn!(contractor = %contractor, error = %err, "handshake failed");
        }
        Err(_) => {
            tracing::warn!(contractor = %contractor, "handshake timed out");
        }
    }

    // Every exit path funnels through cleanup: an aborted handshake may
    // already have joined rooms, and membership must not outlive the
    // connection.
    cleanup(&state, &contractor, &sender);
    tracing::info!(contractor = %contractor, "session closed");
}

/// Joins identity rooms, announces the session, and replays the
/// undelivered backlog. The connection is already registered.
async fn handshake(
    state: &Arc<AppState>,
    identity: &ConnectionIdentity,
    sender: &mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), crew_flow::error::Error> {
    let contractor = identity.contractor_id;
    let skills = state.directory.skills(&contractor).await?;
    let rooms = state.rooms.join_identity_rooms(contractor, &skills)?;

    let established = LocalEvent::Established {
        contractor_id: contractor,
        rooms: rooms.iter().map(ToString::to_string).collect(),
    };
    // The loop hasn't started draining yet; the event queues in the channel.
    let _ = sender.send(ServerEvent::Local(established));

    let replayed = state.dispatcher.replay_backlog(&contractor).await?;
    if replayed > 0 {
        tracing::info!(contractor = %contractor, replayed, "backlog replayed");
    }

    Ok(())
}

/// Multiplexes outbound pushes with inbound client frames until the socket
/// closes or this session is replaced.
async fn event_loop(
    socket: WebSocket,
    state: &Arc<AppState>,
    identity: &ConnectionIdentity,
    sender: &mpsc::UnboundedSender<ServerEvent>,
    mut outbound: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let contractor = identity.contractor_id;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            pushed = outbound.recv() => match pushed {
                Some(event) => {
                    if write_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                // Receiver closed: this session was replaced by a newer one.
                None => break,
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(state, identity, sender, &text);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(contractor = %contractor, error = %err, "socket read error");
                    break;
                }
            },
        }
    }
}

/// Leaves every room and unregisters the connection. Runs on every exit,
/// including a handshake that failed or timed out after joining rooms.
fn cleanup(
    state: &AppState,
    contractor: &ContractorId,
    sender: &mpsc::UnboundedSender<ServerEvent>,
) {
    if let Err(err) = state.rooms.leave_all(contractor) {
        tracing::error!(contractor = %contractor, error = %err, "failed to leave rooms");
    }
    if let Err(err) = state.registry.unregister(contractor, sender) {
        tracing::error!(contractor = %contractor, error = %err, "failed to unregister");
    }
}

async fn write_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize outbound event");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(text.into())).await.map_err(|err| {
        tracing::debug!(error = %err, "socket write failed");
    })
}

/// Handles one inbound frame. Over-quota and malformed frames are dropped
/// without closing the connection.
fn handle_frame(
    state: &Arc<AppState>,
    identity: &ConnectionIdentity,
    sender: &mpsc::UnboundedSender<ServerEvent>,
    text: &str,
) {
    let contractor = identity.contractor_id;
    if !state.limiter.allow(&contractor) {
        return;
    }

    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(contractor = %contractor, error = %err, "malformed frame ignored");
            return;
        }
    };

    match event {
        ClientEvent::LocationUpdate(position) => {
            apply_location(state, identity, sender, position);
        }
        ClientEvent::Subscribe { skills, location } => {
            subscribe(state, identity, &skills);
            if let Some(position) = location {
                apply_location(state, identity, sender, position);
            }
        }
        ClientEvent::Ping => {
            let _ = sender.send(ServerEvent::Local(LocalEvent::Pong {
                timestamp: Utc::now(),
            }));
        }
        ClientEvent::RoomInfo => {
            if state.config.debug {
                room_info(state, identity, sender);
            } else {
                tracing::debug!(contractor = %contractor, "debug:room-info ignored outside debug");
            }
        }
    }
}

fn apply_location(
    state: &Arc<AppState>,
    identity: &ConnectionIdentity,
    sender: &mpsc::UnboundedSender<ServerEvent>,
    position: PositionPayload,
) {
    let contractor = identity.contractor_id;
    let point = match GeoPoint::new(position.lat, position.lng) {
        Ok(point) => point,
        Err(err) => {
            tracing::debug!(contractor = %contractor, error = %err, "bad coordinates ignored");
            return;
        }
    };
    let radius_km = position.radius.unwrap_or(DEFAULT_RADIUS_KM);

    match state.rooms.update_location(contractor, point, radius_km) {
        Ok(room) => {
            let _ = sender.send(ServerEvent::Local(LocalEvent::LocationUpdated {
                room: room.to_string(),
            }));
        }
        Err(err) => {
            tracing::error!(contractor = %contractor, error = %err, "location update failed");
        }
    }
}

/// Records declared skills in the directory and re-joins skill rooms.
fn subscribe(state: &Arc<AppState>, identity: &ConnectionIdentity, skills: &[String]) {
    let contractor = identity.contractor_id;
    let profile = ContractorProfile {
        id: contractor,
        name: identity.name.clone().unwrap_or_default(),
        skills: skills.to_vec(),
        verified: identity.verified,
    };
    if let Err(err) = state.directory.upsert(profile) {
        tracing::error!(contractor = %contractor, error = %err, "profile upsert failed");
        return;
    }
    match state.rooms.join_identity_rooms(contractor, skills) {
        Ok(rooms) => {
            tracing::info!(contractor = %contractor, rooms = rooms.len(), "subscription updated");
        }
        Err(err) => {
            tracing::error!(contractor = %contractor, error = %err, "room join failed");
        }
    }
}

fn room_info(
    state: &Arc<AppState>,
    identity: &ConnectionIdentity,
    sender: &mpsc::UnboundedSender<ServerEvent>,
) {
    let contractor = identity.contractor_id;
    let contractor_rooms = match state.rooms.rooms_of(&contractor) {
        Ok(rooms) => rooms.iter().map(ToString::to_string).collect(),
        Err(err) => {
            tracing::error!(contractor = %contractor, error = %err, "room lookup failed");
            return;
        }
    };
    let room_stats = match state.rooms.stats() {
        Ok(stats) => stats,
        Err(err) => {
            tracing::error!(error = %err, "room stats failed");
            return;
        }
    };
    let _ = sender.send(ServerEvent::Local(LocalEvent::RoomInfoResponse {
        contractor_rooms,
        room_stats,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crew_flow::directory::ContractorProfile;
    use crew_flow::rooms::RoomName;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config {
            debug: true,
            ..Config::default()
        }))
    }

    fn identity_for(contractor: ContractorId) -> ConnectionIdentity {
        ConnectionIdentity {
            contractor_id: contractor,
            name: Some("Maya".to_string()),
            email: None,
            verified: true,
        }
    }

    #[tokio::test]
    async fn aborted_handshake_leaves_no_membership_behind() {
        let state = test_state();
        let contractor = ContractorId::generate();
        state
            .directory
            .upsert(ContractorProfile {
                id: contractor,
                name: "Maya".into(),
                skills: vec!["Delivery".into()],
                verified: true,
            })
            .unwrap();

        let (sender, outbound) = state.registry.register(contractor).unwrap();
        handshake(&state, &identity_for(contractor), &sender)
            .await
            .unwrap();
        // identity + skill + global
        assert_eq!(state.rooms.rooms_of(&contractor).unwrap().len(), 3);

        // A session abandoned before its event loop still tears down.
        drop(outbound);
        cleanup(&state, &contractor, &sender);

        assert!(state.rooms.rooms_of(&contractor).unwrap().is_empty());
        assert!(!state.registry.is_connected(&contractor).unwrap());
    }

    #[tokio::test]
    async fn resubscribe_with_fewer_skills_leaves_retracted_rooms() {
        let state = test_state();
        let contractor = ContractorId::generate();
        let identity = identity_for(contractor);

        subscribe(
            &state,
            &identity,
            &["Delivery".to_string(), "Setup".to_string()],
        );
        subscribe(&state, &identity, &["Setup".to_string()]);

        let rooms = state.rooms.rooms_of(&contractor).unwrap();
        assert!(rooms.contains(&RoomName::for_skill("Setup")));
        assert!(!rooms.contains(&RoomName::for_skill("Delivery")));
    }
}
