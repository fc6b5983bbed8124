//! WebSocket wire protocol.
//!
//! Every frame is JSON with an `event` discriminator and a `data` payload,
//! e.g. `{"event": "ping"}` or
//! `{"event": "contractor:location-update", "data": {"lat": 29.42, "lng": -98.49}}`.
//! Outbound frames are either session-local events or dispatch events from
//! `crew-flow` reused unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crew_core::ContractorId;
use crew_flow::events::OutboundEvent;
use crew_flow::rooms::RoomStats;

/// A position report inside an inbound event.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PositionPayload {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Working radius in kilometers; the server default applies when absent.
    #[serde(default)]
    pub radius: Option<u32>,
}

/// Events clients send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Reposition the contractor, moving them between geo rooms.
    #[serde(rename = "contractor:location-update")]
    LocationUpdate(PositionPayload),

    /// Declare skills (and optionally a position) to subscribe to matching
    /// task announcements.
    #[serde(rename = "task:subscribe")]
    Subscribe {
        /// Declared skill names.
        #[serde(default)]
        skills: Vec<String>,
        /// Optional position to set alongside the subscription.
        #[serde(default)]
        location: Option<PositionPayload>,
    },

    /// Liveness probe.
    #[serde(rename = "ping")]
    Ping,

    /// Ask for this connection's room memberships (debug builds only).
    #[serde(rename = "debug:room-info")]
    RoomInfo,
}

/// Session-local events the gateway itself emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum LocalEvent {
    /// Sent once after a successful handshake.
    #[serde(rename = "connection:established")]
    Established {
        /// The authenticated contractor.
        contractor_id: ContractorId,
        /// Rooms joined during the handshake.
        rooms: Vec<String>,
    },

    /// Acknowledges a location update with the new geo room.
    #[serde(rename = "contractor:location-updated")]
    LocationUpdated {
        /// The geo room now housing this contractor.
        room: String,
    },

    /// Reply to a ping.
    #[serde(rename = "pong")]
    Pong {
        /// Server time of the reply.
        timestamp: DateTime<Utc>,
    },

    /// Reply to `debug:room-info`.
    #[serde(rename = "debug:room-info-response")]
    RoomInfoResponse {
        /// Rooms this contractor is in.
        contractor_rooms: Vec<String>,
        /// Member counts for every live room.
        room_stats: Vec<RoomStats>,
    },
}

/// Anything the gateway writes to a socket.
///
/// Untagged: both arms already serialize to the `{event, data}` envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    /// A dispatch event from crew-flow.
    Flow(OutboundEvent),
    /// A session-local event.
    Local(LocalEvent),
}

impl From<OutboundEvent> for ServerEvent {
    fn from(event: OutboundEvent) -> Self {
        Self::Flow(event)
    }
}

impl From<LocalEvent> for ServerEvent {
    fn from(event: LocalEvent) -> Self {
        Self::Local(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn location_update_parses() {
        let frame = json!({
            "event": "contractor:location-update",
            "data": {"lat": 29.4241, "lng": -98.4936, "radius": 25}
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::LocationUpdate(p) => {
                assert!((p.lat - 29.4241).abs() < 1e-9);
                assert_eq!(p.radius, Some(25));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ping_parses_without_data() {
        let event: ClientEvent = serde_json::from_value(json!({"event": "ping"})).unwrap();
        assert!(matches!(event, ClientEvent::Ping));
    }

    #[test]
    fn subscribe_defaults_empty() {
        let frame = json!({"event": "task:subscribe", "data": {}});
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::Subscribe { skills, location } => {
                assert!(skills.is_empty());
                assert!(location.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_an_error() {
        let frame = json!({"event": "task:hijack", "data": {}});
        assert!(serde_json::from_value::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn established_serializes_camel_case() {
        let event = ServerEvent::from(LocalEvent::Established {
            contractor_id: ContractorId::generate(),
            rooms: vec!["contractors:all".to_string()],
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "connection:established");
        assert!(value["data"]["contractorId"].is_string());
        assert_eq!(value["data"]["rooms"][0], "contractors:all");
    }

    #[test]
    fn pong_envelope_shape() {
        let event = ServerEvent::from(LocalEvent::Pong {
            timestamp: Utc::now(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "pong");
        assert!(value["data"]["timestamp"].is_string());
    }
}
