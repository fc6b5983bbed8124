//! Room membership for live broadcast targeting.
//!
//! A room is a named set of contractors that receive the same broadcast.
//! Four kinds exist: the per-contractor identity room, proximity rooms
//! keyed by bucketed coordinates plus a radius, per-skill rooms, and the
//! single global room. Membership is ephemeral, process-local state,
//! rebuilt on connect and never persisted.
//!
//! A reverse index (contractor → rooms) lets disconnect handling remove
//! exactly the rooms a contractor joined, independent of room population.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crew_core::{geo, skill, ContractorId, GeoPoint};

use crate::error::{Error, Result};

/// The reserved name of the global room every authenticated contractor joins.
pub const GLOBAL_ROOM: &str = "contractors:all";

/// Default proximity-room radius in kilometres when a client omits one.
pub const DEFAULT_RADIUS_KM: u32 = 50;

// ============================================================================
// Room names
// ============================================================================

/// Typed room descriptor.
///
/// Formatting is deterministic and collision-free across kinds: each kind
/// has a distinct prefix, except the single reserved global name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomName {
    /// One per contractor: `contractor:<id>`.
    Contractor(ContractorId),
    /// Proximity bucket: `location:<lat>:<lng>:<radius>` with coordinates
    /// rounded to 0.01°.
    Location {
        /// Bucketed latitude (degrees × 100).
        lat_bucket: i32,
        /// Bucketed longitude (degrees × 100).
        lng_bucket: i32,
        /// Radius in kilometres.
        radius_km: u32,
    },
    /// One per normalized skill token: `skill:<token>`.
    Skill(String),
    /// The single global room.
    Global,
}

impl RoomName {
    /// Builds the proximity room for a raw point and radius.
    #[must_use]
    pub fn for_location(point: GeoPoint, radius_km: u32) -> Self {
        Self::Location {
            lat_bucket: point.lat_bucket(),
            lng_bucket: point.lng_bucket(),
            radius_km,
        }
    }

    /// Builds the room for a declared skill (normalizing the token).
    #[must_use]
    pub fn for_skill(skill_name: &str) -> Self {
        Self::Skill(skill::normalize(skill_name))
    }

    /// Parses a room name back into its typed descriptor.
    ///
    /// Returns `None` for names this directory never produces.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name == GLOBAL_ROOM {
            return Some(Self::Global);
        }
        if let Some(id) = name.strip_prefix("contractor:") {
            return id.parse().ok().map(Self::Contractor);
        }
        if let Some(token) = name.strip_prefix("skill:") {
            if token.is_empty() {
                return None;
            }
            return Some(Self::Skill(token.to_string()));
        }
        if let Some(rest) = name.strip_prefix("location:") {
            let mut parts = rest.splitn(3, ':');
            let lat: f64 = parts.next()?.parse().ok()?;
            let lng: f64 = parts.next()?.parse().ok()?;
            let radius_km: u32 = parts.next()?.parse().ok()?;
            return Some(Self::Location {
                lat_bucket: geo::bucket(lat),
                lng_bucket: geo::bucket(lng),
                radius_km,
            });
        }
        None
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contractor(id) => write!(f, "contractor:{id}"),
            Self::Location {
                lat_bucket,
                lng_bucket,
                radius_km,
            } => write!(
                f,
                "location:{}:{}:{radius_km}",
                geo::bucket_label(*lat_bucket),
                geo::bucket_label(*lng_bucket),
            ),
            Self::Skill(token) => write!(f, "skill:{token}"),
            Self::Global => f.write_str(GLOBAL_ROOM),
        }
    }
}

/// Member count for one room, for operational debugging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    /// The room's name.
    pub name: String,
    /// Current member count.
    pub members: usize,
}

// ============================================================================
// Directory
// ============================================================================

/// A contractor's stored raw location, used for radius queries.
#[derive(Debug, Clone, Copy)]
struct StoredLocation {
    point: GeoPoint,
    radius_km: u32,
}

/// Internal state behind one lock: every membership mutation (join, leave,
/// relocate) is a single write transaction, so readers never observe a
/// contractor in two proximity rooms nor in zero mid-update.
#[derive(Debug, Default)]
struct DirectoryState {
    rooms: HashMap<RoomName, HashSet<ContractorId>>,
    memberships: HashMap<ContractorId, HashSet<RoomName>>,
    locations: HashMap<ContractorId, StoredLocation>,
    skills: HashMap<ContractorId, Vec<String>>,
}

impl DirectoryState {
    fn join(&mut self, contractor: ContractorId, room: RoomName) {
        self.rooms.entry(room.clone()).or_default().insert(contractor);
        self.memberships.entry(contractor).or_default().insert(room);
    }

    fn leave(&mut self, contractor: &ContractorId, room: &RoomName) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(contractor);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        if let Some(rooms) = self.memberships.get_mut(contractor) {
            rooms.remove(room);
        }
    }

    fn current_location_room(&self, contractor: &ContractorId) -> Option<RoomName> {
        self.memberships.get(contractor).and_then(|rooms| {
            rooms
                .iter()
                .find(|r| matches!(r, RoomName::Location { .. }))
                .cloned()
        })
    }
}

/// Process-local room membership with an explicit create/teardown lifecycle.
///
/// Owned state, not a global: construct one per server instance (or per
/// test) and drop it to tear everything down.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    state: RwLock<DirectoryState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("room directory lock poisoned")
}

impl RoomDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the contractor's identity room, one room per declared skill,
    /// and the global room. Idempotent; re-joining with a different skill
    /// list reconciles the skill rooms, leaving any whose skill is no
    /// longer declared.
    ///
    /// Returns the rooms joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn join_identity_rooms(
        &self,
        contractor: ContractorId,
        skills: &[String],
    ) -> Result<Vec<RoomName>> {
        let mut rooms = vec![RoomName::Contractor(contractor), RoomName::Global];
        for s in skills {
            let room = RoomName::for_skill(s);
            if matches!(&room, RoomName::Skill(token) if token.is_empty()) {
                continue;
            }
            rooms.push(room);
        }

        let mut state = self.state.write().map_err(poison_err)?;
        let desired: HashSet<&RoomName> = rooms.iter().collect();
        let retracted: Vec<RoomName> = state
            .memberships
            .get(&contractor)
            .map(|held| {
                held.iter()
                    .filter(|room| matches!(room, RoomName::Skill(_)) && !desired.contains(room))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for room in &retracted {
            state.leave(&contractor, room);
        }
        for room in &rooms {
            state.join(contractor, room.clone());
        }
        state.skills.insert(contractor, skills.to_vec());
        drop(state);
        Ok(rooms)
    }

    /// Moves the contractor to the proximity room for `point`/`radius_km`,
    /// leaving any previously held proximity room, and records the raw
    /// location for radius queries. Atomic with respect to readers.
    ///
    /// Returns the new proximity room.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn update_location(
        &self,
        contractor: ContractorId,
        point: GeoPoint,
        radius_km: u32,
    ) -> Result<RoomName> {
        let new_room = RoomName::for_location(point, radius_km);

        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(previous) = state.current_location_room(&contractor) {
            if previous != new_room {
                state.leave(&contractor, &previous);
            }
        }
        state.join(contractor, new_room.clone());
        state.locations.insert(contractor, StoredLocation { point, radius_km });
        drop(state);

        tracing::debug!(contractor = %contractor, room = %new_room, "location room updated");
        Ok(new_room)
    }

    /// Removes the contractor from every room in its reverse index, clears
    /// its stored location and skills, and deletes the index entry itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn leave_all(&self, contractor: &ContractorId) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let rooms: Vec<RoomName> = state
            .memberships
            .get(contractor)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for room in &rooms {
            state.leave(contractor, room);
        }
        state.memberships.remove(contractor);
        state.locations.remove(contractor);
        state.skills.remove(contractor);
        drop(state);
        Ok(())
    }

    /// Returns contractors whose stored location is within `radius_km` of
    /// the given center, boundary inclusive.
    ///
    /// Intentionally a linear scan: the located population is small (field
    /// contractors, not end users), so a spatial index would be overhead.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn contractors_near(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<ContractorId>> {
        let state = self.state.read().map_err(poison_err)?;
        let found = state
            .locations
            .iter()
            .filter(|(_, loc)| geo::haversine_km(center, loc.point) <= radius_km)
            .map(|(id, _)| *id)
            .collect();
        drop(state);
        Ok(found)
    }

    /// Returns connected contractors whose declared skills fuzzy-match any
    /// of `wanted` (same bidirectional substring rule as the claim protocol).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn contractors_with_skills(&self, wanted: &[String]) -> Result<Vec<ContractorId>> {
        let state = self.state.read().map_err(poison_err)?;
        let found = state
            .skills
            .iter()
            .filter(|(_, declared)| {
                wanted.iter().any(|w| skill::any_match(declared, w))
            })
            .map(|(id, _)| *id)
            .collect();
        drop(state);
        Ok(found)
    }

    /// Returns the members of one room.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn members(&self, room: &RoomName) -> Result<Vec<ContractorId>> {
        let state = self.state.read().map_err(poison_err)?;
        let members = state
            .rooms
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        drop(state);
        Ok(members)
    }

    /// Returns the rooms a contractor currently belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn rooms_of(&self, contractor: &ContractorId) -> Result<Vec<RoomName>> {
        let state = self.state.read().map_err(poison_err)?;
        let rooms = state
            .memberships
            .get(contractor)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        drop(state);
        Ok(rooms)
    }

    /// Reports current member counts per room, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn stats(&self) -> Result<Vec<RoomStats>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut stats: Vec<RoomStats> = state
            .rooms
            .iter()
            .map(|(room, members)| RoomStats {
                name: room.to_string(),
                members: members.len(),
            })
            .collect();
        drop(state);
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn san_antonio() -> GeoPoint {
        GeoPoint::new(29.4241, -98.4936).unwrap()
    }

    #[test]
    fn room_names_are_prefixed_and_parse_back() {
        let contractor = ContractorId::generate();
        let cases = [
            RoomName::Contractor(contractor),
            RoomName::for_location(san_antonio(), 50),
            RoomName::for_skill("Bounce House Setup"),
            RoomName::Global,
        ];
        for room in cases {
            let name = room.to_string();
            assert_eq!(RoomName::parse(&name), Some(room), "{name}");
        }
        assert_eq!(
            RoomName::for_location(san_antonio(), 50).to_string(),
            "location:29.42:-98.49:50"
        );
        assert_eq!(
            RoomName::for_skill("Bounce House Setup").to_string(),
            "skill:bounce-house-setup"
        );
        assert!(RoomName::parse("nonsense").is_none());
        assert!(RoomName::parse("location:a:b:c").is_none());
    }

    #[test]
    fn join_identity_rooms_is_idempotent() {
        let directory = RoomDirectory::new();
        let contractor = ContractorId::generate();
        let skills = vec!["Delivery".to_string()];

        directory.join_identity_rooms(contractor, &skills).unwrap();
        directory.join_identity_rooms(contractor, &skills).unwrap();

        let rooms = directory.rooms_of(&contractor).unwrap();
        assert_eq!(rooms.len(), 3); // identity + skill + global

        let members = directory.members(&RoomName::Global).unwrap();
        assert_eq!(members, vec![contractor]);
    }

    #[test]
    fn rejoin_with_fewer_skills_leaves_retracted_skill_rooms() {
        let directory = RoomDirectory::new();
        let contractor = ContractorId::generate();
        directory
            .join_identity_rooms(contractor, &["Delivery".to_string(), "Setup".to_string()])
            .unwrap();
        directory
            .join_identity_rooms(contractor, &["Setup".to_string()])
            .unwrap();

        let rooms = directory.rooms_of(&contractor).unwrap();
        assert!(rooms.contains(&RoomName::for_skill("Setup")));
        assert!(!rooms.contains(&RoomName::for_skill("Delivery")));

        // The vacated skill room is empty; identity and global are intact.
        assert!(directory
            .members(&RoomName::for_skill("Delivery"))
            .unwrap()
            .is_empty());
        assert!(rooms.contains(&RoomName::Contractor(contractor)));
        assert!(rooms.contains(&RoomName::Global));
    }

    #[test]
    fn update_location_moves_between_proximity_rooms() {
        let directory = RoomDirectory::new();
        let contractor = ContractorId::generate();
        directory.join_identity_rooms(contractor, &[]).unwrap();

        let a = directory
            .update_location(contractor, san_antonio(), 50)
            .unwrap();
        let b = directory
            .update_location(contractor, GeoPoint::new(30.2672, -97.7431).unwrap(), 25)
            .unwrap();
        assert_ne!(a, b);

        let rooms = directory.rooms_of(&contractor).unwrap();
        assert!(rooms.contains(&b));
        assert!(!rooms.contains(&a));

        // Exactly one proximity room at any time.
        let location_rooms = rooms
            .iter()
            .filter(|r| matches!(r, RoomName::Location { .. }))
            .count();
        assert_eq!(location_rooms, 1);

        // The vacated room is gone from stats entirely (empty rooms are
        // dropped), and the new one shows the member.
        let stats = directory.stats().unwrap();
        assert!(!stats.iter().any(|s| s.name == a.to_string()));
        assert!(stats
            .iter()
            .any(|s| s.name == b.to_string() && s.members == 1));
    }

    #[test]
    fn leave_all_clears_every_trace() {
        let directory = RoomDirectory::new();
        let contractor = ContractorId::generate();
        directory
            .join_identity_rooms(contractor, &["Delivery".to_string()])
            .unwrap();
        directory
            .update_location(contractor, san_antonio(), 50)
            .unwrap();

        directory.leave_all(&contractor).unwrap();

        assert!(directory.rooms_of(&contractor).unwrap().is_empty());
        assert!(directory
            .contractors_near(san_antonio(), 100.0)
            .unwrap()
            .is_empty());
        assert!(directory.stats().unwrap().is_empty());
    }

    #[test]
    fn contractors_near_is_boundary_inclusive() {
        let directory = RoomDirectory::new();
        let here = ContractorId::generate();
        let away = ContractorId::generate();
        directory.update_location(here, san_antonio(), 50).unwrap();
        directory
            .update_location(away, GeoPoint::new(30.2672, -97.7431).unwrap(), 50)
            .unwrap();

        let austin = GeoPoint::new(30.2672, -97.7431).unwrap();
        let exact = geo::haversine_km(san_antonio(), austin);

        let within = directory.contractors_near(san_antonio(), exact).unwrap();
        assert!(within.contains(&here));
        assert!(within.contains(&away));

        let tighter = directory
            .contractors_near(san_antonio(), exact - 1.0)
            .unwrap();
        assert!(tighter.contains(&here));
        assert!(!tighter.contains(&away));
    }

    #[test]
    fn contractors_with_skills_uses_fuzzy_rule() {
        let directory = RoomDirectory::new();
        let driver = ContractorId::generate();
        let fitter = ContractorId::generate();
        directory
            .join_identity_rooms(driver, &["Deliveries".to_string()])
            .unwrap();
        directory
            .join_identity_rooms(fitter, &["Setup".to_string()])
            .unwrap();

        let found = directory
            .contractors_with_skills(&["delivery".to_string()])
            .unwrap();
        assert_eq!(found, vec![driver]);

        let none = directory
            .contractors_with_skills(&["maintenance".to_string()])
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn same_bucket_same_room() {
        // Coordinates 0.004° apart round into the same bucket.
        let a = RoomName::for_location(GeoPoint::new(29.4241, -98.4936).unwrap(), 50);
        let b = RoomName::for_location(GeoPoint::new(29.4236, -98.4934).unwrap(), 50);
        assert_eq!(a, b);

        // Same spot, different radius: different room.
        let c = RoomName::for_location(GeoPoint::new(29.4241, -98.4936).unwrap(), 25);
        assert_ne!(a, c);
    }
}
