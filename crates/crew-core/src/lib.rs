//! # crew-core
//!
//! Shared foundation for the crew dispatch services.
//!
//! This crate provides:
//!
//! - **Typed identifiers**: ULID-backed ids for contractors, tasks,
//!   notifications, and orders
//! - **Geo math**: great-circle distance and coordinate bucketing used for
//!   proximity rooms and nearby-task queries
//! - **Skill matching**: the shared fuzzy rule used by both the claim
//!   protocol and skill-room queries
//! - **Observability**: structured logging initialization

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod geo;
pub mod id;
pub mod observability;
pub mod skill;

pub use error::{Error, Result};
pub use geo::GeoPoint;
pub use id::{ContractorId, NotificationId, OrderId, TaskId};
