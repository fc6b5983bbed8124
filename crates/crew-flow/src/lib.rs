//! # crew-flow
//!
//! The real-time dispatch domain for the crew services.
//!
//! This crate implements:
//!
//! - **Task Lifecycle**: the task state machine, the atomic claim protocol,
//!   and append-only status/payment audit history
//! - **Room Directory**: multi-dimensional room membership (identity,
//!   proximity bucket, skill, global) with a reverse index for reliable
//!   disconnect cleanup
//! - **Notification Ledger**: persisted notifications with delivery and read
//!   tracking, backlog retrieval, and aggregate stats
//! - **Dispatch Coordinator**: routes lifecycle events to the right rooms
//!   and falls back to durable notifications for offline contractors
//!
//! ## Guarantees
//!
//! - **Single-winner claims**: claiming is a conditional update at the store
//!   boundary; under concurrent claims exactly one caller wins
//! - **At-least-once delivery**: every dispatch either reaches a live
//!   connection or becomes a durable notification record
//! - **Clean disconnects**: the reverse membership index lets `leave_all`
//!   remove exactly the rooms a contractor joined

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod directory;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod notify;
pub mod rooms;
pub mod store;
pub mod task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::directory::{ContractorDirectory, ContractorProfile, InMemoryDirectory};
    pub use crate::dispatch::{DispatchConfig, Dispatcher, LivePush, PushOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::events::{OutboundEvent, TaskSummary};
    pub use crate::lifecycle::TaskLifecycle;
    pub use crate::notify::{NewNotification, Notification, NotificationLedger};
    pub use crate::rooms::{RoomDirectory, RoomName};
    pub use crate::store::{CasOutcome, ClaimOutcome, TaskStore};
    pub use crate::task::{NewTask, Task, TaskPriority, TaskStatus, TaskType};
}
