//! # crew-gateway
//!
//! Connection layer for the contractor dispatch subsystem.
//!
//! This crate is a thin composition layer with no domain policy. It handles:
//!
//! - **Authentication**: JWT verification before any room membership
//! - **WebSocket sessions**: wire protocol, room joins, backlog replay
//! - **Live delivery**: the connection registry implements `LivePush`
//! - **Rate limiting**: per-connection inbound event quotas
//!
//! All task and notification logic lives in `crew-flow`; handlers here call
//! [`crew_flow::lifecycle::TaskLifecycle`] and never touch stores directly.
//!
//! ## Endpoints
//!
//! ```text
//! GET    /ws                        - WebSocket upgrade (Bearer or ?token=)
//! GET    /healthz                   - Health check
//! POST   /api/tasks                 - Create a task
//! GET    /api/tasks/nearby          - Claimable tasks near a position
//! POST   /api/tasks/{id}/claim      - Claim a pending task
//! PUT    /api/tasks/{id}/status     - Transition task status
//! PUT    /api/tasks/{id}/payment    - Change payment amount
//! POST   /api/tasks/{id}/complete   - Complete with photos/notes
//! DELETE /api/tasks/{id}            - Delete a pending task
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod routes;
pub mod server;
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::{ConnectionIdentity, TokenVerifier};
    pub use crate::config::Config;
    pub use crate::error::{GatewayError, GatewayResult};
    pub use crate::registry::ConnectionRegistry;
    pub use crate::server::Server;
}
