//! Gateway server wiring.
//!
//! Composes the in-memory dispatch domain (stores, room directory, ledger,
//! dispatcher, lifecycle) with the connection layer (registry, verifier,
//! rate limiter) and serves the WebSocket and REST routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crew_flow::directory::{ContractorDirectory, InMemoryDirectory};
use crew_flow::dispatch::{DispatchConfig, Dispatcher, LivePush};
use crew_flow::lifecycle::TaskLifecycle;
use crew_flow::notify::memory::InMemoryLedger;
use crew_flow::notify::NotificationLedger;
use crew_flow::rooms::RoomDirectory;
use crew_flow::store::memory::InMemoryTaskStore;
use crew_flow::store::TaskStore;

use crate::auth::{bearer_token, TokenVerifier};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::rate_limit::EventLimiter;
use crate::registry::ConnectionRegistry;
use crate::{routes, session};

/// Fallback signing secret for local development only.
const DEV_SECRET: &str = "crew-dev-secret";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Shared application state for all request handlers.
pub struct AppState {
    /// Gateway configuration.
    pub config: Config,
    /// Bearer token verifier.
    pub verifier: TokenVerifier,
    /// Inbound event rate limiter.
    pub limiter: EventLimiter,
    /// Live connection registry (the `LivePush` implementation).
    pub registry: Arc<ConnectionRegistry>,
    /// Room membership state.
    pub rooms: Arc<RoomDirectory>,
    /// Contractor profiles, populated from `task:subscribe` declarations.
    pub directory: Arc<InMemoryDirectory>,
    /// Dispatch coordinator, used directly for backlog replay.
    pub dispatcher: Arc<Dispatcher>,
    /// Task lifecycle service behind every task mutation.
    pub lifecycle: Arc<TaskLifecycle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the full in-memory stack from configuration.
    #[must_use]
    pub fn new(mut config: Config) -> Self {
        if config.jwt.hs256_secret.is_none() {
            // validate() already rejected this outside debug mode.
            tracing::warn!("CREW_JWT_SECRET not set; using the dev secret (debug only)");
            config.jwt.hs256_secret = Some(DEV_SECRET.to_string());
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomDirectory::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(InMemoryTaskStore::new());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&rooms),
            Arc::clone(&ledger) as Arc<dyn NotificationLedger>,
            Arc::clone(&registry) as Arc<dyn LivePush>,
            DispatchConfig {
                match_radius_km: config.match_radius_km,
                replay_page_size: config.replay_page_size,
            },
        ));
        let lifecycle = Arc::new(TaskLifecycle::new(
            store as Arc<dyn TaskStore>,
            Arc::clone(&directory) as Arc<dyn ContractorDirectory>,
            Arc::clone(&dispatcher),
        ));

        Self {
            verifier: TokenVerifier::new(config.jwt.clone()),
            limiter: EventLimiter::new(&config.rate_limit),
            config,
            registry,
            rooms,
            directory,
            dispatcher,
            lifecycle,
        }
    }
}

/// The gateway server.
#[derive(Debug)]
pub struct Server {
    config: Config,
}

impl Server {
    /// Creates a server from configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> (Arc<AppState>, Router) {
        let state = Arc::new(AppState::new(self.config.clone()));

        let router = Router::new()
            .route("/healthz", get(health))
            .route("/ws", get(ws_handler))
            .nest("/api", routes::api_routes())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&state));

        (state, router)
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the port cannot
    /// be bound.
    pub async fn serve(&self) -> GatewayResult<()> {
        self.config.validate()?;

        let (state, router) = self.create_router();
        spawn_limiter_purge(Arc::clone(&state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        tracing::info!(http_port = self.config.http_port, "starting crew gateway");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::internal(format!("failed to bind to {addr}: {e}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| GatewayError::internal(format!("server error: {e}")))?;
        Ok(())
    }

    /// Creates a test router without binding a port.
    #[must_use]
    pub fn test_router(&self) -> Router {
        self.create_router().1
    }

    /// Creates a test router along with its state, for tests that seed data.
    #[must_use]
    pub fn test_parts(&self) -> (Arc<AppState>, Router) {
        self.create_router()
    }
}

/// Periodically drops idle per-connection limiter state.
fn spawn_limiter_purge(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.rate_limit.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            state.limiter.purge_idle();
        }
    });
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Query parameters accepted by the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token; an `Authorization` header works too.
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrades a WebSocket connection after verifying the bearer token.
///
/// Authentication happens before the upgrade: a bad token gets a plain 401
/// and never reaches session state.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
    });
    let Some(token) = token else {
        return GatewayError::authentication_failed("missing bearer token").into_response();
    };
    let identity = match state.verifier.verify(&token) {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| session::run(socket, state, identity))
}
