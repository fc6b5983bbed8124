//! Gateway configuration.
//!
//! All settings load from `CREW_*` environment variables with serde defaults,
//! so a bare `Config::from_env()` in debug mode needs nothing set.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Configuration for the gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - a missing JWT secret falls back to an insecure dev secret
    /// - the `debug:room-info` WebSocket event is answered
    #[serde(default)]
    pub debug: bool,

    /// JWT authentication configuration.
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Inbound event rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Radius in kilometers for matching tasks to located contractors.
    #[serde(default = "default_match_radius_km")]
    pub match_radius_km: f64,

    /// Page size for backlog replay on reconnect.
    #[serde(default = "default_replay_page_size")]
    pub replay_page_size: usize,

    /// Seconds allowed for session setup after the socket upgrade.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

const fn default_http_port() -> u16 {
    8080
}

const fn default_match_radius_km() -> f64 {
    50.0
}

const fn default_replay_page_size() -> usize {
    50
}

const fn default_handshake_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            debug: false,
            jwt: JwtConfig::default(),
            rate_limit: RateLimitConfig::default(),
            match_radius_km: default_match_radius_km(),
            replay_page_size: default_replay_page_size(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("CREW_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("CREW_DEBUG")? {
            config.debug = debug;
        }
        if let Some(secret) = env_string("CREW_JWT_SECRET") {
            config.jwt.hs256_secret = Some(secret);
        }
        if let Some(issuer) = env_string("CREW_JWT_ISSUER") {
            config.jwt.issuer = Some(issuer);
        }
        if let Some(audience) = env_string("CREW_JWT_AUDIENCE") {
            config.jwt.audience = Some(audience);
        }
        if let Some(leeway) = env_u64("CREW_JWT_LEEWAY_SECS")? {
            config.jwt.leeway_seconds = leeway;
        }
        if let Some(enabled) = env_bool("CREW_RATE_LIMIT_ENABLED")? {
            config.rate_limit.enabled = enabled;
        }
        if let Some(events) = env_u32("CREW_RATE_LIMIT_EVENTS_PER_MINUTE")? {
            config.rate_limit.events_per_minute = events;
        }
        if let Some(burst) = env_u32("CREW_RATE_LIMIT_BURST_SIZE")? {
            config.rate_limit.burst_size = burst;
        }
        if let Some(secs) = env_u64("CREW_RATE_LIMIT_PURGE_INTERVAL_SECS")? {
            config.rate_limit.purge_interval_secs = secs;
        }
        if let Some(radius) = env_f64("CREW_MATCH_RADIUS_KM")? {
            config.match_radius_km = radius;
        }
        if let Some(size) = env_u64("CREW_REPLAY_PAGE_SIZE")? {
            config.replay_page_size = usize::try_from(size).unwrap_or(usize::MAX);
        }
        if let Some(secs) = env_u64("CREW_HANDSHAKE_TIMEOUT_SECS")? {
            config.handshake_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates settings that have cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns an error when no JWT secret is configured outside debug mode.
    pub fn validate(&self) -> GatewayResult<()> {
        if !self.debug
            && self
                .jwt
                .hs256_secret
                .as_deref()
                .is_none_or(|s| s.trim().is_empty())
        {
            return Err(GatewayError::bad_request(
                "CREW_JWT_SECRET is required when CREW_DEBUG=false",
            ));
        }
        if self.match_radius_km <= 0.0 {
            return Err(GatewayError::bad_request(
                "CREW_MATCH_RADIUS_KM must be positive",
            ));
        }
        Ok(())
    }
}

/// JWT verification configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret used to verify bearer tokens.
    ///
    /// Delivered via secret manager / env var in production, never checked
    /// into config files.
    #[serde(default)]
    pub hs256_secret: Option<String>,

    /// Optional issuer (`iss`) to enforce.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Optional audience (`aud`) to enforce.
    #[serde(default)]
    pub audience: Option<String>,

    /// Clock skew allowance in seconds for `exp` validation.
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
}

const fn default_leeway_seconds() -> u64 {
    30
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            hs256_secret: None,
            issuer: None,
            audience: None,
            leeway_seconds: default_leeway_seconds(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field(
                "hs256_secret",
                &self.hs256_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

/// Inbound event rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Steady-state inbound events per minute per connection.
    #[serde(default = "default_events_per_minute")]
    pub events_per_minute: u32,

    /// Burst capacity above the steady rate.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// How often idle per-connection limiter state is purged.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

const fn default_enabled() -> bool {
    true
}

const fn default_events_per_minute() -> u32 {
    120
}

const fn default_burst_size() -> u32 {
    20
}

const fn default_purge_interval_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            events_per_minute: default_events_per_minute(),
            burst_size: default_burst_size(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> GatewayResult<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| GatewayError::bad_request(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> GatewayResult<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| GatewayError::bad_request(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> GatewayResult<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| GatewayError::bad_request(format!("{name} must be a u64: {e}")))
}

fn env_f64(name: &str) -> GatewayResult<Option<f64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<f64>()
        .map(Some)
        .map_err(|e| GatewayError::bad_request(format!("{name} must be a number: {e}")))
}

fn env_bool(name: &str) -> GatewayResult<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        other => Err(GatewayError::bad_request(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = Config::default();
        assert_eq!(config.http_port, 8080);
        assert!(!config.debug);
        assert!((config.match_radius_km - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.rate_limit.events_per_minute, 120);
    }

    #[test]
    fn production_requires_secret() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut with_secret = Config::default();
        with_secret.jwt.hs256_secret = Some("s3cret".into());
        assert!(with_secret.validate().is_ok());

        let debug = Config {
            debug: true,
            ..Config::default()
        };
        assert!(debug.validate().is_ok());
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let config = JwtConfig {
            hs256_secret: Some("topsecret".into()),
            ..JwtConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn zero_radius_is_rejected() {
        let config = Config {
            debug: true,
            match_radius_km: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
