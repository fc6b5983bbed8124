//! JWT verification and connection identity extraction.
//!
//! Every connection, WebSocket or REST, presents a bearer token minted by the
//! contractor platform. Verification happens before any room membership or
//! task mutation; a bad token never touches dispatch state.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crew_core::ContractorId;

use crate::config::JwtConfig;
use crate::error::{GatewayError, GatewayResult};

/// Claims carried in contractor bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractorClaims {
    /// Contractor identifier (ULID).
    pub sub: String,
    /// Contractor email.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the platform has verified this contractor.
    #[serde(default, rename = "isVerified")]
    pub is_verified: bool,
    /// Expiry (seconds since epoch).
    pub exp: u64,
}

/// The verified identity behind a connection.
#[derive(Debug, Clone)]
pub struct ConnectionIdentity {
    /// The contractor this connection belongs to.
    pub contractor_id: ContractorId,
    /// Display name, when the token carries one.
    pub name: Option<String>,
    /// Contact email, when the token carries one.
    pub email: Option<String>,
    /// Platform verification flag.
    pub verified: bool,
}

/// Verifies contractor bearer tokens.
#[derive(Debug)]
pub struct TokenVerifier {
    config: JwtConfig,
}

impl TokenVerifier {
    /// Creates a verifier from JWT configuration.
    #[must_use]
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    /// Verifies a bearer token and extracts the connection identity.
    ///
    /// # Errors
    ///
    /// Returns `AUTHENTICATION_FAILED` for any signature, expiry, issuer,
    /// audience, or claim problem. The reason is logged, not echoed to the
    /// client.
    pub fn verify(&self, token: &str) -> GatewayResult<ConnectionIdentity> {
        let Some(secret) = self.config.hs256_secret.as_deref() else {
            tracing::error!("JWT auth has no signing secret configured");
            return Err(GatewayError::authentication_failed("invalid bearer token"));
        };

        let claims = decode::<ContractorClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &self.validation(),
        )
        .map(|t| t.claims)
        .map_err(|err| {
            tracing::debug!(error = %err, "bearer token rejected");
            GatewayError::authentication_failed("invalid bearer token")
        })?;

        let contractor_id: ContractorId = claims.sub.parse().map_err(|_| {
            tracing::debug!(sub = %claims.sub, "token sub is not a contractor id");
            GatewayError::authentication_failed("invalid bearer token")
        })?;

        Ok(ConnectionIdentity {
            contractor_id,
            name: claims.name,
            email: claims.email,
            verified: claims.is_verified,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_seconds;

        if let Some(aud) = self.config.audience.as_deref() {
            validation.set_audience(&[aud]);
            validation.set_required_spec_claims(&["exp", "aud"]);
        }
        if let Some(iss) = self.config.issuer.as_deref() {
            validation.set_issuer(&[iss]);
            if self.config.audience.is_none() {
                validation.set_required_spec_claims(&["exp", "iss"]);
            } else {
                validation.required_spec_claims.insert("iss".to_string());
            }
        }

        validation
    }
}

/// Pulls the token out of an `Authorization: Bearer <jwt>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
