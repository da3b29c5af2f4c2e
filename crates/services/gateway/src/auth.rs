//! Connection token validation
//!
//! Streaming clients present a bearer token when attaching to a session.
//! The gateway resolves it to an identity and role and trusts the result;
//! issuing tokens and managing accounts is the identity service's concern.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// What a connected client is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instrument gateway on the lane; may stream measurement frames
    Equipment,

    /// Lane operator console; may stream and control the session
    Operator,

    /// Center supervisor dashboard; observe and resume paused sessions
    Supervisor,

    /// Read-only dashboard
    Observer,
}

impl Role {
    /// Whether this role may submit measurement frames.
    pub fn may_submit(&self) -> bool {
        matches!(self, Role::Equipment | Role::Operator)
    }
}

/// Resolved identity of a connection token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque user identifier
    pub user_id: String,

    /// Role granted by the identity service
    pub role: Role,
}

/// JWT token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// User identifier
    pub sub: String,

    /// Granted role
    pub role: Role,

    /// Expiration timestamp (Unix epoch)
    pub exp: i64,
}

impl TokenClaims {
    /// Create new token claims.
    pub fn new(user_id: String, role: Role, ttl_seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(ttl_seconds)).timestamp();
        Self {
            sub: user_id,
            role,
            exp,
        }
    }
}

/// Resolves a connection token to an identity.
pub trait Authenticator: Send + Sync {
    /// Validate a token and resolve the identity behind it.
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JWT-backed authenticator.
pub struct JwtAuthenticator {
    secret: String,
}

impl JwtAuthenticator {
    /// Create a new authenticator with the given signing secret.
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Generate a token for a user, mainly used by tests and tooling.
    pub fn generate(&self, user_id: &str, role: Role, ttl_seconds: i64) -> Result<String, AuthError> {
        let claims = TokenClaims::new(user_id.to_string(), role, ttl_seconds);
        let key = EncodingKey::from_secret(self.secret.as_bytes());
        encode(&Header::default(), &claims, &key).map_err(|e| AuthError::Generation(e.to_string()))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::default();
        // Tokens expire at exactly the exp time
        validation.leeway = 0;

        let token_data =
            decode::<TokenClaims>(token, &key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidFormat(e.to_string()),
            })?;

        Ok(Identity {
            user_id: token_data.claims.sub,
            role: token_data.claims.role,
        })
    }
}

/// Token-related errors.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AuthError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("token generation failed: {0}")]
    Generation(String),
}
