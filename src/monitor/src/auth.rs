//! # Authentication
//!
//! Bearer tokens (HS256) for the administrative surface, argon2 password
//! hashing for users, and API-key authentication for agents. Registration
//! and cross-monitor endpoints are guarded by the shared registration token
//! instead, checked in their handlers.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app::AppState;
use crate::error::MonitorError;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_OPERATOR: &str = "operator";
pub const ROLE_VIEWER: &str = "viewer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username
    pub sub: String,
    pub role: String,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

pub fn create_access_token(
    secret: &str,
    expire_minutes: i64,
    username: &str,
    role: &str,
) -> Result<String, MonitorError> {
    let claims = Claims {
        sub: username.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + ChronoDuration::minutes(expire_minutes)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| MonitorError::Internal(format!("token encoding failed: {err}")))
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, MonitorError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| MonitorError::Unauthorized("invalid or expired token".to_string()))
}

pub fn hash_password(password: &str) -> Result<String, MonitorError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| MonitorError::Internal(format!("password hashing failed: {err}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// An authenticated dashboard user, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), MonitorError> {
        if self.role == ROLE_ADMIN {
            Ok(())
        } else {
            Err(MonitorError::Forbidden("admin role required".to_string()))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = MonitorError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| MonitorError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| MonitorError::Unauthorized("malformed authorization header".to_string()))?;

        let claims = decode_token(&state.settings.auth.secret_key, token)?;
        Ok(AuthUser {
            username: claims.sub,
            role: claims.role,
        })
    }
}

/// A caller authenticated by API key, or anonymously when no key is sent.
///
/// Reports and heartbeats tolerate the anonymous case for frictionless
/// onboarding: an agent's key only exists once it has been registered or
/// auto-created by its first report. A key that is present but invalid is
/// still refused.
#[derive(Debug, Clone)]
pub struct AgentAuth {
    pub key_name: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AgentAuth {
    type Rejection = MonitorError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(key) = parts
            .headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(AgentAuth { key_name: None });
        };

        if let Some(record) = state.store.authenticate_api_key(key).await? {
            return Ok(AgentAuth {
                key_name: Some(record.name),
            });
        }

        // Agents registered with their own key authenticate with it directly
        if let Some(agent) = state.store.find_agent_by_api_key(key).await? {
            return Ok(AgentAuth {
                key_name: Some(agent.id),
            });
        }

        Err(MonitorError::Unauthorized("invalid api key".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = create_access_token("secret", 30, "admin", ROLE_ADMIN).unwrap();
        let claims = decode_token("secret", &token).unwrap();

        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_access_token("secret", 30, "admin", ROLE_ADMIN).unwrap();
        assert!(decode_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_access_token("secret", -5, "admin", ROLE_ADMIN).unwrap();
        assert!(decode_token("secret", &token).is_err());
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }

    #[test]
    fn role_gate() {
        let admin = AuthUser {
            username: "a".to_string(),
            role: ROLE_ADMIN.to_string(),
        };
        assert!(admin.require_admin().is_ok());

        let viewer = AuthUser {
            username: "v".to_string(),
            role: ROLE_VIEWER.to_string(),
        };
        assert!(matches!(
            viewer.require_admin(),
            Err(MonitorError::Forbidden(_))
        ));
    }
}
