//! Request authentication.
//!
//! Students present the identity provider's RS256 ID token as a bearer
//! token; `sub` becomes their [`UserId`]. Admin endpoints use a shared key
//! in `X-Admin-Key`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use lingo_billing_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// Signing keys are refetched after this long, or when a token names an
/// unknown `kid`.
const KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Development tokens look like `test-token:<user_id>`.
const TEST_TOKEN_PREFIX: &str = "test-token:";

/// An authenticated student.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID (`sub` claim).
    pub user_id: UserId,
    /// Email claim, if present.
    pub email: Option<String>,
    /// Display name claim, if present.
    pub name: Option<String>,
}

impl AuthUser {
    fn from_test_token(user_id: &str) -> Result<Self, ApiError> {
        Ok(Self {
            user_id: user_id.parse().map_err(|_| ApiError::Unauthorized)?,
            email: Some(format!("{user_id}@test.local")),
            name: None,
        })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        if let Some(user_id) = token.strip_prefix(TEST_TOKEN_PREFIX) {
            if !state.config.allow_test_tokens {
                tracing::debug!("Test token presented while test tokens are disabled");
                return Err(ApiError::Unauthorized);
            }
            return Self::from_test_token(user_id);
        }

        let claims = state
            .identity_keys
            .verify(token, &state.config.auth_issuer, &state.config.auth_audience)
            .await?;

        Ok(Self {
            user_id: claims.sub.parse().map_err(|_| ApiError::Unauthorized)?,
            email: claims.email,
            name: claims.name,
        })
    }
}

/// An operator authenticated by the admin API key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// `X-Admin-Id` header, or `admin`. Used for audit logging only.
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // No configured key disables the admin surface entirely
        let expected = state
            .config
            .admin_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;
        let presented = header_str(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(presented, expected) {
            tracing::warn!("Rejected admin request with wrong key");
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header_str(parts, "x-admin-id").unwrap_or("admin").to_string();
        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(Self { admin_id })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    header_str(parts, "authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// The ID token claims we read.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    /// Subject, the user ID.
    pub sub: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

impl Jwk {
    fn rsa_key(&self) -> Option<DecodingKey> {
        if self.kty != "RSA" {
            return None;
        }
        DecodingKey::from_rsa_components(self.n.as_deref()?, self.e.as_deref()?).ok()
    }
}

/// One fetched generation of signing keys.
#[derive(Default)]
struct KeySet {
    by_kid: HashMap<String, DecodingKey>,
    /// Used for tokens without a `kid`.
    first: Option<DecodingKey>,
    fetched_at: Option<Instant>,
}

impl KeySet {
    fn from_jwks(set: &JwkSet, fetched_at: Instant) -> Self {
        let mut keys = Self {
            fetched_at: Some(fetched_at),
            ..Self::default()
        };
        for jwk in &set.keys {
            let Some(key) = jwk.rsa_key() else {
                tracing::debug!(kty = %jwk.kty, kid = ?jwk.kid, "Skipping unusable JWK");
                continue;
            };
            if let Some(kid) = &jwk.kid {
                keys.by_kid.insert(kid.clone(), key.clone());
            }
            keys.first.get_or_insert(key);
        }
        keys
    }

    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < KEY_REFRESH_INTERVAL)
    }

    fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.by_kid.get(kid).cloned(),
            None => self.first.clone(),
        }
    }
}

/// The identity provider's signing keys, fetched lazily from its JWKS
/// endpoint.
pub struct IdentityKeys {
    jwks_url: String,
    client: reqwest::Client,
    current: RwLock<KeySet>,
}

impl IdentityKeys {
    /// Create an empty key set; keys are fetched on first use.
    #[must_use]
    pub fn new(jwks_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(KEY_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            jwks_url: jwks_url.into(),
            client,
            current: RwLock::new(KeySet::default()),
        }
    }

    /// Verify an RS256 ID token against `issuer` and `audience`.
    ///
    /// # Errors
    ///
    /// - `ApiError::Unauthorized` for a malformed, expired or foreign token.
    /// - `ApiError::ExternalService` when the keys cannot be fetched.
    pub async fn verify(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<IdentityClaims, ApiError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Unreadable token header");
            ApiError::Unauthorized
        })?;
        let key = self.key_for(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        decode::<IdentityClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                ApiError::Unauthorized
            })
    }

    async fn key_for(&self, kid: Option<&str>) -> Result<DecodingKey, ApiError> {
        {
            let current = self.current.read().await;
            if current.is_fresh() {
                if let Some(key) = current.lookup(kid) {
                    return Ok(key);
                }
            }
        }

        // Stale generation or a rotated key
        let refreshed = self.refresh().await?;
        refreshed.lookup(kid).ok_or(ApiError::Unauthorized)
    }

    async fn refresh(&self) -> Result<tokio::sync::RwLockReadGuard<'_, KeySet>, ApiError> {
        let set = self.fetch().await?;
        let mut current = self.current.write().await;
        *current = KeySet::from_jwks(&set, Instant::now());
        tracing::info!(keys = current.by_kid.len(), "Identity signing keys refreshed");
        Ok(current.downgrade())
    }

    async fn fetch(&self) -> Result<JwkSet, ApiError> {
        let unavailable = || ApiError::ExternalService("Failed to fetch authentication keys".into());

        let response = self.client.get(&self.jwks_url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.jwks_url, "JWKS request failed");
            unavailable()
        })?;
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), url = %self.jwks_url, "JWKS request failed");
            return Err(unavailable());
        }

        response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Unreadable JWKS response");
            unavailable()
        })
    }
}
