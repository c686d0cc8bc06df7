//! Access token and id token value objects.
//!
//! Both are rebuilt from storage on every provider `sync()`; neither is ever mutated in
//! place. Expiry is always evaluated against the current clock.

use crate::error::{AuthError, AuthResult};
use crate::storage::{Storage, keys};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Bearer access token with its absolute expiration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    raw: Option<String>,
    /// Epoch milliseconds
    expiration: Option<i64>,
    token_type: Option<String>,
}

impl AccessToken {
    pub fn new(raw: Option<String>, expiration: Option<i64>, token_type: Option<String>) -> Self {
        Self {
            raw,
            expiration,
            token_type,
        }
    }

    /// Build a token from an implicit-flow response, anchoring `expires_in` to now
    ///
    /// Lifetimes too large for an `i64` of milliseconds saturate to `i64::MAX`.
    pub fn from_response(raw: &str, expires_in: Option<&str>, token_type: Option<&str>) -> Self {
        let expiration = expires_in
            .and_then(|secs| secs.trim().parse::<i64>().ok())
            .map(|secs| now_millis().saturating_add(secs.saturating_mul(1000)));

        Self::new(
            Some(raw.to_string()),
            expiration,
            token_type.map(String::from),
        )
    }

    /// Rebuild the token persisted in a provider scope
    pub fn from_storage(storage: &Storage) -> AuthResult<Self> {
        let expiration = storage
            .get(keys::ACCESS_TOKEN_EXPIRATION)?
            .and_then(|value| value.parse::<i64>().ok());

        Ok(Self::new(
            storage.get(keys::ACCESS_TOKEN)?,
            expiration,
            storage.get(keys::ACCESS_TOKEN_TYPE)?,
        ))
    }

    /// Persist this token into a provider scope, deleting keys for absent fields
    pub fn store(&self, storage: &Storage) -> AuthResult<()> {
        storage.set_or_delete(keys::ACCESS_TOKEN, self.raw.as_deref())?;
        storage.set_or_delete(
            keys::ACCESS_TOKEN_EXPIRATION,
            self.expiration.map(|e| e.to_string()),
        )?;
        storage.set_or_delete(keys::ACCESS_TOKEN_TYPE, self.token_type.as_deref())
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn expiration(&self) -> Option<i64> {
        self.expiration
    }

    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Missing tokens are expired; tokens without an expiration never expire
    pub fn expired(&self) -> bool {
        self.expired_at(now_millis())
    }

    pub fn expired_at(&self, now: i64) -> bool {
        match (&self.raw, self.expiration) {
            (None, _) => true,
            (Some(_), Some(expiration)) => expiration <= now,
            (Some(_), None) => false,
        }
    }

    /// `Authorization` header value for this token
    pub fn authorization_header(&self) -> Option<String> {
        self.raw.as_ref().map(|raw| format!("Bearer {raw}"))
    }
}

/// `aud` claim, which may be a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(auds) => auds.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded id token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub azp: Option<String>,
    /// Expiration, epoch seconds
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub additional_claims: HashMap<String, serde_json::Value>,
}

/// OpenID Connect id token
///
/// Only the structure and claims are inspected. Signatures are not verified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdToken {
    raw: Option<String>,
    claims: Option<IdTokenClaims>,
}

impl IdToken {
    pub fn new(raw: Option<String>) -> Self {
        let claims = raw.as_deref().and_then(Self::parse);
        Self { raw, claims }
    }

    /// Decode the claims of a three-segment token, or `None` when it is malformed
    pub fn parse(raw: &str) -> Option<IdTokenClaims> {
        Self::try_parse(raw).ok()
    }

    /// Decode the claims, reporting why a malformed token was rejected
    pub fn try_parse(raw: &str) -> AuthResult<IdTokenClaims> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(AuthError::InvalidIdToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| AuthError::InvalidIdToken(format!("payload is not base64url: {e}")))?;

        serde_json::from_slice(&payload)
            .map_err(|e| AuthError::InvalidIdToken(format!("payload is not a claims object: {e}")))
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn claims(&self) -> Option<&IdTokenClaims> {
        self.claims.as_ref()
    }

    /// Expired when there are no claims, no `exp`, or `exp` has passed
    pub fn expired(&self) -> bool {
        self.expired_at(now_millis())
    }

    pub fn expired_at(&self, now: i64) -> bool {
        self.claims
            .as_ref()
            .and_then(|claims| claims.exp)
            .is_none_or(|exp| exp.saturating_mul(1000) <= now)
    }
}

#[cfg(test)]
pub(crate) fn encode_id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
