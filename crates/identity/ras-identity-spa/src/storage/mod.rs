//! Scoped key/value persistence.
//!
//! Everything that must survive a full page reload (single-use `state`/`nonce`, tokens,
//! the pending-action record, the redirect origin) goes through a [`Storage`] view. A view
//! prefixes every key with its owner scope, so `clear()` only touches the owner's keys.

use crate::error::{AuthError, AuthResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::warn;

#[cfg(target_arch = "wasm32")]
pub mod web;

/// Root prefix shared by every key written by this crate
pub const ROOT_PREFIX: &str = "ras.auth";

/// Keys written inside a provider scope
pub mod keys {
    pub const STATE: &str = "state";
    pub const NONCE: &str = "nonce";
    pub const RESPONSE_TYPE: &str = "response-type";
    pub const CODE: &str = "code.raw";
    pub const ACCESS_TOKEN: &str = "access-token.raw";
    pub const ACCESS_TOKEN_EXPIRATION: &str = "access-token.expiration";
    pub const ACCESS_TOKEN_TYPE: &str = "access-token.type";
    pub const ID_TOKEN: &str = "id-token.raw";
}

/// Which browser storage area a scope is persisted in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// First-party cookies
    Cookie,
    /// `sessionStorage`, cleared when the tab closes
    #[default]
    Session,
    /// `localStorage`, durable across sessions
    Local,
}

/// A raw key/value storage area
pub trait StorageBackend: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> AuthResult<()>;

    /// Remove a value; removing a missing key is not an error
    fn delete(&self, key: &str) -> AuthResult<()>;

    /// List every key currently stored
    fn keys(&self) -> AuthResult<Vec<String>>;
}

/// Resolve the browser backend for a storage kind
#[cfg(target_arch = "wasm32")]
pub fn backend_for(kind: StorageKind) -> AuthResult<Arc<dyn StorageBackend>> {
    Ok(match kind {
        StorageKind::Cookie => Arc::new(web::CookieStorage::new()),
        StorageKind::Session => Arc::new(web::SessionStorage::new()),
        StorageKind::Local => Arc::new(web::LocalStorage::new()),
    })
}

/// Resolve the browser backend for a storage kind
///
/// Outside the browser there is no cookie, session or local storage; callers have to
/// supply a backend such as [`MemoryStorage`] explicitly.
#[cfg(not(target_arch = "wasm32"))]
pub fn backend_for(kind: StorageKind) -> AuthResult<Arc<dyn StorageBackend>> {
    Err(AuthError::InvalidStorage(format!(
        "{kind:?} storage is only available in the browser"
    )))
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all scopes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> AuthResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> AuthResult<Vec<String>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }
}
/// Check a provider or handler name before it becomes a scope segment
///
/// Names may not be empty or contain `.`, otherwise one scope prefix could cover another
/// (`provider.google.` would also match every key of `provider.google.work`).
pub fn validate_scope_name(kind: &str, name: &str) -> AuthResult<()> {
    if name.is_empty() {
        return Err(AuthError::config(format!("{kind} name must not be empty")));
    }
    if name.contains('.') {
        return Err(AuthError::config(format!(
            "{kind} name must not contain '.': {name}"
        )));
    }
    Ok(())
}

/// A view over a backend restricted to one owner scope
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Storage {
    /// Create a view for `scope`, e.g. `provider.google` or `handler.redirect`
    pub fn new(backend: Arc<dyn StorageBackend>, scope: &str) -> Self {
        Self {
            backend,
            prefix: format!("{ROOT_PREFIX}.{scope}."),
        }
    }

    /// View for a provider's token state
    pub fn for_provider(backend: Arc<dyn StorageBackend>, name: &str) -> Self {
        Self::new(backend, &format!("provider.{name}"))
    }

    /// View for a handler's transient markers
    pub fn for_handler(backend: Arc<dyn StorageBackend>, name: &str) -> Self {
        Self::new(backend, &format!("handler.{name}"))
    }

    /// Nested view sharing the same backend, e.g. `scope("popup")` under `handler`
    pub fn scope(&self, name: &str) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            prefix: format!("{}{}.", self.prefix, name),
        }
    }

    /// The full prefix applied to every key in this view
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The backend this view writes to
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get(&self, key: &str) -> AuthResult<Option<String>> {
        self.backend.get(&self.key(key))
    }

    pub fn set(&self, key: &str, value: impl AsRef<str>) -> AuthResult<()> {
        self.backend.set(&self.key(key), value.as_ref())
    }

    /// Write `value`, or delete the key when `value` is `None`
    pub fn set_or_delete(&self, key: &str, value: Option<impl AsRef<str>>) -> AuthResult<()> {
        match value {
            Some(value) => self.set(key, value),
            None => self.delete(key),
        }
    }

    pub fn delete(&self, key: &str) -> AuthResult<()> {
        self.backend.delete(&self.key(key))
    }

    /// Delete a key where a failure must not mask the caller's own outcome
    pub fn discard(&self, key: &str) {
        if let Err(err) = self.delete(key) {
            warn!("Failed to delete {}{}: {}", self.prefix, key, err);
        }
    }

    /// Read and deserialize a JSON value
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> AuthResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AuthError::storage(format!("corrupt value for {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Serialize and write a JSON value
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> AuthResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| AuthError::storage(format!("unable to serialize {key}: {e}")))?;
        self.set(key, raw)
    }

    /// Remove every key in this scope, leaving other scopes untouched
    pub fn clear(&self) -> AuthResult<()> {
        for key in self.backend.keys()? {
            if key.starts_with(&self.prefix) {
                self.backend.delete(&key)?;
            }
        }
        Ok(())
    }
}
