//! Login/logout event subscription.

use crate::error::AuthError;
use crate::token::{AccessToken, IdToken};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The events observers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    Login,
    Logout,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
        }
    }
}

/// The credential produced by a successful login
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    /// Authorization code, to be exchanged by a backend
    Code(String),
    /// Bearer access token
    AccessToken(AccessToken),
    /// OpenID Connect id token
    IdToken(IdToken),
}

impl Credential {
    /// The raw credential string
    pub fn raw(&self) -> &str {
        match self {
            Self::Code(code) => code,
            Self::AccessToken(token) => token.raw().unwrap_or_default(),
            Self::IdToken(token) => token.raw().unwrap_or_default(),
        }
    }
}

/// A published event: which provider, and either its outcome or the error
///
/// Logout events carry `Ok(None)` on success.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub provider: String,
    pub result: Result<Option<Credential>, AuthError>,
}

impl AuthEvent {
    pub fn login(provider: &str, result: Result<Credential, AuthError>) -> Self {
        Self {
            kind: AuthEventKind::Login,
            provider: provider.to_string(),
            result: result.map(Some),
        }
    }

    pub fn logout(provider: &str, result: Result<(), AuthError>) -> Self {
        Self {
            kind: AuthEventKind::Logout,
            provider: provider.to_string(),
            result: result.map(|_| None),
        }
    }

    pub fn error(&self) -> Option<&AuthError> {
        self.result.as_ref().err()
    }
}

/// Type alias for event listeners
pub type EventListener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer list keyed by event kind
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<AuthEventKind, Vec<(SubscriptionId, EventListener)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("login_listeners", &self.listener_count(AuthEventKind::Login))
            .field("logout_listeners", &self.listener_count(AuthEventKind::Logout))
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: AuthEventKind, listener: EventListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(kind).or_default().push((id, listener));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn unsubscribe(&self, kind: AuthEventKind, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        before != entries.len()
    }

    /// Deliver `event` to every listener of its kind
    ///
    /// Listeners are invoked outside the registry lock, so a listener may subscribe or
    /// unsubscribe while being notified.
    pub fn publish(&self, event: &AuthEvent) {
        let listeners: Vec<EventListener> = self
            .lock()
            .get(&event.kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        debug!(
            "Publishing {} event for provider {} to {} listener(s)",
            event.kind.as_str(),
            event.provider,
            listeners.len()
        );

        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self, kind: AuthEventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<AuthEventKind, Vec<(SubscriptionId, EventListener)>>>
    {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner())
    }
}
