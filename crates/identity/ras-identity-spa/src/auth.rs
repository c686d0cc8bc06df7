//! The orchestrator tying providers, handlers and storage together.
//!
//! A login or logout is a round trip: persist the pending action, hand the provider URL
//! to a handler, validate what comes back, then drop the pending action. When the handler
//! is a full-page redirect the second half happens on the next page load, in
//! [`SpaAuth::resume_after_reload`], joined to the first half only through storage.

use crate::dedupe::Dedupe;
use crate::error::{AuthError, AuthResult};
use crate::events::{AuthEvent, AuthEventKind, Credential, EventBus, EventListener, SubscriptionId};
use crate::handler::{AuthAction, Handler, OpenRequest};
use crate::provider::{LoginOverrides, Provider, SecureOutcome};
use crate::request::SecureRequest;
use crate::storage::{self, Storage, StorageBackend, StorageKind};
use crate::url::Params;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PENDING: &str = "pending";

/// Which provider and handler a login or logout goes through
///
/// Either may be left out: the single registered provider and the default handler are
/// used instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct AuthOptions {
    #[builder(into)]
    pub provider: Option<String>,
    #[builder(into)]
    pub handler: Option<String>,
}

impl From<&str> for AuthOptions {
    fn from(provider: &str) -> Self {
        Self {
            provider: Some(provider.to_string()),
            handler: None,
        }
    }
}

impl From<String> for AuthOptions {
    fn from(provider: String) -> Self {
        Self {
            provider: Some(provider),
            handler: None,
        }
    }
}

/// The round trip in progress, persisted across a full page reload
///
/// `action` stays a string so that a record written by something else is reported as
/// `unknown_action` instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: String,
    pub provider: String,
    pub handler: String,
}

impl PendingAction {
    pub fn new(action: AuthAction, provider: &str, handler: &str) -> Self {
        Self {
            action: action.as_str().to_string(),
            provider: provider.to_string(),
            handler: handler.to_string(),
        }
    }

    pub fn action(&self) -> AuthResult<AuthAction> {
        self.action.parse()
    }
}

struct AuthInner {
    providers: Vec<Arc<dyn Provider>>,
    handlers: Vec<Arc<dyn Handler>>,
    default_handler: Option<String>,
    storage: Storage,
    events: Arc<EventBus>,
    forwarding: Vec<(Arc<dyn Provider>, AuthEventKind, SubscriptionId)>,
    logins: Dedupe<AuthResult<Credential>>,
    logouts: Dedupe<AuthResult<()>>,
}

impl Drop for AuthInner {
    fn drop(&mut self) {
        for (provider, kind, id) in &self.forwarding {
            provider.events().unsubscribe(*kind, *id);
        }
    }
}

fn failure(action: AuthAction, provider: &str, err: AuthError) -> AuthEvent {
    match action {
        AuthAction::Login => AuthEvent::login(provider, Err(err)),
        AuthAction::Logout => AuthEvent::logout(provider, Err(err)),
    }
}

impl AuthInner {
    fn begin(&self, action: AuthAction, provider: &dyn Provider, handler: &dyn Handler) -> AuthResult<()> {
        debug!(
            "Recording pending {} for {} through {}",
            action,
            provider.name(),
            handler.name()
        );
        self.storage.set_json(
            PENDING,
            &PendingAction::new(action, provider.name(), handler.name()),
        )
    }

    /// Report a round trip that ended before any response came back
    fn abandon(
        &self,
        action: AuthAction,
        provider: &dyn Provider,
        handler: &dyn Handler,
        err: AuthError,
    ) -> AuthError {
        warn!(
            "{} {} through {} failed: {}",
            provider.name(),
            action,
            handler.name(),
            err
        );
        provider.discard_round_trip();
        provider
            .events()
            .publish(&failure(action, provider.name(), err.clone()));
        err
    }

    async fn login(
        &self,
        provider: Arc<dyn Provider>,
        handler: Arc<dyn Handler>,
    ) -> AuthResult<Credential> {
        self.begin(AuthAction::Login, provider.as_ref(), handler.as_ref())?;
        let result = self.login_round_trip(provider.as_ref(), handler.as_ref()).await;
        self.storage.discard(PENDING);
        result
    }

    async fn login_round_trip(
        &self,
        provider: &dyn Provider,
        handler: &dyn Handler,
    ) -> AuthResult<Credential> {
        let url = provider.build_login_url(&LoginOverrides::default())?;
        let request = OpenRequest::new(&url, provider.redirect_url(AuthAction::Login));

        info!("Logging in to {} through {}", provider.name(), handler.name());
        let params = match handler.open(request).await {
            Ok(params) => params,
            Err(err) => return Err(self.abandon(AuthAction::Login, provider, handler, err)),
        };

        provider.validate(&params)
    }

    async fn logout(&self, provider: Arc<dyn Provider>, handler: Arc<dyn Handler>) -> AuthResult<()> {
        self.begin(AuthAction::Logout, provider.as_ref(), handler.as_ref())?;
        let result = self.logout_round_trip(provider.as_ref(), handler.as_ref()).await;
        self.storage.discard(PENDING);
        result
    }

    async fn logout_round_trip(&self, provider: &dyn Provider, handler: &dyn Handler) -> AuthResult<()> {
        let url = provider.build_logout_url()?;
        let request = OpenRequest::new(&url, provider.redirect_url(AuthAction::Logout));

        info!("Logging out of {} through {}", provider.name(), handler.name());
        let params = match handler.open(request).await {
            Ok(params) => params,
            Err(err) => return Err(self.abandon(AuthAction::Logout, provider, handler, err)),
        };

        Self::complete_logout(provider, &params)
    }

    /// Clear the provider's state unless the end-session endpoint reported an error
    fn complete_logout(provider: &dyn Provider, params: &Params) -> AuthResult<()> {
        let result = match params.get("error") {
            Some(code) => Err(AuthError::provider(
                code.as_str(),
                params.get("error_description").cloned(),
            )),
            None => provider.reset(),
        };

        match &result {
            Ok(()) => info!("Logged out of {}", provider.name()),
            Err(err) => warn!("Logout of {} failed: {}", provider.name(), err),
        }
        provider
            .events()
            .publish(&AuthEvent::logout(provider.name(), result.clone()));
        result
    }
}

/// Client-side authentication for a single-page application
///
/// Cheap to clone; clones share providers, handlers and in-flight operations.
#[derive(Clone)]
pub struct SpaAuth {
    inner: Rc<AuthInner>,
}

impl std::fmt::Debug for SpaAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaAuth")
            .field(
                "providers",
                &self.inner.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field(
                "handlers",
                &self.inner.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("default_handler", &self.inner.default_handler)
            .finish()
    }
}

impl SpaAuth {
    pub fn builder() -> SpaAuthBuilder {
        SpaAuthBuilder::new()
    }

    /// Look up a provider; with no name, the only registered one
    pub fn provider(&self, name: Option<&str>) -> AuthResult<Arc<dyn Provider>> {
        let providers = &self.inner.providers;
        match name {
            Some(name) => providers
                .iter()
                .find(|provider| provider.name() == name)
                .cloned()
                .ok_or_else(|| AuthError::InvalidProvider(name.to_string())),
            None => match providers.as_slice() {
                [only] => Ok(Arc::clone(only)),
                [] => Err(AuthError::InvalidProvider("no providers registered".into())),
                _ => Err(AuthError::InvalidProvider(
                    "a provider name is required when several are registered".into(),
                )),
            },
        }
    }

    /// Look up a handler; with no name, the default one
    pub fn handler(&self, name: Option<&str>) -> AuthResult<Arc<dyn Handler>> {
        let Some(name) = name.or(self.inner.default_handler.as_deref()) else {
            return Err(AuthError::InvalidHandler("no handlers registered".into()));
        };
        self.inner
            .handlers
            .iter()
            .find(|handler| handler.name() == name)
            .cloned()
            .ok_or_else(|| AuthError::InvalidHandler(name.to_string()))
    }

    pub fn on(&self, kind: AuthEventKind, listener: EventListener) -> SubscriptionId {
        self.inner.events.subscribe(kind, listener)
    }

    pub fn off(&self, kind: AuthEventKind, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(kind, id)
    }

    /// Log in; concurrent calls for the same provider share one round trip
    pub async fn login(&self, options: impl Into<AuthOptions>) -> AuthResult<Credential> {
        let options = options.into();
        let provider = self.provider(options.provider.as_deref())?;
        let handler = self.handler(options.handler.as_deref())?;

        let key = format!("{}.{}", provider.name(), AuthAction::Login);
        let inner = Rc::clone(&self.inner);
        self.inner
            .logins
            .run(&key, move || async move { inner.login(provider, handler).await })
            .await
    }

    /// Log out; fails with `logout_not_supported` before any handler is involved
    pub async fn logout(&self, options: impl Into<AuthOptions>) -> AuthResult<()> {
        let options = options.into();
        let provider = self.provider(options.provider.as_deref())?;
        provider.logout_url()?;
        let handler = self.handler(options.handler.as_deref())?;

        let key = format!("{}.{}", provider.name(), AuthAction::Logout);
        let inner = Rc::clone(&self.inner);
        self.inner
            .logouts
            .run(&key, move || async move { inner.logout(provider, handler).await })
            .await
    }

    /// Keep logging in through the default handler until the provider is satisfied
    pub async fn secure(
        &self,
        provider: Option<&str>,
        mut request: Option<SecureRequest<'_>>,
    ) -> AuthResult<()> {
        let provider = self.provider(provider)?;
        self.secure_with(provider, request.as_mut()).await
    }

    async fn secure_with(
        &self,
        provider: Arc<dyn Provider>,
        mut request: Option<&mut SecureRequest<'_>>,
    ) -> AuthResult<()> {
        loop {
            match provider.secure(request.as_deref_mut()).await? {
                SecureOutcome::Authenticated => return Ok(()),
                SecureOutcome::LoginRequired => {
                    let handler = self.handler(None)?;
                    if !handler.auto() {
                        return Err(AuthError::AutoUnsupported(handler.name().to_string()));
                    }

                    info!(
                        "{} needs a fresh login, retrying through {}",
                        provider.name(),
                        handler.name()
                    );
                    self.login(AuthOptions {
                        provider: Some(provider.name().to_string()),
                        handler: Some(handler.name().to_string()),
                    })
                    .await?;
                }
            }
        }
    }

    /// Secure every provider whose routes match `url`
    pub async fn check_route(&self, url: &str) -> AuthResult<()> {
        let providers: Vec<_> = self
            .inner
            .providers
            .iter()
            .filter(|provider| provider.routes().matches(url))
            .cloned()
            .collect();

        for provider in providers {
            debug!("Route {} is secured by {}", url, provider.name());
            self.secure_with(provider, None).await?;
        }
        Ok(())
    }

    /// Secure an outgoing request, attaching bearer credentials for matching endpoints
    pub async fn intercept(&self, mut request: SecureRequest<'_>) -> AuthResult<()> {
        let url = request.url().to_string();
        let providers: Vec<_> = self
            .inner
            .providers
            .iter()
            .filter(|provider| provider.endpoints().matches(&url))
            .cloned()
            .collect();

        for provider in providers {
            debug!("Request to {} is secured by {}", url, provider.name());
            self.secure_with(provider, Some(&mut request)).await?;
        }
        Ok(())
    }

    /// Finish a round trip interrupted by a full page load
    ///
    /// Every handler gets a chance to drop its stale markers; only the one that started
    /// the pending action receives it, and its response completes the login or logout.
    pub fn resume_after_reload(&self) -> AuthResult<()> {
        let storage = &self.inner.storage;
        let pending: Option<PendingAction> = match storage.get_json(PENDING) {
            Ok(pending) => pending,
            Err(err) => {
                storage.discard(PENDING);
                return Err(err);
            }
        };
        let action = pending.as_ref().map(PendingAction::action).transpose();

        let mut response = None;
        for handler in &self.inner.handlers {
            let responsible = pending
                .as_ref()
                .is_some_and(|pending| pending.handler == handler.name());
            let current = match (&action, responsible) {
                (Ok(action), true) => *action,
                _ => None,
            };

            let outcome = handler.connected(current);
            if responsible {
                response = Some(outcome);
            } else if let Err(err) = outcome {
                warn!("{} handler failed to reconcile: {}", handler.name(), err);
            }
        }
        storage.discard(PENDING);

        let Some(pending) = pending else {
            return Ok(());
        };
        // every path that does not validate a response must drop the single-use values
        let abandon = |err: Option<AuthError>| {
            if let Ok(provider) = self.provider(Some(&pending.provider)) {
                provider.discard_round_trip();
            }
            err.map_or(Ok(()), Err)
        };

        let action = match action {
            Ok(Some(action)) => action,
            Ok(None) => return abandon(None),
            Err(err) => return abandon(Some(err)),
        };
        info!(
            "Resuming {} for {} after reload",
            action, pending.provider
        );

        let params = match response {
            None => return abandon(Some(AuthError::InvalidHandler(pending.handler.clone()))),
            Some(Err(err)) => return abandon(Some(err)),
            Some(Ok(None)) => {
                debug!("{} handler had no response to resume", pending.handler);
                return abandon(None);
            }
            Some(Ok(Some(params))) => params,
        };

        let provider = self.provider(Some(&pending.provider))?;
        match action {
            AuthAction::Login => provider.validate(&params).map(|_| ()),
            AuthAction::Logout => AuthInner::complete_logout(provider.as_ref(), &params),
        }
    }
}

/// Builder for [`SpaAuth`]
#[derive(Default)]
pub struct SpaAuthBuilder {
    providers: Vec<Arc<dyn Provider>>,
    handlers: Vec<Arc<dyn Handler>>,
    default_handler: Option<String>,
    backend: Option<Arc<dyn StorageBackend>>,
    listeners: Vec<(AuthEventKind, EventListener)>,
}

impl SpaAuthBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Register a handler and make it the default; otherwise the first one is
    pub fn with_default_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.default_handler = Some(handler.name().to_string());
        self.handlers.push(handler);
        self
    }

    /// Backend for the pending-action record; defaults to session storage
    pub fn with_storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Subscribe before startup, so events from resuming a redirect are observed
    pub fn with_listener(mut self, kind: AuthEventKind, listener: EventListener) -> Self {
        self.listeners.push((kind, listener));
        self
    }

    /// Build the orchestrator and resume any round trip interrupted by a reload
    ///
    /// A response rejected during resumption is reported through the `login`/`logout`
    /// events and does not fail the build.
    pub fn build(self) -> AuthResult<SpaAuth> {
        ensure_unique("provider", self.providers.iter().map(|p| p.name()))?;
        ensure_unique("handler", self.handlers.iter().map(|h| h.name()))?;
        for provider in &self.providers {
            provider.connected()?;
        }

        let backend = match self.backend {
            Some(backend) => backend,
            None => storage::backend_for(StorageKind::Session)?,
        };

        let events = Arc::new(EventBus::new());
        for (kind, listener) in self.listeners {
            events.subscribe(kind, listener);
        }

        let mut forwarding = Vec::new();
        for provider in &self.providers {
            for kind in [AuthEventKind::Login, AuthEventKind::Logout] {
                let bus = Arc::clone(&events);
                let id = provider
                    .events()
                    .subscribe(kind, Arc::new(move |event: &AuthEvent| bus.publish(event)));
                forwarding.push((Arc::clone(provider), kind, id));
            }
        }

        let default_handler = self
            .default_handler
            .or_else(|| self.handlers.first().map(|h| h.name().to_string()));

        let auth = SpaAuth {
            inner: Rc::new(AuthInner {
                providers: self.providers,
                handlers: self.handlers,
                default_handler,
                storage: Storage::new(backend, "app"),
                events,
                forwarding,
                logins: Dedupe::new(),
                logouts: Dedupe::new(),
            }),
        };

        if let Err(err) = auth.resume_after_reload() {
            if !err.is_validation_failure() {
                return Err(err);
            }
            warn!("Discarded the response found on startup: {}", err);
        }

        info!("Authentication ready: {:?}", auth);
        Ok(auth)
    }
}

fn ensure_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> AuthResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        storage::validate_scope_name(kind, name)?;
        if !seen.insert(name) {
            return Err(AuthError::config(format!("duplicate {kind} name: {name}")));
        }
    }
    Ok(())
}
