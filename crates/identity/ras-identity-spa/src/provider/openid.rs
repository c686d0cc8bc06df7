//! OpenID Connect provider: id tokens, nonces and silent renewal on top of the OAuth2 core.

use super::oauth2::OAuth2Provider;
use super::{LoginOverrides, Provider, SecureOutcome};
use crate::config::{ProviderConfig, ResponseType};
use crate::error::{AuthError, AuthResult};
use crate::events::{AuthEvent, Credential, EventBus};
use crate::handler::{AuthAction, Handler, OpenRequest};
use crate::request::SecureRequest;
use crate::storage::{self, StorageBackend, keys};
use crate::token::{AccessToken, IdToken};
use crate::url::Params;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Provider errors meaning a `prompt=none` request needs the user after all
const INTERACTION_REQUIRED: &[&str] = &[
    "login_required",
    "interaction_required",
    "consent_required",
    "account_selection_required",
];

/// OpenID Connect provider
pub struct OpenIdProvider {
    core: OAuth2Provider,
    renewal: Option<Arc<dyn Handler>>,
    id_token: Mutex<IdToken>,
}

impl std::fmt::Debug for OpenIdProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenIdProvider")
            .field("core", &self.core)
            .field("renewal", &self.renewal.as_ref().map(|h| h.name().to_string()))
            .finish()
    }
}

impl OpenIdProvider {
    pub const NAME: &'static str = "openid";

    /// Create a provider persisting into the browser storage named by the config
    pub fn new(config: ProviderConfig) -> AuthResult<Self> {
        let backend = storage::backend_for(config.storage)?;
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: ProviderConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> AuthResult<Self> {
        let core = OAuth2Provider::with_defaults(
            config,
            backend,
            Self::NAME,
            ResponseType::IdToken,
            Some("openid"),
        )?;
        let provider = Self {
            core,
            renewal: None,
            id_token: Mutex::new(IdToken::default()),
        };
        provider.sync_id_token()?;
        Ok(provider)
    }

    /// Transport used for silent access token renewal, usually an iframe
    pub fn with_renewal(mut self, handler: Arc<dyn Handler>) -> Self {
        self.renewal = Some(handler);
        self
    }

    pub fn core(&self) -> &OAuth2Provider {
        &self.core
    }

    fn id_token_state(&self) -> MutexGuard<'_, IdToken> {
        self.id_token.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sync_id_token(&self) -> AuthResult<()> {
        let token = IdToken::new(self.core.storage().get(keys::ID_TOKEN)?);
        *self.id_token_state() = token;
        Ok(())
    }

    fn sync_all(&self) -> AuthResult<()> {
        self.core.sync_tokens()?;
        self.sync_id_token()
    }

    /// Parse and check the returned id token without persisting anything
    fn check_id_token(&self, params: &Params) -> AuthResult<IdToken> {
        let raw = params
            .get("id_token")
            .ok_or_else(|| AuthError::InvalidIdToken("no id token in the response".into()))?;
        let claims = IdToken::try_parse(raw)?;

        let validation = &self.core.config().validation;
        let client_id = self.core.config().client_id.as_str();

        if validation.nonce {
            let stored = self.core.storage().get(keys::NONCE)?;
            if stored.is_none() || stored != claims.nonce {
                return Err(AuthError::InvalidNonce);
            }
        }

        if validation.aud
            && !claims
                .aud
                .as_ref()
                .is_some_and(|aud| aud.contains(client_id))
        {
            return Err(AuthError::InvalidAud);
        }

        if validation.azp
            && claims.aud.as_ref().is_some_and(|aud| aud.len() > 1)
            && claims.azp.as_deref() != Some(client_id)
        {
            return Err(AuthError::InvalidAzp);
        }

        Ok(IdToken::new(Some(raw.clone())))
    }

    fn persist(&self, response_type: ResponseType, params: &Params) -> AuthResult<Credential> {
        let storage = self.core.storage();
        match response_type {
            ResponseType::Code | ResponseType::Token => self.core.persist(response_type, params),
            ResponseType::IdToken => {
                let id_token = self.check_id_token(params)?;
                storage.set_or_delete(keys::ID_TOKEN, id_token.raw())?;
                Ok(Credential::IdToken(id_token))
            }
            ResponseType::IdTokenToken => {
                let id_token = self.check_id_token(params)?;
                let access_token = OAuth2Provider::access_token_from(params)?;
                storage.set_or_delete(keys::ID_TOKEN, id_token.raw())?;
                access_token.store(storage)?;
                Ok(Credential::IdToken(id_token))
            }
        }
    }

    /// Fetch a fresh access token through the renewal transport without user interaction
    async fn renew(&self, handler: &dyn Handler) -> AuthResult<SecureOutcome> {
        info!("Silently renewing {} access token", self.name());

        let overrides = LoginOverrides {
            response_type: Some(ResponseType::Token),
            prompt: Some("none".to_string()),
            ..LoginOverrides::default()
        };
        let url = self.build_login_url(&overrides)?;
        let request = OpenRequest::new(&url, self.redirect_url(AuthAction::Login));

        let params = match handler.open(request).await {
            Ok(params) => params,
            Err(err) => {
                warn!("{} renewal through {} failed: {}", self.name(), handler.name(), err);
                self.discard_round_trip();
                self.events()
                    .publish(&AuthEvent::login(self.name(), Err(err.clone())));
                return Err(err);
            }
        };

        match self.validate(&params) {
            Ok(_) => Ok(SecureOutcome::Authenticated),
            Err(AuthError::Provider { code, .. })
                if INTERACTION_REQUIRED.contains(&code.as_str()) =>
            {
                debug!("{} renewal needs user interaction ({})", self.name(), code);
                Ok(SecureOutcome::LoginRequired)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait(?Send)]
impl Provider for OpenIdProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn config(&self) -> &ProviderConfig {
        self.core.config()
    }

    fn login_url(&self) -> &str {
        self.core.login_url()
    }

    fn logout_url(&self) -> AuthResult<&str> {
        self.core.logout_url()
    }

    fn redirect_url(&self, action: AuthAction) -> &str {
        self.core.redirect_url(action)
    }

    fn build_login_url(&self, overrides: &LoginOverrides) -> AuthResult<String> {
        let nonce = Uuid::new_v4().to_string();
        self.core.storage().set(keys::NONCE, &nonce)?;

        let mut overrides = overrides.clone();
        overrides.params.insert("nonce".to_string(), nonce);

        self.core
            .build_login_url_with(&overrides)
            .inspect_err(|_| self.discard_round_trip())
    }

    fn build_logout_url(&self) -> AuthResult<String> {
        let id_token = self.id_token_state().clone();
        self.core.build_logout_url_with(vec![
            ("id_token_hint", id_token.raw()),
            (
                "post_logout_redirect_uri",
                Some(self.redirect_url(AuthAction::Logout)),
            ),
            ("client_id", Some(self.config().client_id.as_str())),
        ])
    }

    fn validate(&self, params: &Params) -> AuthResult<Credential> {
        let result = self
            .core
            .check_response(params)
            .and_then(|response_type| self.persist(response_type, params));
        self.core.finish_validation(result, || self.sync_all())
    }

    async fn secure(&self, request: Option<&mut SecureRequest<'_>>) -> AuthResult<SecureOutcome> {
        let response_type = self.core.response_type();

        if response_type.wants_id_token() && self.id_token_state().expired() {
            debug!("{} id token expired, login required", self.name());
            return Ok(SecureOutcome::LoginRequired);
        }

        let needs_access_token = response_type.wants_access_token() || request.is_some();
        if needs_access_token
            && response_type != ResponseType::Code
            && self.access_token().expired()
        {
            let outcome = match &self.renewal {
                Some(handler) => self.renew(handler.as_ref()).await?,
                None => SecureOutcome::LoginRequired,
            };
            if outcome == SecureOutcome::LoginRequired {
                return Ok(outcome);
            }
        }

        if let Some(request) = request {
            self.core.attach(request)?;
        }
        Ok(SecureOutcome::Authenticated)
    }

    fn sync(&self) -> AuthResult<()> {
        self.sync_all()
    }

    fn connected(&self) -> AuthResult<()> {
        self.core.connected()
    }

    fn reset(&self) -> AuthResult<()> {
        self.core.storage().clear()?;
        self.sync_all()
    }

    fn discard_round_trip(&self) {
        self.core.discard_round_trip()
    }

    fn access_token(&self) -> AccessToken {
        self.core.access_token()
    }

    fn id_token(&self) -> Option<IdToken> {
        Some(self.id_token_state().clone())
    }

    fn code(&self) -> Option<String> {
        self.core.code()
    }

    fn events(&self) -> &EventBus {
        self.core.events()
    }
}
