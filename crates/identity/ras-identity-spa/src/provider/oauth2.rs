//! OAuth2 bearer-token provider, also the core the OpenID provider wraps.

use super::{LoginOverrides, Provider, SecureOutcome};
use crate::config::{ProviderConfig, ResponseType};
use crate::error::{AuthError, AuthResult};
use crate::events::{AuthEvent, Credential, EventBus};
use crate::handler::AuthAction;
use crate::request::SecureRequest;
use crate::storage::{self, Storage, StorageBackend, keys};
use crate::token::AccessToken;
use crate::url::{Params, build_url};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct TokenState {
    code: Option<String>,
    access_token: AccessToken,
}

/// Generic OAuth2 provider supporting the `code` and `token` response types
pub struct OAuth2Provider {
    name: String,
    config: ProviderConfig,
    response_type: ResponseType,
    scope: Option<String>,
    storage: Storage,
    events: EventBus,
    tokens: Mutex<TokenState>,
}

impl std::fmt::Debug for OAuth2Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Provider")
            .field("name", &self.name)
            .field("response_type", &self.response_type)
            .field("storage", &self.storage)
            .finish()
    }
}

impl OAuth2Provider {
    pub const NAME: &'static str = "oauth2";

    /// Create a provider persisting into the browser storage named by the config
    pub fn new(config: ProviderConfig) -> AuthResult<Self> {
        let backend = storage::backend_for(config.storage)?;
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: ProviderConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> AuthResult<Self> {
        let provider = Self::with_defaults(config, backend, Self::NAME, ResponseType::Token, None)?;
        if provider.response_type.wants_id_token() {
            return Err(AuthError::config(format!(
                "{} cannot request id tokens, use an OpenID provider",
                provider.name
            )));
        }
        Ok(provider)
    }

    pub(crate) fn with_defaults(
        config: ProviderConfig,
        backend: Arc<dyn StorageBackend>,
        default_name: &str,
        default_response_type: ResponseType,
        default_scope: Option<&str>,
    ) -> AuthResult<Self> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| default_name.to_string());
        storage::validate_scope_name("provider", &name)?;

        let provider = Self {
            storage: Storage::for_provider(backend, &name),
            response_type: config.response_type.unwrap_or(default_response_type),
            scope: config.scope.clone().or(default_scope.map(String::from)),
            events: EventBus::new(),
            tokens: Mutex::new(TokenState::default()),
            name,
            config,
        };
        provider.sync_tokens()?;
        Ok(provider)
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn tokens(&self) -> MutexGuard<'_, TokenState> {
        self.tokens.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn sync_tokens(&self) -> AuthResult<()> {
        let state = TokenState {
            code: self.storage.get(keys::CODE)?,
            access_token: AccessToken::from_storage(&self.storage)?,
        };
        *self.tokens() = state;
        Ok(())
    }

    pub(crate) fn build_login_url_with(&self, overrides: &LoginOverrides) -> AuthResult<String> {
        let state = Uuid::new_v4().to_string();
        let response_type = overrides.response_type.unwrap_or(self.response_type);

        self.storage.set(keys::STATE, &state)?;
        self.storage.set(keys::RESPONSE_TYPE, response_type.as_str())?;

        let mut params: Vec<(&str, Option<&str>)> = vec![
            ("client_id", Some(self.config.client_id.as_str())),
            ("response_type", Some(response_type.as_str())),
            ("redirect_uri", Some(self.redirect_url(AuthAction::Login))),
            ("scope", self.scope.as_deref()),
            ("state", Some(state.as_str())),
            ("prompt", overrides.prompt.as_deref()),
        ];
        params.extend(
            self.config
                .query_params
                .iter()
                .chain(&overrides.params)
                .map(|(key, value)| (key.as_str(), Some(value.as_str()))),
        );

        debug!("Built {} login url ({})", self.name, response_type);
        build_url(&self.config.url.login, params)
    }

    /// Checks shared by every response type; returns the response type that was requested
    pub(crate) fn check_response(&self, params: &Params) -> AuthResult<ResponseType> {
        if params.is_empty() {
            return Err(AuthError::EmptyResponse);
        }

        if let Some(code) = params.get("error") {
            return Err(AuthError::provider(
                code.as_str(),
                params.get("error_description").cloned(),
            ));
        }

        if self.config.validation.state {
            let stored = self.storage.get(keys::STATE)?;
            if stored.is_none() || stored.as_ref() != params.get("state") {
                return Err(AuthError::InvalidState);
            }
        }

        match self.storage.get(keys::RESPONSE_TYPE)? {
            Some(stored) => stored.parse(),
            None => Ok(self.response_type),
        }
    }

    pub(crate) fn code_from(params: &Params) -> AuthResult<String> {
        params.get("code").cloned().ok_or(AuthError::InvalidCode)
    }

    pub(crate) fn access_token_from(params: &Params) -> AuthResult<AccessToken> {
        let raw = params
            .get("access_token")
            .ok_or(AuthError::InvalidAccessToken)?;
        Ok(AccessToken::from_response(
            raw,
            params.get("expires_in").map(String::as_str),
            params.get("token_type").map(String::as_str),
        ))
    }

    /// Persist the credential of a `code` or `token` response
    pub(crate) fn persist(
        &self,
        response_type: ResponseType,
        params: &Params,
    ) -> AuthResult<Credential> {
        match response_type {
            ResponseType::Code => {
                let code = Self::code_from(params)?;
                self.storage.set(keys::CODE, &code)?;
                AccessToken::default().store(&self.storage)?;
                Ok(Credential::Code(code))
            }
            ResponseType::Token => {
                let token = Self::access_token_from(params)?;
                token.store(&self.storage)?;
                self.storage.delete(keys::CODE)?;
                Ok(Credential::AccessToken(token))
            }
            other => Err(AuthError::config(format!(
                "{} cannot handle a {} response",
                self.name, other
            ))),
        }
    }

    /// Drop single-use values, refresh state and publish the outcome
    pub(crate) fn finish_validation(
        &self,
        result: AuthResult<Credential>,
        sync: impl FnOnce() -> AuthResult<()>,
    ) -> AuthResult<Credential> {
        self.discard_round_trip();
        let synced = sync();
        let result = result.and_then(|credential| synced.map(|_| credential));

        match &result {
            Ok(_) => info!("Validated {} login response", self.name),
            Err(err) => warn!("{} login response rejected: {}", self.name, err),
        }

        self.events.publish(&AuthEvent::login(&self.name, result.clone()));
        result
    }

    /// Attach the bearer token, if any, to `request`
    pub(crate) fn attach(&self, request: &mut SecureRequest<'_>) -> AuthResult<()> {
        request.ensure_supported()?;
        if let Some(header) = self.access_token().authorization_header() {
            request.set_authorization(&header)?;
        }
        Ok(())
    }

    pub(crate) fn build_logout_url_with(
        &self,
        params: Vec<(&str, Option<&str>)>,
    ) -> AuthResult<String> {
        let url = build_url(self.logout_url()?, params)?;
        debug!("Built {} logout url", self.name);
        Ok(url)
    }
}

#[async_trait(?Send)]
impl Provider for OAuth2Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn login_url(&self) -> &str {
        &self.config.url.login
    }

    fn logout_url(&self) -> AuthResult<&str> {
        self.config
            .url
            .logout
            .as_deref()
            .ok_or(AuthError::LogoutNotSupported)
    }

    fn redirect_url(&self, action: AuthAction) -> &str {
        self.config.redirect_url.resolve(action)
    }

    fn build_login_url(&self, overrides: &LoginOverrides) -> AuthResult<String> {
        self.build_login_url_with(overrides)
    }

    fn build_logout_url(&self) -> AuthResult<String> {
        self.build_logout_url_with(vec![
            ("client_id", Some(self.config.client_id.as_str())),
            ("redirect_uri", Some(self.redirect_url(AuthAction::Logout))),
        ])
    }

    fn validate(&self, params: &Params) -> AuthResult<Credential> {
        let result = self
            .check_response(params)
            .and_then(|response_type| self.persist(response_type, params));
        self.finish_validation(result, || self.sync_tokens())
    }

    async fn secure(&self, request: Option<&mut SecureRequest<'_>>) -> AuthResult<SecureOutcome> {
        if self.response_type == ResponseType::Token && self.access_token().expired() {
            debug!("{} access token expired, login required", self.name);
            return Ok(SecureOutcome::LoginRequired);
        }

        if let Some(request) = request {
            self.attach(request)?;
        }
        Ok(SecureOutcome::Authenticated)
    }

    fn sync(&self) -> AuthResult<()> {
        self.sync_tokens()
    }

    fn connected(&self) -> AuthResult<()> {
        let mut missing = Vec::new();
        if self.config.client_id.is_empty() {
            missing.push("client_id");
        }
        if self.config.url.login.is_empty() {
            missing.push("url.login");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::MissingRequiredProperties(missing.join(", ")))
        }
    }

    fn reset(&self) -> AuthResult<()> {
        self.storage.clear()?;
        self.sync_tokens()
    }

    fn discard_round_trip(&self) {
        self.storage.discard(keys::STATE);
        self.storage.discard(keys::NONCE);
        self.storage.discard(keys::RESPONSE_TYPE);
    }

    fn access_token(&self) -> AccessToken {
        self.tokens().access_token.clone()
    }

    fn code(&self) -> Option<String> {
        self.tokens().code.clone()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderUrls, ValidationConfig};
    use crate::events::AuthEventKind;
    use crate::request::FetchRequest;
    use crate::storage::MemoryStorage;
    use crate::token::now_millis;
    use crate::url::parse_params;
    use pretty_assertions::assert_eq;

    fn config(response_type: ResponseType) -> ProviderConfig {
        ProviderConfig::builder()
            .client_id("client-1")
            .url(
                ProviderUrls::builder()
                    .login("https://idp.example.com/authorize")
                    .logout("https://idp.example.com/logout")
                    .build(),
            )
            .redirect_url("https://app.example.com/")
            .response_type(response_type)
            .build()
    }

    fn provider(response_type: ResponseType) -> OAuth2Provider {
        OAuth2Provider::with_backend(config(response_type), Arc::new(MemoryStorage::new()))
            .unwrap()
    }

    fn login_state(provider: &OAuth2Provider) -> String {
        let url = provider.build_login_url(&LoginOverrides::default()).unwrap();
        parse_params(&url)["state"].clone()
    }

    fn response(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_login_url_parameters() {
        let mut config = config(ResponseType::Code);
        config.scope = Some("profile".into());
        config
            .query_params
            .insert("audience".into(), "api".into());
        let provider =
            OAuth2Provider::with_backend(config, Arc::new(MemoryStorage::new())).unwrap();

        let overrides = LoginOverrides::builder().prompt("login").build();
        let url = provider.build_login_url(&overrides).unwrap();
        let params = parse_params(&url);

        assert!(url.starts_with("https://idp.example.com/authorize?"));
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "https://app.example.com/");
        assert_eq!(params["scope"], "profile");
        assert_eq!(params["prompt"], "login");
        assert_eq!(params["audience"], "api");
        assert_eq!(
            provider.storage().get(keys::STATE).unwrap().as_ref(),
            Some(&params["state"])
        );
        assert_eq!(
            provider.storage().get(keys::RESPONSE_TYPE).unwrap(),
            Some("code".into())
        );
    }

    #[test]
    fn test_state_is_never_reused() {
        let provider = provider(ResponseType::Token);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            assert!(seen.insert(login_state(&provider)));
        }
    }

    #[test]
    fn test_code_flow_validation() {
        let provider = provider(ResponseType::Code);
        provider
            .storage()
            .set(keys::ACCESS_TOKEN, "stale-token")
            .unwrap();
        provider
            .storage()
            .set(keys::ACCESS_TOKEN_EXPIRATION, "1")
            .unwrap();
        provider.sync().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        provider.events().subscribe(
            AuthEventKind::Login,
            Arc::new(move |event| sink.lock().unwrap().push(event.clone())),
        );

        let state = login_state(&provider);
        let credential = provider
            .validate(&response(&[("state", state.as_str()), ("code", "abc")]))
            .unwrap();

        assert_eq!(credential, Credential::Code("abc".into()));
        assert_eq!(provider.storage().get(keys::CODE).unwrap(), Some("abc".into()));
        assert_eq!(provider.storage().get(keys::ACCESS_TOKEN).unwrap(), None);
        assert_eq!(
            provider.storage().get(keys::ACCESS_TOKEN_EXPIRATION).unwrap(),
            None
        );
        assert_eq!(provider.code(), Some("abc".into()));
        assert_eq!(provider.access_token().raw(), None);
        assert_eq!(
            *events.lock().unwrap(),
            vec![AuthEvent::login("oauth2", Ok(Credential::Code("abc".into())))]
        );
    }

    #[test]
    fn test_token_flow_validation() {
        let provider = provider(ResponseType::Token);
        let state = login_state(&provider);

        let credential = provider
            .validate(&response(&[
                ("state", state.as_str()),
                ("access_token", "tok"),
                ("expires_in", "3600"),
                ("token_type", "Bearer"),
            ]))
            .unwrap();

        let token = provider.access_token();
        assert_eq!(credential, Credential::AccessToken(token.clone()));
        assert_eq!(token.raw(), Some("tok"));
        assert_eq!(token.token_type(), Some("Bearer"));
        assert!(token.expiration().unwrap() > now_millis());
        assert!(!token.expired());
    }

    #[test]
    fn test_missing_access_token() {
        let provider = provider(ResponseType::Token);
        let state = login_state(&provider);

        let err = provider
            .validate(&response(&[("state", state.as_str())]))
            .unwrap_err();

        assert_eq!(err.code(), "invalid_access_token");
        assert_eq!(provider.storage().get(keys::STATE).unwrap(), None);
        assert_eq!(provider.storage().get(keys::RESPONSE_TYPE).unwrap(), None);
    }

    #[test]
    fn test_missing_code() {
        let provider = provider(ResponseType::Code);
        let state = login_state(&provider);

        let err = provider
            .validate(&response(&[("state", state.as_str())]))
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCode);
    }

    #[test]
    fn test_state_mismatch_and_cleanup() {
        let provider = provider(ResponseType::Token);
        login_state(&provider);

        let err = provider
            .validate(&response(&[("state", "forged"), ("access_token", "tok")]))
            .unwrap_err();

        assert_eq!(err, AuthError::InvalidState);
        assert_eq!(provider.storage().get(keys::STATE).unwrap(), None);
        assert_eq!(provider.access_token().raw(), None);
    }

    #[test]
    fn test_state_required_even_without_round_trip() {
        let provider = provider(ResponseType::Token);
        let err = provider
            .validate(&response(&[("access_token", "tok")]))
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidState);
    }

    #[test]
    fn test_disabled_state_validation() {
        let mut config = config(ResponseType::Token);
        config.validation = ValidationConfig::disabled();
        let provider =
            OAuth2Provider::with_backend(config, Arc::new(MemoryStorage::new())).unwrap();

        provider
            .validate(&response(&[("access_token", "tok")]))
            .unwrap();
        assert_eq!(provider.access_token().raw(), Some("tok"));
    }

    #[test]
    fn test_provider_error_passes_through() {
        let provider = provider(ResponseType::Token);
        login_state(&provider);

        let err = provider
            .validate(&response(&[
                ("error", "access_denied"),
                ("error_description", "The user denied access"),
            ]))
            .unwrap_err();

        assert_eq!(err.code(), "access_denied");
        assert_eq!(err.to_string(), "The user denied access");
        assert_eq!(provider.storage().get(keys::STATE).unwrap(), None);
    }

    #[test]
    fn test_empty_response() {
        let provider = provider(ResponseType::Token);
        let err = provider.validate(&Params::new()).unwrap_err();
        assert_eq!(err, AuthError::EmptyResponse);
    }

    #[tokio::test]
    async fn test_secure_requires_login_when_token_expired() {
        let provider = provider(ResponseType::Token);
        assert_eq!(provider.secure(None).await.unwrap(), SecureOutcome::LoginRequired);

        AccessToken::new(Some("old".into()), Some(now_millis() - 1), None)
            .store(provider.storage())
            .unwrap();
        provider.sync().unwrap();
        assert_eq!(provider.secure(None).await.unwrap(), SecureOutcome::LoginRequired);
    }

    #[tokio::test]
    async fn test_secure_attaches_bearer() {
        let provider = provider(ResponseType::Token);
        AccessToken::new(Some("tok".into()), Some(now_millis() + 60_000), None)
            .store(provider.storage())
            .unwrap();
        provider.sync().unwrap();

        let mut fetch = FetchRequest::get("https://api.example.com/users");
        let outcome = provider
            .secure(Some(&mut SecureRequest::Fetch(&mut fetch)))
            .await
            .unwrap();

        assert_eq!(outcome, SecureOutcome::Authenticated);
        assert_eq!(fetch.headers["authorization"], "Bearer tok");

        let err = provider
            .secure(Some(&mut SecureRequest::Other {
                kind: "beacon",
                url: "https://api.example.com/",
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_request");
    }

    #[tokio::test]
    async fn test_code_flow_is_always_secure() {
        let provider = provider(ResponseType::Code);
        assert_eq!(provider.secure(None).await.unwrap(), SecureOutcome::Authenticated);
    }

    #[test]
    fn test_logout_url() {
        let provider = provider(ResponseType::Token);
        let params = parse_params(&provider.build_logout_url().unwrap());
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "https://app.example.com/");

        let mut config = config(ResponseType::Token);
        config.url.logout = None;
        let provider =
            OAuth2Provider::with_backend(config, Arc::new(MemoryStorage::new())).unwrap();
        assert_eq!(provider.logout_url().unwrap_err(), AuthError::LogoutNotSupported);
        assert_eq!(
            provider.build_logout_url().unwrap_err(),
            AuthError::LogoutNotSupported
        );
    }

    #[test]
    fn test_connected_requires_client_id() {
        let mut config = config(ResponseType::Token);
        config.client_id = String::new();
        let provider =
            OAuth2Provider::with_backend(config, Arc::new(MemoryStorage::new())).unwrap();

        let err = provider.connected().unwrap_err();
        assert_eq!(err, AuthError::MissingRequiredProperties("client_id".into()));
    }

    #[test]
    fn test_rejects_id_token_response_types() {
        let err = OAuth2Provider::with_backend(
            config(ResponseType::IdToken),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn test_rejects_dotted_provider_name() {
        let mut config = config(ResponseType::Token);
        config.name = Some("google.work".into());
        let err = OAuth2Provider::with_backend(config, Arc::new(MemoryStorage::new()))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn test_reset_clears_scope() {
        let backend = Arc::new(MemoryStorage::new());
        let provider =
            OAuth2Provider::with_backend(config(ResponseType::Token), backend.clone()).unwrap();
        let other = Storage::for_provider(backend.clone(), "other");
        other.set(keys::ACCESS_TOKEN, "keep").unwrap();

        AccessToken::new(Some("tok".into()), None, None)
            .store(provider.storage())
            .unwrap();
        provider.sync().unwrap();
        provider.reset().unwrap();

        assert_eq!(provider.access_token().raw(), None);
        assert_eq!(other.get(keys::ACCESS_TOKEN).unwrap(), Some("keep".into()));
    }
}
