//! Identity provider configuration, token state and response validation.

use crate::config::{ProviderConfig, ResponseType};
use crate::error::AuthResult;
use crate::events::{Credential, EventBus};
use crate::handler::AuthAction;
use crate::request::SecureRequest;
use crate::token::{AccessToken, IdToken};
use crate::url::{Params, SecuredRoutes};
use async_trait::async_trait;
use bon::Builder;
use std::collections::BTreeMap;

mod oauth2;
mod openid;

pub use oauth2::OAuth2Provider;
pub use openid::OpenIdProvider;

/// Per-call changes to the authorize URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct LoginOverrides {
    pub response_type: Option<ResponseType>,
    #[builder(into)]
    pub prompt: Option<String>,
    #[builder(default)]
    pub params: BTreeMap<String, String>,
}

/// Result of asking a provider whether its credentials are usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureOutcome {
    /// Credentials are current; any request passed in now carries them
    Authenticated,
    /// A full interactive login is needed first
    LoginRequired,
}

/// An identity provider
///
/// Token state is never written directly: `validate` persists the response and `sync`
/// re-reads it from storage.
#[async_trait(?Send)]
pub trait Provider: Send + Sync {
    /// Unique name, also the storage scope
    fn name(&self) -> &str;

    fn config(&self) -> &ProviderConfig;

    /// Base authorization endpoint
    fn login_url(&self) -> &str;

    /// Base end-session endpoint; `logout_not_supported` when there is none
    fn logout_url(&self) -> AuthResult<&str>;

    fn redirect_url(&self, action: AuthAction) -> &str;

    /// Generate fresh single-use values and return the parameterized authorize URL
    fn build_login_url(&self, overrides: &LoginOverrides) -> AuthResult<String>;

    /// Parameterized end-session URL
    fn build_logout_url(&self) -> AuthResult<String>;

    /// Check a response, persist its credential and publish the `login` event
    fn validate(&self, params: &Params) -> AuthResult<Credential>;

    /// Make sure credentials are current, attaching them to `request` when given
    async fn secure(&self, request: Option<&mut SecureRequest<'_>>) -> AuthResult<SecureOutcome>;

    /// Re-read token state from storage
    fn sync(&self) -> AuthResult<()>;

    /// Check the configuration is usable
    fn connected(&self) -> AuthResult<()>;

    /// Drop everything this provider has stored
    fn reset(&self) -> AuthResult<()>;

    /// Drop the single-use values of a round trip that produced no response
    fn discard_round_trip(&self);

    fn access_token(&self) -> AccessToken;

    fn id_token(&self) -> Option<IdToken> {
        None
    }

    /// Authorization code of the last code-flow login
    fn code(&self) -> Option<String>;

    fn events(&self) -> &EventBus;

    fn routes(&self) -> &SecuredRoutes {
        &self.config().routes
    }

    fn endpoints(&self) -> &SecuredRoutes {
        &self.config().endpoints
    }
}
