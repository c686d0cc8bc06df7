//! Client-side OAuth2 and OpenID Connect for single-page applications
//!
//! This crate runs the browser half of the implicit and authorization-code flows without a
//! backend session. It supports:
//!
//! - OAuth2 and OpenID Connect providers configured from JSON
//! - Redirect, popup, tab and iframe handlers for the round trip to the identity provider
//! - `state`, `nonce`, `aud` and `azp` validation of every response
//! - Token persistence in cookie, session or local storage under `ras.auth.*` keys
//! - Bearer header injection for requests to secured endpoints
//! - Automatic re-authentication on secured routes, including silent id-token renewal
//! - `login` / `logout` events and deduplication of concurrent logins
//!
//! # Platform Support
//!
//! - **Native**: In-memory storage and `tokio` timers; useful for tests and tooling
//! - **WASM**: `web-sys` storage backends and a [`platform::web::WebBrowser`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use ras_identity_spa::platform::Browser;
//! use ras_identity_spa::{
//!     AuthError, MemoryStorage, OpenIdProvider, PopupConfig, PopupHandler, ProviderConfig,
//!     SpaAuth,
//! };
//! use std::sync::Arc;
//!
//! async fn sign_in(browser: Arc<dyn Browser>) -> Result<(), AuthError> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let config = ProviderConfig::from_json(
//!         r#"{
//!             "name": "google",
//!             "client_id": "my-client",
//!             "url": { "login": "https://accounts.google.com/o/oauth2/v2/auth" },
//!             "redirect_url": "https://app.example.com/"
//!         }"#,
//!     )?;
//!
//!     let auth = SpaAuth::builder()
//!         .with_provider(Arc::new(OpenIdProvider::with_backend(config, storage.clone())?))
//!         .with_default_handler(Arc::new(PopupHandler::new(browser, PopupConfig::default())))
//!         .with_storage(storage)
//!         .build()?;
//!
//!     let credential = auth.login("google").await?;
//!     println!("Logged in: {}", credential.raw());
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod events;
pub mod handler;
pub mod platform;
pub mod provider;
pub mod request;
pub mod storage;
pub mod token;
pub mod url;

#[cfg(test)]
mod test_support;


pub use auth::{AuthOptions, PendingAction, SpaAuth, SpaAuthBuilder};
pub use config::{
    IFrameConfig, PollConfig, PopupConfig, ProviderConfig, ProviderUrls, RedirectConfig,
    RedirectUrl, ResponseType, TabConfig, ValidationConfig,
};
pub use error::{AuthError, AuthResult};
pub use events::{AuthEvent, AuthEventKind, Credential, EventBus, EventListener, SubscriptionId};
pub use handler::{
    AuthAction, Handler, IFrameHandler, OpenRequest, PopupHandler, RedirectHandler, TabHandler,
};
pub use provider::{LoginOverrides, OAuth2Provider, OpenIdProvider, Provider, SecureOutcome};
pub use request::{FetchRequest, SecureRequest, XhrRequest};
pub use storage::{MemoryStorage, Storage, StorageBackend, StorageKind};
pub use token::{AccessToken, Audience, IdToken, IdTokenClaims};
pub use self::url::{Params, SecuredRoutes, UrlPattern};
