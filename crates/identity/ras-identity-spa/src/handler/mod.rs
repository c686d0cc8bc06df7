//! Transports that carry the user to the identity provider and back.

use crate::error::{AuthError, AuthResult};
use crate::url::Params;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

mod iframe;
mod poll;
mod popup;
mod redirect;
mod tab;

pub use iframe::IFrameHandler;
pub use popup::PopupHandler;
pub use redirect::RedirectHandler;
pub use tab::TabHandler;

/// The user-triggered operations a handler carries out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAction {
    Login,
    Logout,
}

impl AuthAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
        }
    }
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthAction {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            other => Err(AuthError::UnknownAction(other.to_string())),
        }
    }
}

/// What a handler is asked to open
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    /// Fully parameterized provider URL
    pub url: &'a str,
    /// The provider sends the user back to a URL starting with this
    pub redirect_url: &'a str,
    /// Overrides the handler's configured timeout
    pub timeout: Option<Duration>,
}

impl<'a> OpenRequest<'a> {
    pub fn new(url: &'a str, redirect_url: &'a str) -> Self {
        Self {
            url,
            redirect_url,
            timeout: None,
        }
    }
}

/// A transport strategy
#[async_trait(?Send)]
pub trait Handler: Send + Sync {
    /// Unique name the orchestrator looks the handler up by
    fn name(&self) -> &str;

    /// Whether the handler can run without a user gesture
    fn auto(&self) -> bool;

    /// Take the user to `request.url` and return the response parameters
    async fn open(&self, request: OpenRequest<'_>) -> AuthResult<Params>;

    /// Called once at startup
    ///
    /// `action` is set only on the handler responsible for the pending action; every other
    /// handler gets `None` and should just drop its stale markers.
    fn connected(&self, action: Option<AuthAction>) -> AuthResult<Option<Params>> {
        let _ = action;
        Ok(None)
    }
}
