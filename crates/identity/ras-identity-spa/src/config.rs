//! Configuration types for providers and handlers
//!
//! Everything here deserializes from the JSON a host page hands over, and can also be
//! assembled in code through the generated builders.

use crate::error::{AuthError, AuthResult};
use crate::handler::AuthAction;
use crate::storage::StorageKind;
use crate::url::SecuredRoutes;
use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which credential the authorization endpoint should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "token")]
    Token,
    #[serde(rename = "id_token")]
    IdToken,
    #[serde(rename = "id_token token")]
    IdTokenToken,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
            Self::IdToken => "id_token",
            Self::IdTokenToken => "id_token token",
        }
    }

    pub fn wants_access_token(&self) -> bool {
        matches!(self, Self::Token | Self::IdTokenToken)
    }

    pub fn wants_id_token(&self) -> bool {
        matches!(self, Self::IdToken | Self::IdTokenToken)
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // providers accept the two-part type in either order
        match s.trim() {
            "code" => Ok(Self::Code),
            "token" => Ok(Self::Token),
            "id_token" => Ok(Self::IdToken),
            "id_token token" | "token id_token" => Ok(Self::IdTokenToken),
            other => Err(AuthError::config(format!("unsupported response type: {other}"))),
        }
    }
}

/// Which response checks `validate` performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(from = "RawValidation")]
pub struct ValidationConfig {
    #[builder(default = true)]
    pub state: bool,
    #[builder(default = true)]
    pub nonce: bool,
    #[builder(default = true)]
    pub aud: bool,
    #[builder(default = true)]
    pub azp: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::all(true)
    }
}

impl ValidationConfig {
    pub fn all(enabled: bool) -> Self {
        Self {
            state: enabled,
            nonce: enabled,
            aud: enabled,
            azp: enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::all(false)
    }
}

fn enabled() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValidation {
    Toggle(bool),
    Checks {
        #[serde(default = "enabled")]
        state: bool,
        #[serde(default = "enabled")]
        nonce: bool,
        #[serde(default = "enabled")]
        aud: bool,
        #[serde(default = "enabled")]
        azp: bool,
    },
}

impl From<RawValidation> for ValidationConfig {
    fn from(raw: RawValidation) -> Self {
        match raw {
            RawValidation::Toggle(enabled) => Self::all(enabled),
            RawValidation::Checks {
                state,
                nonce,
                aud,
                azp,
            } => Self {
                state,
                nonce,
                aud,
                azp,
            },
        }
    }
}

/// Where the identity provider sends the user back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RedirectUrl {
    Single(String),
    Split { login: String, logout: String },
}

impl RedirectUrl {
    pub fn resolve(&self, action: AuthAction) -> &str {
        match (self, action) {
            (Self::Single(url), _) => url,
            (Self::Split { login, .. }, AuthAction::Login) => login,
            (Self::Split { logout, .. }, AuthAction::Logout) => logout,
        }
    }
}

impl From<&str> for RedirectUrl {
    fn from(url: &str) -> Self {
        Self::Single(url.to_string())
    }
}

impl From<String> for RedirectUrl {
    fn from(url: String) -> Self {
        Self::Single(url)
    }
}

/// Authorization and end-session endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct ProviderUrls {
    #[builder(into)]
    pub login: String,
    #[builder(into)]
    pub logout: Option<String>,
}

/// Static configuration of one identity provider
#[derive(Debug, Clone, Deserialize, Builder)]
pub struct ProviderConfig {
    /// Overrides the provider's default name (`oauth2` / `openid`)
    #[builder(into)]
    pub name: Option<String>,

    #[builder(into)]
    #[serde(default)]
    pub client_id: String,

    pub url: ProviderUrls,

    #[builder(into)]
    pub redirect_url: RedirectUrl,

    /// Defaults to `token` for OAuth2 and `id_token` for OpenID
    pub response_type: Option<ResponseType>,

    /// Defaults to `openid` for OpenID providers
    #[builder(into)]
    pub scope: Option<String>,

    /// Application routes that require authentication
    #[serde(default)]
    #[builder(default)]
    pub routes: SecuredRoutes,

    /// Outgoing request URLs that receive a bearer token
    #[serde(default)]
    #[builder(default)]
    pub endpoints: SecuredRoutes,

    #[serde(default)]
    #[builder(default)]
    pub validation: ValidationConfig,

    /// Extra parameters appended to every authorize URL
    #[serde(default)]
    #[builder(default)]
    pub query_params: BTreeMap<String, String>,

    #[serde(default)]
    #[builder(default)]
    pub storage: StorageKind,
}

impl ProviderConfig {
    /// Parse a provider configuration from JSON
    pub fn from_json(json: &str) -> AuthResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn duration_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_duration_ms<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
}

fn default_redirect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_popup_width() -> u32 {
    600
}

fn default_popup_height() -> u32 {
    400
}

/// Redirect handler configuration; durations are milliseconds in JSON
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Builder)]
pub struct RedirectConfig {
    /// How long `open` waits for the navigation before failing
    #[serde(default = "default_redirect_timeout", deserialize_with = "duration_ms")]
    #[builder(default = default_redirect_timeout())]
    pub timeout: Duration,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            timeout: default_redirect_timeout(),
        }
    }
}

/// Location polling used by popup, tab and iframe handlers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Builder)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval", deserialize_with = "duration_ms")]
    #[builder(default = default_poll_interval())]
    pub interval: Duration,

    /// Give up after this long; unbounded when unset
    #[serde(default, deserialize_with = "optional_duration_ms")]
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Builder)]
pub struct PopupConfig {
    #[serde(default = "default_popup_width")]
    #[builder(default = default_popup_width())]
    pub width: u32,

    #[serde(default = "default_popup_height")]
    #[builder(default = default_popup_height())]
    pub height: u32,

    #[serde(flatten)]
    #[builder(default)]
    pub poll: PollConfig,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            width: default_popup_width(),
            height: default_popup_height(),
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Builder)]
pub struct TabConfig {
    #[serde(flatten)]
    #[builder(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Builder)]
pub struct IFrameConfig {
    /// Show the frame instead of hiding it
    #[serde(default)]
    #[builder(default)]
    pub visible: bool,

    #[serde(flatten)]
    #[builder(default)]
    pub poll: PollConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_provider_config_from_json() {
        let config = ProviderConfig::from_json(
            r#"{
                "client_id": "abc",
                "url": { "login": "https://idp.example.com/authorize" },
                "redirect_url": { "login": "https://app.example.com/in", "logout": "https://app.example.com/out" },
                "response_type": "id_token token",
                "routes": ["/account"],
                "validation": { "aud": false },
                "query_params": { "audience": "api" },
                "storage": "local"
            }"#,
        )
        .unwrap();

        assert_eq!(config.client_id, "abc");
        assert_eq!(config.url.logout, None);
        assert_eq!(config.response_type, Some(ResponseType::IdTokenToken));
        assert_eq!(
            config.redirect_url.resolve(AuthAction::Logout),
            "https://app.example.com/out"
        );
        assert_eq!(
            config.validation,
            ValidationConfig {
                state: true,
                nonce: true,
                aud: false,
                azp: true
            }
        );
        assert!(config.routes.matches("https://app.example.com/account"));
        assert!(!config.endpoints.matches("https://api.example.com/"));
        assert_eq!(config.query_params["audience"], "api");
        assert_eq!(config.storage, StorageKind::Local);
    }

    #[test]
    fn test_validation_toggle() {
        let config: ValidationConfig = serde_json::from_str("false").unwrap();
        assert_eq!(config, ValidationConfig::disabled());

        let config: ValidationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ValidationConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ProviderConfig::from_json("{").unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn test_response_type_parsing() {
        assert_eq!("token id_token".parse::<ResponseType>().unwrap(), ResponseType::IdTokenToken);
        assert_eq!(ResponseType::Code.to_string(), "code");
        assert!("password".parse::<ResponseType>().is_err());
        assert!(ResponseType::IdTokenToken.wants_access_token());
        assert!(!ResponseType::Code.wants_id_token());
    }

    #[test]
    fn test_handler_defaults() {
        let popup: PopupConfig = serde_json::from_str(r#"{ "timeout": 5000 }"#).unwrap();
        assert_eq!((popup.width, popup.height), (600, 400));
        assert_eq!(popup.poll.interval, Duration::from_millis(100));
        assert_eq!(popup.poll.timeout, Some(Duration::from_secs(5)));

        let redirect = RedirectConfig::builder().build();
        assert_eq!(redirect.timeout, Duration::from_secs(10));

        let iframe = IFrameConfig::builder().visible(true).build();
        assert!(iframe.visible);
        assert_eq!(iframe.poll, PollConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = ProviderConfig::builder()
            .client_id("abc")
            .url(ProviderUrls::builder().login("https://idp.example.com/authorize").build())
            .redirect_url("https://app.example.com")
            .build();

        assert_eq!(config.name, None);
        assert_eq!(config.validation, ValidationConfig::default());
        assert!(config.query_params.is_empty());
    }
}
