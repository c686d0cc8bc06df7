//! Error types for the SPA authentication engine.
//!
//! Every variant maps onto a stable, machine-readable code (see [`AuthError::code`]) so
//! that listeners can react to failures without matching on display strings.

use thiserror::Error;

/// Errors produced by providers, handlers and the orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A provider or handler is missing configuration it cannot work without
    #[error("Missing required properties: {0}")]
    MissingRequiredProperties(String),

    /// Configuration could not be parsed or is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested storage backend is not available on this platform
    #[error("Invalid storage: {0}")]
    InvalidStorage(String),

    /// No provider registered under the given name
    #[error("Unable to find provider: {0}")]
    InvalidProvider(String),

    /// No handler registered under the given name
    #[error("Unable to find handler: {0}")]
    InvalidHandler(String),

    /// The returned state does not match the one sent with the request
    #[error("State provided by identity provider did not match local state")]
    InvalidState,

    /// The id token nonce does not match the one sent with the request
    #[error("Nonce provided by identity provider did not match local nonce")]
    InvalidNonce,

    /// Authorization code flow returned without a code
    #[error("Expected an authorization code to be returned by the provider")]
    InvalidCode,

    /// Implicit flow returned without an access token
    #[error("Expected an access token to be returned by the provider")]
    InvalidAccessToken,

    /// The id token is missing or could not be parsed
    #[error("Expected a valid id token to be returned by the provider: {0}")]
    InvalidIdToken(String),

    /// The id token audience does not include this client
    #[error("None of the audience values matched the client id")]
    InvalidAud,

    /// The id token authorized party does not match this client
    #[error("The authorized party did not match the client id")]
    InvalidAzp,

    /// The handler returned no response parameters at all
    #[error("The response provided was empty")]
    EmptyResponse,

    /// Error reported by the identity provider, passed through verbatim
    #[error("{}", provider_message(.code, .description))]
    Provider {
        code: String,
        description: Option<String>,
    },

    /// The provider has no end-session endpoint
    #[error("This provider doesn't support logout")]
    LogoutNotSupported,

    /// Automatic login was requested through a handler that needs a user gesture
    #[error("The {0} handler doesn't support automatic authentication")]
    AutoUnsupported(String),

    /// The browser refused to open a popup window
    #[error("We were unable to open the popup window, its likely that the request was blocked")]
    PopupBlocked,

    /// The browser refused to open a new tab
    #[error("We were unable to open the new tab, its likely that the request was blocked")]
    TabBlocked,

    /// The user closed the tab before being redirected back
    #[error("The user closed the tab before authentication completed")]
    TabClosed,

    /// No navigation happened within the redirect timeout
    #[error("Timed out while redirecting")]
    RedirectTimeout,

    /// A popup, tab or iframe did not return within its poll timeout
    #[error("Timed out waiting for the {0} handler to return")]
    PollTimeout(String),

    /// Bearer credentials cannot be attached to this kind of request
    #[error("Unknown request type: {0}")]
    UnknownRequest(String),

    /// The bearer header value could not be encoded
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    /// The persisted pending action is not one this engine knows about
    #[error("Unable to finish redirect due to an unknown action: {0}")]
    UnknownAction(String),

    /// A browser primitive failed
    #[error("Browser error: {0}")]
    Browser(String),

    /// A storage backend failed
    #[error("Storage error: {0}")]
    Storage(String),
}

fn provider_message(code: &str, description: &Option<String>) -> String {
    description.clone().unwrap_or_else(|| code.to_string())
}

impl AuthError {
    /// Create a provider-reported error
    pub fn provider<S: Into<String>>(code: S, description: Option<String>) -> Self {
        Self::Provider {
            code: code.into(),
            description,
        }
    }

    /// Create a browser error
    pub fn browser<S: Into<String>>(msg: S) -> Self {
        Self::Browser(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &str {
        match self {
            Self::MissingRequiredProperties(_) => "missing_required_properties",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidStorage(_) => "invalid_storage",
            Self::InvalidProvider(_) => "invalid_provider",
            Self::InvalidHandler(_) => "invalid_handler",
            Self::InvalidState => "invalid_state",
            Self::InvalidNonce => "invalid_nonce",
            Self::InvalidCode => "invalid_code",
            Self::InvalidAccessToken => "invalid_access_token",
            Self::InvalidIdToken(_) => "invalid_id_token",
            Self::InvalidAud => "invalid_aud",
            Self::InvalidAzp => "invalid_azp",
            Self::EmptyResponse => "empty_response",
            Self::Provider { code, .. } => code,
            Self::LogoutNotSupported => "logout_not_supported",
            Self::AutoUnsupported(_) => "auto_unsupported",
            Self::PopupBlocked => "popup_blocked",
            Self::TabBlocked => "tab_blocked",
            Self::TabClosed => "tab_closed",
            Self::RedirectTimeout => "redirect_timeout",
            Self::PollTimeout(_) => "poll_timeout",
            Self::UnknownRequest(_) => "unknown_request",
            Self::InvalidHeader(_) => "invalid_header",
            Self::UnknownAction(_) => "unknown_action",
            Self::Browser(_) => "browser_error",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Whether this error is a security check failure on the provider response
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidState
                | Self::InvalidNonce
                | Self::InvalidCode
                | Self::InvalidAccessToken
                | Self::InvalidIdToken(_)
                | Self::InvalidAud
                | Self::InvalidAzp
                | Self::EmptyResponse
                | Self::Provider { .. }
        )
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidConfig(format!("invalid url: {err}"))
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;
