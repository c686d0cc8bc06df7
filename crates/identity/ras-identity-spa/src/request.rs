//! Outgoing request shapes that can carry bearer credentials.

use crate::error::{AuthError, AuthResult};
use http::header::{AUTHORIZATION, HeaderValue};
use http::{HeaderMap, Method};

/// A fetch-style request: method, URL and a mutable header map
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }
}

/// An XHR-style request, which only exposes header setters
pub trait XhrRequest {
    fn url(&self) -> &str;

    fn set_request_header(&mut self, name: &str, value: &str) -> AuthResult<()>;
}

/// A request passed to `secure` or the request interceptor
pub enum SecureRequest<'a> {
    Fetch(&'a mut FetchRequest),
    Xhr(&'a mut dyn XhrRequest),
    /// Any other transport; bearer credentials cannot be attached to it
    Other { kind: &'a str, url: &'a str },
}

impl std::fmt::Debug for SecureRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(request) => f.debug_tuple("Fetch").field(&request.url).finish(),
            Self::Xhr(request) => f.debug_tuple("Xhr").field(&request.url()).finish(),
            Self::Other { kind, url } => f
                .debug_struct("Other")
                .field("kind", kind)
                .field("url", url)
                .finish(),
        }
    }
}

impl SecureRequest<'_> {
    pub fn url(&self) -> &str {
        match self {
            Self::Fetch(request) => &request.url,
            Self::Xhr(request) => request.url(),
            Self::Other { url, .. } => url,
        }
    }

    /// Fail with `unknown_request` unless credentials can be attached
    pub fn ensure_supported(&self) -> AuthResult<()> {
        match self {
            Self::Other { kind, .. } => Err(AuthError::UnknownRequest((*kind).to_string())),
            _ => Ok(()),
        }
    }

    /// Set the `Authorization` header
    pub fn set_authorization(&mut self, value: &str) -> AuthResult<()> {
        match self {
            Self::Fetch(request) => {
                let value = HeaderValue::from_str(value)
                    .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
                request.headers.insert(AUTHORIZATION, value);
                Ok(())
            }
            Self::Xhr(request) => request.set_request_header(AUTHORIZATION.as_str(), value),
            Self::Other { kind, .. } => Err(AuthError::UnknownRequest((*kind).to_string())),
        }
    }
}
