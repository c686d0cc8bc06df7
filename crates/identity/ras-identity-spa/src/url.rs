//! Query/fragment parsing, URL construction and route matching.

use crate::error::AuthResult;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use url::{Url, form_urlencoded};

/// Response parameters returned by the identity provider
pub type Params = HashMap<String, String>;

/// Parse the query and fragment parameters of a URL
///
/// Fragment parameters win over query parameters with the same name, since implicit
/// flows return their tokens in the fragment.
pub fn parse_params(url: &str) -> Params {
    let (rest, fragment) = match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    };
    let query = rest.split_once('?').map(|(_, query)| query);

    let mut params = Params::new();
    for part in [query, fragment].into_iter().flatten() {
        // hash routers put a path before the parameters, e.g. `#/callback?code=...`
        let part = part.split_once('?').map_or(part, |(_, params)| params);
        for (key, value) in form_urlencoded::parse(part.as_bytes()) {
            if !key.is_empty() {
                params.insert(key.into_owned(), value.into_owned());
            }
        }
    }
    params
}

/// Append query parameters to `base`, skipping `None` values
pub fn build_url<I, K, V>(base: &str, params: I) -> AuthResult<String>
where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(base)?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            if let Some(value) = value {
                query.append_pair(key.as_ref(), value.as_ref());
            }
        }
    }
    // `query_pairs_mut` leaves a dangling `?` when nothing was appended
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url.into())
}

/// The URL without its fragment
pub fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(rest, _)| rest)
}

/// Whether `url` starts with `prefix`, comparing normalized forms when both parse
pub fn starts_with_url(url: &str, prefix: &str) -> bool {
    match (Url::parse(url), Url::parse(prefix)) {
        (Ok(url), Ok(prefix)) => url.as_str().starts_with(prefix.as_str()),
        _ => url.starts_with(prefix),
    }
}

/// Resolve a possibly relative URL against `base`
pub fn resolve_url(base: &str, url: &str) -> AuthResult<String> {
    Ok(Url::parse(base)?.join(url)?.into())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Prefix(String),
    Regex { regex: String },
}

/// A route or endpoint pattern
///
/// Deserializes from either a plain string (a URL prefix, possibly relative) or
/// `{ "regex": "..." }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawPattern")]
pub enum UrlPattern {
    Prefix(String),
    Regex(Regex),
}

impl TryFrom<RawPattern> for UrlPattern {
    type Error = regex::Error;

    fn try_from(raw: RawPattern) -> Result<Self, Self::Error> {
        match raw {
            RawPattern::Prefix(prefix) => Ok(Self::Prefix(prefix)),
            RawPattern::Regex { regex } => Regex::new(&regex).map(Self::Regex),
        }
    }
}

impl UrlPattern {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn regex(pattern: &str) -> AuthResult<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| crate::error::AuthError::config(format!("invalid pattern: {e}")))
    }

    /// Whether `url` matches; relative prefixes are resolved against `url` itself
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Prefix(prefix) => match resolve_url(url, prefix) {
                Ok(resolved) => starts_with_url(url, &resolved),
                Err(_) => url.starts_with(prefix.as_str()),
            },
            Self::Regex(regex) => regex.is_match(url),
        }
    }
}

/// Which routes or endpoints a provider secures
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecuredRoutes {
    /// `true` secures everything, `false` nothing
    All(bool),
    Patterns(Vec<UrlPattern>),
}

impl Default for SecuredRoutes {
    fn default() -> Self {
        Self::All(false)
    }
}

impl From<Vec<UrlPattern>> for SecuredRoutes {
    fn from(patterns: Vec<UrlPattern>) -> Self {
        Self::Patterns(patterns)
    }
}

impl SecuredRoutes {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::All(all) => *all,
            Self::Patterns(patterns) => patterns.iter().any(|pattern| pattern.matches(url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_query_and_fragment() {
        let params = parse_params(
            "https://app.example.com/callback?code=abc&state=s1#access_token=t%201&state=s2",
        );

        assert_eq!(params.get("code").map(String::as_str), Some("abc"));
        assert_eq!(params.get("access_token").map(String::as_str), Some("t 1"));
        assert_eq!(params.get("state").map(String::as_str), Some("s2"));
    }

    #[test]
    fn test_parse_hash_route() {
        let params = parse_params("https://app.example.com/#/callback?code=abc");
        assert_eq!(params.get("code").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_parse_without_params() {
        assert!(parse_params("https://app.example.com/").is_empty());
        assert!(parse_params("https://app.example.com/?#").is_empty());
    }

    #[test]
    fn test_build_url() {
        let url = build_url(
            "https://idp.example.com/authorize?audience=api",
            [
                ("client_id", Some("abc")),
                ("scope", None),
                ("redirect_uri", Some("https://app.example.com/cb")),
            ],
        )
        .unwrap();

        assert_eq!(
            url,
            "https://idp.example.com/authorize?audience=api&client_id=abc&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb"
        );
    }

    #[test]
    fn test_build_url_without_params() {
        let url = build_url("https://idp.example.com/logout", [("x", None::<&str>)]).unwrap();
        assert_eq!(url, "https://idp.example.com/logout");
        assert!(build_url("not a url", [("x", Some("y"))]).is_err());
    }

    #[test]
    fn test_strip_fragment() {
        assert_eq!(
            strip_fragment("https://app.example.com/a?b=1#token=x"),
            "https://app.example.com/a?b=1"
        );
        assert_eq!(strip_fragment("https://app.example.com"), "https://app.example.com");
    }

    #[test]
    fn test_starts_with_url_normalizes() {
        assert!(starts_with_url(
            "https://app.example.com/?code=abc",
            "https://app.example.com"
        ));
        assert!(starts_with_url(
            "https://app.example.com/callback#access_token=x",
            "https://app.example.com/callback"
        ));
        assert!(!starts_with_url(
            "https://idp.example.com/login",
            "https://app.example.com"
        ));
        assert!(!starts_with_url("about:blank", "https://app.example.com"));
    }

    #[test]
    fn test_url_patterns() {
        let relative = UrlPattern::prefix("/account");
        assert!(relative.matches("https://app.example.com/account/settings"));
        assert!(!relative.matches("https://app.example.com/home"));

        let absolute = UrlPattern::prefix("https://api.example.com/v1");
        assert!(absolute.matches("https://api.example.com/v1/users"));
        assert!(!absolute.matches("https://app.example.com/v1/users"));

        let regex = UrlPattern::regex(r"^https://api\.example\.com/.*/secure").unwrap();
        assert!(regex.matches("https://api.example.com/v2/secure/data"));
        assert!(!regex.matches("https://api.example.com/v2/public"));

        assert!(UrlPattern::regex("(").is_err());
    }

    #[test]
    fn test_secured_routes_deserialize() {
        let all: SecuredRoutes = serde_json::from_str("true").unwrap();
        assert!(all.matches("https://app.example.com/anything"));

        let none = SecuredRoutes::default();
        assert!(!none.matches("https://app.example.com/anything"));

        let patterns: SecuredRoutes =
            serde_json::from_str(r#"["/account", {"regex": "admin$"}]"#).unwrap();
        assert!(patterns.matches("https://app.example.com/account"));
        assert!(patterns.matches("https://app.example.com/x/admin"));
        assert!(!patterns.matches("https://app.example.com/home"));

        let invalid: Result<SecuredRoutes, _> = serde_json::from_str(r#"[{"regex": "("}]"#);
        assert!(invalid.is_err());
    }
}
