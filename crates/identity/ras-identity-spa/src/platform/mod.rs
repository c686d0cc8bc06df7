//! Browser primitives the handlers drive
//!
//! Handlers never touch `web-sys` directly: they talk to a [`Browser`] and the
//! [`BrowsingContext`]s it opens. `platform::web` implements both on top of the DOM; tests
//! script them in memory.

use crate::error::AuthResult;
use std::time::Duration;
use thiserror::Error;

#[cfg(target_arch = "wasm32")]
pub mod web;

/// Reading the location of a browsing context failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The context is showing a page from another origin
    #[error("Blocked by the same-origin policy")]
    CrossOrigin,

    /// The context has been closed or detached
    #[error("The browsing context is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Errors that are expected while the identity provider's own pages are displayed
pub fn is_transient_cross_origin_error(err: &ContextError) -> bool {
    matches!(err, ContextError::CrossOrigin)
}

/// A window, tab or iframe opened by a handler
pub trait BrowsingContext {
    /// The current location of the context
    fn location(&self) -> Result<String, ContextError>;

    /// Whether the user (or script) closed the context
    fn is_closed(&self) -> bool;

    /// Close the window, or remove the iframe
    fn close(&self) -> AuthResult<()>;
}

/// Size hints for a popup window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupOptions {
    pub width: u32,
    pub height: u32,
}

/// Position and size of the opener window, in screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl PopupOptions {
    /// `window.open` feature string centring the popup on `opener`
    pub fn features(&self, opener: WindowBounds) -> String {
        let width = self.width as i32;
        let height = self.height as i32;
        let left = opener.left + (opener.width - width) / 2;
        let top = opener.top + (opener.height - height) / 2;
        format!("popup=yes,width={width},height={height},left={left},top={top}")
    }
}

/// Navigation and window primitives
pub trait Browser: Send + Sync {
    /// Full URL of the current page
    fn current_url(&self) -> AuthResult<String>;

    /// Navigate the current page away, unloading it
    fn navigate(&self, url: &str) -> AuthResult<()>;

    /// Replace the visible URL without reloading
    fn replace_location(&self, url: &str) -> AuthResult<()>;

    /// Open a popup window; `None` when the browser blocked it
    fn open_popup(
        &self,
        url: &str,
        options: &PopupOptions,
    ) -> AuthResult<Option<Box<dyn BrowsingContext>>>;

    /// Open a new tab; `None` when the browser blocked it
    fn open_tab(&self, url: &str) -> AuthResult<Option<Box<dyn BrowsingContext>>>;

    /// Create an iframe in the current document
    fn create_iframe(&self, url: &str, visible: bool) -> AuthResult<Box<dyn BrowsingContext>>;
}

/// Suspend the current task
#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Suspend the current task
#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_popup_is_centred_on_opener() {
        let options = PopupOptions {
            width: 600,
            height: 400,
        };
        let features = options.features(WindowBounds {
            left: 100,
            top: 50,
            width: 1400,
            height: 900,
        });

        assert_eq!(features, "popup=yes,width=600,height=400,left=500,top=300");
    }

    #[test]
    fn test_cross_origin_classification() {
        assert!(is_transient_cross_origin_error(&ContextError::CrossOrigin));
        assert!(!is_transient_cross_origin_error(&ContextError::Closed));
        assert!(!is_transient_cross_origin_error(&ContextError::Other(
            "boom".into()
        )));
    }
}
