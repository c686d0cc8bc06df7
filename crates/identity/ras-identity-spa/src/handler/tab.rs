use super::poll::wait_for_redirect;
use super::{Handler, OpenRequest};
use crate::config::{PollConfig, TabConfig};
use crate::error::{AuthError, AuthResult};
use crate::platform::Browser;
use crate::url::Params;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// New browser tab; fails with `tab_closed` if the user closes it early
pub struct TabHandler {
    browser: Arc<dyn Browser>,
    config: TabConfig,
}

impl TabHandler {
    pub const NAME: &'static str = "tab";

    pub fn new(browser: Arc<dyn Browser>, config: TabConfig) -> Self {
        Self { browser, config }
    }
}

#[async_trait(?Send)]
impl Handler for TabHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn auto(&self) -> bool {
        false
    }

    async fn open(&self, request: OpenRequest<'_>) -> AuthResult<Params> {
        let Some(tab) = self.browser.open_tab(request.url)? else {
            warn!("New tab was blocked");
            return Err(AuthError::TabBlocked);
        };
        info!("Opened tab for the identity provider");

        let poll = PollConfig {
            timeout: request.timeout.or(self.config.poll.timeout),
            ..self.config.poll.clone()
        };
        wait_for_redirect(
            tab.as_ref(),
            request.redirect_url,
            &poll,
            Self::NAME,
            Some(AuthError::TabClosed),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BrowsingContext;
    use crate::test_support::{FakeBrowser, Step};
    use std::time::Duration;

    fn handler(browser: Arc<FakeBrowser>) -> TabHandler {
        let poll = PollConfig::builder()
            .interval(Duration::from_millis(1))
            .build();
        TabHandler::new(browser, TabConfig::builder().poll(poll).build())
    }

    fn request() -> OpenRequest<'static> {
        OpenRequest::new("https://idp.example.com/authorize", "https://app.example.com/cb")
    }

    #[tokio::test]
    async fn test_tab_returns_response() {
        let browser = FakeBrowser::at("https://app.example.com/");
        browser.script(vec![
            Step::CrossOrigin,
            Step::At("https://app.example.com/cb#access_token=abc&expires_in=60".into()),
        ]);

        let params = handler(browser.clone()).open(request()).await.unwrap();

        assert_eq!(params["access_token"], "abc");
        assert_eq!(params["expires_in"], "60");
        assert!(browser.opened()[0].is_closed());
    }

    #[tokio::test]
    async fn test_tab_closed_by_user() {
        let browser = FakeBrowser::at("https://app.example.com/");
        browser.script(vec![Step::CrossOrigin, Step::UserClosed]);

        let err = handler(browser).open(request()).await.unwrap_err();
        assert_eq!(err, AuthError::TabClosed);
    }

    #[tokio::test]
    async fn test_blocked_tab() {
        let browser = FakeBrowser::at("https://app.example.com/");
        browser.block_windows();

        let err = handler(browser).open(request()).await.unwrap_err();
        assert_eq!(err, AuthError::TabBlocked);
    }
}
