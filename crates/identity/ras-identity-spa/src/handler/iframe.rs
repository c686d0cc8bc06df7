use super::poll::wait_for_redirect;
use super::{Handler, OpenRequest};
use crate::config::{IFrameConfig, PollConfig};
use crate::error::AuthResult;
use crate::platform::Browser;
use crate::url::Params;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Hidden (or visible) iframe in the current document
///
/// Needs no user gesture, which makes it the transport for silent renewal.
pub struct IFrameHandler {
    browser: Arc<dyn Browser>,
    config: IFrameConfig,
}

impl IFrameHandler {
    pub const NAME: &'static str = "iframe";

    pub fn new(browser: Arc<dyn Browser>, config: IFrameConfig) -> Self {
        Self { browser, config }
    }
}

#[async_trait(?Send)]
impl Handler for IFrameHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn auto(&self) -> bool {
        true
    }

    async fn open(&self, request: OpenRequest<'_>) -> AuthResult<Params> {
        let frame = self
            .browser
            .create_iframe(request.url, self.config.visible)?;
        debug!("Created iframe for the identity provider");

        let poll = PollConfig {
            timeout: request.timeout.or(self.config.poll.timeout),
            ..self.config.poll.clone()
        };
        wait_for_redirect(frame.as_ref(), request.redirect_url, &poll, Self::NAME, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BrowsingContext;
    use crate::test_support::{FakeBrowser, Step};
    use std::time::Duration;

    #[tokio::test]
    async fn test_iframe_returns_response_and_is_removed() {
        let browser = FakeBrowser::at("https://app.example.com/");
        browser.script(vec![
            Step::At("about:blank".into()),
            Step::CrossOrigin,
            Step::At("https://app.example.com/#access_token=abc".into()),
        ]);
        let config = IFrameConfig::builder()
            .visible(true)
            .poll(
                PollConfig::builder()
                    .interval(Duration::from_millis(1))
                    .build(),
            )
            .build();
        let handler = IFrameHandler::new(browser.clone(), config);

        let params = handler
            .open(OpenRequest::new(
                "https://idp.example.com/authorize?prompt=none",
                "https://app.example.com",
            ))
            .await
            .unwrap();

        assert_eq!(params["access_token"], "abc");
        assert_eq!(browser.visible_iframes(), vec![true]);
        assert!(browser.opened()[0].is_closed());
        assert!(handler.auto());
    }

    #[tokio::test]
    async fn test_abandoned_iframe_is_removed() {
        let browser = FakeBrowser::at("https://app.example.com/");
        browser.script(vec![Step::CrossOrigin]);
        let config = IFrameConfig::builder()
            .poll(
                PollConfig::builder()
                    .interval(Duration::from_millis(1))
                    .build(),
            )
            .build();
        let handler = IFrameHandler::new(browser.clone(), config);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            handler.open(OpenRequest::new(
                "https://idp.example.com/authorize?prompt=none",
                "https://app.example.com",
            )),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(browser.opened().len(), 1);
        assert!(browser.opened()[0].is_closed());
    }
}
