use super::poll::wait_for_redirect;
use super::{Handler, OpenRequest};
use crate::config::{PollConfig, PopupConfig};
use crate::error::{AuthError, AuthResult};
use crate::platform::{Browser, PopupOptions};
use crate::url::Params;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Centred popup window; needs a user gesture to open
pub struct PopupHandler {
    browser: Arc<dyn Browser>,
    config: PopupConfig,
}

impl PopupHandler {
    pub const NAME: &'static str = "popup";

    pub fn new(browser: Arc<dyn Browser>, config: PopupConfig) -> Self {
        Self { browser, config }
    }
}

#[async_trait(?Send)]
impl Handler for PopupHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn auto(&self) -> bool {
        false
    }

    async fn open(&self, request: OpenRequest<'_>) -> AuthResult<Params> {
        let options = PopupOptions {
            width: self.config.width,
            height: self.config.height,
        };

        let Some(popup) = self.browser.open_popup(request.url, &options)? else {
            warn!("Popup window was blocked");
            return Err(AuthError::PopupBlocked);
        };
        info!("Opened popup for the identity provider");

        let poll = PollConfig {
            timeout: request.timeout.or(self.config.poll.timeout),
            ..self.config.poll.clone()
        };
        wait_for_redirect(popup.as_ref(), request.redirect_url, &poll, Self::NAME, None).await
    }
}
