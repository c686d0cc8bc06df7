use super::{AuthAction, Handler, OpenRequest};
use crate::config::RedirectConfig;
use crate::error::{AuthError, AuthResult};
use crate::platform::{self, Browser};
use crate::storage::{Storage, StorageBackend};
use crate::url::{Params, parse_params, strip_fragment};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ORIGIN: &str = "origin";

/// Full-page redirect to the provider
///
/// The page unloads during `open`, so the response is only picked up on the next load,
/// through `connected`.
pub struct RedirectHandler {
    browser: Arc<dyn Browser>,
    storage: Storage,
    config: RedirectConfig,
}

impl RedirectHandler {
    pub const NAME: &'static str = "redirect";

    pub fn new(
        browser: Arc<dyn Browser>,
        backend: Arc<dyn StorageBackend>,
        config: RedirectConfig,
    ) -> Self {
        Self {
            browser,
            storage: Storage::for_handler(backend, Self::NAME),
            config,
        }
    }
}

#[async_trait(?Send)]
impl Handler for RedirectHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn auto(&self) -> bool {
        true
    }

    async fn open(&self, request: OpenRequest<'_>) -> AuthResult<Params> {
        let origin = self.browser.current_url()?;
        self.storage.set(ORIGIN, strip_fragment(&origin))?;

        info!("Redirecting to the identity provider");
        self.browser.navigate(request.url)?;

        // only reached when the navigation never unloads the page
        platform::sleep(request.timeout.unwrap_or(self.config.timeout)).await;
        warn!("Redirect did not unload the page in time");
        Err(AuthError::RedirectTimeout)
    }

    fn connected(&self, action: Option<AuthAction>) -> AuthResult<Option<Params>> {
        let origin = self.storage.get(ORIGIN)?;
        self.storage.discard(ORIGIN);

        let Some(action) = action else {
            return Ok(None);
        };

        let location = self.browser.current_url()?;
        debug!("Resuming {} after redirect", action);
        let params = parse_params(&location);

        if let Some(origin) = origin {
            self.browser.replace_location(&origin)?;
        }

        Ok(Some(params))
    }
}
