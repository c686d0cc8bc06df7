use crate::config::PollConfig;
use crate::error::{AuthError, AuthResult};
use crate::platform::{self, BrowsingContext, is_transient_cross_origin_error};
use crate::url::{Params, parse_params, starts_with_url};
use std::time::Duration;
use tracing::{debug, trace};

/// Closes the context when dropped unless polling already dealt with it
///
/// Covers the `open` future being cancelled mid-poll, which would otherwise leave an
/// iframe in the DOM or a popup on screen.
struct CloseOnDrop<'a> {
    context: &'a dyn BrowsingContext,
    armed: bool,
}

impl CloseOnDrop<'_> {
    fn close(mut self) -> AuthResult<()> {
        self.armed = false;
        self.context.close()
    }

    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.context.close();
        }
    }
}

/// Poll a context until it lands on `redirect_url`, then close it and return the parameters
///
/// Cross-origin errors are expected while the provider's pages are shown and are skipped;
/// any other location error fails the round trip. `closed_error` is returned if the user
/// closes the context first; without it a closed context is not checked for.
pub(crate) async fn wait_for_redirect(
    context: &dyn BrowsingContext,
    redirect_url: &str,
    config: &PollConfig,
    handler: &str,
    closed_error: Option<AuthError>,
) -> AuthResult<Params> {
    let mut elapsed = Duration::ZERO;
    let guard = CloseOnDrop {
        context,
        armed: true,
    };

    loop {
        if let Some(err) = closed_error.as_ref().filter(|_| context.is_closed()) {
            debug!("{} handler context was closed by the user", handler);
            guard.release();
            return Err(err.clone());
        }

        match context.location() {
            Ok(location) if starts_with_url(&location, redirect_url) => {
                debug!("{} handler returned to the redirect url", handler);
                let params = parse_params(&location);
                guard.close()?;
                return Ok(params);
            }
            Ok(_) => {}
            Err(err) if is_transient_cross_origin_error(&err) => {
                trace!("{} handler location not readable yet: {}", handler, err);
            }
            Err(err) => {
                return Err(AuthError::browser(format!(
                    "{handler} handler failed while polling: {err}"
                )));
            }
        }

        if config.timeout.is_some_and(|timeout| elapsed >= timeout) {
            return Err(AuthError::PollTimeout(handler.to_string()));
        }

        platform::sleep(config.interval).await;
        elapsed += config.interval;
    }
}
