//! DOM implementation of the browser primitives using web-sys

use super::{Browser, BrowsingContext, ContextError, PopupOptions, WindowBounds};
use crate::auth::SpaAuth;
use crate::error::{AuthError, AuthResult};
use gloo_events::EventListener;
use std::rc::Rc;
use tracing::{debug, warn};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DomException, HtmlIFrameElement, Window};

fn js_error(context: &str, err: JsValue) -> AuthError {
    AuthError::browser(format!("{context}: {err:?}"))
}

fn window() -> AuthResult<Window> {
    web_sys::window().ok_or_else(|| AuthError::browser("no window available"))
}

/// Read `location.href`, telling same-origin refusals apart from other failures
fn href(window: &Window) -> Result<String, ContextError> {
    window.location().href().map_err(|err| {
        let security = err
            .dyn_ref::<DomException>()
            .is_some_and(|exception| exception.name() == "SecurityError");
        if security {
            ContextError::CrossOrigin
        } else if window.closed().unwrap_or(true) {
            ContextError::Closed
        } else {
            ContextError::Other(format!("{err:?}"))
        }
    })
}

fn opener_bounds(window: &Window) -> WindowBounds {
    let number = |value: Result<JsValue, JsValue>| {
        value.ok().and_then(|v| v.as_f64()).unwrap_or_default() as i32
    };
    WindowBounds {
        left: window.screen_x().unwrap_or_default(),
        top: window.screen_y().unwrap_or_default(),
        width: number(window.outer_width()),
        height: number(window.outer_height()),
    }
}

/// [`Browser`] backed by the global `window`
///
/// Holds no JS handles, so it can be shared like any other [`Browser`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WebBrowser;

impl WebBrowser {
    pub fn new() -> Self {
        Self
    }
}

impl Browser for WebBrowser {
    fn current_url(&self) -> AuthResult<String> {
        window()?
            .location()
            .href()
            .map_err(|e| js_error("unable to read location", e))
    }

    fn navigate(&self, url: &str) -> AuthResult<()> {
        window()?
            .location()
            .assign(url)
            .map_err(|e| js_error("navigation failed", e))
    }

    fn replace_location(&self, url: &str) -> AuthResult<()> {
        window()?
            .history()
            .map_err(|e| js_error("history unavailable", e))?
            .replace_state_with_url(&JsValue::NULL, "", Some(url))
            .map_err(|e| js_error("unable to replace location", e))
    }

    fn open_popup(
        &self,
        url: &str,
        options: &PopupOptions,
    ) -> AuthResult<Option<Box<dyn BrowsingContext>>> {
        let window = window()?;
        let features = options.features(opener_bounds(&window));
        debug!("Opening popup with features {}", features);

        let popup = window
            .open_with_url_and_target_and_features(url, "_blank", &features)
            .map_err(|e| js_error("unable to open popup", e))?;
        Ok(popup.map(|window| Box::new(WindowContext { window }) as Box<dyn BrowsingContext>))
    }

    fn open_tab(&self, url: &str) -> AuthResult<Option<Box<dyn BrowsingContext>>> {
        let tab = window()?
            .open_with_url_and_target(url, "_blank")
            .map_err(|e| js_error("unable to open tab", e))?;
        Ok(tab.map(|window| Box::new(WindowContext { window }) as Box<dyn BrowsingContext>))
    }

    fn create_iframe(&self, url: &str, visible: bool) -> AuthResult<Box<dyn BrowsingContext>> {
        let document = window()?
            .document()
            .ok_or_else(|| AuthError::browser("no document available"))?;
        let element = document
            .create_element("iframe")
            .map_err(|e| js_error("unable to create iframe", e))?
            .dyn_into::<HtmlIFrameElement>()
            .map_err(|_| AuthError::browser("created element is not an iframe"))?;

        if !visible {
            element
                .set_attribute("style", "display: none")
                .map_err(|e| js_error("unable to hide iframe", e))?;
        }
        element.set_src(url);

        document
            .body()
            .ok_or_else(|| AuthError::browser("document has no body"))?
            .append_child(&element)
            .map_err(|e| js_error("unable to attach iframe", e))?;

        Ok(Box::new(IFrameContext { element }))
    }
}

/// A popup window or tab
struct WindowContext {
    window: Window,
}

impl BrowsingContext for WindowContext {
    fn location(&self) -> Result<String, ContextError> {
        href(&self.window)
    }

    fn is_closed(&self) -> bool {
        self.window.closed().unwrap_or(true)
    }

    fn close(&self) -> AuthResult<()> {
        self.window
            .close()
            .map_err(|e| js_error("unable to close window", e))
    }
}

struct IFrameContext {
    element: HtmlIFrameElement,
}

impl BrowsingContext for IFrameContext {
    fn location(&self) -> Result<String, ContextError> {
        match self.element.content_window() {
            Some(window) => href(&window),
            None => Err(ContextError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        !self.element.is_connected()
    }

    fn close(&self) -> AuthResult<()> {
        self.element.remove();
        Ok(())
    }
}

/// Keeps the route listeners installed; dropping it removes them
pub struct RouteWatcher {
    _listeners: Vec<EventListener>,
}

/// Secure the current route now and after every history navigation or click
pub fn watch_routes(auth: SpaAuth) -> AuthResult<RouteWatcher> {
    let window = window()?;
    let check = Rc::new(move || {
        let auth = auth.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let url = match WebBrowser.current_url() {
                Ok(url) => url,
                Err(err) => {
                    warn!("Unable to read the current route: {}", err);
                    return;
                }
            };
            if let Err(err) = auth.check_route(&url).await {
                warn!("Securing route {} failed: {}", url, err);
            }
        });
    });

    let listeners = ["popstate", "click"]
        .into_iter()
        .map(|event| {
            let check = Rc::clone(&check);
            EventListener::new(&window, event, move |_| check())
        })
        .collect();

    check();
    Ok(RouteWatcher {
        _listeners: listeners,
    })
}
