//! Scripted in-memory browser for tests

use crate::error::{AuthError, AuthResult};
use crate::platform::{Browser, BrowsingContext, ContextError, PopupOptions};
use crate::url::{Params, parse_params};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Builds a location from the parameters of the URL the context was opened at
pub type Responder = Arc<dyn Fn(&Params) -> String + Send + Sync>;

/// One observation of a context's location; the last step repeats forever
#[derive(Clone)]
pub enum Step {
    At(String),
    CrossOrigin,
    Fail(String),
    UserClosed,
    Respond(Responder),
}

impl Step {
    /// Echo the request `state` back to `redirect_url` along with `extra` parameters
    pub fn echo_state(redirect_url: &str, extra: &str) -> Self {
        let redirect_url = redirect_url.to_string();
        let extra = extra.to_string();
        Step::Respond(Arc::new(move |params: &Params| {
            let state = params.get("state").cloned().unwrap_or_default();
            format!("{redirect_url}?state={state}&{extra}")
        }))
    }
}

struct ContextState {
    steps: VecDeque<Step>,
    closed: bool,
}

/// A scripted window, tab or iframe
#[derive(Clone)]
pub struct FakeContext {
    opened_at: String,
    state: Arc<Mutex<ContextState>>,
}

impl FakeContext {
    pub fn new(opened_at: &str, steps: Vec<Step>) -> Self {
        Self {
            opened_at: opened_at.to_string(),
            state: Arc::new(Mutex::new(ContextState {
                steps: steps.into(),
                closed: false,
            })),
        }
    }

    pub fn opened_at(&self) -> &str {
        &self.opened_at
    }
}

impl BrowsingContext for FakeContext {
    fn location(&self) -> Result<String, ContextError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ContextError::Closed);
        }

        let step = if state.steps.len() > 1 {
            state.steps.pop_front()
        } else {
            state.steps.front().cloned()
        };

        match step {
            None => Ok("about:blank".to_string()),
            Some(Step::At(url)) => Ok(url),
            Some(Step::CrossOrigin) => Err(ContextError::CrossOrigin),
            Some(Step::Fail(message)) => Err(ContextError::Other(message)),
            Some(Step::UserClosed) => {
                state.closed = true;
                Err(ContextError::Closed)
            }
            Some(Step::Respond(respond)) => Ok(respond(&parse_params(&self.opened_at))),
        }
    }

    fn is_closed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if matches!(state.steps.front(), Some(Step::UserClosed)) {
            state.closed = true;
        }
        state.closed
    }

    fn close(&self) -> AuthResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct BrowserState {
    current_url: String,
    navigations: Vec<String>,
    replacements: Vec<String>,
    opened: Vec<FakeContext>,
    scripts: VecDeque<Vec<Step>>,
    block_windows: bool,
    visible_iframes: Vec<bool>,
    popup_options: Vec<PopupOptions>,
}

/// A [`Browser`] whose windows follow pre-recorded scripts
#[derive(Default)]
pub struct FakeBrowser {
    state: Mutex<BrowserState>,
}

impl FakeBrowser {
    pub fn at(url: &str) -> Arc<Self> {
        let browser = Self::default();
        browser.state.lock().unwrap().current_url = url.to_string();
        Arc::new(browser)
    }

    /// Script the next opened context
    pub fn script(&self, steps: Vec<Step>) {
        self.state.lock().unwrap().scripts.push_back(steps);
    }

    /// Make popups and tabs return no window handle
    pub fn block_windows(&self) {
        self.state.lock().unwrap().block_windows = true;
    }

    pub fn set_current_url(&self, url: &str) {
        self.state.lock().unwrap().current_url = url.to_string();
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn replacements(&self) -> Vec<String> {
        self.state.lock().unwrap().replacements.clone()
    }

    pub fn opened(&self) -> Vec<FakeContext> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn visible_iframes(&self) -> Vec<bool> {
        self.state.lock().unwrap().visible_iframes.clone()
    }

    pub fn popup_options(&self) -> Vec<PopupOptions> {
        self.state.lock().unwrap().popup_options.clone()
    }

    fn open(&self, url: &str) -> FakeContext {
        let mut state = self.state.lock().unwrap();
        let steps = state.scripts.pop_front().unwrap_or_default();
        let context = FakeContext::new(url, steps);
        state.opened.push(context.clone());
        context
    }

    fn open_window(&self, url: &str) -> Option<Box<dyn BrowsingContext>> {
        if self.state.lock().unwrap().block_windows {
            return None;
        }
        Some(Box::new(self.open(url)))
    }
}

impl Browser for FakeBrowser {
    fn current_url(&self) -> AuthResult<String> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    fn navigate(&self, url: &str) -> AuthResult<()> {
        self.state.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    fn replace_location(&self, url: &str) -> AuthResult<()> {
        let mut state = self.state.lock().unwrap();
        if url.is_empty() {
            return Err(AuthError::browser("empty location"));
        }
        state.current_url = url.to_string();
        state.replacements.push(url.to_string());
        Ok(())
    }

    fn open_popup(
        &self,
        url: &str,
        options: &PopupOptions,
    ) -> AuthResult<Option<Box<dyn BrowsingContext>>> {
        self.state.lock().unwrap().popup_options.push(*options);
        Ok(self.open_window(url))
    }

    fn open_tab(&self, url: &str) -> AuthResult<Option<Box<dyn BrowsingContext>>> {
        Ok(self.open_window(url))
    }

    fn create_iframe(&self, url: &str, visible: bool) -> AuthResult<Box<dyn BrowsingContext>> {
        self.state.lock().unwrap().visible_iframes.push(visible);
        Ok(Box::new(self.open(url)))
    }
}
