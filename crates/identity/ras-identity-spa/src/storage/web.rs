//! Browser storage backends built on `web-sys`
//!
//! Backends hold no JS handles; the window is looked up on every call so the backends
//! stay `Send + Sync` like every other [`StorageBackend`].

use super::StorageBackend;
use crate::error::{AuthError, AuthResult};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::HtmlDocument;

fn js_error(context: &str, err: JsValue) -> AuthError {
    AuthError::storage(format!("{context}: {err:?}"))
}

fn window() -> AuthResult<web_sys::Window> {
    web_sys::window().ok_or_else(|| AuthError::InvalidStorage("no window available".into()))
}

#[derive(Debug, Clone, Copy)]
enum Area {
    Session,
    Local,
}

fn web_storage(area: Area) -> AuthResult<web_sys::Storage> {
    let window = window()?;
    let storage = match area {
        Area::Session => window.session_storage(),
        Area::Local => window.local_storage(),
    };
    storage
        .map_err(|e| js_error("storage access denied", e))?
        .ok_or_else(|| AuthError::InvalidStorage(format!("{area:?} storage is unavailable")))
}

fn web_keys(storage: &web_sys::Storage) -> AuthResult<Vec<String>> {
    let length = storage
        .length()
        .map_err(|e| js_error("unable to read storage length", e))?;
    let mut keys = Vec::with_capacity(length as usize);
    for index in 0..length {
        if let Some(key) = storage
            .key(index)
            .map_err(|e| js_error("unable to read storage key", e))?
        {
            keys.push(key);
        }
    }
    Ok(keys)
}

macro_rules! web_storage_backend {
    ($name:ident, $area:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl $name {
            pub fn new() -> Self {
                Self
            }
        }

        impl StorageBackend for $name {
            fn get(&self, key: &str) -> AuthResult<Option<String>> {
                web_storage($area)?
                    .get_item(key)
                    .map_err(|e| js_error("unable to read item", e))
            }

            fn set(&self, key: &str, value: &str) -> AuthResult<()> {
                web_storage($area)?
                    .set_item(key, value)
                    .map_err(|e| js_error("unable to write item", e))
            }

            fn delete(&self, key: &str) -> AuthResult<()> {
                web_storage($area)?
                    .remove_item(key)
                    .map_err(|e| js_error("unable to remove item", e))
            }

            fn keys(&self) -> AuthResult<Vec<String>> {
                web_keys(&web_storage($area)?)
            }
        }
    };
}

web_storage_backend!(
    SessionStorage,
    Area::Session,
    "`window.sessionStorage` backend"
);
web_storage_backend!(LocalStorage, Area::Local, "`window.localStorage` backend");

/// First-party cookie backend
///
/// Values are URI-encoded; cookies are written for the whole site (`path=/`) as session
/// cookies and removed by expiring them.
#[derive(Debug, Default, Clone, Copy)]
pub struct CookieStorage;

impl CookieStorage {
    pub fn new() -> Self {
        Self
    }

    fn document() -> AuthResult<HtmlDocument> {
        window()?
            .document()
            .ok_or_else(|| AuthError::InvalidStorage("no document available".into()))?
            .dyn_into::<HtmlDocument>()
            .map_err(|_| AuthError::InvalidStorage("document does not support cookies".into()))
    }

    fn entries() -> AuthResult<Vec<(String, String)>> {
        let raw = Self::document()?
            .cookie()
            .map_err(|e| js_error("unable to read cookies", e))?;
        Ok(raw
            .split(';')
            .filter_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                let value = js_sys::decode_uri_component(value)
                    .ok()
                    .and_then(|v| v.as_string())
                    .unwrap_or_else(|| value.to_string());
                Some((key.to_string(), value))
            })
            .collect())
    }

    fn write(cookie: &str) -> AuthResult<()> {
        Self::document()?
            .set_cookie(cookie)
            .map_err(|e| js_error("unable to write cookie", e))
    }
}

impl StorageBackend for CookieStorage {
    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(Self::entries()?
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value))
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let encoded: String = js_sys::encode_uri_component(value).into();
        Self::write(&format!("{key}={encoded}; path=/; SameSite=Lax"))
    }

    fn delete(&self, key: &str) -> AuthResult<()> {
        Self::write(&format!(
            "{key}=; path=/; expires=Thu, 01 Jan 1970 00:00:00 GMT"
        ))
    }

    fn keys(&self) -> AuthResult<Vec<String>> {
        Ok(Self::entries()?.into_iter().map(|(key, _)| key).collect())
    }
}
