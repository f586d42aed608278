//! Application configuration.
//!
//! ```toml
//! addr = "127.0.0.1:8080"
//! web_root = "/blog"
//! powered_by = "kite"
//! normalize_paths = true
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Socket address the server binds to.
    pub addr: String,
    /// Prefix of URLs built by the fallback in [`App::url`](crate::App::url).
    pub web_root: String,
    /// Value of the `x-powered-by` response header. `None` or an empty
    /// string omits it.
    pub powered_by: Option<String>,
    /// Collapse repeated and trailing slashes before dispatch.
    ///
    /// Declared patterns are not rewritten, so while this is on a route such
    /// as `/users/` or `/a//b` can never match; the app logs each one with
    /// `warn!` when it is built. Declare `/users` instead, or turn this off
    /// to match paths byte for byte.
    pub normalize_paths: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_owned(),
            web_root: String::new(),
            powered_by: Some("kite".to_owned()),
            normalize_paths: true,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
