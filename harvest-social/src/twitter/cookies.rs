//! Session cookie bundle for the X web API.
//!
//! Two on-disk shapes are accepted: a flat `{"name": "value"}` object and the
//! list of `{"name": .., "value": ..}` objects produced by browser cookie
//! exporters. `auth_token` and `ct0` must be present; `ct0` doubles as the
//! CSRF token.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const AUTH_TOKEN: &str = "auth_token";
const CSRF_TOKEN: &str = "ct0";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("failed to read cookie file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cookie bundle: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cookie bundle is missing required cookie `{0}`")]
    Missing(&'static str),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CookieFile {
    Map(BTreeMap<String, String>),
    List(Vec<CookieEntry>),
}

#[derive(Deserialize)]
struct CookieEntry {
    name: String,
    value: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TwitterCookies {
    jar: BTreeMap<String, String>,
}

impl TwitterCookies {
    /// Read and validate a cookie bundle from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CookieError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CookieError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// ```
    /// use harvest_social::twitter::TwitterCookies;
    ///
    /// let jar = TwitterCookies::from_json_str(r#"{"auth_token":"a","ct0":"c"}"#).unwrap();
    /// assert_eq!(jar.csrf_token(), "c");
    /// assert_eq!(jar.header_value(), "auth_token=a; ct0=c");
    /// ```
    pub fn from_json_str(raw: &str) -> Result<Self, CookieError> {
        let jar = match serde_json::from_str::<CookieFile>(raw)? {
            CookieFile::Map(map) => map,
            CookieFile::List(entries) => entries.into_iter().map(|e| (e.name, e.value)).collect(),
        };
        for required in [AUTH_TOKEN, CSRF_TOKEN] {
            if jar.get(required).is_none_or(|v| v.trim().is_empty()) {
                return Err(CookieError::Missing(required));
            }
        }
        Ok(Self { jar })
    }

    pub fn csrf_token(&self) -> &str {
        self.jar.get(CSRF_TOKEN).map(String::as_str).unwrap_or_default()
    }

    /// `Cookie` header value, names in sorted order.
    pub fn header_value(&self) -> String {
        self.jar
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn len(&self) -> usize {
        self.jar.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jar.is_empty()
    }
}

impl fmt::Debug for TwitterCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterCookies")
            .field("names", &self.jar.keys().collect::<Vec<_>>())
            .finish()
    }
}
