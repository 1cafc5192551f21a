//! Parses `WWW-Authenticate` challenge headers (RFC 7235 §4.1 / the Docker token auth spec).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::OciRegError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static PARAM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z0-9_-]+)="((?:[^"\\]|\\.)*)""#).unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A parsed `WWW-Authenticate` challenge: a scheme (`Bearer`, `Basic`, ...) plus its
/// comma-separated `key="value"` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// The authentication scheme, lowercased (`"bearer"`, `"basic"`).
    pub scheme: String,
    /// The challenge's parameters, as given (case preserved).
    pub params: HashMap<String, String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Challenge {
    /// Parses a raw `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Result<Self, OciRegError> {
        let header = header.trim();
        let scheme_end = header
            .find(char::is_whitespace)
            .ok_or_else(|| OciRegError::AuthFailed(format!("malformed challenge: {}", header)))?;

        let scheme = header[..scheme_end].to_ascii_lowercase();
        let rest = &header[scheme_end..];

        let mut params = HashMap::new();
        for cap in PARAM_REGEX.captures_iter(rest) {
            params.insert(cap[1].to_string(), cap[2].replace("\\\"", "\""));
        }

        Ok(Challenge { scheme, params })
    }

    /// Looks up a parameter by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
