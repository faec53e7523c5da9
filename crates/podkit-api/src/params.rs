// Query and body helpers shared by every endpoint.
//
// libpod expects list filters as a JSON object of string lists and rejects
// create bodies that carry explicit `null`s for fields it wants absent.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Map, Value};

/// Characters left untouched when encoding a single path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode one path segment (container name, image reference, ...).
///
/// `docker.io/library/alpine:latest` becomes
/// `docker.io%2Flibrary%2Falpine%3Alatest`.
pub fn quote(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

// ── Filters ─────────────────────────────────────────────────────────

/// List/prune filters, serialized as `{"key": ["v1", "v2"]}` with sorted keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, Vec<String>>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for `key`, keeping any values already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Builder form of [`Filters::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Parse a `key=value` pair, the form used on command lines.
    pub fn with_pair(self, pair: &str) -> Self {
        match pair.split_once('=') {
            Some((key, value)) => self.with(key, value),
            None => self.with(pair, ""),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON encoding for the `filters` query parameter, `None` when empty.
    pub fn to_query(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        serde_json::to_string(&self.0).ok()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Self::new();
        for (key, value) in iter {
            filters.insert(key, value);
        }
        filters
    }
}

// ── Bodies ──────────────────────────────────────────────────────────

/// Strip `null`s and empty values from a request body.
///
/// At the top level `null`, `""`, `[]` and `{}` are dropped; in nested
/// objects empty strings survive. `false` and `0` are always kept.
pub fn prune_body(body: Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(prune_object(map, false)),
        other => other,
    }
}

fn prune_object(map: Map<String, Value>, nested: bool) -> Map<String, Value> {
    map.into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::Object(inner) => Value::Object(prune_object(inner, true)),
                Value::Array(items) => {
                    Value::Array(items.into_iter().filter(|v| !v.is_null()).collect())
                }
                other => other,
            };
            let empty = match &value {
                Value::String(s) => !nested && s.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(inner) => inner.is_empty(),
                _ => false,
            };
            (!empty).then_some((key, value))
        })
        .collect()
}

// ── Registry auth ───────────────────────────────────────────────────

/// Credentials forwarded to the daemon in the `X-Registry-Auth` header.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryAuth {
    pub username: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "serveraddress", skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
}

fn expose<S: serde::Serializer>(secret: &SecretString, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose_secret())
}

impl RegistryAuth {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            email: None,
            server_address: None,
        }
    }

    /// URL-safe base64 of the JSON credentials.
    pub fn header_value(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE.encode(json)
    }
}
