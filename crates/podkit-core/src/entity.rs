// ── Entity snapshots ──
//
// An `Entity<K>` is the local image of one daemon-side resource: the id, the
// JSON attributes as last fetched, and a handle to the manager that produced
// it. Attributes change only through `reload`, which swaps them wholesale.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::manager::{Manager, RemoveOptions, ResourceKind};

// ── Attrs ────────────────────────────────────────────────────────────

/// Ordered JSON attributes of a resource, as returned by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attrs(Map<String, Value>);

impl Attrs {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Accept only a JSON object; anything else is a malformed response.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoreError::Deserialization {
                message: "expected a JSON object".into(),
                body: other.to_string(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String attribute; `None` when missing or not a string.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// JSON pointer lookup, e.g. `/State/Status`.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let mut parts = pointer.strip_prefix('/')?.split('/');
        let first = parts.next()?;
        parts.try_fold(self.0.get(first)?, |value, part| match value {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Labels from `Labels`, `labels` or `Config.Labels`, whichever is set.
    pub fn labels(&self) -> BTreeMap<String, String> {
        ["Labels", "labels"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .chain(self.pointer("/Config/Labels"))
            .find_map(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_owned())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Decode the attributes into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            CoreError::Deserialization {
                message: e.to_string(),
                body: Value::Object(self.0.clone()).to_string(),
            }
        })
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }
}

impl From<Map<String, Value>> for Attrs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ── Entity ───────────────────────────────────────────────────────────

/// Truncated id for display: ten characters, or seventeen when the id
/// carries a `sha256:` prefix.
pub fn short_id(id: &str) -> &str {
    let len = if id.starts_with("sha256:") { 17 } else { 10 };
    id.get(..len).unwrap_or(id)
}

/// A cached snapshot of one resource of kind `K`.
pub struct Entity<K: ResourceKind> {
    id: String,
    attrs: Attrs,
    manager: Manager<K>,
}

impl<K: ResourceKind> Entity<K> {
    pub(crate) fn new(manager: Manager<K>, attrs: Attrs) -> Self {
        let id = K::id_of(&attrs).unwrap_or_default();
        Self { id, attrs, manager }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn name(&self) -> Option<&str> {
        K::name_of(&self.attrs)
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn kind(&self) -> &'static str {
        K::NAME
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.attrs.labels()
    }

    pub fn manager(&self) -> &Manager<K> {
        &self.manager
    }

    /// The key the daemon looks this resource up by.
    pub fn key(&self) -> String {
        K::lookup_key(&self.id, &self.attrs)
    }

    /// Refetch the resource and replace the attributes wholesale.
    ///
    /// On failure (including `NotFound`) the cached attributes stay as they
    /// were.
    pub async fn reload(&mut self) -> Result<(), CoreError> {
        let latest = self.manager.get(&self.key()).await?;
        self.id = latest.id;
        self.attrs = latest.attrs;
        Ok(())
    }

    /// Remove the resource on the daemon. The snapshot is left as is.
    pub async fn remove(&self, options: &RemoveOptions) -> Result<(), CoreError> {
        self.manager.remove(&self.key(), options).await
    }
}

impl<K: ResourceKind> Clone for Entity<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            attrs: self.attrs.clone(),
            manager: self.manager.clone(),
        }
    }
}

impl<K: ResourceKind> PartialEq for Entity<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K: ResourceKind> fmt::Debug for Entity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &K::NAME)
            .field("id", &self.id)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl<K: ResourceKind> fmt::Display for Entity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", K::NAME, self.short_id())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attrs {
        Attrs::from_value(value).unwrap()
    }

    #[test]
    fn pointer_walks_objects_and_arrays() {
        let a = attrs(json!({
            "State": {"Status": "running"},
            "Mounts": [{"Destination": "/data"}]
        }));
        assert_eq!(a.pointer("/State/Status"), Some(&json!("running")));
        assert_eq!(a.pointer("/Mounts/0/Destination"), Some(&json!("/data")));
        assert_eq!(a.pointer("/Mounts/3"), None);
        assert_eq!(a.pointer("State"), None);
    }

    #[test]
    fn labels_from_inspect_and_list_shapes() {
        let listed = attrs(json!({"Labels": {"app": "web"}}));
        let inspected = attrs(json!({"Config": {"Labels": {"app": "db", "n": 1}}}));
        let network = attrs(json!({"labels": {"tier": "front"}}));

        assert_eq!(listed.labels().get("app").map(String::as_str), Some("web"));
        assert_eq!(inspected.labels().len(), 1);
        assert_eq!(network.labels().get("tier").map(String::as_str), Some("front"));
        assert!(attrs(json!({"Labels": null})).labels().is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        let err = Attrs::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, CoreError::Deserialization { .. }));
    }

    #[test]
    fn short_id_truncates_to_ten() {
        assert_eq!(short_id("4c5d6e7f8a9b0c1d2e3f"), "4c5d6e7f8a");
        assert_eq!(short_id("sha256:4c5d6e7f8a9b0c1d"), "sha256:4c5d6e7f8a");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn key_order_is_preserved() {
        let a = attrs(json!({"Zeta": 1, "Alpha": 2, "Mid": 3}));
        let keys: Vec<&str> = a.as_map().keys().map(String::as_str).collect();
        assert_eq!(keys, ["Zeta", "Alpha", "Mid"]);
    }
}
