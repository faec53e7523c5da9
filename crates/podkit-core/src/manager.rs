// ── Generic resource manager ──
//
// One `Manager<K>` per resource kind. The kind descriptor supplies the REST
// collection name, the attributes that hold the id, and the request shapes;
// the manager turns responses into fresh `Entity<K>` values. Managers hold
// no state beyond the shared API handle.

use std::marker::PhantomData;
use std::sync::Arc;

use http::StatusCode;
use podkit_api::{ApiClient, Filters, Request, Response, quote};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::entity::{Attrs, Entity};
use crate::error::{CoreError, ResultExt};

// ── Options ──────────────────────────────────────────────────────────

/// Listing options shared by every kind. Kinds ignore what they don't use.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Include stopped containers or intermediate images. Containers
    /// default to `true`, images to `false`.
    pub all: Option<bool>,
    pub filters: Filters,
    pub limit: Option<u32>,
    /// Skip the size computation on container listings.
    pub sparse: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(mut self, all: bool) -> Self {
        self.all = Some(all);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key, value);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub force: bool,
    /// Remove anonymous volumes along with a container.
    pub volumes: bool,
    /// Seconds to wait for a container to stop before killing it.
    pub timeout: Option<u32>,
}

impl RemoveOptions {
    pub fn force() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// What a prune call removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: u64,
}

// ── Kind descriptor ──────────────────────────────────────────────────

/// Static description of a resource kind.
pub trait ResourceKind: Send + Sync + Sized + 'static {
    /// Singular name, used in errors and logs.
    const NAME: &'static str;
    /// REST collection segment, e.g. `containers`.
    const COLLECTION: &'static str;
    /// Attributes tried in order for the id.
    const ID_KEYS: &'static [&'static str];

    fn list_request(options: &ListOptions) -> Result<Request, CoreError> {
        Ok(Request::get(format!("/{}/json", Self::COLLECTION)).filters(&options.filters))
    }

    /// Whether a 404 on the list endpoint means "nothing to list".
    fn empty_list_on_missing() -> bool {
        false
    }

    fn inspect_request(key: &str) -> Request {
        Request::get(format!("/{}/{}/json", Self::COLLECTION, quote(key)))
    }

    /// Pick the resource out of an inspect response.
    fn inspect_response(_key: &str, body: Value) -> Result<Value, CoreError> {
        Ok(body)
    }

    fn exists_request(key: &str) -> Request {
        Request::get(format!("/{}/{}/exists", Self::COLLECTION, quote(key)))
    }

    fn remove_request(key: &str, options: &RemoveOptions) -> Request {
        Request::delete(format!("/{}/{}", Self::COLLECTION, quote(key)))
            .query_flag("force", options.force)
    }

    /// Adjust freshly fetched attributes. `key` is what the caller asked for.
    fn normalize(_key: &str, _attrs: &mut Attrs) {}

    fn id_of(attrs: &Attrs) -> Option<String> {
        Self::ID_KEYS
            .iter()
            .find_map(|key| attrs.str(key))
            .map(str::to_owned)
    }

    fn name_of(attrs: &Attrs) -> Option<&str> {
        attrs
            .str("Name")
            .or_else(|| attrs.str("name"))
            .or_else(|| {
                attrs
                    .pointer("/Names/0")
                    .and_then(Value::as_str)
                    .map(|name| name.trim_start_matches('/'))
            })
    }

    /// Key used to refetch or remove an entity.
    fn lookup_key(id: &str, _attrs: &Attrs) -> String {
        id.to_owned()
    }
}

/// Kinds with a `POST /{collection}/prune` endpoint.
pub trait Prunable: ResourceKind {}

// ── Manager ──────────────────────────────────────────────────────────

/// Stateless handle for one resource kind.
pub struct Manager<K> {
    api: Arc<ApiClient>,
    kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Manager<K> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            kind: PhantomData,
        }
    }
}

impl<K> std::fmt::Debug for Manager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("endpoint", &self.api.endpoint())
            .finish()
    }
}

impl<K: ResourceKind> Manager<K> {
    pub(crate) fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            kind: PhantomData,
        }
    }

    pub(crate) fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Manager for another kind on the same connection.
    pub(crate) fn sibling<O: ResourceKind>(&self) -> Manager<O> {
        Manager::new(Arc::clone(&self.api))
    }

    /// Wrap fetched attributes, applying the kind's normalisation.
    pub(crate) fn entity(&self, key: &str, value: Value) -> Result<Entity<K>, CoreError> {
        let mut attrs = Attrs::from_value(value)?;
        K::normalize(key, &mut attrs);
        Ok(Entity::new(self.clone(), attrs))
    }

    /// List resources in a single request.
    pub async fn list(&self, options: &ListOptions) -> Result<Vec<Entity<K>>, CoreError> {
        let request = K::list_request(options)?;
        let response = self
            .api
            .execute(request)
            .await
            .context("list", K::NAME, None)?;

        if response.status == StatusCode::NOT_FOUND && K::empty_list_on_missing() {
            return Ok(Vec::new());
        }
        let items: Vec<Value> = response
            .error_for_status()
            .and_then(|r| r.json())
            .context("list", K::NAME, None)?;

        debug!(kind = K::NAME, count = items.len(), "listed");
        items
            .into_iter()
            .map(|item| self.entity("", item))
            .collect()
    }

    /// Fetch full detail for one resource.
    pub async fn get(&self, key: &str) -> Result<Entity<K>, CoreError> {
        let value: Value = self
            .api
            .send_json(K::inspect_request(key))
            .await
            .context("inspect", K::NAME, Some(key))?;
        self.entity(key, K::inspect_response(key, value)?)
    }

    /// `true` on 2xx, `false` on 404; anything else is an error.
    pub async fn exists(&self, key: &str) -> Result<bool, CoreError> {
        let response = self
            .api
            .execute(K::exists_request(key))
            .await
            .context("exists", K::NAME, Some(key))?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response
            .error_for_status()
            .map(|_| true)
            .context("exists", K::NAME, Some(key))
    }

    /// Remove a resource. Cached entities are not touched.
    pub async fn remove(&self, key: &str, options: &RemoveOptions) -> Result<(), CoreError> {
        let response = self
            .api
            .send(K::remove_request(key, options))
            .await
            .context("remove", K::NAME, Some(key))?;
        check_reports("remove", K::NAME, key, &response)
    }
}

impl<K: Prunable> Manager<K> {
    /// Remove unused resources matching `filters`.
    pub async fn prune(&self, filters: &Filters) -> Result<PruneReport, CoreError> {
        let request = Request::post(format!("/{}/prune", K::COLLECTION)).filters(filters);
        self.prune_with(request).await
    }

    pub(crate) async fn prune_with(&self, request: Request) -> Result<PruneReport, CoreError> {
        let body: Value = self
            .api
            .send_json(request)
            .await
            .context("prune", K::NAME, None)?;

        let mut report = PruneReport::default();
        for entry in ReportEntry::all(&body) {
            if let Some(message) = entry.error {
                return Err(CoreError::OperationFailed {
                    operation: "prune".into(),
                    kind: K::NAME.into(),
                    id: entry.id,
                    message,
                });
            }
            report.space_reclaimed += entry.size;
            report.deleted.push(entry.id);
        }
        Ok(report)
    }
}

// ── Report parsing ───────────────────────────────────────────────────

/// One line of a remove or prune report. The daemon is not consistent about
/// key names across kinds, so entries are read leniently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReportEntry {
    pub id: String,
    pub size: u64,
    pub error: Option<String>,
}

impl ReportEntry {
    fn from_value(value: &Value) -> Self {
        let id = ["Id", "ID", "Name", "id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_owned();
        let size = value.get("Size").and_then(Value::as_u64).unwrap_or(0);
        let error = ["Err", "Error", "error"]
            .iter()
            .find_map(|key| error_text(value.get(*key)?));
        Self { id, size, error }
    }

    /// Entries of an array report; an object is a single entry.
    pub fn all(body: &Value) -> Vec<Self> {
        match body {
            Value::Array(items) => items.iter().map(Self::from_value).collect(),
            Value::Object(_) => vec![Self::from_value(body)],
            _ => Vec::new(),
        }
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Fail when a 2xx remove response still reports per-item errors.
pub(crate) fn check_reports(
    operation: &str,
    kind: &str,
    key: &str,
    response: &Response,
) -> Result<(), CoreError> {
    if response.body.is_empty() {
        return Ok(());
    }
    let Ok(body) = serde_json::from_slice::<Value>(&response.body) else {
        return Ok(());
    };

    let failure = body
        .get("Errors")
        .and_then(error_text)
        .or_else(|| ReportEntry::all(&body).into_iter().find_map(|e| e.error));
    match failure {
        Some(message) => Err(CoreError::OperationFailed {
            operation: operation.into(),
            kind: kind.into(),
            id: key.into(),
            message,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::HeaderMap;
    use serde_json::json;

    fn response(body: Value) -> Response {
        Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn report_entries_accept_every_key_style() {
        let body = json!([
            {"Id": "a1", "Size": 10, "Err": null},
            {"Name": "net0", "Error": ""},
            {"ID": "s1", "Err": "in use"}
        ]);
        let entries = ReportEntry::all(&body);
        assert_eq!(entries[0].id, "a1");
        assert_eq!(entries[0].size, 10);
        assert_eq!(entries[1].id, "net0");
        assert!(entries[1].error.is_none());
        assert_eq!(entries[2].error.as_deref(), Some("in use"));
    }

    #[test]
    fn remove_report_errors_fail_the_call() {
        let ok = response(json!([{"Id": "abc", "Err": null}]));
        assert!(check_reports("remove", "container", "abc", &ok).is_ok());

        let image = response(json!({"Deleted": ["x"], "Errors": ["image in use"], "ExitCode": 2}));
        let err = check_reports("remove", "image", "x", &image).unwrap_err();
        assert!(err.to_string().contains("image in use"));

        let pod = response(json!({"Id": "p", "Err": "pod has running containers"}));
        assert!(check_reports("remove", "pod", "p", &pod).is_err());
    }

    #[test]
    fn empty_remove_body_is_fine() {
        let no_content = Response {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(check_reports("remove", "volume", "v", &no_content).is_ok());
    }
}
