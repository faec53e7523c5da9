// ── Resource kinds ──
//
// One module per daemon collection: the `ResourceKind` descriptor, the
// create call and the kind-specific actions on `Entity<K>`.

pub mod containers;
pub mod images;
pub mod manifests;
pub mod networks;
pub mod pods;
pub mod quadlets;
pub mod secrets;
pub mod volumes;

use chrono::{DateTime, Utc};
use podkit_api::params::prune_body;
use podkit_api::{RegistryAuth, Request};
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;

/// Serialize a create spec and drop unset fields.
pub(crate) fn create_body<T: Serialize>(spec: &T) -> Result<Value, CoreError> {
    let value = serde_json::to_value(spec)
        .map_err(|e| CoreError::invalid(format!("cannot encode request body: {e}")))?;
    Ok(prune_body(value))
}

/// Seconds since the epoch, the form the daemon takes for since/until.
pub(crate) fn timestamp(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// Attach `X-Registry-Auth` when credentials are given.
pub(crate) fn with_auth(request: Request, auth: Option<&RegistryAuth>) -> Result<Request, CoreError> {
    match auth {
        Some(auth) => Ok(request.try_header("x-registry-auth", &auth.header_value())?),
        None => Ok(request),
    }
}

/// Id from a `{"Id": ...}` style creation response.
pub(crate) fn created_id(body: &Value) -> Result<String, CoreError> {
    ["Id", "ID", "id"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
        .ok_or_else(|| CoreError::Deserialization {
            message: "creation response carries no id".into(),
            body: body.to_string(),
        })
}
