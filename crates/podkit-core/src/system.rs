// ── System service ──
//
// Daemon-wide calls that are not tied to a resource kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use podkit_api::{ApiClient, Filters, RegistryAuth, Request};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, ResultExt};
use crate::kinds::timestamp;
use crate::streams::{self, JsonStream};

const KIND: &str = "system";

/// Options for the event stream.
#[derive(Debug, Clone, Default)]
pub struct EventsOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub filters: Filters,
    /// Keep the stream open for new events. Without it the stream ends once
    /// past events up to `until` (or now) are sent.
    pub follow: bool,
}

/// One daemon event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Event {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Actor")]
    pub actor: Actor,
    pub time: i64,
    #[serde(rename = "timeNano")]
    pub time_nano: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Actor {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Attributes")]
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    /// Resource name as reported in the actor attributes.
    pub fn name(&self) -> Option<&str> {
        self.actor.attributes.get("name").map(String::as_str)
    }
}

/// Handle for daemon-level calls.
#[derive(Debug, Clone)]
pub struct System {
    api: Arc<ApiClient>,
}

impl System {
    pub(crate) fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Whether the service answers. Transport failures are errors; a
    /// non-2xx answer is `false`.
    pub async fn ping(&self) -> Result<bool, CoreError> {
        let response = self
            .api
            .execute(Request::head("/_ping"))
            .await
            .context("ping", KIND, None)?;
        debug!(status = %response.status, "ping");
        Ok(response.is_success())
    }

    pub async fn version(&self) -> Result<Value, CoreError> {
        self.api
            .send_json(Request::get("/version"))
            .await
            .context("version", KIND, None)
    }

    pub async fn info(&self) -> Result<Value, CoreError> {
        self.api
            .send_json(Request::get("/info"))
            .await
            .context("info", KIND, None)
    }

    /// Disk usage by images, containers and volumes.
    pub async fn df(&self) -> Result<Value, CoreError> {
        self.api
            .send_json(Request::get("/system/df"))
            .await
            .context("df", KIND, None)
    }

    /// Check credentials against a registry through the compat `/auth` call.
    pub async fn login(
        &self,
        auth: &RegistryAuth,
        tls_verify: Option<bool>,
    ) -> Result<Value, CoreError> {
        let request = Request::post("/auth")
            .compat()
            .query_opt("tlsVerify", tls_verify)
            .json(auth)?;
        self.api
            .send_json(request)
            .await
            .context("login", KIND, auth.server_address.as_deref())
    }

    /// Daemon events as they are reported.
    pub async fn events(&self, options: &EventsOptions) -> Result<JsonStream<Event>, CoreError> {
        let request = Request::get("/events")
            .query("stream", options.follow)
            .query_opt("since", options.since.map(timestamp))
            .query_opt("until", options.until.map(timestamp))
            .filters(&options.filters);
        let response = self
            .api
            .send_streaming(request)
            .await
            .context("events", KIND, None)?;
        Ok(streams::json(response.body))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_decodes_libpod_shape() {
        let event: Event = serde_json::from_str(
            r#"{"Type":"container","Action":"start","Actor":{"ID":"abc","Attributes":{"name":"web","image":"nginx"}},"time":1700000000,"timeNano":1700000000000000000,"status":"start"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, "container");
        assert_eq!(event.action, "start");
        assert_eq!(event.actor.id, "abc");
        assert_eq!(event.name(), Some("web"));
    }

    #[test]
    fn sparse_event_still_decodes() {
        let event: Event = serde_json::from_str(r#"{"Type":"image"}"#).unwrap();
        assert_eq!(event.kind, "image");
        assert!(event.name().is_none());
    }
}
