// ── Pods ──

use std::collections::BTreeMap;

use podkit_api::Request;
use serde::Serialize;
use serde_json::{Map, Value};

use super::containers::PortMapping;
use super::{create_body, created_id};
use crate::entity::Entity;
use crate::error::{CoreError, ResultExt};
use crate::manager::{Manager, Prunable, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct Pods;

pub type Pod = Entity<Pods>;
pub type PodsManager = Manager<Pods>;

impl ResourceKind for Pods {
    const NAME: &'static str = "pod";
    const COLLECTION: &'static str = "pods";
    const ID_KEYS: &'static [&'static str] = &["Id", "ID"];
}

impl Prunable for Pods {}

/// Pod creation parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PodSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub hostname: Option<String>,
    pub portmappings: Vec<PortMapping>,
    /// Namespaces shared between the pod's containers, e.g. `net`, `ipc`.
    pub shared_namespaces: Vec<String>,
    pub no_infra: Option<bool>,
    pub infra_image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn publish(mut self, host_port: u16, container_port: u16) -> Self {
        self.portmappings.push(PortMapping {
            container_port,
            host_port: Some(host_port),
            ..PortMapping::default()
        });
        self
    }
}

impl Manager<Pods> {
    pub async fn create(&self, spec: &PodSpec) -> Result<Pod, CoreError> {
        if spec.name.is_empty() {
            return Err(CoreError::invalid("pod spec needs a name"));
        }
        let body = create_body(spec)?;
        let created: Value = self
            .api()
            .send_json(Request::post("/pods/create").json(&body)?)
            .await
            .context("create", Pods::NAME, Some(&spec.name))?;
        self.get(&created_id(&created)?).await
    }
}

impl Entity<Pods> {
    fn path(&self, action: &str) -> String {
        format!("/pods/{}/{action}", podkit_api::quote(self.id()))
    }

    /// Pod actions answer with `{Id, Errs}`; any entry in `Errs` fails.
    async fn act(&self, operation: &str, request: Request) -> Result<(), CoreError> {
        let response = self
            .manager()
            .api()
            .execute(request)
            .await
            .context(operation, Pods::NAME, Some(self.id()))?;
        if response.status == http::StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        let response = response
            .error_for_status()
            .context(operation, Pods::NAME, Some(self.id()))?;

        let errors: Vec<String> = serde_json::from_slice::<Value>(&response.body)
            .ok()
            .and_then(|body| body.get("Errs").and_then(Value::as_array).cloned())
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_owned))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::OperationFailed {
                operation: operation.into(),
                kind: Pods::NAME.into(),
                id: self.id().into(),
                message: errors.join("; "),
            })
        }
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        self.act("start", Request::post(self.path("start"))).await
    }

    pub async fn stop(&self, timeout: Option<u32>) -> Result<(), CoreError> {
        self.act("stop", Request::post(self.path("stop")).query_opt("t", timeout))
            .await
    }

    pub async fn restart(&self) -> Result<(), CoreError> {
        self.act("restart", Request::post(self.path("restart"))).await
    }

    pub async fn pause(&self) -> Result<(), CoreError> {
        self.act("pause", Request::post(self.path("pause"))).await
    }

    pub async fn unpause(&self) -> Result<(), CoreError> {
        self.act("unpause", Request::post(self.path("unpause"))).await
    }

    pub async fn kill(&self, signal: Option<&str>) -> Result<(), CoreError> {
        self.act("kill", Request::post(self.path("kill")).query_opt("signal", signal))
            .await
    }

    /// Processes running in the pod.
    pub async fn top(&self, ps_args: Option<&str>) -> Result<Value, CoreError> {
        self.manager()
            .api()
            .send_json(
                Request::get(self.path("top"))
                    .query("stream", false)
                    .query_opt("ps_args", ps_args),
            )
            .await
            .context("top", Pods::NAME, Some(self.id()))
    }

    /// Resource usage of the pod's containers.
    pub async fn stats(&self) -> Result<Vec<Value>, CoreError> {
        self.manager()
            .api()
            .send_json(Request::get("/pods/stats").query("namesOrIDs", self.id()))
            .await
            .context("stats", Pods::NAME, Some(self.id()))
    }
}
