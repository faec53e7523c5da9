// ── Networks ──
//
// libpod reports networks with lower-case keys (`name`, `id`, `driver`).

use std::collections::BTreeMap;

use podkit_api::Request;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::create_body;
use crate::entity::{Attrs, Entity};
use crate::error::{CoreError, ResultExt};
use crate::manager::{Manager, Prunable, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct Networks;

pub type Network = Entity<Networks>;
pub type NetworksManager = Manager<Networks>;

impl ResourceKind for Networks {
    const NAME: &'static str = "network";
    const COLLECTION: &'static str = "networks";
    const ID_KEYS: &'static [&'static str] = &["Id", "id"];

    /// Networks are looked up by name.
    fn lookup_key(id: &str, attrs: &Attrs) -> String {
        Self::name_of(attrs).unwrap_or(id).to_owned()
    }
}

impl Prunable for Networks {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subnet {
    pub subnet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Network creation parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: Option<String>,
    pub dns_enabled: Option<bool>,
    pub internal: Option<bool>,
    pub ipv6_enabled: Option<bool>,
    pub subnets: Vec<Subnet>,
    pub labels: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn subnet(mut self, subnet: impl Into<String>, gateway: Option<&str>) -> Self {
        self.subnets.push(Subnet {
            subnet: subnet.into(),
            gateway: gateway.map(str::to_owned),
        });
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl Manager<Networks> {
    /// Create a network. The response already carries the full detail.
    pub async fn create(&self, spec: &NetworkSpec) -> Result<Network, CoreError> {
        if spec.name.is_empty() {
            return Err(CoreError::invalid("network spec needs a name"));
        }
        let body = create_body(spec)?;
        let created: Value = self
            .api()
            .send_json(Request::post("/networks/create").json(&body)?)
            .await
            .context("create", Networks::NAME, Some(&spec.name))?;
        self.entity(&spec.name, created)
    }
}

impl Entity<Networks> {
    pub fn driver(&self) -> Option<&str> {
        self.attrs().str("driver")
    }

    fn path(&self, action: &str) -> String {
        format!("/networks/{}/{action}", podkit_api::quote(&self.key()))
    }

    /// Attach a container, optionally under extra DNS aliases.
    pub async fn connect(&self, container: &str, aliases: &[&str]) -> Result<(), CoreError> {
        let body = create_body(&json!({"container": container, "aliases": aliases}))?;
        self.manager()
            .api()
            .send(Request::post(self.path("connect")).json(&body)?)
            .await
            .map(drop)
            .context("connect", Networks::NAME, Some(self.id()))
    }

    pub async fn disconnect(&self, container: &str, force: bool) -> Result<(), CoreError> {
        let body = json!({"Container": container, "Force": force});
        self.manager()
            .api()
            .send(Request::post(self.path("disconnect")).json(&body)?)
            .await
            .map(drop)
            .context("disconnect", Networks::NAME, Some(self.id()))
    }
}
