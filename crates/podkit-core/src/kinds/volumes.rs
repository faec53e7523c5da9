// ── Volumes ──

use std::collections::BTreeMap;

use podkit_api::Request;
use serde::Serialize;
use serde_json::Value;

use super::create_body;
use crate::entity::Entity;
use crate::error::{CoreError, ResultExt};
use crate::manager::{Manager, Prunable, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct Volumes;

pub type Volume = Entity<Volumes>;
pub type VolumesManager = Manager<Volumes>;

impl ResourceKind for Volumes {
    const NAME: &'static str = "volume";
    const COLLECTION: &'static str = "volumes";
    const ID_KEYS: &'static [&'static str] = &["Name"];
}

impl Prunable for Volumes {}

/// Volume creation parameters. An empty name lets the daemon pick one.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeSpec {
    pub name: Option<String>,
    pub driver: Option<String>,
    #[serde(rename = "Label")]
    pub labels: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
}

impl VolumeSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl Manager<Volumes> {
    /// Create a volume. The response already carries the full detail.
    pub async fn create(&self, spec: &VolumeSpec) -> Result<Volume, CoreError> {
        let body = create_body(spec)?;
        let created: Value = self
            .api()
            .send_json(Request::post("/volumes/create").json(&body)?)
            .await
            .context("create", Volumes::NAME, spec.name.as_deref())?;
        self.entity(spec.name.as_deref().unwrap_or_default(), created)
    }
}

impl Entity<Volumes> {
    pub fn mountpoint(&self) -> Option<&str> {
        self.attrs().str("Mountpoint")
    }

    pub fn driver(&self) -> Option<&str> {
        self.attrs().str("Driver")
    }
}
