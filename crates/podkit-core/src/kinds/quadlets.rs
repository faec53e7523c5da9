// ── Quadlets ──
//
// Systemd unit files (`.container`, `.pod`, `.network`, ...) that podman
// generates services from. Listing and lookup share one endpoint; removal
// and installation can reload systemd afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use podkit_api::{Filters, Request, quote};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::archive::{self, ExcludePatterns};
use crate::entity::{Attrs, Entity};
use crate::error::{CoreError, ResultExt};
use crate::manager::{ListOptions, Manager, RemoveOptions, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct Quadlets;

pub type Quadlet = Entity<Quadlets>;
pub type QuadletsManager = Manager<Quadlets>;

impl ResourceKind for Quadlets {
    const NAME: &'static str = "quadlet";
    const COLLECTION: &'static str = "quadlets";
    const ID_KEYS: &'static [&'static str] = &["Name", "name"];

    fn empty_list_on_missing() -> bool {
        true
    }

    /// No inspect endpoint; the listing filtered by name stands in.
    fn inspect_request(key: &str) -> Request {
        Request::get("/quadlets/json").filters(&Filters::new().with("name", key))
    }

    fn inspect_response(key: &str, body: Value) -> Result<Value, CoreError> {
        match body {
            Value::Array(items) => items.into_iter().next().ok_or_else(|| CoreError::NotFound {
                operation: "inspect".into(),
                kind: Self::NAME.into(),
                id: key.into(),
                message: format!("quadlet {key} not found"),
            }),
            other => Ok(other),
        }
    }

    fn remove_request(key: &str, options: &RemoveOptions) -> Request {
        Request::delete(format!("/quadlets/{}", quote(key)))
            .query_flag("force", options.force)
    }
}

// ── Options and reports ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QuadletRemoveOptions {
    /// Stop running units first.
    pub force: bool,
    /// Succeed when the quadlet does not exist.
    pub ignore: bool,
    pub reload_systemd: bool,
}

impl Default for QuadletRemoveOptions {
    fn default() -> Self {
        Self {
            force: false,
            ignore: false,
            reload_systemd: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuadletInstallOptions {
    /// Overwrite quadlets that are already installed.
    pub replace: bool,
    pub reload_systemd: bool,
}

impl Default for QuadletInstallOptions {
    fn default() -> Self {
        Self {
            replace: false,
            reload_systemd: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RemoveReport {
    #[serde(rename = "Removed", default)]
    removed: Vec<String>,
    #[serde(rename = "Errors", default)]
    errors: BTreeMap<String, String>,
}

/// Outcome of an install: source file to installed path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstallReport {
    #[serde(rename = "InstalledQuadlets", default)]
    pub installed: BTreeMap<String, String>,
    #[serde(rename = "QuadletErrors", default)]
    pub errors: BTreeMap<String, String>,
}

// ── Manager extensions ───────────────────────────────────────────────

impl Manager<Quadlets> {
    /// Quadlets whose name matches `pattern` (wildcards allowed).
    pub async fn list_named(&self, pattern: &str) -> Result<Vec<Quadlet>, CoreError> {
        self.list(&ListOptions::default().filter("name", pattern))
            .await
    }

    /// The unit file as written on disk.
    pub async fn contents(&self, name: &str) -> Result<String, CoreError> {
        let response = self
            .api()
            .send(Request::get(format!("/quadlets/{}/file", quote(name))))
            .await
            .context("contents", Quadlets::NAME, Some(name))?;
        String::from_utf8(response.body.to_vec()).map_err(|e| CoreError::Deserialization {
            message: format!("quadlet file is not UTF-8: {e}"),
            body: String::new(),
        })
    }

    /// Remove one quadlet and return the names removed.
    pub async fn delete(
        &self,
        name: &str,
        options: &QuadletRemoveOptions,
    ) -> Result<Vec<String>, CoreError> {
        let request = Request::delete(format!("/quadlets/{}", quote(name)));
        self.delete_with(name, request, options).await
    }

    /// Remove every quadlet of the current user.
    pub async fn delete_all(&self, options: &QuadletRemoveOptions) -> Result<Vec<String>, CoreError> {
        let request = Request::delete("/quadlets").query("all", true);
        self.delete_with("all", request, options).await
    }

    async fn delete_with(
        &self,
        target: &str,
        request: Request,
        options: &QuadletRemoveOptions,
    ) -> Result<Vec<String>, CoreError> {
        let request = request
            .query("force", options.force)
            .query("ignore", options.ignore)
            .query("reload-systemd", options.reload_systemd);
        let report: RemoveReport = self
            .api()
            .send_json(request)
            .await
            .context("remove", Quadlets::NAME, Some(target))?;
        if let Some((name, message)) = report.errors.into_iter().next() {
            return Err(CoreError::OperationFailed {
                operation: "remove".into(),
                kind: Quadlets::NAME.into(),
                id: name,
                message,
            });
        }
        debug!(count = report.removed.len(), "removed quadlets");
        Ok(report.removed)
    }

    /// Install a unit file, or every file of a directory, for the current
    /// user.
    pub async fn install(
        &self,
        source: &Path,
        options: &QuadletInstallOptions,
    ) -> Result<InstallReport, CoreError> {
        let tar = if source.is_dir() {
            archive::create_archive(source, ExcludePatterns::default())?
        } else {
            archive::pack_path(source)?
        };
        let request = Request::post("/quadlets")
            .query("replace", options.replace)
            .query("reload-systemd", options.reload_systemd)
            .stream(tar, "application/x-tar");

        let target = source.display().to_string();
        let report: InstallReport = self
            .api()
            .send_json(request)
            .await
            .context("install", Quadlets::NAME, Some(&target))?;
        if let Some((file, message)) = report.errors.iter().next() {
            return Err(CoreError::OperationFailed {
                operation: "install".into(),
                kind: Quadlets::NAME.into(),
                id: file.clone(),
                message: message.clone(),
            });
        }
        info!(source = %target, count = report.installed.len(), "installed quadlets");
        Ok(report)
    }
}

// ── Entity extensions ────────────────────────────────────────────────

impl Entity<Quadlets> {
    fn field(&self, upper: &str, lower: &str) -> Option<&str> {
        let attrs: &Attrs = self.attrs();
        attrs.str(upper).or_else(|| attrs.str(lower))
    }

    /// Generated systemd unit, e.g. `web.service`.
    pub fn unit_name(&self) -> Option<&str> {
        self.field("UnitName", "unitName")
    }

    pub fn path(&self) -> Option<&str> {
        self.field("Path", "path")
    }

    pub fn status(&self) -> Option<&str> {
        self.field("Status", "status")
    }

    /// Application the quadlet was installed with, if any.
    pub fn application(&self) -> Option<&str> {
        self.field("App", "app")
    }

    pub async fn contents(&self) -> Result<String, CoreError> {
        self.manager().contents(self.id()).await
    }

    pub async fn delete(&self, options: &QuadletRemoveOptions) -> Result<Vec<String>, CoreError> {
        self.manager().delete(self.id(), options).await
    }
}
