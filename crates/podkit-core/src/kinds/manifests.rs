// ── Manifest lists ──
//
// Manifest lists have no list endpoint and no stable id of their own; the
// id is derived from the first member digest and the name is the list
// reference the caller asked for.

use podkit_api::{RegistryAuth, Request, quote};
use serde::Serialize;
use serde_json::{Value, json};

use super::{create_body, with_auth};
use crate::entity::{Attrs, Entity};
use crate::error::{CoreError, ResultExt};
use crate::manager::{ListOptions, Manager, RemoveOptions, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct Manifests;

pub type Manifest = Entity<Manifests>;
pub type ManifestsManager = Manager<Manifests>;

impl ResourceKind for Manifests {
    const NAME: &'static str = "manifest";
    const COLLECTION: &'static str = "manifests";
    const ID_KEYS: &'static [&'static str] = &[];

    fn list_request(_options: &ListOptions) -> Result<Request, CoreError> {
        Err(CoreError::Unsupported {
            operation: "list".into(),
            kind: Self::NAME.into(),
        })
    }

    fn remove_request(key: &str, _options: &RemoveOptions) -> Request {
        Request::delete(format!("/manifests/{}", quote(key)))
    }

    fn normalize(key: &str, attrs: &mut Attrs) {
        if !key.is_empty() && !attrs.contains_key("names") {
            attrs.insert("names", Value::String(key.to_owned()));
        }
    }

    fn id_of(attrs: &Attrs) -> Option<String> {
        attrs
            .pointer("/manifests/0/digest")
            .and_then(Value::as_str)
            .map(|digest| digest.trim_start_matches("sha256:").to_owned())
            .or_else(|| Self::name_of(attrs).map(str::to_owned))
    }

    fn name_of(attrs: &Attrs) -> Option<&str> {
        attrs.str("names")
    }

    fn lookup_key(id: &str, attrs: &Attrs) -> String {
        Self::name_of(attrs).unwrap_or(id).to_owned()
    }
}

/// Images to add to a manifest list, with per-entry overrides.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManifestAddOptions {
    pub images: Vec<String>,
    pub all: Option<bool>,
    pub annotation: Vec<String>,
    pub arch: Option<String>,
    pub features: Vec<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub variant: Option<String>,
}

impl ManifestAddOptions {
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            images: vec![image.into()],
            ..Self::default()
        }
    }
}

impl Manager<Manifests> {
    /// Create a manifest list, optionally seeded with images.
    pub async fn create(&self, name: &str, images: &[&str], all: bool) -> Result<Manifest, CoreError> {
        if name.is_empty() {
            return Err(CoreError::invalid("manifest list needs a name"));
        }
        let mut request = Request::post(format!("/manifests/{}", quote(name))).query_flag("all", all);
        if !images.is_empty() {
            request = request.query("images", images.join(","));
        }
        self.api()
            .send(request)
            .await
            .context("create", Manifests::NAME, Some(name))?;
        self.get(name).await
    }
}

impl Entity<Manifests> {
    fn path(&self) -> String {
        format!("/manifests/{}", quote(&self.key()))
    }

    /// Add images to the list. Call `reload` to see the new members.
    pub async fn add(&self, options: &ManifestAddOptions) -> Result<(), CoreError> {
        let mut body = create_body(options)?;
        if let Value::Object(map) = &mut body {
            map.insert("operation".into(), json!("update"));
        }
        self.manager()
            .api()
            .send(Request::put(self.path()).json(&body)?)
            .await
            .map(drop)
            .context("add", Manifests::NAME, Some(self.id()))
    }

    /// Drop one member. Accepts a bare digest or `name@digest`.
    pub async fn remove_digest(&self, digest: &str) -> Result<(), CoreError> {
        let digest = digest.rsplit_once('@').map_or(digest, |(_, d)| d);
        if digest.is_empty() {
            return Err(CoreError::invalid("empty manifest digest"));
        }
        let body = json!({"operation": "remove", "images": [digest]});
        self.manager()
            .api()
            .send(Request::put(self.path()).json(&body)?)
            .await
            .map(drop)
            .context("remove digest", Manifests::NAME, Some(self.id()))
    }

    /// Push the list, and with `all` every member image, to `destination`.
    pub async fn push(
        &self,
        destination: &str,
        all: bool,
        tls_verify: Option<bool>,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), CoreError> {
        let request = Request::post(format!("{}/registry/{}", self.path(), quote(destination)))
            .query_flag("all", all)
            .query_opt("tlsVerify", tls_verify);
        let request = with_auth(request, auth)?.timeout(super::images::TRANSFER_TIMEOUT);
        self.manager()
            .api()
            .send(request)
            .await
            .map(drop)
            .context("push", Manifests::NAME, Some(self.id()))
    }

    /// Member digests in list order.
    pub fn digests(&self) -> Vec<&str> {
        self.attrs()
            .get("manifests")
            .and_then(Value::as_array)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| m.get("digest").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}
