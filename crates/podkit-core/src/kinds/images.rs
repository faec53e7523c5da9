// ── Images ──
//
// Image descriptor plus registry traffic (pull, push, search), local
// transfer (save, load) and builds from a context directory.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures_util::TryStreamExt;
use podkit_api::{ByteStream, Filters, RegistryAuth, Request};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::with_auth;
use crate::archive::{self, ExcludePatterns};
use crate::entity::{self, Attrs, Entity};
use crate::error::{CoreError, ResultExt};
use crate::manager::{
    ListOptions, Manager, Prunable, PruneReport, RemoveOptions, ResourceKind,
};
use crate::streams::{self, JsonStream};

/// Builds and pulls can run far longer than a regular request.
pub(crate) const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

// ── Kind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Images;

pub type Image = Entity<Images>;
pub type ImagesManager = Manager<Images>;

impl ResourceKind for Images {
    const NAME: &'static str = "image";
    const COLLECTION: &'static str = "images";
    const ID_KEYS: &'static [&'static str] = &["Id"];

    fn list_request(options: &ListOptions) -> Result<Request, CoreError> {
        Ok(Request::get("/images/json")
            .query_flag("all", options.all.unwrap_or(false))
            .filters(&options.filters))
    }

    fn empty_list_on_missing() -> bool {
        true
    }

    fn name_of(attrs: &Attrs) -> Option<&str> {
        attrs.pointer("/RepoTags/0").and_then(Value::as_str)
    }
}

impl Prunable for Images {}

// ── Options and reports ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Tag to pull when the reference has none. Defaults to `latest`.
    pub tag: Option<String>,
    pub all_tags: bool,
    /// `os[/arch[/variant]]`.
    pub platform: Option<String>,
    pub tls_verify: Option<bool>,
    pub auth: Option<RegistryAuth>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Push to a different reference than the local name.
    pub destination: Option<String>,
    pub tls_verify: Option<bool>,
    /// Manifest format, `oci` or `v2s2`.
    pub format: Option<String>,
    pub auth: Option<RegistryAuth>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Context directory sent to the daemon.
    pub context: PathBuf,
    /// Containerfile path, relative to the context or absolute. A file
    /// outside the context is sent along under a generated name.
    pub dockerfile: Option<String>,
    pub tags: Vec<String>,
    pub build_args: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub nocache: bool,
    pub pull: bool,
    pub remove_intermediate: bool,
    /// Squash newly built layers into one.
    pub squash: bool,
    /// Cache intermediate layers. The daemon default applies when unset.
    pub layers: Option<bool>,
    /// Custom build output, e.g. `type=local,dest=out`.
    pub output: Option<String>,
    /// Image format, `application/vnd.oci.image.manifest.v1+json` or
    /// `application/vnd.docker.distribution.manifest.v2+json`.
    pub output_format: Option<String>,
}

impl BuildOptions {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            dockerfile: None,
            tags: Vec::new(),
            build_args: Vec::new(),
            labels: Vec::new(),
            target: None,
            platform: None,
            nocache: false,
            pull: false,
            remove_intermediate: true,
            squash: false,
            layers: None,
            output: None,
            output_format: None,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn dockerfile(mut self, path: impl Into<String>) -> Self {
        self.dockerfile = Some(path.into());
        self
    }
}

/// Outcome of clearing the build cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildPruneReport {
    #[serde(rename = "CachesDeleted", default)]
    pub caches_deleted: Vec<String>,
    #[serde(rename = "SpaceReclaimed", default)]
    pub space_reclaimed: u64,
}

/// Outcome of removing an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageRemoveReport {
    #[serde(rename = "Deleted", default)]
    pub deleted: Vec<String>,
    #[serde(rename = "Untagged", default)]
    pub untagged: Vec<String>,
    #[serde(rename = "Errors", default)]
    pub errors: Vec<String>,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

// ── Manager extensions ───────────────────────────────────────────────

impl Manager<Images> {
    /// Pull an image and return what was pulled.
    pub async fn pull(
        &self,
        reference: &str,
        options: &PullOptions,
    ) -> Result<Vec<Image>, CoreError> {
        let target = pull_reference(reference, options);
        let mut lines = self.pull_stream(reference, options).await?;

        let mut pulled: Vec<String> = Vec::new();
        while let Some(line) = lines.try_next().await? {
            if let Some(error) = line.get("error").and_then(Value::as_str) {
                return Err(CoreError::OperationFailed {
                    operation: "pull".into(),
                    kind: Images::NAME.into(),
                    id: target,
                    message: error.to_owned(),
                });
            }
            if let Some(images) = line.get("images").and_then(Value::as_array) {
                pulled = images
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect();
            } else if let Some(id) = line.get("id").and_then(Value::as_str) {
                pulled = vec![id.to_owned()];
            } else if let Some(progress) = line.get("stream").and_then(Value::as_str) {
                debug!(progress = progress.trim_end(), "pull");
            }
        }

        if pulled.is_empty() {
            return Err(CoreError::OperationFailed {
                operation: "pull".into(),
                kind: Images::NAME.into(),
                id: target,
                message: "daemon reported no pulled image".into(),
            });
        }
        info!(reference = %target, count = pulled.len(), "pulled");

        let mut images = Vec::with_capacity(pulled.len());
        for id in &pulled {
            images.push(self.get(id).await?);
        }
        Ok(images)
    }

    /// Pull progress as raw JSON lines.
    pub async fn pull_stream(
        &self,
        reference: &str,
        options: &PullOptions,
    ) -> Result<JsonStream<Value>, CoreError> {
        let target = pull_reference(reference, options);
        let mut request = Request::post("/images/pull")
            .query("reference", &target)
            .query_flag("allTags", options.all_tags)
            .query_opt("tlsVerify", options.tls_verify)
            .timeout(TRANSFER_TIMEOUT);
        if let Some(platform) = &options.platform {
            let (os, arch, variant) = parse_platform(platform)?;
            request = request
                .query("OS", os)
                .query_opt("Arch", arch)
                .query_opt("Variant", variant);
        }
        let request = with_auth(request, options.auth.as_ref())?;

        let response = self
            .api()
            .send_streaming(request)
            .await
            .context("pull", Images::NAME, Some(&target))?;
        Ok(streams::json(response.body))
    }

    /// Push a local image; returns the progress lines once done.
    pub async fn push(&self, name: &str, options: &PushOptions) -> Result<Vec<Value>, CoreError> {
        let mut lines = self.push_stream(name, options).await?;
        let mut report = Vec::new();
        while let Some(line) = lines.try_next().await? {
            if let Some(error) = line.get("error").and_then(Value::as_str) {
                return Err(CoreError::OperationFailed {
                    operation: "push".into(),
                    kind: Images::NAME.into(),
                    id: name.into(),
                    message: error.to_owned(),
                });
            }
            report.push(line);
        }
        Ok(report)
    }

    pub async fn push_stream(
        &self,
        name: &str,
        options: &PushOptions,
    ) -> Result<JsonStream<Value>, CoreError> {
        let request = Request::post(format!("/images/{}/push", podkit_api::quote(name)))
            .query_opt("destination", options.destination.as_deref())
            .query_opt("tlsVerify", options.tls_verify)
            .query_opt("format", options.format.as_deref())
            .timeout(TRANSFER_TIMEOUT);
        let request = with_auth(request, options.auth.as_ref())?;

        let response = self
            .api()
            .send_streaming(request)
            .await
            .context("push", Images::NAME, Some(name))?;
        Ok(streams::json(response.body))
    }

    /// Load images from a tar archive produced by `save`.
    pub async fn load(&self, tar: ByteStream) -> Result<Vec<Image>, CoreError> {
        let request = Request::post("/images/load")
            .stream(tar, "application/x-tar")
            .timeout(TRANSFER_TIMEOUT);
        let body: Value = self
            .api()
            .send_json(request)
            .await
            .context("load", Images::NAME, None)?;

        let names: Vec<&str> = body
            .get("Names")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let mut images = Vec::with_capacity(names.len());
        for name in names {
            images.push(self.get(name).await?);
        }
        Ok(images)
    }

    /// Search registries for `term`.
    pub async fn search(
        &self,
        term: &str,
        limit: Option<u32>,
        filters: &Filters,
    ) -> Result<Vec<Value>, CoreError> {
        let request = Request::get("/images/search")
            .query("term", term)
            .query_opt("limit", limit)
            .query("noTrunc", true)
            .filters(filters);
        self.api()
            .send_json(request)
            .await
            .context("search", Images::NAME, Some(term))
    }

    /// Remove an image and return the daemon's report.
    pub async fn remove_report(
        &self,
        key: &str,
        options: &RemoveOptions,
    ) -> Result<ImageRemoveReport, CoreError> {
        self.api()
            .send_json(Images::remove_request(key, options))
            .await
            .context("remove", Images::NAME, Some(key))
    }

    /// Prune unused images; `all` also removes untagged but unused ones.
    pub async fn prune_images(&self, filters: &Filters, all: bool) -> Result<PruneReport, CoreError> {
        let request = Request::post("/images/prune")
            .query_flag("all", all)
            .filters(filters);
        self.prune_with(request).await
    }

    /// Clear the build cache through the compat endpoint.
    pub async fn prune_builds(&self) -> Result<BuildPruneReport, CoreError> {
        self.api()
            .send_json(Request::post("/build/prune").compat())
            .await
            .context("prune builds", Images::NAME, None)
    }

    /// Registry metadata for a local image.
    pub async fn get_registry_data(&self, name: &str) -> Result<RegistryData, CoreError> {
        Ok(RegistryData {
            image_name: name.to_owned(),
            image: self.get(name).await?,
        })
    }

    /// Build an image from a context directory. Returns the image and the
    /// build log.
    pub async fn build(&self, options: &BuildOptions) -> Result<(Image, Vec<String>), CoreError> {
        let (dockerfile, extra) =
            match locate_containerfile(&options.context, options.dockerfile.as_deref())? {
                Containerfile::InContext(relative) => (relative, Vec::new()),
                Containerfile::External { source, name } => {
                    debug!(
                        source = %source.display(),
                        name = %name,
                        "sending containerfile from outside the context"
                    );
                    (name.clone(), vec![(source, PathBuf::from(name))])
                }
            };
        let excludes = ExcludePatterns::new(&archive::read_ignore_file(&options.context)?)?;
        let tar = archive::create_archive_with(&options.context, excludes, extra)?;

        let mut request = options
            .tags
            .iter()
            .fold(Request::post("/build"), |r, tag| r.query("t", tag))
            .query("dockerfile", &dockerfile)
            .query_opt("target", options.target.as_deref())
            .query_opt("platform", options.platform.as_deref())
            .query_flag("nocache", options.nocache)
            .query_flag("pull", options.pull)
            .query("rm", options.remove_intermediate)
            .query_flag("squash", options.squash)
            .query_opt("layers", options.layers)
            .query_opt("output", options.output.as_deref())
            .query_opt("outputformat", options.output_format.as_deref());
        if !options.build_args.is_empty() {
            request = request.query("buildargs", pairs_json(&options.build_args));
        }
        if !options.labels.is_empty() {
            request = request.query("labels", pairs_json(&options.labels));
        }
        let request = request
            .stream(tar, "application/x-tar")
            .timeout(TRANSFER_TIMEOUT);

        let response = self
            .api()
            .send_streaming(request)
            .await
            .context("build", Images::NAME, None)?;
        let mut lines = streams::json::<Value>(response.body);

        let mut log = Vec::new();
        let mut image_id = None;
        while let Some(line) = lines.try_next().await? {
            if let Some(error) = line.get("error").and_then(Value::as_str) {
                return Err(CoreError::BuildFailed {
                    message: error.to_owned(),
                    log,
                });
            }
            if let Some(text) = line.get("stream").and_then(Value::as_str) {
                if let Some(id) = image_id_marker(text) {
                    image_id = Some(id.to_owned());
                }
                log.push(text.to_owned());
            }
        }

        match image_id {
            Some(id) => Ok((self.get(&id).await?, log)),
            None => Err(CoreError::BuildFailed {
                message: log
                    .last()
                    .map_or_else(|| "unknown".to_owned(), |l| l.trim_end().to_owned()),
                log,
            }),
        }
    }
}

// ── Entity extensions ────────────────────────────────────────────────

impl Entity<Images> {
    /// `RepoTags`, empty for dangling images.
    pub fn tags(&self) -> Vec<&str> {
        self.attrs()
            .get("RepoTags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn path(&self, action: &str) -> String {
        format!("/images/{}/{action}", podkit_api::quote(self.id()))
    }

    pub async fn history(&self) -> Result<Vec<Value>, CoreError> {
        self.manager()
            .api()
            .send_json(Request::get(self.path("history")))
            .await
            .context("history", Images::NAME, Some(self.id()))
    }

    /// Add `repo:tag`. Cached tags change only on `reload`.
    pub async fn tag(&self, repo: &str, tag: Option<&str>) -> Result<(), CoreError> {
        let request = Request::post(self.path("tag"))
            .query("repo", repo)
            .query("tag", tag.unwrap_or("latest"));
        self.manager()
            .api()
            .send(request)
            .await
            .map(drop)
            .context("tag", Images::NAME, Some(self.id()))
    }

    pub async fn untag(&self, repo: &str, tag: Option<&str>) -> Result<(), CoreError> {
        let request = Request::post(self.path("untag"))
            .query("repo", repo)
            .query("tag", tag.unwrap_or("latest"));
        self.manager()
            .api()
            .send(request)
            .await
            .map(drop)
            .context("untag", Images::NAME, Some(self.id()))
    }

    /// The image as a `docker-archive` tar stream.
    pub async fn save(&self) -> Result<ByteStream, CoreError> {
        let request = Request::get(self.path("get")).query("format", "docker-archive");
        let response = self
            .manager()
            .api()
            .send_streaming(request)
            .await
            .context("save", Images::NAME, Some(self.id()))?;
        Ok(response.body)
    }
}

// ── Registry data ────────────────────────────────────────────────────

/// Registry metadata about an image, looked up by the name it was
/// requested with.
#[derive(Debug, Clone)]
pub struct RegistryData {
    image_name: String,
    image: Image,
}

impl RegistryData {
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn id(&self) -> &str {
        self.image.id()
    }

    pub fn short_id(&self) -> &str {
        entity::short_id(self.image.id())
    }

    pub fn attrs(&self) -> &Attrs {
        self.image.attrs()
    }

    /// Whether the image matches `os[/arch[/variant]]`. The variant is not
    /// recorded by libpod and is ignored.
    pub fn has_platform(&self, platform: &str) -> Result<bool, CoreError> {
        let (os, arch, _variant) = parse_platform(platform)?;
        let attrs = self.image.attrs();
        Ok(attrs.str("Os") == Some(os)
            && arch.is_none_or(|arch| attrs.str("Architecture") == Some(arch)))
    }

    /// Pull this image by id from its repository.
    pub async fn pull(&self, platform: Option<&str>) -> Result<Vec<Image>, CoreError> {
        let options = PullOptions {
            tag: Some(self.image.id().to_owned()),
            platform: platform.map(str::to_owned),
            ..PullOptions::default()
        };
        self.image
            .manager()
            .pull(repository_of(&self.image_name), &options)
            .await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Append the default tag unless the reference already names one.
fn pull_reference(reference: &str, options: &PullOptions) -> String {
    if options.all_tags || reference.contains('@') {
        return reference.to_owned();
    }
    let last = reference.rsplit('/').next().unwrap_or(reference);
    if last.contains(':') {
        return reference.to_owned();
    }
    format!("{reference}:{}", options.tag.as_deref().unwrap_or("latest"))
}

/// The repository part of a reference, without tag or digest.
fn repository_of(reference: &str) -> &str {
    if let Some((repo, _digest)) = reference.split_once('@') {
        return repo;
    }
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => reference,
    }
}

fn parse_platform(platform: &str) -> Result<(&str, Option<&str>, Option<&str>), CoreError> {
    let parts: Vec<&str> = platform.split('/').collect();
    match parts.as_slice() {
        [os] if !os.is_empty() => Ok((*os, None, None)),
        [os, arch] if !os.is_empty() && !arch.is_empty() => Ok((*os, Some(*arch), None)),
        [os, arch, variant] if parts.iter().all(|p| !p.is_empty()) => {
            Ok((*os, Some(*arch), Some(*variant)))
        }
        _ => Err(CoreError::invalid(format!(
            "'{platform}' is not a legal platform"
        ))),
    }
}

/// The final `stream` line of a build is the bare hex image id.
fn image_id_marker(line: &str) -> Option<&str> {
    let id = line.strip_suffix('\n')?;
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()))
        .then_some(id)
}

fn pairs_json(pairs: &[(String, String)]) -> String {
    let map: serde_json::Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map).to_string()
}

enum Containerfile {
    /// Path relative to the context root.
    InContext(String),
    /// A file outside the context, added to the tar as `name`.
    External { source: PathBuf, name: String },
}

fn locate_containerfile(context: &Path, dockerfile: Option<&str>) -> Result<Containerfile, CoreError> {
    let Some(dockerfile) = dockerfile else {
        let name = if context.join("Containerfile").is_file() {
            "Containerfile"
        } else {
            "Dockerfile"
        };
        return Ok(Containerfile::InContext(name.to_owned()));
    };

    let joined = context.join(dockerfile);
    let root = context.canonicalize().unwrap_or_else(|_| context.to_path_buf());
    let resolved = joined.canonicalize().unwrap_or_else(|_| joined.clone());
    let relative = resolved
        .strip_prefix(&root)
        .or_else(|_| joined.strip_prefix(context))
        .ok()
        .filter(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))));
    if let Some(relative) = relative {
        return Ok(Containerfile::InContext(relative.to_string_lossy().into_owned()));
    }

    if !resolved.is_file() {
        return Err(CoreError::invalid(format!(
            "containerfile {dockerfile} does not exist"
        )));
    }
    Ok(Containerfile::External {
        source: resolved,
        name: format!(".containerfile.{}", uuid::Uuid::new_v4().simple()),
    })
}
