// ── Containers ──
//
// Container descriptor, create spec and the container actions: lifecycle,
// logs and attach, exec sessions, archives, commit and stats.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use http::StatusCode;
use podkit_api::{ByteStream, Frame, Request, StreamType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::images::{Image, Images};
use super::{create_body, created_id, timestamp};
use crate::archive;
use crate::entity::Entity;
use crate::error::{CoreError, ResultExt};
use crate::manager::{ListOptions, Manager, Prunable, RemoveOptions, ResourceKind};
use crate::streams::{self, FrameStream, JsonStream, collect_output};

/// Effectively unbounded timeout for long polls such as `wait`.
const LONG_POLL: Duration = Duration::from_secs(24 * 60 * 60);

/// Grace added on top of a stop timeout before the request itself gives up.
const STOP_GRACE: Duration = Duration::from_secs(30);

// ── Kind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Containers;

pub type Container = Entity<Containers>;
pub type ContainersManager = Manager<Containers>;

impl ResourceKind for Containers {
    const NAME: &'static str = "container";
    const COLLECTION: &'static str = "containers";
    const ID_KEYS: &'static [&'static str] = &["Id"];

    /// All containers with sizes, unless a sparse listing is asked for.
    fn list_request(options: &ListOptions) -> Result<Request, CoreError> {
        Ok(Request::get("/containers/json")
            .query("all", options.all.unwrap_or(true))
            .query_flag("size", !options.sparse)
            .query_opt("limit", options.limit)
            .filters(&options.filters))
    }

    fn remove_request(key: &str, options: &RemoveOptions) -> Request {
        Request::delete(format!("/containers/{}", podkit_api::quote(key)))
            .query_flag("force", options.force)
            .query_flag("v", options.volumes)
            .query_opt("timeout", options.timeout)
    }
}

impl Prunable for Containers {}

// ── Create ───────────────────────────────────────────────────────────

/// Port published on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub container_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

/// Bind or tmpfs mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub destination: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Container creation parameters. Unset fields are left to the daemon;
/// anything not modelled here can go in `extra`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub work_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub terminal: Option<bool>,
    pub stdin: Option<bool>,
    pub remove: Option<bool>,
    pub privileged: Option<bool>,
    pub pod: Option<String>,
    pub portmappings: Vec<PortMapping>,
    pub mounts: Vec<Mount>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub restart_policy: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
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

    pub fn bind(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            kind: "bind".into(),
            source: Some(source.into()),
            destination: destination.into(),
            options: Vec::new(),
        });
        self
    }

    /// Set a raw spec field.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl Manager<Containers> {
    /// Create a container and return its full inspect detail.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<Container, CoreError> {
        if spec.image.is_empty() {
            return Err(CoreError::invalid("container spec needs an image"));
        }
        let body = create_body(spec)?;
        let created: Value = self
            .api()
            .send_json(Request::post("/containers/create").json(&body)?)
            .await
            .context("create", Containers::NAME, spec.name.as_deref())?;

        if let Some(warnings) = created.get("Warnings").and_then(Value::as_array) {
            for warning in warnings.iter().filter_map(Value::as_str) {
                warn!(%warning, "container create");
            }
        }
        self.get(&created_id(&created)?).await
    }

    /// Create and start a container.
    pub async fn run(&self, spec: &ContainerSpec) -> Result<Container, CoreError> {
        let container = self.create(spec).await?;
        container.start().await?;
        self.get(container.id()).await
    }
}

// ── Action options ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    /// Seconds to wait before killing.
    pub timeout: Option<u32>,
    /// Treat "already stopped" as success.
    pub ignore: bool,
}

#[derive(Debug, Clone)]
pub struct LogsOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// Number of lines from the end, or `all`.
    pub tail: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
            since: None,
            until: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Replay the log before following.
    pub logs: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            logs: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cmd: Vec<String>,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub tty: bool,
    pub privileged: bool,
}

impl ExecOptions {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Result of a finished exec session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub frames: Vec<Frame>,
}

impl ExecOutput {
    pub fn stdout(&self) -> Vec<u8> {
        collect_output(&self.frames, StreamType::Stdout)
    }

    pub fn stderr(&self) -> Vec<u8> {
        collect_output(&self.frames, StreamType::Stderr)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub repo: Option<String>,
    pub tag: Option<String>,
    pub author: Option<String>,
    pub comment: Option<String>,
    /// Dockerfile-style instructions, e.g. `CMD ["sh"]`.
    pub changes: Vec<String>,
    pub pause: bool,
    /// Manifest format, `oci` or `docker`.
    pub format: Option<String>,
}

/// cgroup CPU settings for `update`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuLimits {
    pub shares: Option<u64>,
    pub quota: Option<i64>,
    pub period: Option<u64>,
    /// CPUs the container may run on, e.g. `0-3`.
    pub cpus: Option<String>,
    pub mems: Option<String>,
}

/// cgroup memory settings for `update`, in bytes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLimits {
    pub limit: Option<i64>,
    pub reservation: Option<i64>,
    pub swap: Option<i64>,
    pub swappiness: Option<u64>,
    #[serde(rename = "disableOOMKiller")]
    pub disable_oom_killer: Option<bool>,
}

/// Per-device rate limit, e.g. read bytes per second.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRate {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Rate")]
    pub rate: u64,
}

/// Resource limits, healthcheck and restart policy changes for a live
/// container. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateOptions {
    #[serde(skip)]
    pub restart_policy: Option<String>,
    /// Only valid with the `on-failure` restart policy.
    #[serde(skip)]
    pub restart_retries: Option<u32>,
    pub cpu: Option<CpuLimits>,
    pub memory: Option<MemoryLimits>,
    #[serde(rename = "pids", serialize_with = "pids_limit")]
    pub pids_limit: Option<i64>,
    #[serde(rename = "DeviceReadBPs")]
    pub device_read_bps: Vec<DeviceRate>,
    #[serde(rename = "DeviceWriteBPs")]
    pub device_write_bps: Vec<DeviceRate>,
    #[serde(rename = "DeviceReadIOps")]
    pub device_read_iops: Vec<DeviceRate>,
    #[serde(rename = "DeviceWriteIOps")]
    pub device_write_iops: Vec<DeviceRate>,
    /// Raw `blockIO` section for settings not covered above.
    #[serde(rename = "blockIO")]
    pub block_io: Option<Value>,
    pub unified: BTreeMap<String, String>,
    pub health_cmd: Option<String>,
    pub health_interval: Option<String>,
    pub health_retries: Option<u32>,
    pub health_timeout: Option<String>,
    pub health_start_period: Option<String>,
    pub health_on_failure: Option<String>,
    pub no_healthcheck: Option<bool>,
}

impl UpdateOptions {
    fn has_health_settings(&self) -> bool {
        self.health_cmd.is_some()
            || self.health_interval.is_some()
            || self.health_retries.is_some()
            || self.health_timeout.is_some()
            || self.health_start_period.is_some()
            || self.health_on_failure.is_some()
    }
}

#[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
fn pids_limit<S: serde::Serializer>(limit: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
    limit.map(|limit| json!({ "limit": limit })).serialize(serializer)
}

/// Stat of a path inside a container, from `X-Docker-Container-Path-Stat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PathStat {
    pub name: String,
    pub size: i64,
    pub mode: u32,
    pub mtime: String,
    #[serde(rename = "linkTarget", default)]
    pub link_target: String,
}

/// One filesystem change reported by `diff`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilesystemChange {
    #[serde(rename = "Path")]
    pub path: String,
    /// 0 modified, 1 added, 2 deleted.
    #[serde(rename = "Kind")]
    pub kind: u8,
}

// ── Actions ──────────────────────────────────────────────────────────

impl Entity<Containers> {
    /// `State.Status` from inspect, or `State` from a listing.
    pub fn status(&self) -> Option<&str> {
        let attrs = self.attrs();
        attrs
            .pointer("/State/Status")
            .and_then(Value::as_str)
            .or_else(|| attrs.str("State"))
    }

    pub fn image_name(&self) -> Option<&str> {
        let attrs = self.attrs();
        attrs.str("ImageName").or_else(|| attrs.str("Image"))
    }

    /// Whether the container was created with a terminal.
    pub fn tty(&self) -> bool {
        self.attrs()
            .pointer("/Config/Tty")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn path(&self, action: &str) -> String {
        format!("/containers/{}/{action}", podkit_api::quote(self.id()))
    }

    /// POST an action; 304 (already in that state) counts as success.
    async fn act(&self, operation: &str, request: Request) -> Result<(), CoreError> {
        let response = self
            .manager()
            .api()
            .execute(request)
            .await
            .context(operation, Containers::NAME, Some(self.id()))?;
        if response.status == StatusCode::NOT_MODIFIED {
            debug!(id = self.id(), operation, "already in requested state");
            return Ok(());
        }
        response
            .error_for_status()
            .map(drop)
            .context(operation, Containers::NAME, Some(self.id()))
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        self.act("start", Request::post(self.path("start"))).await
    }

    pub async fn stop(&self, options: &StopOptions) -> Result<(), CoreError> {
        let mut request = Request::post(self.path("stop"))
            .query_opt("timeout", options.timeout)
            .query_flag("ignore", options.ignore);
        if let Some(secs) = options.timeout {
            request = request.timeout(Duration::from_secs(u64::from(secs)) + STOP_GRACE);
        }

        let response = self
            .manager()
            .api()
            .execute(request)
            .await
            .context("stop", Containers::NAME, Some(self.id()))?;
        if response.status == StatusCode::NOT_MODIFIED {
            if options.ignore {
                return Ok(());
            }
            return Err(CoreError::OperationFailed {
                operation: "stop".into(),
                kind: Containers::NAME.into(),
                id: self.id().into(),
                message: "container already stopped".into(),
            });
        }
        response
            .error_for_status()
            .map(drop)
            .context("stop", Containers::NAME, Some(self.id()))
    }

    pub async fn restart(&self, timeout: Option<u32>) -> Result<(), CoreError> {
        let mut request = Request::post(self.path("restart")).query_opt("t", timeout);
        if let Some(secs) = timeout {
            request = request.timeout(Duration::from_secs(u64::from(secs)) + STOP_GRACE);
        }
        self.act("restart", request).await
    }

    /// Send a signal (name or number); defaults to SIGKILL on the daemon.
    pub async fn kill(&self, signal: Option<&str>) -> Result<(), CoreError> {
        self.act("kill", Request::post(self.path("kill")).query_opt("signal", signal))
            .await
    }

    pub async fn pause(&self) -> Result<(), CoreError> {
        self.act("pause", Request::post(self.path("pause"))).await
    }

    pub async fn unpause(&self) -> Result<(), CoreError> {
        self.act("unpause", Request::post(self.path("unpause"))).await
    }

    pub async fn init(&self) -> Result<(), CoreError> {
        self.act("init", Request::post(self.path("init"))).await
    }

    /// Rename on the daemon. Cached attributes keep the old name until
    /// `reload`.
    pub async fn rename(&self, name: &str) -> Result<(), CoreError> {
        self.act("rename", Request::post(self.path("rename")).query("name", name))
            .await
    }

    /// Block until one of `conditions` is reached and return the exit code.
    pub async fn wait(&self, conditions: &[&str]) -> Result<i64, CoreError> {
        let request = conditions
            .iter()
            .fold(Request::post(self.path("wait")), |r, c| r.query("condition", c))
            .timeout(LONG_POLL);
        self.manager()
            .api()
            .send_json(request)
            .await
            .context("wait", Containers::NAME, Some(self.id()))
    }

    // ── Output ───────────────────────────────────────────────────────

    fn logs_request(&self, options: &LogsOptions, follow: bool) -> Request {
        Request::get(self.path("logs"))
            .query("stdout", options.stdout)
            .query("stderr", options.stderr)
            .query_flag("timestamps", options.timestamps)
            .query_flag("follow", follow)
            .query_opt("tail", options.tail.as_deref())
            .query_opt("since", options.since.map(timestamp))
            .query_opt("until", options.until.map(timestamp))
    }

    /// Log frames up to now.
    pub async fn logs(&self, options: &LogsOptions) -> Result<Vec<Frame>, CoreError> {
        self.follow_logs_inner(options, false)
            .await?
            .try_collect()
            .await
    }

    /// Log frames, following new output until the container stops or the
    /// client is closed.
    pub async fn follow_logs(&self, options: &LogsOptions) -> Result<FrameStream, CoreError> {
        self.follow_logs_inner(options, true).await
    }

    async fn follow_logs_inner(
        &self,
        options: &LogsOptions,
        follow: bool,
    ) -> Result<FrameStream, CoreError> {
        let response = self
            .manager()
            .api()
            .send_streaming(self.logs_request(options, follow))
            .await
            .context("logs", Containers::NAME, Some(self.id()))?;
        Ok(streams::frames(response.body, false))
    }

    /// Attach to the container's output.
    pub async fn attach(&self, options: &AttachOptions) -> Result<FrameStream, CoreError> {
        let request = Request::post(self.path("attach"))
            .query("stdout", options.stdout)
            .query("stderr", options.stderr)
            .query("stream", true)
            .query_flag("logs", options.logs);
        let response = self
            .manager()
            .api()
            .send_streaming(request)
            .await
            .context("attach", Containers::NAME, Some(self.id()))?;
        Ok(streams::frames(response.body, self.tty()))
    }

    // ── Exec ─────────────────────────────────────────────────────────

    async fn exec_create(&self, options: &ExecOptions) -> Result<String, CoreError> {
        if options.cmd.is_empty() {
            return Err(CoreError::invalid("exec needs a command"));
        }
        let body = create_body(&json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "AttachStdin": false,
            "Cmd": options.cmd,
            "Env": options.env,
            "WorkingDir": options.workdir,
            "User": options.user,
            "Tty": options.tty,
            "Privileged": options.privileged,
        }))?;
        let created: Value = self
            .manager()
            .api()
            .send_json(Request::post(self.path("exec")).json(&body)?)
            .await
            .context("exec", Containers::NAME, Some(self.id()))?;
        created_id(&created)
    }

    async fn exec_start(&self, exec_id: &str, tty: bool) -> Result<FrameStream, CoreError> {
        let request = Request::post(format!("/exec/{}/start", podkit_api::quote(exec_id)))
            .json(&json!({"Detach": false, "Tty": tty}))?;
        let response = self
            .manager()
            .api()
            .send_streaming(request)
            .await
            .context("exec", "exec session", Some(exec_id))?;
        Ok(streams::frames(response.body, tty))
    }

    /// Run a command to completion and return its exit code and output.
    pub async fn exec_run(&self, options: &ExecOptions) -> Result<ExecOutput, CoreError> {
        let exec_id = self.exec_create(options).await?;
        let frames: Vec<Frame> = self.exec_start(&exec_id, options.tty).await?.try_collect().await?;

        let inspect: Value = self
            .manager()
            .api()
            .send_json(Request::get(format!("/exec/{}/json", podkit_api::quote(&exec_id))))
            .await
            .context("exec", "exec session", Some(&exec_id))?;
        Ok(ExecOutput {
            exit_code: inspect.get("ExitCode").and_then(Value::as_i64),
            frames,
        })
    }

    /// Run a command and stream its output. The exit code is not collected.
    pub async fn exec_stream(&self, options: &ExecOptions) -> Result<FrameStream, CoreError> {
        let exec_id = self.exec_create(options).await?;
        self.exec_start(&exec_id, options.tty).await
    }

    pub async fn top(&self, ps_args: Option<&str>) -> Result<Value, CoreError> {
        self.manager()
            .api()
            .send_json(
                Request::get(self.path("top"))
                    .query("stream", false)
                    .query_opt("ps_args", ps_args),
            )
            .await
            .context("top", Containers::NAME, Some(self.id()))
    }

    pub async fn diff(&self) -> Result<Vec<FilesystemChange>, CoreError> {
        self.manager()
            .api()
            .send_json(Request::get(self.path("changes")))
            .await
            .context("diff", Containers::NAME, Some(self.id()))
    }

    /// One stats sample.
    pub async fn stats(&self) -> Result<Value, CoreError> {
        self.manager()
            .api()
            .send_json(
                Request::get("/containers/stats")
                    .query("containers", self.id())
                    .query("stream", false),
            )
            .await
            .context("stats", Containers::NAME, Some(self.id()))
    }

    /// Stats samples every `interval` seconds until the client is closed.
    pub async fn stats_stream(&self, interval: u32) -> Result<JsonStream<Value>, CoreError> {
        let request = Request::get("/containers/stats")
            .query("containers", self.id())
            .query("stream", true)
            .query("interval", interval);
        let response = self
            .manager()
            .api()
            .send_streaming(request)
            .await
            .context("stats", Containers::NAME, Some(self.id()))?;
        Ok(streams::json(response.body))
    }

    /// Change resource limits, healthcheck or restart policy in place.
    /// Cached attributes change only on `reload`.
    pub async fn update(&self, options: &UpdateOptions) -> Result<(), CoreError> {
        if options.no_healthcheck == Some(true) && options.has_health_settings() {
            return Err(CoreError::invalid(
                "healthcheck settings conflict with no_healthcheck",
            ));
        }
        if options.restart_retries.is_some()
            && options.restart_policy.as_deref() != Some("on-failure")
        {
            return Err(CoreError::invalid(
                "restart_retries needs the on-failure restart policy",
            ));
        }

        let request = Request::post(self.path("update"))
            .query_opt("restartPolicy", options.restart_policy.as_deref())
            .query_opt("restartRetries", options.restart_retries)
            .json(&create_body(options)?)?;
        self.manager()
            .api()
            .send(request)
            .await
            .map(drop)
            .context("update", Containers::NAME, Some(self.id()))
    }

    pub async fn resize(&self, height: u16, width: u16) -> Result<(), CoreError> {
        self.act(
            "resize",
            Request::post(self.path("resize"))
                .query("h", height)
                .query("w", width),
        )
        .await
    }

    // ── Archives ─────────────────────────────────────────────────────

    /// The container filesystem as a tar stream.
    pub async fn export(&self) -> Result<ByteStream, CoreError> {
        let response = self
            .manager()
            .api()
            .send_streaming(Request::get(self.path("export")))
            .await
            .context("export", Containers::NAME, Some(self.id()))?;
        Ok(response.body)
    }

    /// A file or directory as a tar stream, with its stat.
    pub async fn get_archive(&self, path: &str) -> Result<(ByteStream, PathStat), CoreError> {
        let response = self
            .manager()
            .api()
            .send_streaming(Request::get(self.path("archive")).query("path", path))
            .await
            .context("get_archive", Containers::NAME, Some(self.id()))?;
        let stat = response
            .header("x-docker-container-path-stat")
            .map(decode_path_stat)
            .transpose()?
            .unwrap_or_default();
        Ok((response.body, stat))
    }

    /// Extract a tar stream into `path` inside the container.
    pub async fn put_archive(&self, path: &str, tar: ByteStream) -> Result<(), CoreError> {
        let request = Request::put(self.path("archive"))
            .query("path", path)
            .stream(tar, "application/x-tar");
        self.manager()
            .api()
            .send(request)
            .await
            .map(drop)
            .context("put_archive", Containers::NAME, Some(self.id()))
    }

    /// Copy a local file or directory into `dest` inside the container.
    pub async fn copy_to(&self, local: &Path, dest: &str) -> Result<(), CoreError> {
        let tar = archive::pack_path(local)?;
        self.put_archive(dest, tar).await
    }

    /// Copy `src` out of the container into the local directory `dest`.
    pub async fn copy_from(&self, src: &str, dest: &Path) -> Result<PathStat, CoreError> {
        let (tar, stat) = self.get_archive(src).await?;
        archive::extract_archive(tar, dest).await?;
        Ok(stat)
    }

    /// Create an image from the container.
    pub async fn commit(&self, options: &CommitOptions) -> Result<Image, CoreError> {
        let request = options
            .changes
            .iter()
            .fold(Request::post("/commit"), |r, change| r.query("changes", change))
            .query("container", self.id())
            .query_opt("repo", options.repo.as_deref())
            .query_opt("tag", options.tag.as_deref())
            .query_opt("author", options.author.as_deref())
            .query_opt("comment", options.comment.as_deref())
            .query_opt("format", options.format.as_deref())
            .query_flag("pause", options.pause);
        let created: Value = self
            .manager()
            .api()
            .send_json(request)
            .await
            .context("commit", Containers::NAME, Some(self.id()))?;
        self.manager().sibling::<Images>().get(&created_id(&created)?).await
    }
}

fn decode_path_stat(header: &str) -> Result<PathStat, CoreError> {
    let raw = STANDARD
        .decode(header.trim())
        .map_err(|e| CoreError::Deserialization {
            message: format!("invalid path stat header: {e}"),
            body: header.to_owned(),
        })?;
    serde_json::from_slice(&raw).map_err(|e| CoreError::Deserialization {
        message: e.to_string(),
        body: String::from_utf8_lossy(&raw).into_owned(),
    })
}

/// Collect a frame stream for callers that only want the text.
pub async fn frames_to_string(frames: FrameStream) -> Result<String, CoreError> {
    let frames: Vec<Frame> = frames.try_collect().await?;
    let bytes: Vec<u8> = frames
        .iter()
        .flat_map(|frame| frame.payload.iter().copied())
        .collect();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn spec_body_skips_unset_fields() {
        let spec = ContainerSpec::new("alpine")
            .name("web")
            .command(["sleep", "60"])
            .env("A", "1")
            .publish(8080, 80);
        let body = create_body(&spec).unwrap();
        assert_eq!(
            body,
            json!({
                "image": "alpine",
                "name": "web",
                "command": ["sleep", "60"],
                "env": {"A": "1"},
                "portmappings": [{"container_port": 80, "host_port": 8080}]
            })
        );
    }

    #[test]
    fn path_stat_header_decodes() {
        let header = STANDARD.encode(
            br#"{"name":"hosts","size":174,"mode":420,"mtime":"2024-01-01T00:00:00Z","linkTarget":""}"#,
        );
        let stat = decode_path_stat(&header).unwrap();
        assert_eq!(stat.name, "hosts");
        assert_eq!(stat.size, 174);
        assert_eq!(stat.mode, 0o644);
    }
}
