//! Settings for podkit consumers.
//!
//! Layered settings (defaults, TOML file, `PODKIT_` environment),
//! endpoint discovery across explicit settings, the standard container
//! environment variables and podman's system connections, and the
//! translation to `podkit_core::ClientConfig`.

pub mod connections;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use podkit_core::{ClientConfig, TlsMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use connections::{Connections, SystemConnection};
pub use logging::init_tracing;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no system connection named '{name}'")]
    UnknownConnection { name: String },

    #[error("cannot read system connections from {}: {reason}", path.display())]
    Connections { path: PathBuf, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("cannot install log subscriber: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// How the TCP transport verifies the daemon certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsSetting {
    #[default]
    System,
    /// Verify against `ca_cert`.
    CustomCa,
    /// Accept any certificate.
    Insecure,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Connection URI. Wins over every other endpoint source.
    pub host: Option<String>,
    /// Named system connection.
    pub connection: Option<String>,
    /// SSH identity file.
    pub identity: Option<PathBuf>,
    pub api_version: String,
    pub compat_api_version: String,
    pub timeout_secs: u64,
    pub tls: TlsSetting,
    pub ca_cert: Option<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    pub ssh_program: Option<PathBuf>,
    pub tunnel_attempts: u32,
    pub tunnel_interval_ms: u64,
    /// Filter directives used when neither `PODKIT_LOG` nor `RUST_LOG` is set.
    pub log_level: Option<String>,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: None,
            connection: None,
            identity: None,
            api_version: podkit_core::DEFAULT_API_VERSION.into(),
            compat_api_version: podkit_core::DEFAULT_COMPAT_API_VERSION.into(),
            timeout_secs: 60,
            tls: TlsSetting::System,
            ca_cert: None,
            known_hosts: None,
            ssh_program: None,
            tunnel_attempts: 50,
            tunnel_interval_ms: 100,
            log_level: None,
            log_json: false,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

/// `<config dir>/podkit/config.toml`.
pub fn settings_path() -> PathBuf {
    BaseDirs::new().map_or_else(
        || {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".config/podkit/config.toml")
        },
        |dirs| dirs.config_dir().join("podkit").join("config.toml"),
    )
}

/// Where podman keeps its system connections.
pub fn connections_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("containers"))
}

// ── Loading ─────────────────────────────────────────────────────────

impl Settings {
    /// Load from the default settings file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&settings_path())
    }

    /// Load from `path` and the environment. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings: Self = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PODKIT_").ignore(&["LOG"]))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tls == TlsSetting::CustomCa && self.ca_cert.is_none() {
            return Err(ConfigError::Validation {
                field: "ca_cert".into(),
                reason: "tls = \"custom-ca\" needs a CA certificate path".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.tunnel_attempts == 0 {
            return Err(ConfigError::Validation {
                field: "tunnel_attempts".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ── Endpoint resolution ─────────────────────────────────────────────

/// The process environment as far as endpoint discovery cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub container_host: Option<String>,
    pub docker_host: Option<String>,
    pub container_sshkey: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    pub connections_dir: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            container_host: var("CONTAINER_HOST"),
            docker_host: var("DOCKER_HOST"),
            container_sshkey: var("CONTAINER_SSHKEY").map(PathBuf::from),
            runtime_dir: var("XDG_RUNTIME_DIR").map(PathBuf::from),
            connections_dir: connections_dir(),
        }
    }
}

/// Where an endpoint came from.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum EndpointSource {
    #[strum(to_string = "settings")]
    Settings,
    #[strum(to_string = "connection '{0}'")]
    Connection(String),
    #[strum(to_string = "CONTAINER_HOST")]
    ContainerHost,
    #[strum(to_string = "DOCKER_HOST")]
    DockerHost,
    #[strum(to_string = "default connection '{0}'")]
    DefaultConnection(String),
    #[strum(to_string = "local socket")]
    LocalSocket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub uri: String,
    pub identity: Option<PathBuf>,
    pub source: EndpointSource,
}

impl Settings {
    /// Pick the endpoint: explicit `host`, then the named `connection`,
    /// then `CONTAINER_HOST` and `DOCKER_HOST`, then the default system
    /// connection, then the local service socket.
    pub fn resolve_endpoint(&self, env: &Environment) -> Result<Endpoint, ConfigError> {
        let identity = self
            .identity
            .clone()
            .or_else(|| env.container_sshkey.clone());
        let plain = |uri: &str, source| Endpoint {
            uri: uri.to_owned(),
            identity: identity.clone(),
            source,
        };
        let from_connection = |entry: &SystemConnection, source| Endpoint {
            uri: entry.uri.clone(),
            identity: identity.clone().or_else(|| entry.identity.clone()),
            source,
        };

        if let Some(host) = self.host.as_deref() {
            return Ok(plain(host, EndpointSource::Settings));
        }

        // Read only when a named or default connection is needed, so a
        // broken store cannot shadow an endpoint from the environment.
        let load_connections = || match &env.connections_dir {
            Some(dir) => Connections::load(dir),
            None => Ok(Connections::default()),
        };

        if let Some(name) = self.connection.as_deref() {
            let connections = load_connections()?;
            let entry = connections
                .get(name)
                .ok_or_else(|| ConfigError::UnknownConnection { name: name.into() })?;
            return Ok(from_connection(entry, EndpointSource::Connection(name.into())));
        }
        if let Some(host) = env.container_host.as_deref() {
            return Ok(plain(host, EndpointSource::ContainerHost));
        }
        if let Some(host) = env.docker_host.as_deref() {
            return Ok(plain(host, EndpointSource::DockerHost));
        }
        if let Some(entry) = load_connections()?.default_connection() {
            return Ok(from_connection(
                entry,
                EndpointSource::DefaultConnection(entry.name.clone()),
            ));
        }

        let socket = env.runtime_dir.as_ref().map_or_else(
            || PathBuf::from("/run/podman/podman.sock"),
            |dir| dir.join("podman").join("podman.sock"),
        );
        Ok(plain(
            &format!("unix://{}", socket.display()),
            EndpointSource::LocalSocket,
        ))
    }

    /// Resolve the endpoint against the process environment and build a
    /// client configuration for it.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let endpoint = self.resolve_endpoint(&Environment::from_process())?;
        self.to_client_config(&endpoint)
    }

    pub fn to_client_config(&self, endpoint: &Endpoint) -> Result<ClientConfig, ConfigError> {
        debug!(uri = %endpoint.uri, source = %endpoint.source, "resolved endpoint");

        let tls = match self.tls {
            TlsSetting::System => TlsMode::System,
            TlsSetting::Insecure => TlsMode::DangerAcceptInvalid,
            TlsSetting::CustomCa => {
                let ca = self.ca_cert.clone().ok_or_else(|| ConfigError::Validation {
                    field: "ca_cert".into(),
                    reason: "tls = \"custom-ca\" needs a CA certificate path".into(),
                })?;
                TlsMode::CustomCa(ca)
            }
        };

        let mut config = ClientConfig::new(endpoint.uri.clone())
            .api_version(self.api_version.clone())
            .timeout(Duration::from_secs(self.timeout_secs))
            .tls(tls);
        config.compat_api_version.clone_from(&self.compat_api_version);
        if let Some(identity) = &endpoint.identity {
            config = config.identity(identity);
        }
        if let Some(program) = &self.ssh_program {
            config.tunnel.ssh_program.clone_from(program);
        }
        config.tunnel.known_hosts.clone_from(&self.known_hosts);
        config.tunnel.attempts = self.tunnel_attempts;
        config.tunnel.interval = Duration::from_millis(self.tunnel_interval_ms);
        Ok(config)
    }
}
