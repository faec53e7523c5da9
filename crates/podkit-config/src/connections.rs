// ── System connections ──
//
// Named endpoints registered with `podman system connection add`. Newer
// podman keeps them in `podman-connections.json`; older releases used the
// `[engine]` table of `containers.conf`. Both are read, and a name present
// in both resolves to the JSON entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::ConfigError;

pub const CONNECTIONS_FILE: &str = "podman-connections.json";
pub const CONTAINERS_CONF: &str = "containers.conf";

/// One registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConnection {
    pub name: String,
    pub uri: String,
    pub identity: Option<PathBuf>,
    pub is_machine: bool,
}

/// The merged set of registered endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connections {
    entries: BTreeMap<String, SystemConnection>,
    json_default: Option<String>,
    conf_default: Option<String>,
}

// ── On-disk shapes ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ConnectionsFile {
    connection: ConnectionSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ConnectionSection {
    default: Option<String>,
    connections: BTreeMap<String, JsonEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonEntry {
    #[serde(rename = "URI")]
    uri: String,
    identity: Option<PathBuf>,
    #[serde(default)]
    is_machine: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainersConf {
    engine: EngineSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EngineSection {
    active_service: Option<String>,
    service_destinations: BTreeMap<String, ConfEntry>,
}

#[derive(Debug, Deserialize)]
struct ConfEntry {
    uri: String,
    identity: Option<PathBuf>,
}

// ── Loading ─────────────────────────────────────────────────────────

impl Connections {
    /// Read both stores from `dir` (normally `$XDG_CONFIG_HOME/containers`).
    /// Missing files count as empty.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut connections = Self::default();

        if let Some(text) = read_optional(&dir.join(CONTAINERS_CONF))? {
            let conf: ContainersConf =
                toml::from_str(&text).map_err(|e| ConfigError::Connections {
                    path: dir.join(CONTAINERS_CONF),
                    reason: e.to_string(),
                })?;
            connections.conf_default = conf.engine.active_service;
            for (name, entry) in conf.engine.service_destinations {
                connections.insert(name, entry.uri, entry.identity, false);
            }
        }

        if let Some(text) = read_optional(&dir.join(CONNECTIONS_FILE))? {
            let file: ConnectionsFile =
                serde_json::from_str(&text).map_err(|e| ConfigError::Connections {
                    path: dir.join(CONNECTIONS_FILE),
                    reason: e.to_string(),
                })?;
            connections.json_default = file.connection.default;
            for (name, entry) in file.connection.connections {
                connections.insert(name, entry.uri, entry.identity, entry.is_machine);
            }
        }

        debug!(
            dir = %dir.display(),
            count = connections.entries.len(),
            "loaded system connections"
        );
        Ok(connections)
    }

    fn insert(&mut self, name: String, uri: String, identity: Option<PathBuf>, is_machine: bool) {
        let identity = identity.filter(|path| !path.as_os_str().is_empty());
        self.entries.insert(
            name.clone(),
            SystemConnection {
                name,
                uri,
                identity,
                is_machine,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&SystemConnection> {
        self.entries.get(name)
    }

    /// The active connection: the JSON default when it names a known
    /// entry, else `engine.active_service`.
    pub fn default_connection(&self) -> Option<&SystemConnection> {
        [&self.json_default, &self.conf_default]
            .into_iter()
            .flatten()
            .find_map(|name| self.entries.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemConnection> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
