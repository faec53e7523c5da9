// ── Client ──
//
// Owns one connection to the daemon: the HTTP facade and, for ssh
// endpoints, the tunnel it runs through. Managers handed out by the
// client share its facade and stop working once it is closed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use podkit_api::transport::{TcpTransport, UnixTransport};
use podkit_api::{
    ApiClient, ConnectionDescriptor, DEFAULT_API_VERSION, DEFAULT_COMPAT_API_VERSION, TlsMode,
    Transport, TransportConfig, Tunnel, TunnelConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::kinds::containers::Containers;
use crate::kinds::images::Images;
use crate::kinds::manifests::Manifests;
use crate::kinds::networks::Networks;
use crate::kinds::pods::Pods;
use crate::kinds::quadlets::Quadlets;
use crate::kinds::secrets::Secrets;
use crate::kinds::volumes::Volumes;
use crate::manager::Manager;
use crate::system::System;

/// Everything needed to open a connection. Passed explicitly; nothing is
/// read from process-wide state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection URI, e.g. `unix:///run/podman/podman.sock`.
    pub uri: String,
    /// SSH identity file; overrides one carried by the URI.
    pub identity: Option<PathBuf>,
    pub api_version: String,
    pub compat_api_version: String,
    pub transport: TransportConfig,
    pub tunnel: TunnelConfig,
}

impl ClientConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            identity: None,
            api_version: DEFAULT_API_VERSION.to_owned(),
            compat_api_version: DEFAULT_COMPAT_API_VERSION.to_owned(),
            transport: TransportConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }

    pub fn identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = timeout;
        self
    }

    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.transport.tls = tls;
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }
}

/// A connection to the daemon.
///
/// Dropping the client cancels open streams and tears down the tunnel;
/// [`Client::close`] does the same and reports cleanup failures.
#[derive(Debug)]
pub struct Client {
    api: Arc<ApiClient>,
    descriptor: ConnectionDescriptor,
    tunnel: Option<Tunnel>,
}

impl Client {
    /// Resolve the URI, open a tunnel if it names an ssh endpoint and
    /// build the transport. No request is sent.
    pub async fn connect(config: ClientConfig) -> Result<Self, CoreError> {
        let mut descriptor = ConnectionDescriptor::parse(&config.uri)?;
        if let Some(identity) = &config.identity {
            descriptor = descriptor.with_identity(identity);
        }

        let cancel = CancellationToken::new();
        let (transport, tunnel) = match &descriptor {
            ConnectionDescriptor::Unix { path } => {
                let unix = UnixTransport::new(path.clone(), config.transport.clone(), cancel.clone());
                (Transport::Unix(unix), None)
            }
            ConnectionDescriptor::Ssh(target) => {
                let tunnel = Tunnel::open(target, &config.tunnel).await?;
                let unix = UnixTransport::new(
                    tunnel.local_socket(),
                    config.transport.clone(),
                    cancel.clone(),
                );
                (Transport::Unix(unix), Some(tunnel))
            }
            ConnectionDescriptor::Tcp { host, port, tls } => {
                let tcp = TcpTransport::new(host, *port, *tls, config.transport.clone(), cancel.clone())?;
                (Transport::Tcp(tcp), None)
            }
        };

        let api = ApiClient::new(
            transport,
            &config.api_version,
            &config.compat_api_version,
            &config.transport.user_agent,
            cancel,
        );
        Ok(Self {
            api: Arc::new(api),
            descriptor,
            tunnel,
        })
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// The raw HTTP facade, for endpoints without a typed wrapper.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn tunnel(&self) -> Option<&Tunnel> {
        self.tunnel.as_ref()
    }

    // ── Managers ─────────────────────────────────────────────────────

    pub fn containers(&self) -> Manager<Containers> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn images(&self) -> Manager<Images> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn pods(&self) -> Manager<Pods> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn networks(&self) -> Manager<Networks> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn volumes(&self) -> Manager<Volumes> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn secrets(&self) -> Manager<Secrets> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn manifests(&self) -> Manager<Manifests> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn quadlets(&self) -> Manager<Quadlets> {
        Manager::new(Arc::clone(&self.api))
    }

    pub fn system(&self) -> System {
        System::new(Arc::clone(&self.api))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// End open streams, refuse further requests and shut the tunnel down.
    /// Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), CoreError> {
        self.api.close();
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.close().await?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.api.is_closed()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.api.close();
        if let Some(tunnel) = self.tunnel.take() {
            if tunnel.pid().is_some() {
                warn!(
                    local = %tunnel.local_socket().display(),
                    "client dropped without close, tearing down tunnel"
                );
            }
        }
    }
}
