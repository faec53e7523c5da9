//! Resource managers and cached entities on top of `podkit-api`.
//!
//! - **[`Client`]** owns one daemon connection: the HTTP facade and, for
//!   `ssh://` endpoints, the tunnel it runs through. It hands out a
//!   [`Manager`] per resource kind and the [`System`] service.
//!
//! - **[`Manager<K>`]** is a stateless handle parameterised by a
//!   [`ResourceKind`] descriptor. `list`, `get`, `exists`, `remove` and
//!   (for [`Prunable`] kinds) `prune` are shared; each kind module adds its
//!   create call and actions.
//!
//! - **[`Entity<K>`]** is a local snapshot of one resource. Its [`Attrs`]
//!   are the daemon's JSON object as received and change only on
//!   [`reload`](Entity::reload).
//!
//! - **[`archive`]** builds and unpacks the tar streams used by image
//!   builds and container copies.

pub mod archive;
pub mod client;
pub mod entity;
pub mod error;
pub mod kinds;
pub mod manager;
pub mod streams;
pub mod system;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{Client, ClientConfig};
pub use entity::{Attrs, Entity};
pub use error::{CoreError, ResultExt};
pub use manager::{ListOptions, Manager, Prunable, PruneReport, RemoveOptions, ResourceKind};
pub use streams::{FrameStream, JsonStream, collect_output};
pub use system::{Event, EventsOptions, System};

pub use kinds::containers::{Container, Containers, ContainerSpec, ContainersManager};
pub use kinds::images::{Image, Images, ImagesManager};
pub use kinds::manifests::{Manifest, Manifests, ManifestsManager};
pub use kinds::networks::{Network, NetworkSpec, Networks, NetworksManager};
pub use kinds::pods::{Pod, PodSpec, Pods, PodsManager};
pub use kinds::quadlets::{Quadlet, Quadlets, QuadletsManager};
pub use kinds::secrets::{Secret, Secrets, SecretsManager};
pub use kinds::volumes::{Volume, VolumeSpec, Volumes, VolumesManager};

// Transport-level types callers need alongside the managers.
pub use podkit_api::{
    ConnectionDescriptor, DEFAULT_API_VERSION, DEFAULT_COMPAT_API_VERSION, Filters, Frame,
    RegistryAuth, StreamType, TlsMode, TunnelConfig,
};
