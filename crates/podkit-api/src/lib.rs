// podkit-api: transports, HTTP facade and stream decoding for the libpod API

pub mod client;
pub mod error;
pub mod params;
pub mod ssh;
pub mod stream;
pub mod transport;
pub mod uri;

pub use client::{ApiClient, DEFAULT_API_VERSION, DEFAULT_COMPAT_API_VERSION, Request};
pub use error::Error;
pub use params::{Filters, RegistryAuth, quote};
pub use ssh::{Tunnel, TunnelConfig, TunnelState};
pub use stream::{Frame, FrameCodec, FrameStream, JsonStream, StreamType};
pub use transport::{
    ByteStream, Response, StreamingResponse, TlsMode, Transport, TransportConfig,
};
pub use uri::{ConnectionDescriptor, Scheme, SshTarget};
