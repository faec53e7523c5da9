// Transports behind the HTTP facade.
//
// Unix and TCP transports share one contract: send a request, get back the
// status, the headers and either the whole body or a body stream. An SSH
// connection is a unix transport pointed at the tunnel's local socket.

pub mod tcp;
pub mod unix;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode};

use crate::error::Error;

pub use tcp::TcpTransport;
pub use unix::UnixTransport;

/// Raw body chunks as they come off the wire.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

// ── Configuration ───────────────────────────────────────────────────

/// TLS verification mode for the TCP transport.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed development daemons).
    DangerAcceptInvalid,
}

/// Settings shared by both transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Bound on connecting and on every non-streaming request.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(60),
            user_agent: concat!("podkit/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    pub(crate) fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}

// ── Requests and responses ──────────────────────────────────────────

/// Request payload.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    /// Streamed upload (tar archives). Cannot be replayed.
    Stream(ByteStream),
}

impl RequestBody {
    /// Copy of the body for a retry, `None` when it was a one-shot stream.
    pub(crate) fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Bytes(bytes) => Some(Self::Bytes(bytes.clone())),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A request as handed to a transport: the path already carries the API
/// base path and the encoded query string.
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Overrides the configured timeout for this request.
    pub timeout: Option<Duration>,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx response into the matching API error.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(Error::from_response(self.status, &self.body))
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::from_utf8_lossy(&self.body).into_owned(),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Header value as a string, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response whose body has not been read yet.
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl StreamingResponse {
    /// Read the remaining body into memory.
    pub async fn collect(self) -> Result<Response, Error> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(Response {
            status: self.status,
            headers: self.headers,
            body: chunks.concat().into(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// The resolved transport a client talks through.
#[derive(Debug)]
pub enum Transport {
    Unix(UnixTransport),
    Tcp(TcpTransport),
}

impl Transport {
    /// Send a request and buffer the whole response body.
    pub async fn request(&self, request: TransportRequest) -> Result<Response, Error> {
        match self {
            Self::Unix(t) => t.request(request).await,
            Self::Tcp(t) => t.request(request).await,
        }
    }

    /// Send a request and hand back the body unread.
    pub async fn stream(&self, request: TransportRequest) -> Result<StreamingResponse, Error> {
        match self {
            Self::Unix(t) => t.stream(request).await,
            Self::Tcp(t) => t.stream(request).await,
        }
    }

    /// Human-readable endpoint, for logs and errors.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Unix(t) => t.endpoint(),
            Self::Tcp(t) => t.endpoint(),
        }
    }
}
