use http::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Top-level error type for the `podkit-api` crate.
///
/// Covers every failure mode below the entity layer: connection URIs,
/// transports, the SSH tunnel, non-2xx daemon responses and stream framing.
/// `podkit-core` maps these into errors that carry resource context.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// Malformed connection URI, missing component, unsafe identity file.
    /// Always raised before any network I/O.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// Socket unreachable, tunnel never became ready, broken pipe.
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// Request did not complete within the transport timeout.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup failed (unreadable or invalid CA bundle).
    #[error("TLS error: {0}")]
    Tls(String),

    /// The owning client was closed while the request was in flight.
    #[error("Client closed")]
    Closed,

    // ── API ─────────────────────────────────────────────────────────
    /// HTTP 404 from the daemon.
    #[error("Not found (HTTP 404): {message}")]
    NotFound {
        message: String,
        cause: Option<String>,
    },

    /// HTTP 409 from the daemon, e.g. removing a running container.
    #[error("Conflict (HTTP 409): {message}")]
    Conflict {
        message: String,
        cause: Option<String>,
    },

    /// Any other non-2xx response.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        cause: Option<String>,
    },

    // ── Streams ─────────────────────────────────────────────────────
    /// Malformed frame header or a payload cut short by EOF.
    #[error("Stream decode error: {message}")]
    StreamDecode { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// The request could not be built from the given inputs.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Error envelope returned by the daemon on non-2xx responses.
///
/// libpod sends `{cause, message, response}`; compat endpoints only `message`.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Build the API error for a non-2xx status and its raw body.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
        let message = envelope
            .message
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let text = String::from_utf8_lossy(body).trim().to_owned();
                (!text.is_empty()).then_some(text)
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_owned()
            });
        let cause = envelope.cause;

        match status {
            StatusCode::NOT_FOUND => Self::NotFound { message, cause },
            StatusCode::CONFLICT => Self::Conflict { message, cause },
            _ => Self::Api {
                status: status.as_u16(),
                message,
                cause,
            },
        }
    }

    /// HTTP status carried by an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the daemon refused the operation as conflicting.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// Streams surface body read failures as `io::Error`; fold them back into
// the connection bucket so callers never see raw socket errors.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout { timeout_secs: 0 },
            _ => Self::Connection {
                endpoint: String::new(),
                message: err.to_string(),
            },
        }
    }
}
