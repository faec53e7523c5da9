// ── Core error types ──
//
// User-facing errors from podkit-core. Transport failures arrive as
// `podkit_api::Error` and are translated by `From`; entity operations attach
// the operation name, the resource kind and the id through `ResultExt`.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Client closed")]
    Closed,

    // ── API errors ───────────────────────────────────────────────────
    #[error("{kind} not found: {id} ({message})")]
    NotFound {
        operation: String,
        kind: String,
        id: String,
        message: String,
    },

    #[error("{operation} {kind} {id} conflicts with current state: {message}")]
    Conflict {
        operation: String,
        kind: String,
        id: String,
        message: String,
    },

    #[error("{operation} failed (HTTP {status}): {message}")]
    Api {
        operation: String,
        kind: String,
        id: Option<String>,
        status: u16,
        message: String,
    },

    // ── Stream errors ────────────────────────────────────────────────
    #[error("Stream decode error: {message}")]
    StreamDecode { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation} on {kind}")]
    Unsupported { operation: String, kind: String },

    #[error("{operation} {kind} {id} failed: {message}")]
    OperationFailed {
        operation: String,
        kind: String,
        id: String,
        message: String,
    },

    #[error("Image build failed: {message}")]
    BuildFailed { message: String, log: Vec<String> },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn archive(message: impl ToString) -> Self {
        Self::Archive {
            message: message.to_string(),
        }
    }

    /// Returns `true` if the daemon reported the resource missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the daemon refused the operation as conflicting.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status behind an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Attach operation, kind and id to an error raised without them.
    fn with_context(self, operation: &str, kind: &str, id: Option<&str>) -> Self {
        let fill = |current: String, value: &str| {
            if current.is_empty() {
                value.to_owned()
            } else {
                current
            }
        };
        match self {
            Self::NotFound {
                operation: op,
                kind: k,
                id: i,
                message,
            } => Self::NotFound {
                operation: fill(op, operation),
                kind: fill(k, kind),
                id: fill(i, id.unwrap_or_default()),
                message,
            },
            Self::Conflict {
                operation: op,
                kind: k,
                id: i,
                message,
            } => Self::Conflict {
                operation: fill(op, operation),
                kind: fill(k, kind),
                id: fill(i, id.unwrap_or_default()),
                message,
            },
            Self::Api {
                operation: op,
                kind: k,
                id: i,
                status,
                message,
            } => Self::Api {
                operation: fill(op, operation),
                kind: fill(k, kind),
                id: i.or_else(|| id.map(str::to_owned)),
                status,
                message,
            },
            other => other,
        }
    }
}

// ── Context ──────────────────────────────────────────────────────────

/// Adds entity context to results coming out of the API layer.
pub trait ResultExt<T> {
    fn context(self, operation: &str, kind: &str, id: Option<&str>) -> Result<T, CoreError>;
}

impl<T, E: Into<CoreError>> ResultExt<T> for Result<T, E> {
    fn context(self, operation: &str, kind: &str, id: Option<&str>) -> Result<T, CoreError> {
        self.map_err(|e| e.into().with_context(operation, kind, id))
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<podkit_api::Error> for CoreError {
    fn from(err: podkit_api::Error) -> Self {
        use podkit_api::Error as Api;

        let detail = |message: String, cause: Option<String>| match cause {
            Some(cause) if !message.contains(&cause) => format!("{message}: {cause}"),
            _ => message,
        };

        match err {
            Api::Configuration { message } => Self::Configuration { message },
            Api::Connection { endpoint, message } => Self::ConnectionFailed {
                endpoint,
                reason: message,
            },
            Api::Timeout { timeout_secs } => Self::Timeout { timeout_secs },
            Api::Tls(message) => Self::ConnectionFailed {
                endpoint: String::new(),
                reason: format!("TLS error: {message}"),
            },
            Api::Closed => Self::Closed,
            Api::NotFound { message, cause } => Self::NotFound {
                operation: String::new(),
                kind: String::new(),
                id: String::new(),
                message: detail(message, cause),
            },
            Api::Conflict { message, cause } => Self::Conflict {
                operation: String::new(),
                kind: String::new(),
                id: String::new(),
                message: detail(message, cause),
            },
            Api::Api {
                status,
                message,
                cause,
            } => Self::Api {
                operation: String::new(),
                kind: String::new(),
                id: None,
                status,
                message: detail(message, cause),
            },
            Api::StreamDecode { message } => Self::StreamDecode { message },
            Api::Deserialization { message, body } => Self::Deserialization { message, body },
            Api::InvalidRequest(message) => Self::InvalidArgument { message },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: String::new(),
        }
    }
}
