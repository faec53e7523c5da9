// HTTP/1.1 over a unix-domain socket.
//
// One keep-alive connection is parked between buffered requests. The daemon
// closes idle connections on its own schedule, so a parked connection may be
// dead by the time it is reused: it is replaced before sending, and a request
// that still hits a closed connection is replayed once on a fresh one when
// its body allows it. Streaming requests always get their own connection.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http::header::{HOST, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RequestBody, Response, StreamingResponse, TransportConfig, TransportRequest};
use crate::error::Error;

type OutBody = UnsyncBoxBody<Bytes, io::Error>;

/// Transport speaking HTTP/1.1 directly over a unix socket.
#[derive(Debug)]
pub struct UnixTransport {
    path: PathBuf,
    config: TransportConfig,
    cancel: CancellationToken,
    idle: Mutex<Option<SendRequest<OutBody>>>,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>, config: TransportConfig, cancel: CancellationToken) -> Self {
        Self {
            path: path.into(),
            config,
            cancel,
            idle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn endpoint(&self) -> String {
        format!("unix://{}", self.path.display())
    }

    /// Send a request on the keep-alive connection and buffer the response.
    pub async fn request(&self, request: TransportRequest) -> Result<Response, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }

        let TransportRequest {
            method,
            path,
            headers,
            body,
            timeout,
        } = request;
        let limit = timeout.unwrap_or(self.config.timeout);
        let replay = body.try_clone();

        let work = async {
            let mut sender = self.checkout().await?;
            let first = self.build(&method, &path, &headers, body)?;

            let response = match (sender.send_request(first).await, replay) {
                (Ok(response), _) => response,
                (Err(err), Some(body)) if is_stale(&err, &method) => {
                    warn!(endpoint = %self.endpoint(), error = %err, "connection closed by peer, reconnecting");
                    sender = self.connect().await?;
                    let retry = self.build(&method, &path, &headers, body)?;
                    sender
                        .send_request(retry)
                        .await
                        .map_err(|e| Error::connection(self.endpoint(), e))?
                }
                (Err(err), _) => return Err(Error::connection(self.endpoint(), err)),
            };

            let (parts, incoming) = response.into_parts();
            let body = incoming
                .collect()
                .await
                .map_err(|e| Error::connection(self.endpoint(), e))?
                .to_bytes();

            self.checkin(sender).await;
            Ok(Response {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        tokio::time::timeout(limit, work)
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: limit.as_secs(),
            })?
    }

    /// Send a request on a dedicated connection and return the body unread.
    pub async fn stream(&self, request: TransportRequest) -> Result<StreamingResponse, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }

        let TransportRequest {
            method,
            path,
            headers,
            body,
            timeout,
        } = request;
        let limit = timeout.unwrap_or(self.config.timeout);

        let mut sender = self.connect().await?;
        let request = self.build(&method, &path, &headers, body)?;
        let response = tokio::time::timeout(limit, sender.send_request(request))
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: limit.as_secs(),
            })?
            .map_err(|e| Error::connection(self.endpoint(), e))?;

        let (parts, incoming) = response.into_parts();
        Ok(StreamingResponse {
            status: parts.status,
            headers: parts.headers,
            body: body_stream(incoming, sender),
        })
    }

    // ── Connection management ────────────────────────────────────────

    async fn connect(&self) -> Result<SendRequest<OutBody>, Error> {
        debug!(socket = %self.path.display(), "opening connection");

        let stream = tokio::time::timeout(self.config.timeout, UnixStream::connect(&self.path))
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: self.config.timeout_secs(),
            })?
            .map_err(|e| Error::connection(self.endpoint(), e))?;

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::connection(self.endpoint(), e))?;

        // Closing the client drops every driver, which ends in-flight bodies.
        let cancel = self.cancel.clone();
        let endpoint = self.endpoint();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => debug!(%endpoint, "connection dropped on close"),
                result = connection => {
                    if let Err(e) = result {
                        debug!(%endpoint, error = %e, "connection ended with error");
                    }
                }
            }
        });

        Ok(sender)
    }

    /// Take the parked connection if it is still usable, else open one.
    async fn checkout(&self) -> Result<SendRequest<OutBody>, Error> {
        let parked = self.idle.lock().await.take();
        if let Some(mut sender) = parked {
            if !sender.is_closed() && sender.ready().await.is_ok() {
                return Ok(sender);
            }
            debug!(endpoint = %self.endpoint(), "idle connection closed by peer");
        }
        self.connect().await
    }

    async fn checkin(&self, sender: SendRequest<OutBody>) {
        if sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().await;
        if idle.is_none() {
            *idle = Some(sender);
        }
    }

    fn build(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: RequestBody,
    ) -> Result<http::Request<OutBody>, Error> {
        let mut request = http::Request::builder()
            .method(method.clone())
            .uri(path)
            .body(into_body(body))
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let user_agent = HeaderValue::from_str(&self.config.user_agent)
            .map_err(|e| Error::InvalidRequest(format!("invalid user agent: {e}")))?;
        let defaults = request.headers_mut();
        defaults.insert(HOST, HeaderValue::from_static("localhost"));
        defaults.insert(USER_AGENT, user_agent);
        defaults.extend(headers.clone());
        Ok(request)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// True when the request failed because the connection went away before a
/// response arrived. Incomplete responses are only replayed for idempotent
/// methods.
fn is_stale(err: &hyper::Error, method: &Method) -> bool {
    err.is_canceled()
        || err.is_closed()
        || (err.is_incomplete_message() && method.is_idempotent())
}

fn into_body(body: RequestBody) -> OutBody {
    match body {
        RequestBody::Empty => Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync(),
        RequestBody::Bytes(bytes) => Full::new(bytes)
            .map_err(|never| match never {})
            .boxed_unsync(),
        RequestBody::Stream(stream) => {
            StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
        }
    }
}

fn body_stream(incoming: Incoming, sender: SendRequest<OutBody>) -> super::ByteStream {
    incoming
        .into_data_stream()
        .map(move |chunk| {
            // The connection lives as long as its sender; keep it until the
            // body is drained.
            let _ = &sender;
            chunk.map_err(io::Error::other)
        })
        .boxed()
}
