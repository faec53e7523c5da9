// Plain HTTP (optionally TLS) over host:port, backed by reqwest.

use std::io;

use futures_util::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use super::{
    RequestBody, Response, StreamingResponse, TlsMode, TransportConfig, TransportRequest,
};
use crate::error::Error;

/// Transport for `tcp://host:port` endpoints.
#[derive(Debug)]
pub struct TcpTransport {
    http: reqwest::Client,
    base_url: String,
    config: TransportConfig,
    cancel: CancellationToken,
}

impl TcpTransport {
    pub fn new(
        host: &str,
        port: u16,
        tls: bool,
        config: TransportConfig,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let scheme = if tls { "https" } else { "http" };
        let base_url = if host.contains(':') {
            format!("{scheme}://[{host}]:{port}")
        } else {
            format!("{scheme}://{host}:{port}")
        };
        let http = build_client(&config)?;
        Ok(Self {
            http,
            base_url,
            config,
            cancel,
        })
    }

    pub fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    /// Send a request and buffer the response body.
    pub async fn request(&self, request: TransportRequest) -> Result<Response, Error> {
        let resp = self.send(request, true).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| self.map_err(&e))?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }

    /// Send a request and hand back the body unread.
    pub async fn stream(&self, request: TransportRequest) -> Result<StreamingResponse, Error> {
        let resp = self.send(request, false).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes_stream().map_err(io::Error::other).boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }

    async fn send(
        &self,
        request: TransportRequest,
        bounded: bool,
    ) -> Result<reqwest::Response, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }

        let limit = request.timeout.unwrap_or(self.config.timeout);
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method, url)
            .headers(request.headers);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };
        if bounded {
            builder = builder.timeout(limit);
        }

        builder.send().await.map_err(|e| self.map_err(&e))
    }

    fn map_err(&self, err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.config.timeout_secs(),
            }
        } else {
            let mut message = err.to_string();
            let mut source = std::error::Error::source(err);
            while let Some(inner) = source {
                message.push_str(": ");
                message.push_str(&inner.to_string());
                source = inner.source();
            }
            Error::connection(self.endpoint(), message)
        }
    }
}

/// Build a `reqwest::Client` honouring the TLS mode.
///
/// Only the connect phase is bounded here; buffered requests add their own
/// timeout so that followed streams can stay open indefinitely.
fn build_client(config: &TransportConfig) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.timeout)
        .user_agent(config.user_agent.clone());

    match &config.tls {
        TlsMode::System => {}
        TlsMode::CustomCa(path) => {
            let cert_pem = std::fs::read(path)
                .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&cert_pem)
                .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        TlsMode::DangerAcceptInvalid => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
}
