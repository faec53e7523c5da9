// ── HTTP client facade ──
//
// Wraps a `Transport` with libpod URL construction (API version base path),
// query and JSON encoding, and translation of non-2xx responses into the
// error taxonomy. Endpoint knowledge lives in `podkit-core`; this module
// only deals in paths and payloads.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::form_urlencoded;

use crate::error::Error;
use crate::params::Filters;
use crate::transport::{
    ByteStream, RequestBody, Response, StreamingResponse, Transport, TransportRequest,
};

/// libpod API version used for the base path when none is configured.
pub const DEFAULT_API_VERSION: &str = "5.0.0";

/// Docker-compatible API version for endpoints libpod does not provide.
pub const DEFAULT_COMPAT_API_VERSION: &str = "1.40";

// ── Request builder ─────────────────────────────────────────────────

/// One REST call, relative to the API base path.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
    compat: bool,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            compat: false,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    /// Append a query parameter only when a value is present.
    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Append `key=true` only when the flag is set.
    pub fn query_flag(self, key: &str, flag: bool) -> Self {
        if flag { self.query(key, true) } else { self }
    }

    /// Append the `filters` parameter when any filter is set.
    pub fn filters(self, filters: &Filters) -> Self {
        let encoded = filters.to_query();
        self.query_opt("filters", encoded)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from a string, rejecting invalid header characters.
    pub fn try_header(self, name: &'static str, value: &str) -> Result<Self, Error> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("invalid {name} header: {e}")))?;
        Ok(self.header(HeaderName::from_static(name), value))
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidRequest(format!("failed to encode body: {e}")))?;
        Ok(self.bytes(bytes, "application/json"))
    }

    /// Raw in-memory payload.
    pub fn bytes(mut self, body: impl Into<Bytes>, content_type: &'static str) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    /// Streamed payload (tar uploads).
    pub fn stream(mut self, body: ByteStream, content_type: &'static str) -> Self {
        self.body = RequestBody::Stream(body);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    /// Route the call through the Docker-compatible base path.
    pub fn compat(mut self) -> Self {
        self.compat = true;
        self
    }

    /// Override the transport timeout, for long polls such as `wait`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn path_and_query(&self, base: &str) -> String {
        let mut full = format!("{base}{}", self.path);
        if !self.query.is_empty() {
            let mut encoder = form_urlencoded::Serializer::new(String::new());
            for (key, value) in &self.query {
                encoder.append_pair(key, value);
            }
            full.push('?');
            full.push_str(&encoder.finish());
        }
        full
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// REST client for the libpod API over any transport.
#[derive(Debug)]
pub struct ApiClient {
    transport: Transport,
    base_path: String,
    compat_path: String,
    user_agent: HeaderValue,
    cancel: CancellationToken,
}

impl ApiClient {
    /// Create a client. `api_version` selects `/v{api_version}/libpod`,
    /// `compat_version` selects `/v{compat_version}` for compat calls.
    pub fn new(
        transport: Transport,
        api_version: &str,
        compat_version: &str,
        user_agent: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            base_path: format!("/v{}/libpod", api_version.trim_start_matches('v')),
            compat_path: format!("/v{}", compat_version.trim_start_matches('v')),
            user_agent: HeaderValue::from_str(user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("podkit")),
            cancel,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Token cancelled by [`ApiClient::close`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting requests and end every open stream.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a request and return the buffered response whatever its status.
    ///
    /// For endpoints whose status carries meaning on its own (`exists`
    /// returns 204/404, `stop` returns 304 when already stopped).
    pub async fn execute(&self, request: Request) -> Result<Response, Error> {
        let request = self.prepare(request)?;
        self.transport.request(request).await
    }

    /// Send a request and fail on any non-2xx status.
    pub async fn send(&self, request: Request) -> Result<Response, Error> {
        self.execute(request).await?.error_for_status()
    }

    /// Send a request and decode the JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: Request) -> Result<T, Error> {
        self.send(request).await?.json()
    }

    /// Send a request and hand back its body unread.
    ///
    /// Non-2xx responses are read in full and turned into errors. The body
    /// ends as soon as the client is closed.
    pub async fn send_streaming(&self, request: Request) -> Result<StreamingResponse, Error> {
        let request = self.prepare(request)?;
        let response = self.transport.stream(request).await?;

        if !response.status.is_success() {
            let failed = response.collect().await?;
            return Err(Error::from_response(failed.status, &failed.body));
        }

        let StreamingResponse {
            status,
            headers,
            body,
        } = response;
        let body = body
            .take_until(self.cancel.clone().cancelled_owned())
            .boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }

    fn prepare(&self, request: Request) -> Result<TransportRequest, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let base = if request.compat {
            &self.compat_path
        } else {
            &self.base_path
        };
        let path = request.path_and_query(base);
        debug!("{} {}", request.method, path);

        let mut headers = request.headers;
        headers
            .entry(USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());

        Ok(TransportRequest {
            method: request.method,
            path,
            headers,
            body: request.body,
            timeout: request.timeout,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_encoding() {
        let request = Request::get("/containers/json")
            .query("all", true)
            .query_opt("limit", None::<u32>)
            .query_flag("size", false)
            .filters(&Filters::new().with("label", "app=web api"));
        assert_eq!(
            request.path_and_query("/v5.0.0/libpod"),
            "/v5.0.0/libpod/containers/json?all=true&filters=%7B%22label%22%3A%5B%22app%3Dweb+api%22%5D%7D"
        );
    }

    #[test]
    fn bare_path_has_no_query_string() {
        assert_eq!(
            Request::head("/_ping").path_and_query("/v1.40"),
            "/v1.40/_ping"
        );
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = Request::post("/pods/create")
            .json(&serde_json::json!({"name": "web"}))
            .unwrap();
        assert_eq!(
            request.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(matches!(request.body, RequestBody::Bytes(ref b) if b.as_ref() == br#"{"name":"web"}"#));
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let err = Request::post("/images/pull")
            .try_header("x-registry-auth", "bad\nvalue")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
