//! Outbound side: the capability of sending one request to the backend and
//! getting back a status, headers and a lazy body stream.

use async_trait::async_trait;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

use crate::error::{Result, ShimError};

/// Headers that never travel from the caller to the backend. The body is
/// rewritten, so its framing headers no longer apply. Responses must arrive
/// uncompressed since `content-encoding` is stripped on the way back.
const NON_FORWARDED_HEADERS: &[HeaderName] = &[
    header::HOST,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Lazy, finite, non-restartable body.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, std::io::Error>>;

#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Send the request. Resolves once the response head has arrived; the
    /// body is read lazily afterwards.
    ///
    /// Fails with [`ShimError::BackendUnreachable`] when no response head
    /// arrives.
    async fn send(&self, req: BackendRequest) -> Result<BackendResponse>;
}

/// Copy the caller's headers minus `host` and framing/hop-by-hop headers,
/// then declare the JSON body.
#[must_use]
pub fn forwarding_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if !NON_FORWARDED_HEADERS.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    out
}

/// reqwest-backed backend pointing at one fixed URL.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    /// Client with a connect timeout only; a total timeout would cut long
    /// streams short.
    pub fn default_client() -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(&self, req: BackendRequest) -> Result<BackendResponse> {
        let pending = self
            .client
            .request(req.method, &self.url)
            .headers(req.headers)
            .body(req.body)
            .send();

        let response = match tokio::time::timeout(self.timeout, pending).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(ShimError::unreachable(format!(
                    "request to {} failed: {}",
                    self.url, e
                )))
            }
            Err(_) => {
                return Err(ShimError::unreachable(format!(
                    "no response from {} within {}s",
                    self.url,
                    self.timeout.as_secs()
                )))
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_headers_drop_host_and_framing() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:8000"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("123"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );
        inbound.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        inbound.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-local"),
        );
        inbound.append("x-trace", HeaderValue::from_static("1"));
        inbound.append("x-trace", HeaderValue::from_static("2"));

        let out = forwarding_headers(&inbound);

        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::ACCEPT_ENCODING).is_none());
        assert_eq!(out[header::CONTENT_TYPE], "application/json");
        assert_eq!(out[header::AUTHORIZATION], "Bearer sk-local");
        let traces: Vec<_> = out.get_all("x-trace").iter().collect();
        assert_eq!(traces, ["1", "2"]);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Port 9 (discard) on loopback is expected to refuse connections.
        let backend = HttpBackend::new(
            reqwest::Client::builder().no_proxy().build().unwrap(),
            "http://127.0.0.1:9/api/chat",
            Duration::from_secs(5),
        );

        let err = backend
            .send(BackendRequest {
                method: Method::POST,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShimError::BackendUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        // Accepts connections but never writes a response head.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let backend = HttpBackend::new(
            reqwest::Client::builder().no_proxy().build().unwrap(),
            format!("http://{addr}/api/chat"),
            Duration::from_secs(1),
        );

        let err = backend
            .send(BackendRequest {
                method: Method::POST,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"{\"messages\":[]}"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShimError::BackendUnreachable { .. }));
        assert!(err.to_string().contains("within 1s"));
        server.abort();
    }
}
