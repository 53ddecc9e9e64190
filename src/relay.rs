//! Relay a backend response to the caller without buffering it.
//!
//! Status and headers are decided once the first body chunk (or the end of
//! the body) has arrived; from then on the body is a byte-transparent pipe.
//! Single JSON bodies and NDJSON/SSE streams are treated the same.

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use crate::backend::{BackendResponse, ByteStream};
use crate::error::{Result, ShimError};

/// Response headers that are not passed back to the caller.
const STRIPPED_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::HOST,
];

#[must_use]
pub fn is_stripped_header(name: &HeaderName) -> bool {
    STRIPPED_RESPONSE_HEADERS.contains(name)
}

/// Copy headers in order, keeping repeated values, minus the deny-list.
#[must_use]
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_stripped_header(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Turn a backend response into the caller's response.
///
/// Fails with [`ShimError::BackendUnreachable`] if the body errors before
/// yielding a single byte, while a clean error response is still possible.
pub async fn relay(resp: BackendResponse) -> Result<Response> {
    let BackendResponse {
        status,
        headers,
        mut body,
    } = resp;

    let first = loop {
        match body.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => break Some(chunk),
            Some(Err(e)) => {
                return Err(ShimError::unreachable(format!(
                    "backend failed before sending a body: {e}"
                )))
            }
            None => break None,
        }
    };

    let body = match first {
        Some(chunk) => {
            let head = stream::once(async move { Ok::<_, std::io::Error>(chunk) });
            Body::from_stream(guarded(head.chain(body).boxed(), status.as_u16()))
        }
        None => Body::empty(),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = filter_response_headers(&headers);

    tracing::debug!(status = status.as_u16(), "Relaying backend response");
    Ok(response)
}

/// Logs how the stream ended when it is dropped.
struct RelayGuard {
    status: u16,
    bytes: usize,
    finished: bool,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                status = self.status,
                bytes = self.bytes,
                "Relay closed early; backend stream dropped"
            );
        }
    }
}

/// Forward chunks as they arrive. A backend error ends the body with an
/// error so the server aborts the connection instead of finishing cleanly.
fn guarded(
    mut body: ByteStream,
    status: u16,
) -> impl futures::Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut guard = RelayGuard { status, bytes: 0, finished: false };

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    guard.bytes += bytes.len();
                    yield Ok(bytes);
                }
                Err(e) => {
                    let err = ShimError::truncated(format!(
                        "backend failed after {} bytes: {}",
                        guard.bytes, e
                    ));
                    tracing::warn!(status, bytes = guard.bytes, error = %err, "Stream truncated");
                    guard.finished = true;
                    yield Err(std::io::Error::other(err));
                    return;
                }
            }
        }

        guard.finished = true;
        tracing::debug!(status, bytes = guard.bytes, "Relay completed");
    }
}
