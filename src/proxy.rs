use crate::audit::{audit_key, AuditSink};
use crate::backend::{forwarding_headers, Backend, BackendRequest};
use crate::config::{ForwardMode, ShimConfig};
use crate::error::Result;
use crate::relay::relay;
use crate::translate::openai_types::ChatRequest;
use crate::translate::request::{openai_to_ollama, DEFAULT_PASSTHROUGH_PARAMS};

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-request pipeline: audit, translate, forward, relay.
///
/// Holds no per-request state, so one instance serves every connection.
#[derive(Clone)]
pub struct Proxy {
    backend: Arc<dyn Backend>,
    audit: Arc<dyn AuditSink>,
    mode: ForwardMode,
    debug_short_circuit: bool,
    passthrough_params: Vec<String>,
}

impl Proxy {
    pub fn new(backend: Arc<dyn Backend>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            backend,
            audit,
            mode: ForwardMode::Translate,
            debug_short_circuit: false,
            passthrough_params: DEFAULT_PASSTHROUGH_PARAMS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }

    pub fn from_config(
        config: &ShimConfig,
        backend: Arc<dyn Backend>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::new(backend, audit)
            .with_mode(config.mode)
            .with_debug_short_circuit(config.debug_short_circuit)
            .with_passthrough_params(config.params.passthrough.clone())
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ForwardMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_debug_short_circuit(mut self, enabled: bool) -> Self {
        self.debug_short_circuit = enabled;
        self
    }

    #[must_use]
    pub fn with_passthrough_params(mut self, params: Vec<String>) -> Self {
        self.passthrough_params = params;
        self
    }

    /// Handle one inbound chat request.
    ///
    /// The raw body is audited before anything else happens, so a record
    /// exists even when translation or the backend call fails.
    pub async fn handle(&self, method: Method, headers: &HeaderMap, body: Bytes) -> Result<Response> {
        let key = audit_key();
        if let Err(e) = self.audit.persist(&key, body.clone()).await {
            warn!(audit_key = %key, error = %e, "Audit sink failed, continuing");
        }

        let outbound = match self.mode {
            ForwardMode::Translate => {
                let req = ChatRequest::from_slice(&body).map_err(|e| {
                    warn!(audit_key = %key, error = %e, "Rejecting request");
                    e
                })?;
                let translated = openai_to_ollama(&req, &self.passthrough_params);

                info!(
                    audit_key = %key,
                    model = translated.model.as_deref().unwrap_or("-"),
                    messages = translated.messages.len(),
                    tools = translated.tools.as_ref().map_or(0, Vec::len),
                    streaming = translated.stream.unwrap_or(false),
                    "Translated request"
                );
                translated.to_bytes()?
            }
            ForwardMode::Passthrough => {
                info!(audit_key = %key, bytes = body.len(), "Forwarding request untouched");
                body
            }
        };

        if self.debug_short_circuit {
            info!(audit_key = %key, "Debug short-circuit, backend not contacted");
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "debug mode: skipping LLM call" })),
            )
                .into_response());
        }

        let response = self
            .backend
            .send(BackendRequest {
                method,
                headers: forwarding_headers(headers),
                body: outbound,
            })
            .await
            .map_err(|e| {
                warn!(audit_key = %key, error = %e, "Backend call failed");
                e
            })?;

        info!(audit_key = %key, status = response.status.as_u16(), "Backend responded");
        relay(response).await
    }
}
