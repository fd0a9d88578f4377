//! The request pipeline.
//!
//! [`Pipeline::handle`] turns one inbound request into exactly one
//! [`PipelineResponse`]. Stages run in order and the first failure
//! short-circuits into an error envelope:
//!
//! ```text
//! OPTIONS ──▶ 204 (done)
//! POST ──▶ rate limit ──▶ credential ──▶ content type ──▶ read body (size limit)
//!      ──▶ parse ──▶ payload ──▶ dispatch (retry/timeout) ──▶ outcome ──▶ envelope
//! ```
//!
//! The body is only read once the earlier gates have passed, so oversized
//! requests are still rate limited and still see configuration errors first.
//!
//! The pipeline is framework-neutral: it consumes an [`InboundRequest`]
//! (method, headers, peer address, unread body) so the axum host in
//! [`server`](crate::server), the CLI, and tests all drive the same code.
//! CORS headers are added by the host's layer.

use axum::body::{Body, Bytes};
use axum::http::header::{ALLOW, CONTENT_LENGTH, HOST, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::LengthLimitError;
use std::error::Error as StdError;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::{Config, CredentialStatus};
use crate::envelope::{new_error_id, PipelineResponse, ResponseEnvelope};
use crate::error::ExplainError;
use crate::models::{FailureKind, ProviderPayload, ProviderResult};
use crate::payload::build_payload;
use crate::provider::{preview, CallContext, OpenRouterProvider, ProviderError, SummaryProvider};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::retry::{AttemptError, RetryPolicy};
use crate::validate;

/// Methods advertised in the `Allow` header of a 405.
pub const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Host-independent view of an inbound HTTP request.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    /// Transport-level peer address, when the host knows it.
    pub peer: Option<IpAddr>,
    /// Unread; the pipeline reads it under `server.max_body_bytes`.
    pub body: Body,
}

impl InboundRequest {
    /// A `POST` with a JSON content type, as browsers send it.
    pub fn post_json(body: impl Into<Body>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            method: Method::POST,
            headers,
            peer: None,
            body: body.into(),
        }
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    provider: Arc<dyn SummaryProvider>,
    limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, provider: Arc<dyn SummaryProvider>) -> Self {
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(&config.rate_limit)));
        Self {
            retry: RetryPolicy::from_config(&config.dispatch),
            limiter,
            provider,
            config,
        }
    }

    /// Build a pipeline backed by [`OpenRouterProvider`].
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let provider = OpenRouterProvider::new(&config.provider)?;
        Ok(Self::new(config, Arc::new(provider)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub async fn handle(&self, req: InboundRequest) -> PipelineResponse {
        if req.method == Method::OPTIONS {
            return PipelineResponse::empty(StatusCode::NO_CONTENT);
        }

        match self.process(req).await {
            Ok(envelope) => PipelineResponse::json(StatusCode::OK, envelope),
            Err(err) => self.failure(&err),
        }
    }

    async fn process(&self, req: InboundRequest) -> Result<ResponseEnvelope, ExplainError> {
        let InboundRequest {
            method,
            headers,
            peer,
            body,
        } = req;

        if method != Method::POST {
            return Err(ExplainError::MethodNotAllowed {
                method: method.to_string(),
            });
        }

        self.check_rate_limit(&headers, peer)?;
        self.check_credential()?;
        validate::check_content_type(&headers)?;
        let body = self.read_body(&headers, body).await?;
        let request = validate::parse_request(&body, &self.config.limits)?;

        if request.truncated {
            tracing::debug!(
                original = request.original_length,
                max = self.config.limits.max_text_len,
                "input truncated"
            );
        }

        let payload = build_payload(&request, &self.config.provider);
        let ctx = CallContext {
            host: headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        };

        match self.dispatch(&payload, &ctx).await {
            ProviderResult::Success {
                explanation,
                model,
                usage,
                latency_ms,
            } => {
                tracing::info!(
                    page = request.page_number,
                    chars = request.text.chars().count(),
                    truncated = request.truncated,
                    %model,
                    latency_ms,
                    "explanation generated"
                );
                Ok(ResponseEnvelope::success(
                    explanation,
                    model,
                    usage,
                    latency_ms,
                    request.truncated,
                    request.page_number,
                ))
            }
            failure => Err(ExplainError::from_provider_result(
                &failure,
                self.retry.attempt_timeout.as_millis() as u64,
            )
            .unwrap_or_else(|| ExplainError::Internal {
                message: "unmapped provider outcome".to_string(),
            })),
        }
    }

    fn check_rate_limit(
        &self,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
    ) -> Result<(), ExplainError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let key = client_key(headers, peer);
        match limiter.check(&key) {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after_secs } => Err(ExplainError::RateLimited {
                retry_after: retry_after_secs,
                limit: limiter.max_requests(),
                window_secs: limiter.window().as_secs(),
            }),
        }
    }

    fn check_credential(&self) -> Result<(), ExplainError> {
        let provider = &self.config.provider;
        match provider.credential_status() {
            CredentialStatus::Valid => Ok(()),
            CredentialStatus::Missing => Err(ExplainError::Configuration {
                hint: format!(
                    "The {} environment variable is not set on the server.",
                    provider.api_key_env
                ),
            }),
            CredentialStatus::Malformed => Err(ExplainError::Configuration {
                hint: format!(
                    "The API key format is invalid. It must start with \"{}\".",
                    provider.key_prefix
                ),
            }),
        }
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes, ExplainError> {
        let limit = self.config.server.max_body_bytes;
        let too_large = ExplainError::PayloadTooLarge { limit_bytes: limit };

        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(too_large);
        }

        axum::body::to_bytes(body, limit).await.map_err(|e| {
            if exceeded_limit(&e) {
                too_large
            } else {
                tracing::debug!(error = %e, "failed to read request body");
                ExplainError::InvalidInput {
                    hint: "The request body could not be read.".to_string(),
                }
            }
        })
    }

    /// Call the provider under the retry policy and normalize the outcome.
    pub async fn dispatch(&self, payload: &ProviderPayload, ctx: &CallContext) -> ProviderResult {
        let provider = self.provider.as_ref();
        let outcome = self
            .retry
            .run(
                |attempt| {
                    tracing::debug!(
                        attempt,
                        provider = provider.name(),
                        model = %payload.model,
                        "dispatching to provider"
                    );
                    provider.complete(payload, ctx)
                },
                ProviderError::is_transient,
            )
            .await;

        let latency_ms = outcome.elapsed.as_millis() as u64;
        let retries_attempted = outcome.retries();

        let failure = |kind, http_status, message: String, raw| ProviderResult::Failure {
            kind,
            http_status,
            message,
            retries_attempted,
            latency_ms,
            raw,
        };

        match outcome.result {
            Ok(reply) => ProviderResult::Success {
                explanation: reply.explanation,
                model: reply.model,
                usage: reply.usage,
                latency_ms,
            },
            Err(AttemptError::TimedOut(budget)) => failure(
                FailureKind::UpstreamTimeout,
                None,
                format!("no response within {} ms", budget.as_millis()),
                None,
            ),
            Err(AttemptError::Failed(err)) if err.is_timeout() => failure(
                FailureKind::UpstreamTimeout,
                None,
                err.to_string(),
                Some(error_chain(&err)),
            ),
            Err(AttemptError::Failed(ProviderError::Transport(err))) => failure(
                FailureKind::UpstreamUnreachable,
                None,
                "Failed to connect to the AI service".to_string(),
                Some(error_chain(&err)),
            ),
            Err(AttemptError::Failed(ProviderError::Status {
                status,
                message,
                body,
            })) => failure(
                FailureKind::UpstreamError,
                Some(status),
                message,
                Some(preview(&body)),
            ),
            Err(AttemptError::Failed(ProviderError::Malformed { reason, body })) => failure(
                FailureKind::UpstreamResponseMalformed,
                None,
                reason,
                Some(preview(&body)),
            ),
        }
    }

    fn failure(&self, err: &ExplainError) -> PipelineResponse {
        let error_id = new_error_id();
        let status = err.status();

        if status.is_server_error() {
            tracing::error!(%error_id, status = status.as_u16(), code = err.code(), "{}", err);
        } else {
            tracing::warn!(%error_id, status = status.as_u16(), code = err.code(), "{}", err);
        }

        let envelope = ResponseEnvelope::failure(err, error_id, self.config.server.dev_mode);
        let mut response = PipelineResponse::json(status, envelope);

        match err {
            ExplainError::MethodNotAllowed { .. } => {
                response
                    .headers
                    .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            }
            ExplainError::RateLimited { retry_after, .. } => {
                response
                    .headers
                    .insert(RETRY_AFTER, HeaderValue::from(*retry_after));
            }
            _ => {}
        }
        response
    }
}

/// Identify the caller: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the transport peer.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderReply;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a fixed reply and counts calls.
    struct StaticProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SummaryProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        async fn complete(
            &self,
            payload: &ProviderPayload,
            _ctx: &CallContext,
        ) -> Result<ProviderReply, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderReply {
                explanation: format!("{} chars", payload.messages[0].content.len()),
                model: payload.model.clone(),
                usage: None,
            })
        }
    }

    fn pipeline(mutate: impl FnOnce(&mut Config)) -> (Pipeline, Arc<StaticProvider>) {
        let mut config = Config::default();
        config.provider.api_key = Some("sk-or-test".to_string());
        mutate(&mut config);
        let provider = Arc::new(StaticProvider {
            calls: AtomicU32::new(0),
        });
        (Pipeline::new(Arc::new(config), provider.clone()), provider)
    }

    fn code(resp: &PipelineResponse) -> Option<String> {
        resp.envelope.as_ref().and_then(|e| e.code.clone())
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: IpAddr = "10.0.0.9".parse().unwrap();
        let mut h = HeaderMap::new();
        assert_eq!(client_key(&h, Some(peer)), "10.0.0.9");
        assert_eq!(client_key(&h, None), "unknown");

        h.insert("x-real-ip", HeaderValue::from_static("192.0.2.7"));
        assert_eq!(client_key(&h, Some(peer)), "192.0.2.7");

        h.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.1.1.1"),
        );
        assert_eq!(client_key(&h, Some(peer)), "203.0.113.5");
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let (p, provider) = pipeline(|c| c.provider.api_key = None);
        let resp = p
            .handle(InboundRequest {
                method: Method::OPTIONS,
                headers: HeaderMap::new(),
                peer: None,
                body: Body::from("x".repeat(4096)),
            })
            .await;
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
        assert!(resp.envelope.is_none());
        assert!(resp.body_bytes().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_method_gate() {
        let (p, _) = pipeline(|_| {});
        let mut req = InboundRequest::post_json(r#"{"text":"0123456789"}"#);
        req.method = Method::GET;
        let resp = p.handle(req).await;
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers[ALLOW], "POST, OPTIONS");
    }

    #[tokio::test]
    async fn test_credential_checked_before_body() {
        let (p, _) = pipeline(|c| c.provider.api_key = None);
        let resp = p.handle(InboundRequest::post_json("not even json")).await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code(&resp).as_deref(), Some("configuration_error"));
    }

    #[tokio::test]
    async fn test_malformed_credential() {
        let (p, _) = pipeline(|c| c.provider.api_key = Some("sk-ant-123".into()));
        let resp = p
            .handle(InboundRequest::post_json(r#"{"text":"long enough text"}"#))
            .await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        let details = resp.envelope.unwrap().details.unwrap();
        assert!(details["hint"].as_str().unwrap().contains("sk-or-"));
    }

    #[tokio::test]
    async fn test_content_type_gate() {
        let (p, _) = pipeline(|_| {});
        let mut req = InboundRequest::post_json(r#"{"text":"0123456789"}"#);
        req.headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        let resp = p.handle(req).await;
        assert_eq!(resp.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_missing_content_type_is_accepted() {
        let (p, _) = pipeline(|_| {});
        let mut req = InboundRequest::post_json(r#"{"text":"0123456789"}"#);
        req.headers.clear();
        let resp = p.handle(req).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let (p, provider) = pipeline(|_| {});
        let resp = p
            .handle(InboundRequest::post_json(
                r#"{"text":"The mitochondria is the powerhouse.","page_number":4}"#,
            ))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        let env = resp.envelope.unwrap();
        assert!(env.success);
        assert_eq!(env.page_number, Some(4));
        assert_eq!(env.model.as_deref(), Some("google/gemini-flash-1.5"));
        assert!(env.truncated.is_none());
        assert!(env.error_id.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_gate() {
        let (p, _) = pipeline(|c| {
            c.rate_limit.max_requests = 2;
            c.rate_limit.window_secs = 30;
        });
        let req = || {
            let mut r = InboundRequest::post_json(r#"{"text":"0123456789"}"#);
            r.peer = Some("198.51.100.1".parse().unwrap());
            r
        };
        assert_eq!(p.handle(req()).await.status, StatusCode::OK);
        assert_eq!(p.handle(req()).await.status, StatusCode::OK);
        let limited = p.handle(req()).await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        let retry_after = limited.envelope.unwrap().details.unwrap()["retry_after"]
            .as_u64()
            .unwrap();
        assert!(retry_after > 0 && retry_after <= 30);
        assert!(limited.headers.contains_key(RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_rate_limit_disabled() {
        let (p, _) = pipeline(|c| {
            c.rate_limit.enabled = false;
            c.rate_limit.max_requests = 1;
        });
        assert!(p.rate_limiter().is_none());
        for _ in 0..3 {
            let resp = p
                .handle(InboundRequest::post_json(r#"{"text":"0123456789"}"#))
                .await;
            assert_eq!(resp.status, StatusCode::OK);
        }
    }

    fn oversized(p: &Pipeline) -> InboundRequest {
        let text = "x".repeat(p.config().server.max_body_bytes + 1);
        InboundRequest::post_json(format!(r#"{{"text":"{}"}}"#, text))
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_when_read() {
        let (p, provider) = pipeline(|c| c.server.max_body_bytes = 64);
        let resp = p.handle(oversized(&p)).await;
        assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);
        let env = resp.envelope.unwrap();
        assert_eq!(env.code.as_deref(), Some("payload_too_large"));
        assert!(env.error_id.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_rejected() {
        let (p, _) = pipeline(|c| c.server.max_body_bytes = 64);
        let mut req = InboundRequest::post_json(r#"{"text":"0123456789"}"#);
        req.headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("100000"));
        assert_eq!(p.handle(req).await.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_credential_checked_before_body_size() {
        let (p, _) = pipeline(|c| {
            c.server.max_body_bytes = 64;
            c.provider.api_key = None;
        });
        let resp = p.handle(oversized(&p)).await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code(&resp).as_deref(), Some("configuration_error"));
    }

    #[tokio::test]
    async fn test_oversized_requests_count_against_rate_limit() {
        let (p, _) = pipeline(|c| {
            c.server.max_body_bytes = 64;
            c.rate_limit.max_requests = 1;
        });
        assert_eq!(p.handle(oversized(&p)).await.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            p.handle(oversized(&p)).await.status,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_broken_body_stream_is_invalid_input() {
        let (p, _) = pipeline(|_| {});
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"text\":\"01234")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ]);
        let resp = p
            .handle(InboundRequest::post_json(Body::from_stream(chunks)))
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(code(&resp).as_deref(), Some("invalid_input"));
    }
}
