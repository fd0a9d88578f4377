//! Pipeline behaviour against a mocked provider.
//!
//! A `wiremock` server stands in for the OpenRouter `chat/completions`
//! endpoint so every outcome (success, slow, error status, malformed body,
//! unreachable) can be produced deterministically.

use pdf_explainer::config::Config;
use pdf_explainer::envelope::PipelineResponse;
use pdf_explainer::pipeline::{InboundRequest, Pipeline};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALLOWED_STATUSES: [u16; 10] = [200, 204, 400, 405, 413, 415, 429, 500, 502, 504];

fn test_config(base_url: &str) -> Config {
    let mut cfg = Config::default();
    cfg.provider.base_url = base_url.to_string();
    cfg.provider.api_key = Some("sk-or-v1-test".to_string());
    cfg.dispatch.attempt_timeout_ms = 300;
    cfg.dispatch.max_retries = 2;
    cfg.dispatch.retry_backoff_ms = 10;
    cfg.rate_limit.enabled = false;
    cfg
}

fn pipeline(cfg: Config) -> Pipeline {
    Pipeline::from_config(Arc::new(cfg)).unwrap()
}

fn completion(content: &str) -> Value {
    json!({
        "id": "gen-1",
        "model": "google/gemini-flash-1.5",
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 40, "completion_tokens": 12, "total_tokens": 52 }
    })
}

fn explain(text: &str) -> InboundRequest {
    InboundRequest::post_json(json!({ "text": text, "page_number": 2 }).to_string())
}

fn body(resp: &PipelineResponse) -> Value {
    serde_json::from_slice(&resp.body_bytes()).unwrap()
}

/// Drop fields that legitimately differ between identical requests.
fn structural(mut v: Value) -> Value {
    let obj = v.as_object_mut().unwrap();
    obj.remove("timestamp");
    obj.remove("latency_ms");
    obj.remove("error_id");
    v
}

#[tokio::test]
async fn test_success_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-or-v1-test"))
        .and(header("x-title", "AI PDF Explainer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("A clear summary.")))
        .expect(1)
        .mount(&server)
        .await;

    let p = pipeline(test_config(&server.uri()));
    let resp = p.handle(explain("Cells divide through mitosis and meiosis.")).await;

    assert_eq!(resp.status.as_u16(), 200);
    let json = body(&resp);
    assert_eq!(json["success"], true);
    assert_eq!(json["explanation"], "A clear summary.");
    assert_eq!(json["model"], "google/gemini-flash-1.5");
    assert_eq!(json["usage"]["total_tokens"], 52);
    assert_eq!(json["page_number"], 2);
    assert!(json["latency_ms"].is_u64());
    assert!(json.get("truncated").is_none());

    let requests = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["model"], "google/gemini-flash-1.5");
    assert_eq!(sent["max_tokens"], 500);
    let prompt = sent["messages"][0]["content"].as_str().unwrap();
    assert!(prompt.contains("page 2"));
    assert!(prompt.contains("Cells divide through mitosis and meiosis."));
}

#[tokio::test]
async fn test_oversized_text_is_truncated_before_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&server)
        .await;

    let mut cfg = test_config(&server.uri());
    cfg.limits.max_text_len = 40;
    cfg.provider.prompt_template = "{text}".to_string();
    let p = pipeline(cfg);

    let resp = p.handle(explain(&"z".repeat(100))).await;
    assert_eq!(resp.status.as_u16(), 200);
    assert_eq!(body(&resp)["truncated"], true);

    let at_max = p.handle(explain(&"y".repeat(40))).await;
    assert!(body(&at_max).get("truncated").is_none());

    let requests = server.received_requests().await.unwrap();
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["messages"][0]["content"], "z".repeat(40));
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(second["messages"][0]["content"], "y".repeat(40));
}

#[tokio::test]
async fn test_short_text_rejected_without_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("never")))
        .expect(0)
        .mount(&server)
        .await;

    let p = pipeline(test_config(&server.uri()));
    let resp = p.handle(explain("hi")).await;

    assert_eq!(resp.status.as_u16(), 400);
    let json = body(&resp);
    assert_eq!(json["code"], "input_too_short");
    assert_eq!(json["details"]["actual_length"], 2);
    assert_eq!(json["details"]["min_length"], 10);
    assert_eq!(json["error_id"].as_str().unwrap().len(), 12);
}

#[tokio::test]
async fn test_timeout_after_all_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let cfg = test_config(&server.uri());
    let per_attempt = Duration::from_millis(cfg.dispatch.attempt_timeout_ms);
    let attempts = cfg.dispatch.max_retries + 1;
    let p = pipeline(cfg);

    let started = Instant::now();
    let resp = p.handle(explain("Slow upstream should time out.")).await;
    let elapsed = started.elapsed();

    assert_eq!(resp.status.as_u16(), 504);
    let json = body(&resp);
    assert_eq!(json["code"], "upstream_timeout");
    assert_eq!(json["details"]["retries_attempted"], 2);
    assert!(elapsed >= per_attempt * attempts);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_upstream_error_status_not_retried() {
    for status in [429u16, 500] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "message": "Provider says no", "code": status }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = pipeline(test_config(&server.uri()));
        let resp = p.handle(explain("Definitive provider errors are final.")).await;

        assert_eq!(resp.status.as_u16(), 502, "upstream {}", status);
        let json = body(&resp);
        assert_eq!(json["code"], "upstream_error");
        assert_eq!(json["details"]["api_error"], "Provider says no");
        assert_eq!(json["details"]["upstream_status"], status);
        assert_eq!(json["details"]["retries_attempted"], 0);
        assert!(json["details"].get("api_response").is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_upstream_plain_text_error_uses_body_preview() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .mount(&server)
        .await;

    let p = pipeline(test_config(&server.uri()));
    let json = body(&p.handle(explain("Plain text failure body here.")).await);
    assert_eq!(json["details"]["api_error"], "upstream overloaded");
}

#[tokio::test]
async fn test_dev_mode_exposes_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "No auth credentials found", "code": 401 }
        })))
        .mount(&server)
        .await;

    let mut cfg = test_config(&server.uri());
    cfg.server.dev_mode = true;
    let p = pipeline(cfg);
    let json = body(&p.handle(explain("Dev mode shows provider bodies.")).await);
    let raw = json["details"]["api_response"].as_str().unwrap();
    assert!(raw.contains("No auth credentials found"));
}

#[tokio::test]
async fn test_malformed_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let p = pipeline(test_config(&server.uri()));
    let resp = p.handle(explain("Success status but no content.")).await;
    assert_eq!(resp.status.as_u16(), 502);
    let json = body(&resp);
    assert_eq!(json["code"], "upstream_response_malformed");
    assert_eq!(json["details"]["retries_attempted"], 0);
}

#[tokio::test]
async fn test_unreachable_provider_is_retried() {
    // Reserve a port, then close it so connections are refused.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let p = pipeline(test_config(&format!("http://127.0.0.1:{}", port)));
    let resp = p.handle(explain("Nobody is listening on this port.")).await;

    assert_eq!(resp.status.as_u16(), 500);
    let json = body(&resp);
    assert_eq!(json["code"], "upstream_unreachable");
    assert_eq!(json["details"]["retries_attempted"], 2);
    assert!(json["details"].get("cause").is_none());
}

#[tokio::test]
async fn test_identical_requests_yield_identical_envelopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Deterministic.")))
        .mount(&server)
        .await;

    let p = pipeline(test_config(&server.uri()));
    let a = body(&p.handle(explain("Same request, same answer.")).await);
    let b = body(&p.handle(explain("Same request, same answer.")).await);
    assert_eq!(structural(a), structural(b));

    let e1 = body(&p.handle(explain("short")).await);
    let e2 = body(&p.handle(explain("short")).await);
    assert_ne!(e1["error_id"], e2["error_id"]);
    assert_eq!(structural(e1), structural(e2));
}

#[tokio::test]
async fn test_rate_limit_three_rapid_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(3)
        .mount(&server)
        .await;

    let mut cfg = test_config(&server.uri());
    cfg.rate_limit.enabled = true;
    cfg.rate_limit.max_requests = 2;
    cfg.rate_limit.window_secs = 60;
    let p = pipeline(cfg);

    let from_client = || {
        let mut req = explain("Throttle me after two requests.");
        req.headers
            .insert("x-forwarded-for", "203.0.113.10".parse().unwrap());
        req
    };

    assert_eq!(p.handle(from_client()).await.status.as_u16(), 200);
    assert_eq!(p.handle(from_client()).await.status.as_u16(), 200);
    let third = p.handle(from_client()).await;
    assert_eq!(third.status.as_u16(), 429);
    let retry_after = body(&third)["details"]["retry_after"].as_u64().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    // A different client is unaffected.
    let mut other = explain("Throttle me after two requests.");
    other
        .headers
        .insert("x-forwarded-for", "203.0.113.11".parse().unwrap());
    assert_eq!(p.handle(other).await.status.as_u16(), 200);
}

#[tokio::test]
async fn test_every_response_has_allowed_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&server)
        .await;
    let p = pipeline(test_config(&server.uri()));

    let mut cases = vec![
        explain("valid request text"),
        explain("hi"),
        InboundRequest::post_json("{not json"),
        InboundRequest::post_json("[]"),
        InboundRequest::post_json(r#"{"text": null}"#),
        InboundRequest::post_json(""),
    ];
    for m in ["GET", "PUT", "DELETE", "OPTIONS", "PATCH"] {
        let mut req = explain("valid request text");
        req.method = m.parse().unwrap();
        cases.push(req);
    }
    let mut xml = explain("valid request text");
    xml.headers
        .insert("content-type", "application/xml".parse().unwrap());
    cases.push(xml);

    for req in cases {
        let resp = p.handle(req).await;
        assert!(ALLOWED_STATUSES.contains(&resp.status.as_u16()));
        if resp.status.as_u16() == 204 {
            assert!(resp.envelope.is_none());
        } else {
            let json = body(&resp);
            assert!(json["timestamp"].is_string());
            assert_eq!(json["success"], resp.status.as_u16() == 200);
        }
    }
}

#[tokio::test]
async fn test_slow_upstream_does_not_block_other_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("glacial"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("Eventually."))
                .set_delay(Duration::from_millis(1_500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("brisk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Right away.")))
        .mount(&server)
        .await;

    let mut cfg = test_config(&server.uri());
    cfg.dispatch.attempt_timeout_ms = 5_000;
    cfg.dispatch.max_retries = 0;
    let p = pipeline(cfg);

    let started = Instant::now();
    let slow = async {
        let resp = p.handle(explain("A glacial page that takes a while.")).await;
        (resp, started.elapsed())
    };
    let fast = async {
        let resp = p.handle(explain("A brisk page that answers quickly.")).await;
        (resp, started.elapsed())
    };
    let ((slow_resp, slow_done), (fast_resp, fast_done)) = tokio::join!(slow, fast);

    assert_eq!(fast_resp.status.as_u16(), 200);
    assert_eq!(body(&fast_resp)["explanation"], "Right away.");
    assert_eq!(slow_resp.status.as_u16(), 200);
    assert!(slow_done >= Duration::from_millis(1_500));
    assert!(
        fast_done < Duration::from_millis(750),
        "fast request took {:?}",
        fast_done
    );
}
