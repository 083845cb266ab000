use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use aivis_core::{MentionKind, TokenUsage};
use async_trait::async_trait;

use super::*;

/// Replays canned replies and records every request body.
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    bodies: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    fn body(&self, idx: usize) -> serde_json::Value {
        serde_json::from_str(&self.bodies.lock().unwrap()[idx]).unwrap()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn exchange(&self, body: &str, _timeout: Duration) -> Result<String, BackendError> {
        self.bodies.lock().unwrap().push(body.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Backend("script exhausted".to_string())))
    }
}

fn no_delay() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff_base_ms: 0,
    }
}

fn answer_client(transport: Arc<ScriptedTransport>) -> AnswerClient {
    let pricing = Arc::new(PricingTable::builtin().unwrap());
    AnswerClient::new(transport, pricing, no_delay())
}

fn answer_request(model_id: &str) -> AnswerRequest {
    AnswerRequest {
        question: "What is the best project management tool?".to_string(),
        company_name: "Acme".to_string(),
        competitors: vec!["Globex".to_string(), "Initech".to_string()],
        web_search_enabled: true,
        model_id: model_id.to_string(),
        max_tokens: 2048,
        timeout: Duration::from_secs(5),
    }
}

fn detect_request(text: &str) -> DetectRequest {
    DetectRequest {
        text: text.to_string(),
        company_name: "Acme".to_string(),
        competitors: vec!["Globex".to_string()],
        timeout: Duration::from_secs(5),
    }
}

// ---------------------------------------------------------------------------
// Answer generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_maps_tokens_and_search_count() {
    let transport = ScriptedTransport::new(vec![Ok(r#"{"answer":"Acme leads.","tokensUsed":{"input":100,"output":50,"cached":10,"thinking":5},"searchCount":2}"#.to_string())]);
    let client = answer_client(Arc::clone(&transport));

    let answer = client.generate(&answer_request("demo-mini")).await.unwrap();

    assert_eq!(answer.answer_text, "Acme leads.");
    assert_eq!(
        answer.usage,
        TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            cached_tokens: 10,
            thinking_tokens: 5,
            searches: 2,
        }
    );

    let sent = transport.body(0);
    assert_eq!(sent["question"], "What is the best project management tool?");
    assert_eq!(sent["companyName"], "Acme");
    assert_eq!(sent["competitors"][1], "Initech");
    assert_eq!(sent["webSearchEnabled"], true);
    assert_eq!(sent["model"], "demo-mini");
}

#[tokio::test]
async fn generate_defaults_missing_usage_to_zero() {
    let transport = ScriptedTransport::new(vec![Ok(r#"{"answer":"ok"}"#.to_string())]);
    let answer = answer_client(transport)
        .generate(&answer_request("demo-mini"))
        .await
        .unwrap();
    assert_eq!(answer.usage, TokenUsage::default());
}

#[tokio::test]
async fn unknown_model_is_rejected_before_dispatch() {
    let transport = ScriptedTransport::new(vec![]);
    let err = answer_client(Arc::clone(&transport))
        .generate(&answer_request("ghost-model"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::UnknownModel(ref m) if m == "ghost-model"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn blank_question_is_rejected_before_dispatch() {
    let transport = ScriptedTransport::new(vec![]);
    let mut request = answer_request("demo-mini");
    request.question = "   ".to_string();
    let err = answer_client(Arc::clone(&transport))
        .generate(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn empty_answer_is_malformed_and_not_retried() {
    let transport = ScriptedTransport::new(vec![Ok(r#"{"answer":"  "}"#.to_string())]);
    let err = answer_client(Arc::clone(&transport))
        .generate(&answer_request("demo-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn error_envelope_is_not_retried() {
    let transport =
        ScriptedTransport::new(vec![Ok(r#"{"error":"quota exceeded"}"#.to_string())]);
    let err = answer_client(Arc::clone(&transport))
        .generate(&answer_request("demo-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Backend(ref m) if m == "quota exceeded"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn garbage_body_is_a_deserialize_error() {
    let transport = ScriptedTransport::new(vec![Ok("not json".to_string())]);
    let err = answer_client(Arc::clone(&transport))
        .generate(&answer_request("demo-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Deserialize { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn timeouts_are_retried_until_success() {
    let transport = ScriptedTransport::new(vec![
        Err(BackendError::Timeout(Duration::from_secs(5))),
        Err(BackendError::Timeout(Duration::from_secs(5))),
        Ok(r#"{"answer":"third time lucky"}"#.to_string()),
    ]);
    let answer = answer_client(Arc::clone(&transport))
        .generate(&answer_request("demo-mini"))
        .await
        .unwrap();
    assert_eq!(answer.answer_text, "third time lucky");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn retries_stop_at_the_configured_limit() {
    let transport = ScriptedTransport::new(vec![
        Err(BackendError::Timeout(Duration::from_secs(5))),
        Err(BackendError::Timeout(Duration::from_secs(5))),
        Err(BackendError::Timeout(Duration::from_secs(5))),
        Ok(r#"{"answer":"too late"}"#.to_string()),
    ]);
    let err = answer_client(Arc::clone(&transport))
        .generate(&answer_request("demo-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Timeout(_)));
    assert_eq!(transport.calls(), 3);
}

// ---------------------------------------------------------------------------
// Mention detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detect_forwards_text_verbatim() {
    let text = "  Acme leads, followed by Globex.\n\n";
    let transport = ScriptedTransport::new(vec![Ok(r#"{"mentions":[]}"#.to_string())]);
    let client = DetectClient::new(Arc::clone(&transport) as Arc<dyn Transport>, no_delay());

    let detection = client.detect(&detect_request(text)).await.unwrap();

    assert!(detection.mentions.is_empty());
    assert!(detection.usage.is_none());
    assert_eq!(transport.body(0)["text"], text);
}

#[tokio::test]
async fn detect_maps_mentions_usage_and_model() {
    let transport = ScriptedTransport::new(vec![Ok(r#"{
        "mentions": [
            {"name":"Globex","type":"brand","confidence":0.92,"context":"followed by Globex","position":24},
            {"name":"Initech TPS","type":"Product","confidence":0.6,"position":35}
        ],
        "tokensUsed": {"input": 300, "output": 40},
        "model": "demo-mini"
    }"#
    .to_string())]);
    let client = DetectClient::new(transport, no_delay());

    let detection = client
        .detect(&detect_request("Acme leads, followed by Globex and Initech TPS."))
        .await
        .unwrap();

    assert_eq!(detection.mentions.len(), 2);
    let globex = &detection.mentions[0];
    assert_eq!(globex.name, "Globex");
    assert_eq!(globex.kind, MentionKind::Brand);
    assert_eq!(globex.offset, 24);
    assert_eq!(globex.context.as_deref(), Some("followed by Globex"));
    assert_eq!(detection.mentions[1].kind, MentionKind::Product);
    assert!(detection.mentions[1].context.is_none());

    let usage = detection.usage.unwrap();
    assert_eq!(usage.input_tokens, 300);
    assert_eq!(usage.output_tokens, 40);
    assert_eq!(usage.searches, 0);
    assert_eq!(detection.model_id.as_deref(), Some("demo-mini"));
}

#[tokio::test]
async fn invalid_mentions_are_dropped() {
    let transport = ScriptedTransport::new(vec![Ok(r#"{"mentions":[
        {"name":"Globex","type":"brand","confidence":1.5,"position":0},
        {"name":"Globex","type":"brand","confidence":-0.1,"position":0},
        {"name":"  ","type":"brand","confidence":0.9,"position":0},
        {"name":"Globex","type":"brand","confidence":0.9,"position":-3},
        {"name":"Globex","type":"service","confidence":0.9,"position":0},
        {"name":"Globex","type":"brand","confidence":1.0,"position":0}
    ]}"#
    .to_string())]);
    let client = DetectClient::new(transport, no_delay());

    let detection = client.detect(&detect_request("Globex")).await.unwrap();

    assert_eq!(detection.mentions.len(), 1);
    assert!((detection.mentions[0].confidence - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn detect_error_envelope_is_not_retried() {
    let transport = ScriptedTransport::new(vec![Ok(r#"{"error":"overloaded"}"#.to_string())]);
    let client = DetectClient::new(Arc::clone(&transport) as Arc<dyn Transport>, no_delay());
    let err = client.detect(&detect_request("text")).await.unwrap_err();
    assert!(matches!(err, BackendError::Backend(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn detect_retries_transport_failures() {
    let transport = ScriptedTransport::new(vec![
        Err(BackendError::Io(std::io::Error::other("broken pipe"))),
        Ok(r#"{"mentions":[]}"#.to_string()),
    ]);
    let client = DetectClient::new(Arc::clone(&transport) as Arc<dyn Transport>, no_delay());
    client.detect(&detect_request("text")).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

fn config_with(transport: &str, answer: &str, detect: &str) -> AppConfig {
    let vars = [
        ("DATABASE_URL", "postgres://localhost/aivis_test"),
        ("AIVIS_BACKEND_TRANSPORT", transport),
        ("AIVIS_ANSWER_BACKEND", answer),
        ("AIVIS_DETECT_BACKEND", detect),
    ];
    aivis_core::build_app_config(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
            .ok_or(std::env::VarError::NotPresent)
    })
    .unwrap()
}

#[test]
fn build_backends_accepts_subprocess_and_http() {
    let pricing = Arc::new(PricingTable::builtin().unwrap());
    let sub = config_with("subprocess", "node answer.js", "node detect.js");
    assert!(build_backends(&sub, Arc::clone(&pricing)).is_ok());

    let http = config_with(
        "http",
        "http://127.0.0.1:9000/answer",
        "http://127.0.0.1:9000/detect",
    );
    assert!(build_backends(&http, pricing).is_ok());
}

#[test]
fn build_backends_rejects_bad_http_target() {
    let pricing = Arc::new(PricingTable::builtin().unwrap());
    let config = config_with("http", "aivis-answer", "http://127.0.0.1:9000/detect");
    assert!(matches!(
        build_backends(&config, pricing),
        Err(BackendError::InvalidRequest(_))
    ));
}
