//! Adapter contract tests against a scripted transport: auth header
//! styles, error classification, the HuggingFace suffix rule, and the
//! never-fails model listing.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use llmgate_protocol::openai::ChatCompletionRequest;
use llmgate_provider_core::{
    ChatProvider, HttpBody, TransportError, TransportErrorKind, UpstreamClient, UpstreamError,
    UpstreamErrorKind, UpstreamHttpRequest, UpstreamHttpResponse, header_get,
};
use llmgate_provider_impl::huggingface::HuggingFaceProvider;
use llmgate_provider_impl::openai_compat::{AuthStyle, EndpointConfig, OpenAiCompatProvider};

type ScriptedResult = Result<(u16, serde_json::Value), TransportError>;

#[derive(Default)]
struct ScriptedClient {
    script: Mutex<VecDeque<ScriptedResult>>,
    requests: Mutex<Vec<UpstreamHttpRequest>>,
}

impl ScriptedClient {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, status: u16, body: serde_json::Value) {
        self.script.lock().unwrap().push_back(Ok((status, body)));
    }

    fn push_transport_error(&self, kind: TransportErrorKind) {
        self.script.lock().unwrap().push_back(Err(TransportError {
            kind,
            message: "scripted transport failure".into(),
        }));
    }

    fn requests(&self) -> Vec<UpstreamHttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportError>> + Send + 'a>>
    {
        self.requests.lock().unwrap().push(req);
        let next = self.script.lock().unwrap().pop_front().expect("script exhausted");
        Box::pin(async move {
            let (status, body) = next?;
            Ok(UpstreamHttpResponse {
                status,
                headers: Vec::new(),
                body: HttpBody::Bytes(Bytes::from(serde_json::to_vec(&body).unwrap())),
            })
        })
    }
}

fn endpoint(name: &str, auth: AuthStyle, client: Arc<ScriptedClient>) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(
        EndpointConfig {
            name: name.into(),
            base_url: "https://api.example.com/v1".into(),
            api_key: "sk-upstream".into(),
            auth,
            extra_headers: vec![("x-custom".into(), "on".into())],
            timeout: Duration::from_secs(30),
        },
        client,
    )
}

fn request(model: &str) -> ChatCompletionRequest {
    serde_json::from_value(json!({
        "model": model,
        "messages": [{"role": "user", "content": "hi"}]
    }))
    .unwrap()
}

fn ok_completion(model: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-9",
        "object": "chat.completion",
        "created": 0,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hello"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    })
}

#[tokio::test]
async fn bearer_auth_and_extra_headers_are_sent() {
    let client = ScriptedClient::new();
    client.push(200, ok_completion("m"));
    let provider = endpoint("groq", AuthStyle::Bearer, client.clone());

    provider.chat(&request("m")).await.unwrap();

    let sent = client.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "https://api.example.com/v1/chat/completions");
    assert_eq!(header_get(&sent[0].headers, "authorization"), Some("Bearer sk-upstream"));
    assert_eq!(header_get(&sent[0].headers, "x-custom"), Some("on"));
}

#[tokio::test]
async fn header_auth_style_uses_named_header() {
    let client = ScriptedClient::new();
    client.push(200, ok_completion("m"));
    let provider = endpoint("portkey", AuthStyle::Header("x-portkey-api-key"), client.clone());

    provider.chat(&request("m")).await.unwrap();

    let sent = client.requests();
    assert_eq!(header_get(&sent[0].headers, "x-portkey-api-key"), Some("sk-upstream"));
    assert_eq!(header_get(&sent[0].headers, "authorization"), None);
}

#[tokio::test]
async fn http_statuses_classify_into_error_kinds() {
    let cases = [
        (401, UpstreamErrorKind::Auth, false),
        (404, UpstreamErrorKind::NotFound, false),
        (422, UpstreamErrorKind::Validation, false),
        (429, UpstreamErrorKind::RateLimit, true),
        (503, UpstreamErrorKind::BadGateway, true),
    ];
    for (status, kind, retryable) in cases {
        let client = ScriptedClient::new();
        client.push(status, json!({"error": {"message": "nope"}}));
        let provider = endpoint("groq", AuthStyle::Bearer, client);
        let err = provider.chat(&request("m")).await.unwrap_err();
        assert_eq!(err.kind, kind, "status {status}");
        assert_eq!(err.retryable, retryable, "status {status}");
        assert_eq!(err.http_status, Some(status));
        assert_eq!(err.message, "nope");
    }
}

#[tokio::test]
async fn transport_failures_classify_as_retryable() {
    let client = ScriptedClient::new();
    client.push_transport_error(TransportErrorKind::Dns);
    let provider = endpoint("together", AuthStyle::Bearer, client);
    let err = provider.chat(&request("m")).await.unwrap_err();
    assert!(err.retryable);
    assert_eq!(err.kind, UpstreamErrorKind::BadGateway);
}

#[tokio::test]
async fn gateway_field_is_stripped_before_upstream() {
    let client = ScriptedClient::new();
    client.push(200, ok_completion("m"));
    let provider = endpoint("groq", AuthStyle::Bearer, client.clone());

    let mut req = request("m");
    req.gateway = Some("groq".into());
    provider.chat(&req).await.unwrap();

    let body: serde_json::Value =
        serde_json::from_slice(client.requests()[0].body.as_ref().unwrap()).unwrap();
    assert!(body.get("gateway").is_none());
}

#[tokio::test]
async fn list_models_never_fails() {
    let client = ScriptedClient::new();
    client.push_transport_error(TransportErrorKind::Connect);
    let provider = endpoint("groq", AuthStyle::Bearer, client.clone());
    assert!(provider.list_models().await.is_empty());

    client.push(500, json!({"error": "down"}));
    assert!(provider.list_models().await.is_empty());

    client.push(200, json!({"object": "list", "data": [{"id": "meta/llama-3"}]}));
    assert_eq!(provider.list_models().await.len(), 1);
}

#[tokio::test]
async fn huggingface_appends_suffix_exactly_once() {
    let client = ScriptedClient::new();
    client.push(200, ok_completion("katanemo/Arch-Router-1.5B:hf-inference"));
    client.push(200, ok_completion("katanemo/Arch-Router-1.5B:hf-inference"));
    let provider = HuggingFaceProvider::new("hf-token".into(), client.clone(), Duration::from_secs(30));

    provider.chat(&request("katanemo/Arch-Router-1.5B")).await.unwrap();
    // A caller that already carries the suffix must not get it twice.
    provider
        .chat(&request("katanemo/Arch-Router-1.5B:hf-inference"))
        .await
        .unwrap();

    for sent in client.requests() {
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "katanemo/Arch-Router-1.5B:hf-inference");
        assert!(sent.url.starts_with("https://router.huggingface.co/v1/"));
    }
}

#[tokio::test]
async fn buffered_error_on_stream_handshake_is_classified() {
    let client = ScriptedClient::new();
    client.push(429, json!({"error": {"message": "slow down"}}));
    let provider = endpoint("groq", AuthStyle::Bearer, client);

    let mut req = request("m");
    req.stream = Some(true);
    let err = match provider.chat_stream(&req).await {
        Err(err) => err,
        Ok(_) => panic!("handshake error expected"),
    };
    assert_eq!(err.kind, UpstreamErrorKind::RateLimit);
}

#[tokio::test]
async fn decode_failures_surface_as_errors() {
    let client = ScriptedClient::new();
    client.push(200, json!({"not": "a completion"}));
    let provider = endpoint("groq", AuthStyle::Bearer, client);
    let err = provider.chat(&request("m")).await.unwrap_err();
    assert!(matches!(err, UpstreamError { kind: UpstreamErrorKind::Unknown, retryable: false, .. }));
}
