use async_trait::async_trait;
use bedrock_relay::image::{parse_data_url, FetchedImage};
use bedrock_relay::invoke::{VendorEventStream, VendorStreamEvent};
use bedrock_relay::proxy::{self, Upstream};
use bedrock_relay::translate::nova_types;
use bedrock_relay::translate::openai_types::*;
use bedrock_relay::translate::streaming::StreamFrame;
use bedrock_relay::{
    build_router, AppState, GatewayConfig, GatewayError, ImageFetcher, Invoker, Registry, Result,
    SharedLogger,
};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, Mutex};

/// Plays back canned Bedrock output and remembers what it was sent.
#[derive(Default)]
struct ScriptedInvoker {
    response: Vec<u8>,
    events: Vec<VendorStreamEvent>,
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedInvoker {
    fn streaming(events: Vec<VendorStreamEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke_once(&self, model_id: &str, body: Vec<u8>) -> Result<Bytes> {
        self.calls.lock().unwrap().push((model_id.to_string(), body));
        Ok(Bytes::from(self.response.clone()))
    }

    async fn invoke_streaming(&self, model_id: &str, body: Vec<u8>) -> Result<VendorEventStream> {
        self.calls.lock().unwrap().push((model_id.to_string(), body));
        let events: Vec<Result<VendorStreamEvent>> = self.events.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Answers a Nova request with its own first message.
struct EchoInvoker;

#[async_trait]
impl Invoker for EchoInvoker {
    async fn invoke_once(&self, _model_id: &str, body: Vec<u8>) -> Result<Bytes> {
        let req: nova_types::Request = serde_json::from_slice(&body)?;
        let first = req.messages.into_iter().next().ok_or_else(|| {
            GatewayError::invalid_input("echo needs at least one message")
        })?;
        let resp = serde_json::json!({
            "output": {"message": {"role": first.role, "content": first.content}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 1, "outputTokens": 1, "totalTokens": 2}
        });
        Ok(Bytes::from(serde_json::to_vec(&resp)?))
    }

    async fn invoke_streaming(&self, _model_id: &str, _body: Vec<u8>) -> Result<VendorEventStream> {
        Err(GatewayError::vendor_call(
            "InvokeModelWithResponseStream",
            "echo does not stream",
            Some(400),
        ))
    }
}

struct InlineImagesOnly;

#[async_trait]
impl ImageFetcher for InlineImagesOnly {
    async fn fetch_as_base64(&self, url: &str) -> Result<FetchedImage> {
        parse_data_url(url)
    }
}

fn upstream(invoker: Arc<dyn Invoker>) -> Upstream {
    Upstream {
        registry: Registry::builtin(),
        invoker,
        images: Arc::new(InlineImagesOnly),
        logger: SharedLogger::in_memory(),
    }
}

fn chunk(value: serde_json::Value) -> VendorStreamEvent {
    VendorStreamEvent::Chunk(Bytes::from(serde_json::to_vec(&value).unwrap()))
}

fn user_request(model: &str, text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Text(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }],
        stream: Some(true),
        ..ChatCompletionRequest::default()
    }
}

async fn collect_frames(req: &ChatCompletionRequest, upstream: &Upstream) -> Vec<Result<StreamFrame>> {
    proxy::stream(req, upstream).await.unwrap().collect().await
}

fn chunks(frames: &[Result<StreamFrame>]) -> Vec<&ChatCompletionChunk> {
    frames
        .iter()
        .filter_map(|f| match f {
            Ok(StreamFrame::Chunk(c)) => Some(c.as_ref()),
            _ => None,
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────
// Streaming scenarios (scripted Bedrock, no credentials needed)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_llama_stream_two_chunks_then_done() {
    let invoker = Arc::new(ScriptedInvoker::streaming(vec![
        chunk(serde_json::json!({"generation": "Hello", "stop_reason": null})),
        chunk(serde_json::json!({
            "generation": "",
            "stop_reason": "stop",
            "prompt_token_count": 3,
            "generation_token_count": 1
        })),
    ]));
    let upstream = upstream(invoker.clone());

    let frames = collect_frames(&user_request("llama3-8b-8192", "Hi"), &upstream).await;

    assert_eq!(frames.len(), 3);
    let chunks = chunks(&frames);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));
    assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("stop"));
    match frames.last() {
        Some(Ok(StreamFrame::Done { usage })) => {
            assert_eq!(*usage, ChatUsage::new(3, 1));
            assert_eq!(usage.total_tokens, 4);
        }
        other => panic!("expected sentinel, got {other:?}"),
    }

    for c in &chunks {
        assert_eq!(c.id, chunks[0].id);
        assert_eq!(c.created, chunks[0].created);
        assert_eq!(c.model, "llama3-8b-8192");
    }

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "meta.llama3-8b-instruct-v1:0");
    let body: serde_json::Value = serde_json::from_slice(&calls[0].1).unwrap();
    assert!(body["prompt"].as_str().unwrap().starts_with("<|begin_of_text|>"));
}

#[tokio::test]
async fn test_tool_call_finish_synthesizes_empty_arguments() {
    let invoker = Arc::new(ScriptedInvoker::streaming(vec![
        chunk(serde_json::json!({"messageStart": {"role": "assistant"}})),
        chunk(serde_json::json!({
            "contentBlockStart": {
                "start": {"toolUse": {"toolUseId": "tooluse_1", "name": "list_files"}},
                "contentBlockIndex": 0
            }
        })),
        chunk(serde_json::json!({"contentBlockStop": {"contentBlockIndex": 0}})),
        chunk(serde_json::json!({"messageStop": {"stopReason": "tool_use"}})),
        chunk(serde_json::json!({
            "metadata": {"usage": {"inputTokens": 30, "outputTokens": 12}}
        })),
    ]));
    let upstream = upstream(invoker);

    let frames = collect_frames(&user_request("amazon.nova-pro", "List files"), &upstream).await;
    let chunks = chunks(&frames);

    let finish = chunks
        .iter()
        .find(|c| c.choices.first().is_some_and(|ch| ch.finish_reason.is_some()))
        .expect("a finishing chunk");
    let choice = &finish.choices[0];
    assert_eq!(choice.finish_reason.as_deref(), Some("tool_use"));
    assert!(choice.delta.content.is_none());
    let call = &choice.delta.tool_calls.as_ref().unwrap()[0];
    assert_eq!(call.id.as_deref(), Some("tooluse_1"));
    assert_eq!(
        call.function.as_ref().unwrap().arguments.as_deref(),
        Some("{}")
    );

    assert!(matches!(
        frames.last(),
        Some(Ok(StreamFrame::Done { usage })) if *usage == ChatUsage::new(30, 12)
    ));
}

#[tokio::test]
async fn test_unknown_stream_member_stops_translation() {
    let invoker = Arc::new(ScriptedInvoker::streaming(vec![
        chunk(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Partial"}
        })),
        VendorStreamEvent::Unknown {
            tag: "ThrottlingException".to_string(),
        },
        chunk(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": " never"}
        })),
    ]));
    let upstream = upstream(invoker);

    let frames = collect_frames(&user_request("claude-3-haiku-20240307", "Hi"), &upstream).await;

    assert_eq!(frames.len(), 2);
    let chunks = chunks(&frames);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Partial"));
    assert!(matches!(
        frames[1],
        Err(GatewayError::UnsupportedVendorEvent { ref tag }) if tag == "ThrottlingException"
    ));

    let ledger = upstream.logger.recent(1);
    assert_eq!(ledger.len(), 1);
    assert!(ledger[0].error.is_some());
}

// ────────────────────────────────────────────────────────────────
// Non-streaming
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_echo_round_trip_preserves_role_and_text() {
    let upstream = upstream(Arc::new(EchoInvoker));
    let mut req = user_request("amazon.nova-lite", "Repeat after me");
    req.stream = None;

    let resp = proxy::complete(&req, &upstream).await.unwrap();

    assert_eq!(resp.choices[0].message.role, "user");
    assert_eq!(resp.choices[0].message.content, "Repeat after me");
    assert_eq!(resp.usage.total_tokens, 2);
}

#[tokio::test]
async fn test_inconsistent_vendor_total_is_recomputed() {
    let invoker = Arc::new(ScriptedInvoker {
        response: serde_json::to_vec(&serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "ok"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 4, "outputTokens": 6, "totalTokens": 3}
        }))
        .unwrap(),
        ..ScriptedInvoker::default()
    });
    let upstream = upstream(invoker);

    let resp = proxy::complete(&user_request("amazon.nova-micro", "Hi"), &upstream)
        .await
        .unwrap();
    assert_eq!(resp.usage.total_tokens, 10);
}

#[tokio::test]
async fn test_unknown_model_is_rejected_before_invoking() {
    let invoker = Arc::new(ScriptedInvoker::default());
    let upstream = upstream(invoker.clone());

    let err = proxy::complete(&user_request("gpt-4o", "Hi"), &upstream)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::UnknownModel { .. }));
    assert_eq!(err.status_code().as_u16(), 404);
    assert!(invoker.calls().is_empty());
}

// ────────────────────────────────────────────────────────────────
// HTTP surface
// ────────────────────────────────────────────────────────────────

async fn spawn_server(upstream: Upstream) -> String {
    let state = Arc::new(AppState {
        config: GatewayConfig::default(),
        upstream,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_http_streaming_ends_with_done() {
    let invoker = Arc::new(ScriptedInvoker::streaming(vec![
        chunk(serde_json::json!({"generation": "Hel"})),
        chunk(serde_json::json!({"generation": "lo", "stop_reason": "stop"})),
    ]));
    let base = spawn_server(upstream(invoker)).await;

    let body = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&user_request("llama3-70b-8192", "Hi"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let data: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .collect();
    assert_eq!(data.len(), 3);
    assert_eq!(data[2], "[DONE]");
    let first: ChatCompletionChunk = serde_json::from_str(data[0]).unwrap();
    assert_eq!(first.object, "chat.completion.chunk");
    assert_eq!(first.choices[0].delta.content.as_deref(), Some("Hel"));
}

#[tokio::test]
async fn test_http_errors_use_openai_shape() {
    let base = spawn_server(upstream(Arc::new(ScriptedInvoker::default()))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&user_request("no-such-model", "Hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let err: ChatErrorResponse = resp.json().await.unwrap();
    assert_eq!(err.error.error_type, "model_not_found");

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn test_http_models_and_usage() {
    let invoker = Arc::new(ScriptedInvoker {
        response: br#"{"generation":"Hi","prompt_token_count":2,"generation_token_count":1}"#.to_vec(),
        ..ScriptedInvoker::default()
    });
    let base = spawn_server(upstream(invoker)).await;
    let client = reqwest::Client::new();

    let models: serde_json::Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = models["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(ids.contains(&"amazon.nova-lite"));
    assert!(ids.contains(&"llama3-8b-8192"));

    let mut req = user_request("llama3-8b-8192", "Hi");
    req.stream = Some(false);
    let resp: ChatCompletionResponse = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&req)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.choices[0].message.content, "Hi");

    let usage: serde_json::Value = client
        .get(format!("{base}/v1/usage?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(usage["data"][0]["usage"]["total_tokens"], 3);
    assert_eq!(usage["data"][0]["vendor"], "llama3");
}

// ────────────────────────────────────────────────────────────────
// Live Bedrock (needs AWS credentials and model access)
// Run with: cargo test -- --ignored
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore]
async fn test_live_bedrock_nova_stream() {
    let config = GatewayConfig::default();
    let invoker = bedrock_relay::BedrockInvoker::from_config(&config.aws).await;
    let upstream = upstream(Arc::new(invoker));

    let frames = collect_frames(
        &user_request("amazon.nova-micro", "Say 'hello' and nothing else."),
        &upstream,
    )
    .await;

    assert!(frames.iter().all(std::result::Result::is_ok));
    let text: String = chunks(&frames)
        .iter()
        .filter_map(|c| c.choices.first().and_then(|ch| ch.delta.content.clone()))
        .collect();
    println!("Nova said: {text}");
    assert!(text.to_lowercase().contains("hello"));
    assert!(matches!(frames.last(), Some(Ok(StreamFrame::Done { .. }))));
}
