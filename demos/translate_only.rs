//! Demonstrate the translation layer without a server or AWS credentials.
//!
//! Usage:
//!   `cargo run --example translate_only`

use async_trait::async_trait;
use bedrock_relay::image::{parse_data_url, FetchedImage, ImageFetcher};
use bedrock_relay::invoke::VendorStreamEvent;
use bedrock_relay::translate::openai_types::{ChatCompletionRequest, ChatContent, ChatMessage};
use bedrock_relay::translate::request::translate_request;
use bedrock_relay::translate::response::translate_response;
use bedrock_relay::translate::streaming::StreamTranslator;
use bedrock_relay::{Registry, Result};
use bytes::Bytes;

struct InlineOnly;

#[async_trait]
impl ImageFetcher for InlineOnly {
    async fn fetch_as_base64(&self, url: &str) -> Result<FetchedImage> {
        parse_data_url(url)
    }
}

fn message(role: &str, text: &str) -> ChatMessage {
    ChatMessage {
        role: role.to_string(),
        content: Some(ChatContent::Text(text.to_string())),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let req = ChatCompletionRequest {
        model: "amazon.nova-lite".to_string(),
        messages: vec![
            message("system", "You are a geography expert. Be concise."),
            message("user", "What is the capital of France?"),
            message("assistant", "Paris."),
            message("user", "And Germany?"),
        ],
        temperature: Some(0.7),
        ..ChatCompletionRequest::default()
    };

    let registry = Registry::builtin();
    let route = registry.resolve(&req.model)?;

    println!("=== Route ===");
    println!("{} -> {} ({})", req.model, route.model_id, route.vendor);

    let vendor_req = translate_request(route.vendor, &req, &InlineOnly).await?;
    let body: serde_json::Value = serde_json::from_slice(&vendor_req.to_body()?)?;

    println!("\n=== Nova request body ===");
    println!("{}", serde_json::to_string_pretty(&body)?);

    // A Nova InvokeModel response, as Bedrock would return it
    let vendor_resp = serde_json::json!({
        "output": {
            "message": {"role": "assistant", "content": [{"text": "Berlin."}]}
        },
        "stopReason": "end_turn",
        "usage": {"inputTokens": 42, "outputTokens": 3, "totalTokens": 45}
    });
    let resp = translate_response(route.vendor, &serde_json::to_vec(&vendor_resp)?, &req.model)?;

    println!("\n=== Chat completion ===");
    println!("{}", serde_json::to_string_pretty(&resp)?);

    // The same answer streamed
    let events = [
        serde_json::json!({"messageStart": {"role": "assistant"}}),
        serde_json::json!({"contentBlockDelta": {"delta": {"text": "Ber"}, "contentBlockIndex": 0}}),
        serde_json::json!({"contentBlockDelta": {"delta": {"text": "lin."}, "contentBlockIndex": 0}}),
        serde_json::json!({"contentBlockStop": {"contentBlockIndex": 0}}),
        serde_json::json!({"messageStop": {"stopReason": "end_turn"}}),
        serde_json::json!({"metadata": {"usage": {"inputTokens": 42, "outputTokens": 3}}}),
    ];

    let mut translator = StreamTranslator::new(route.vendor, &req.model);

    println!("\n=== Streamed chunks ===");
    for event in events {
        let event = VendorStreamEvent::Chunk(Bytes::from(serde_json::to_vec(&event)?));
        if let Some(chunk) = translator.process_event(event)? {
            println!("data: {}", serde_json::to_string(&chunk)?);
        }
    }
    let usage = translator.finish();
    println!("data: [DONE]");
    println!("\nfinal usage: {usage:?}");

    Ok(())
}
