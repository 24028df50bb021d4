//! Single-shot vendor responses into chat completions.

use super::claude_types::{self, ResponseBlock};
use super::llama_types;
use super::nova_types;
use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage};
use crate::error::{GatewayError, Result};
use crate::vendors::Vendor;

/// Translate a single-shot vendor response body into a chat completion.
///
/// `model` is the name the client asked for. The response id and timestamp are
/// assigned here; the usage total is recomputed from its parts.
pub fn translate_response(vendor: Vendor, body: &[u8], model: &str) -> Result<ChatCompletionResponse> {
    let (role, text, finish_reason, usage) = match vendor {
        Vendor::Nova => {
            let resp: nova_types::Response = decode(body)?;
            nova_output(&resp)
        }
        Vendor::Llama3 => {
            let resp: llama_types::Response = decode(body)?;
            (
                String::new(),
                resp.generation,
                resp.stop_reason,
                ChatUsage::new(
                    resp.prompt_token_count.unwrap_or_default(),
                    resp.generation_token_count.unwrap_or_default(),
                ),
            )
        }
        Vendor::Claude => {
            let resp: claude_types::Response = decode(body)?;
            claude_output(resp)
        }
    };

    Ok(ChatCompletionResponse {
        id: new_completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: if role.is_empty() {
                    "assistant".to_string()
                } else {
                    role
                },
                content: text,
            },
            finish_reason,
        }],
        usage,
    })
}

type Output = (String, String, Option<String>, ChatUsage);

fn nova_output(resp: &nova_types::Response) -> Output {
    let text = resp
        .output
        .message
        .content
        .iter()
        .find_map(|c| c.text.clone())
        .unwrap_or_default();

    // The vendor's totalTokens is ignored on purpose.
    let usage = ChatUsage::new(resp.usage.input_tokens, resp.usage.output_tokens);

    (
        resp.output.message.role.clone(),
        text,
        resp.stop_reason.clone(),
        usage,
    )
}

fn claude_output(resp: claude_types::Response) -> Output {
    let text = resp
        .content
        .into_iter()
        .find_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            _ => None,
        })
        .unwrap_or_default();

    let finish_reason = resp.stop_reason.as_deref().map(map_claude_stop_reason);
    let usage = ChatUsage::new(resp.usage.input_tokens, resp.usage.output_tokens);

    (resp.role, text, finish_reason, usage)
}

/// Map a Claude `stop_reason` to a chat-completion `finish_reason`.
pub fn map_claude_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

fn decode<'a, T: serde::Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| GatewayError::vendor_decode(e.to_string()))
}
