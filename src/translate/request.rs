//! Translate canonical chat-completion requests into Bedrock vendor bodies.
//!
//! Only an empty message list is fatal. Everything nested degrades instead:
//! images that cannot be fetched are dropped, tools whose parameter schema is
//! not an object are skipped, properties without a string `type` are left out.

use serde_json::Value;

use super::claude_types::{self, BEDROCK_ANTHROPIC_VERSION};
use super::llama_types;
use super::nova_types::{
    self, Content, ImageData, ImageSource, InferenceConfig, JsonSchema, JsonSchemaDefinition,
    PropertyDef, SystemMessage, ToolConfig, ToolSpec,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatMessage, ChatTool, ChatToolChoice, ContentPart,
    StopSequences,
};
use crate::error::{GatewayError, Result};
use crate::image::{FetchedImage, ImageFetcher};
use crate::vendors::Vendor;

const CLAUDE_DEFAULT_MAX_TOKENS: u64 = 4096;

/// A request body in one vendor's native schema.
#[derive(Debug, Clone)]
pub enum VendorRequest {
    Claude(claude_types::Request),
    Llama(llama_types::Request),
    Nova(nova_types::Request),
}

impl VendorRequest {
    /// JSON body for `InvokeModel`.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        let body = match self {
            VendorRequest::Claude(r) => serde_json::to_vec(r)?,
            VendorRequest::Llama(r) => serde_json::to_vec(r)?,
            VendorRequest::Nova(r) => serde_json::to_vec(r)?,
        };
        Ok(body)
    }
}

/// Translate `req` into `vendor`'s schema. Image parts are resolved through `images`.
pub async fn translate_request(
    vendor: Vendor,
    req: &ChatCompletionRequest,
    images: &dyn ImageFetcher,
) -> Result<VendorRequest> {
    if req.messages.is_empty() {
        return Err(GatewayError::invalid_input("request has no messages"));
    }

    Ok(match vendor {
        Vendor::Claude => VendorRequest::Claude(openai_to_claude(req, images).await),
        Vendor::Llama3 => VendorRequest::Llama(openai_to_llama(req)),
        Vendor::Nova => VendorRequest::Nova(openai_to_nova(req, images).await),
    })
}

// ---------------------------------------------------------------------------
// Nova
// ---------------------------------------------------------------------------

pub async fn openai_to_nova(
    req: &ChatCompletionRequest,
    images: &dyn ImageFetcher,
) -> nova_types::Request {
    let mut system = Vec::new();
    let mut messages = Vec::new();

    for msg in &req.messages {
        if msg.role == "system" {
            system.push(SystemMessage { text: msg.text() });
            continue;
        }

        messages.push(nova_types::Message {
            role: msg.role.clone(),
            content: nova_content(msg, images).await,
        });
    }

    nova_types::Request {
        system,
        messages,
        inference_config: InferenceConfig {
            max_new_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop_sequences: stop_sequences(req.stop.as_ref()),
        },
        tool_config: nova_tool_config(req.tools.as_deref()),
    }
}

async fn nova_content(msg: &ChatMessage, images: &dyn ImageFetcher) -> Vec<Content> {
    let parts = match &msg.content {
        None => return Vec::new(),
        Some(ChatContent::Text(text)) => {
            return vec![Content {
                text: Some(text.clone()),
                ..Content::default()
            }]
        }
        Some(ChatContent::Parts(parts)) => parts,
    };

    let mut content = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            ContentPart::Text { text } => content.push(Content {
                text: Some(text.clone()),
                ..Content::default()
            }),
            ContentPart::ImageUrl { image_url } => {
                if let Some(image) = fetch_image(images, &image_url.url).await {
                    content.push(Content {
                        image: Some(ImageData {
                            format: image.format().to_string(),
                            source: ImageSource { bytes: image.data },
                        }),
                        ..Content::default()
                    });
                }
            }
        }
    }
    content
}

fn nova_tool_config(tools: Option<&[ChatTool]>) -> Option<ToolConfig> {
    let tools: Vec<nova_types::Tool> = tools?.iter().filter_map(nova_tool).collect();
    if tools.is_empty() {
        return None;
    }

    Some(ToolConfig {
        tools,
        tool_choice: nova_types::ToolChoice::default(),
    })
}

fn nova_tool(tool: &ChatTool) -> Option<nova_types::Tool> {
    let params = object_schema(&tool.function.parameters)?;

    let properties = params
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter_map(|(name, prop)| {
                    let prop = prop.as_object()?;
                    let property_type = prop.get("type")?.as_str()?.to_string();
                    let description = prop
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some((
                        name.clone(),
                        PropertyDef {
                            property_type,
                            description,
                        },
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    let required = params
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    Some(nova_types::Tool {
        tool_spec: ToolSpec {
            name: tool.function.name.clone(),
            description: tool.function.description.clone().unwrap_or_default(),
            input_schema: JsonSchema {
                json: JsonSchemaDefinition {
                    schema_type: "object".to_string(),
                    properties,
                    required,
                },
            },
        },
    })
}

// ---------------------------------------------------------------------------
// Llama 3
// ---------------------------------------------------------------------------

pub fn openai_to_llama(req: &ChatCompletionRequest) -> llama_types::Request {
    llama_types::Request {
        prompt: render_llama_prompt(&req.messages),
        max_gen_len: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
    }
}

/// Render messages with the Llama 3 chat template, ending on an open assistant turn.
pub fn render_llama_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str(&format!(
            "<|start_header_id|>{}<|end_header_id|>{}<|eot_id|>",
            msg.role,
            msg.text()
        ));
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n");
    prompt
}

// ---------------------------------------------------------------------------
// Claude
// ---------------------------------------------------------------------------

pub async fn openai_to_claude(
    req: &ChatCompletionRequest,
    images: &dyn ImageFetcher,
) -> claude_types::Request {
    let mut system_parts = Vec::new();
    let mut messages: Vec<claude_types::Message> = Vec::new();

    for msg in &req.messages {
        if msg.role == "system" {
            system_parts.push(msg.text());
            continue;
        }

        let (role, blocks) = match msg.role.as_str() {
            "tool" => (
                "user",
                vec![claude_types::ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.text(),
                }],
            ),
            "assistant" => ("assistant", claude_assistant_blocks(msg)),
            _ => ("user", claude_content(msg, images).await),
        };

        if blocks.is_empty() {
            continue;
        }

        // Claude wants alternating turns; fold consecutive same-role messages.
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(claude_types::Message {
                role: role.to_string(),
                content: blocks,
            }),
        }
    }

    let tools: Option<Vec<claude_types::Tool>> = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .filter_map(|t| {
                object_schema(&t.function.parameters)?;
                Some(claude_types::Tool {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    input_schema: t.function.parameters.clone(),
                })
            })
            .collect()
    });
    let tools = tools.filter(|t| !t.is_empty());

    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().and_then(translate_tool_choice)
    } else {
        None
    };

    claude_types::Request {
        anthropic_version: BEDROCK_ANTHROPIC_VERSION.to_string(),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        },
        max_tokens: req.max_tokens.unwrap_or(CLAUDE_DEFAULT_MAX_TOKENS),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: stop_sequences(req.stop.as_ref()),
        tools,
        tool_choice,
    }
}

async fn claude_content(
    msg: &ChatMessage,
    images: &dyn ImageFetcher,
) -> Vec<claude_types::ContentBlock> {
    let mut blocks = Vec::new();
    match &msg.content {
        None => {}
        Some(ChatContent::Text(text)) => push_claude_text(&mut blocks, text),
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => push_claude_text(&mut blocks, text),
                    ContentPart::ImageUrl { image_url } => {
                        if let Some(image) = fetch_image(images, &image_url.url).await {
                            blocks.push(claude_types::ContentBlock::Image {
                                source: claude_types::ImageSource {
                                    source_type: "base64".to_string(),
                                    media_type: image.mime_type,
                                    data: image.data,
                                },
                            });
                        }
                    }
                }
            }
        }
    }
    blocks
}

fn claude_assistant_blocks(msg: &ChatMessage) -> Vec<claude_types::ContentBlock> {
    let mut blocks = Vec::new();
    push_claude_text(&mut blocks, &msg.text());

    for tc in msg.tool_calls.iter().flatten() {
        let input = serde_json::from_str::<Value>(&tc.function.arguments)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        blocks.push(claude_types::ContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input,
        });
    }
    blocks
}

/// Claude rejects empty text blocks.
fn push_claude_text(blocks: &mut Vec<claude_types::ContentBlock>, text: &str) {
    if !text.is_empty() {
        blocks.push(claude_types::ContentBlock::Text {
            text: text.to_string(),
        });
    }
}

fn translate_tool_choice(tc: &ChatToolChoice) -> Option<claude_types::ToolChoice> {
    match tc {
        ChatToolChoice::String(s) => match s.as_str() {
            "required" => Some(claude_types::ToolChoice::Any),
            "auto" => Some(claude_types::ToolChoice::Auto),
            _ => None,
        },
        ChatToolChoice::Specific(specific) => Some(claude_types::ToolChoice::Tool {
            name: specific.function.name.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// The schema as a JSON object, if it describes an object (a missing `type` counts).
fn object_schema(schema: &Value) -> Option<&serde_json::Map<String, Value>> {
    let params = schema.as_object()?;
    match params.get("type") {
        None => Some(params),
        Some(Value::String(t)) if t == "object" => Some(params),
        Some(_) => None,
    }
}

fn stop_sequences(stop: Option<&StopSequences>) -> Option<Vec<String>> {
    stop.map(StopSequences::to_vec).filter(|s| !s.is_empty())
}

async fn fetch_image(images: &dyn ImageFetcher, url: &str) -> Option<FetchedImage> {
    match images.fetch_as_base64(url).await {
        Ok(image) => Some(image),
        Err(e) => {
            tracing::warn!(error = %e, "Dropping image part that could not be fetched");
            None
        }
    }
}
