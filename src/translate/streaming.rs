//! State machine for translating Bedrock response streams into chat-completion chunks.
//!
//! Each vendor decodes a raw `chunk` payload into a [`StreamSignal`]. One shared
//! [`StreamTranslator`] turns those signals into [`ChatCompletionChunk`]s while
//! carrying the cross-event state: the stream id and timestamp, the usage
//! counters and the last tool-call fragments sent. [`translate_stream`] drives a
//! translator over a live event stream and ends it with [`StreamFrame::Done`].

use futures::{Stream, StreamExt};

use super::claude_types::{self, StartBlock};
use super::llama_types;
use super::nova_types;
use super::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use super::response::{map_claude_stop_reason, new_completion_id};
use crate::error::{GatewayError, Result};
use crate::invoke::VendorStreamEvent;
use crate::vendors::Vendor;

/// Token counts reported by one vendor event. Zero means "not reported".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
}

/// A piece of one tool call as the vendor streams it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    /// Vendor content-block index, used to tell parallel calls apart.
    pub block_index: u64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// Everything one content-bearing vendor event contributes to an outgoing chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub text: Option<String>,
    pub tool_call: Option<ToolCallFragment>,
    pub usage: Option<TokenCounts>,
    pub finish_reason: Option<String>,
}

/// What a decoded vendor event means to the translator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// Stream preamble: records the vendor message id and usage, emits nothing.
    Start {
        message_id: Option<String>,
        usage: Option<TokenCounts>,
    },
    /// Becomes exactly one outgoing chunk.
    Delta(StreamDelta),
    /// Bookkeeping event with nothing to forward.
    Skip,
}

// ---------------------------------------------------------------------------
// Vendor decoders
// ---------------------------------------------------------------------------

/// Decode one `chunk` payload for `vendor`.
pub fn decode_signal(vendor: Vendor, payload: &[u8]) -> Result<StreamSignal> {
    match vendor {
        Vendor::Claude => decode_claude(payload),
        Vendor::Llama3 => decode_llama(payload),
        Vendor::Nova => decode_nova(payload),
    }
}

const LLAMA_FIELDS: [&str; 4] = [
    "generation",
    "prompt_token_count",
    "generation_token_count",
    "stop_reason",
];

fn decode_llama(payload: &[u8]) -> Result<StreamSignal> {
    let raw: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::vendor_decode(format!("llama stream chunk: {e}")))?;
    let known = raw
        .as_object()
        .is_some_and(|members| LLAMA_FIELDS.iter().any(|f| members.contains_key(*f)));
    if !known {
        return Err(GatewayError::unsupported_event(first_member(&raw)));
    }
    let chunk: llama_types::Response = serde_json::from_value(raw)
        .map_err(|e| GatewayError::vendor_decode(format!("llama stream chunk: {e}")))?;

    let usage = match (chunk.prompt_token_count, chunk.generation_token_count) {
        (None, None) => None,
        (prompt, completion) => Some(TokenCounts {
            prompt: prompt.unwrap_or_default(),
            completion: completion.unwrap_or_default(),
        }),
    };

    Ok(StreamSignal::Delta(StreamDelta {
        text: Some(chunk.generation),
        tool_call: None,
        usage,
        finish_reason: chunk.stop_reason,
    }))
}

fn decode_claude(payload: &[u8]) -> Result<StreamSignal> {
    let event: claude_types::StreamEvent =
        serde_json::from_slice(payload).map_err(|e| claude_decode_error(&e))?;

    let signal = match event {
        claude_types::StreamEvent::MessageStart { message } => StreamSignal::Start {
            message_id: Some(message.id).filter(|id| !id.is_empty()),
            usage: Some(TokenCounts {
                prompt: message.usage.input_tokens,
                completion: message.usage.output_tokens,
            }),
        },
        claude_types::StreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            StartBlock::ToolUse { id, name } => StreamSignal::Delta(StreamDelta {
                tool_call: Some(ToolCallFragment {
                    block_index: index,
                    id: Some(id),
                    name: Some(name),
                    arguments: String::new(),
                }),
                ..StreamDelta::default()
            }),
            StartBlock::Text { text } if !text.is_empty() => StreamSignal::Delta(StreamDelta {
                text: Some(text),
                ..StreamDelta::default()
            }),
            StartBlock::Text { .. } => StreamSignal::Skip,
        },
        claude_types::StreamEvent::ContentBlockDelta { index, delta } => match delta {
            claude_types::Delta::TextDelta { text } => StreamSignal::Delta(StreamDelta {
                text: Some(text),
                ..StreamDelta::default()
            }),
            claude_types::Delta::InputJsonDelta { partial_json } => {
                StreamSignal::Delta(StreamDelta {
                    tool_call: Some(ToolCallFragment {
                        block_index: index,
                        arguments: partial_json,
                        ..ToolCallFragment::default()
                    }),
                    ..StreamDelta::default()
                })
            }
        },
        claude_types::StreamEvent::MessageDelta { delta, usage } => {
            StreamSignal::Delta(StreamDelta {
                usage: usage.map(|u| TokenCounts {
                    prompt: u.input_tokens,
                    completion: u.output_tokens,
                }),
                finish_reason: delta.stop_reason.as_deref().map(map_claude_stop_reason),
                ..StreamDelta::default()
            })
        }
        claude_types::StreamEvent::ContentBlockStop { .. }
        | claude_types::StreamEvent::MessageStop
        | claude_types::StreamEvent::Ping => StreamSignal::Skip,
    };

    Ok(signal)
}

/// An event or delta `type` we have no variant for is unsupported, not malformed.
fn claude_decode_error(err: &serde_json::Error) -> GatewayError {
    let message = err.to_string();
    match message
        .strip_prefix("unknown variant `")
        .and_then(|rest| rest.split_once('`'))
    {
        Some((tag, _)) => GatewayError::unsupported_event(tag),
        None => GatewayError::vendor_decode(format!("claude stream event: {message}")),
    }
}

fn decode_nova(payload: &[u8]) -> Result<StreamSignal> {
    let raw: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::vendor_decode(format!("nova stream event: {e}")))?;
    let event: nova_types::StreamEvent = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::vendor_decode(format!("nova stream event: {e}")))?;

    if let Some(block) = event.content_block_delta {
        let index = block.content_block_index;
        return Ok(StreamSignal::Delta(StreamDelta {
            text: block.delta.text,
            tool_call: block.delta.tool_use.map(|t| ToolCallFragment {
                block_index: index,
                arguments: t.input,
                ..ToolCallFragment::default()
            }),
            ..StreamDelta::default()
        }));
    }

    if let Some(block) = event.content_block_start {
        let index = block.content_block_index;
        return Ok(match block.start.tool_use {
            Some(tool) => StreamSignal::Delta(StreamDelta {
                tool_call: Some(ToolCallFragment {
                    block_index: index,
                    id: Some(tool.tool_use_id),
                    name: Some(tool.name),
                    arguments: String::new(),
                }),
                ..StreamDelta::default()
            }),
            None => StreamSignal::Skip,
        });
    }

    if let Some(stop) = event.message_stop {
        return Ok(StreamSignal::Delta(StreamDelta {
            finish_reason: stop.stop_reason,
            ..StreamDelta::default()
        }));
    }

    // Bedrock appends invocation metrics to the last event; prefer the model's own usage.
    let has_metadata = event.metadata.is_some();
    let usage = event
        .metadata
        .and_then(|m| m.usage)
        .map(|u| TokenCounts {
            prompt: u.input_tokens,
            completion: u.output_tokens,
        })
        .or_else(|| {
            event.invocation_metrics.map(|m| TokenCounts {
                prompt: m.input_token_count,
                completion: m.output_token_count,
            })
        });
    if usage.is_some() {
        return Ok(StreamSignal::Delta(StreamDelta {
            usage,
            ..StreamDelta::default()
        }));
    }

    // Metadata carrying only metrics or trace has nothing to forward.
    if has_metadata || event.message_start.is_some() || event.content_block_stop.is_some() {
        return Ok(StreamSignal::Skip);
    }

    Err(GatewayError::unsupported_event(first_member(&raw)))
}

fn first_member(raw: &serde_json::Value) -> String {
    raw.as_object()
        .and_then(|members| members.keys().next().cloned())
        .unwrap_or_else(|| raw.to_string())
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingFirst,
    Streaming,
    FinalizingToolCall,
    Done,
    Failed,
}

/// Running usage for one stream. The total is always derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageAccumulator {
    prompt: u64,
    completion: u64,
}

impl UsageAccumulator {
    /// Prompt tokens are taken from the first non-zero report. Completion
    /// counts are cumulative, so the largest one seen wins.
    pub fn record(&mut self, counts: TokenCounts) {
        if self.prompt == 0 {
            self.prompt = counts.prompt;
        }
        self.completion = self.completion.max(counts.completion);
    }

    pub fn usage(&self) -> ChatUsage {
        ChatUsage::new(self.prompt, self.completion)
    }
}

/// Translates one vendor event stream into chat-completion chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new(Vendor::Nova, "amazon.nova-lite");
///   for event in events {
///       if let Some(chunk) = translator.process_event(event)? {
///           // send chunk as SSE
///       }
///   }
///   let usage = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    vendor: Vendor,
    model: String,
    state: StreamState,
    vendor_message_id: Option<String>,
    id: String,
    created: i64,
    role_sent: bool,
    usage: UsageAccumulator,
    /// Vendor block index of each tool call, by position in the outgoing stream.
    tool_blocks: Vec<u64>,
    last_tool_calls: Option<Vec<ChunkToolCall>>,
}

impl StreamTranslator {
    pub fn new(vendor: Vendor, model: &str) -> Self {
        Self {
            vendor,
            model: model.to_string(),
            state: StreamState::AwaitingFirst,
            vendor_message_id: None,
            id: String::new(),
            created: 0,
            role_sent: false,
            usage: UsageAccumulator::default(),
            tool_blocks: Vec::new(),
            last_tool_calls: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Usage accumulated so far.
    pub fn usage(&self) -> ChatUsage {
        self.usage.usage()
    }

    /// Consume one vendor event. Returns the chunk to send, if the event produced one.
    ///
    /// On error the translator is `Failed` and ignores everything afterwards.
    pub fn process_event(&mut self, event: VendorStreamEvent) -> Result<Option<ChatCompletionChunk>> {
        if matches!(self.state, StreamState::Done | StreamState::Failed) {
            return Ok(None);
        }

        let payload = match event {
            VendorStreamEvent::Chunk(payload) => payload,
            VendorStreamEvent::Unknown { tag } => {
                return Err(self.fail(GatewayError::unsupported_event(tag)))
            }
        };

        let signal = match decode_signal(self.vendor, &payload) {
            Ok(signal) => signal,
            Err(e) => return Err(self.fail(e)),
        };

        match signal {
            StreamSignal::Skip => Ok(None),
            StreamSignal::Start { message_id, usage } => {
                if self.state == StreamState::AwaitingFirst && message_id.is_some() {
                    self.vendor_message_id = message_id;
                }
                if let Some(counts) = usage {
                    self.usage.record(counts);
                }
                Ok(None)
            }
            StreamSignal::Delta(delta) => Ok(Some(self.emit(delta))),
        }
    }

    /// Close the stream after the vendor iterator ended normally. Returns the final usage.
    pub fn finish(&mut self) -> ChatUsage {
        if self.state != StreamState::Failed {
            self.state = StreamState::Done;
        }
        self.usage.usage()
    }

    fn fail(&mut self, err: GatewayError) -> GatewayError {
        self.state = StreamState::Failed;
        tracing::error!(
            vendor = %self.vendor,
            model = %self.model,
            error = %err,
            "Vendor stream failed"
        );
        err
    }

    fn emit(&mut self, delta: StreamDelta) -> ChatCompletionChunk {
        if self.state == StreamState::AwaitingFirst {
            self.id = match self.vendor_message_id.take() {
                Some(id) => format!("chatcmpl-{id}"),
                None => new_completion_id(),
            };
            self.created = chrono::Utc::now().timestamp();
            self.state = StreamState::Streaming;
        }

        if let Some(counts) = delta.usage {
            self.usage.record(counts);
        }
        let chunk_usage = delta.usage.map(|_| self.usage.usage());

        let mut content = delta.text;
        let mut tool_calls = delta.tool_call.map(|fragment| vec![self.tool_call(fragment)]);
        if let Some(ref calls) = tool_calls {
            self.last_tool_calls = Some(calls.clone());
        }

        if delta.finish_reason.is_some() {
            if let Some(mut pending) = self.last_tool_calls.take() {
                self.state = StreamState::FinalizingToolCall;
                let arguments_missing = pending
                    .last()
                    .and_then(|c| c.function.as_ref())
                    .is_some_and(|f| f.arguments.as_deref().unwrap_or_default().is_empty());
                if arguments_missing {
                    if let Some(func) = pending.last_mut().and_then(|c| c.function.as_mut()) {
                        func.arguments = Some("{}".to_string());
                    }
                    content = None;
                    tool_calls = Some(pending);
                }
            }
        }

        let choices = if content.is_none() && tool_calls.is_none() && delta.finish_reason.is_none() {
            Vec::new()
        } else {
            let role = (!self.role_sent).then(|| "assistant".to_string());
            self.role_sent = true;
            vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role,
                    content,
                    tool_calls,
                },
                finish_reason: delta.finish_reason,
            }]
        };

        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage: chunk_usage,
        }
    }

    fn tool_call(&mut self, fragment: ToolCallFragment) -> ChunkToolCall {
        let index = match self.tool_blocks.iter().position(|b| *b == fragment.block_index) {
            Some(i) => i,
            None => {
                self.tool_blocks.push(fragment.block_index);
                self.tool_blocks.len() - 1
            }
        };

        let call_type = fragment.id.as_ref().map(|_| "function".to_string());
        ChunkToolCall {
            index: index as u64,
            id: fragment.id,
            call_type,
            function: Some(ChunkToolCallFunction {
                name: fragment.name,
                arguments: Some(fragment.arguments),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// One item of a translated stream.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Chunk(Box<ChatCompletionChunk>),
    /// End-of-stream sentinel, sent once after the last chunk.
    Done { usage: ChatUsage },
}

/// Drive `translator` over `events`.
///
/// Yields chunks in vendor order, then exactly one [`StreamFrame::Done`]. On a
/// failure the error is yielded and the stream ends without reading further.
/// Dropping the returned stream drops `events`, which closes the vendor connection.
pub fn translate_stream<S>(
    events: S,
    mut translator: StreamTranslator,
) -> impl Stream<Item = Result<StreamFrame>> + Send
where
    S: Stream<Item = Result<VendorStreamEvent>> + Send + Unpin + 'static,
{
    async_stream::stream! {
        // A body local, so the source is dropped on every exit path.
        let mut events = events;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(translator.fail(e));
                    return;
                }
            };

            match translator.process_event(event) {
                Ok(Some(chunk)) => yield Ok(StreamFrame::Chunk(Box::new(chunk))),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        let usage = translator.finish();
        yield Ok(StreamFrame::Done { usage });
    }
}
