//! Wire types for Meta Llama 3 models on Bedrock.
//!
//! Llama takes a single rendered prompt rather than a message list, and the
//! streaming chunks share the shape of the single-shot response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_gen_len: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// Single-shot response, and also the payload of every streaming chunk.
///
/// In a stream, `prompt_token_count` appears on the first chunk and
/// `generation_token_count` is cumulative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub generation: String,
    #[serde(default)]
    pub prompt_token_count: Option<u64>,
    #[serde(default)]
    pub generation_token_count: Option<u64>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}
