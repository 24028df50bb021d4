//! Translation between the OpenAI chat-completions schema and Bedrock vendor schemas.
//!
//! Requests go out as Claude, Llama 3 or Nova bodies; single responses and
//! streamed events come back as chat completions and chunks. Nothing in here
//! talks to the network except through the [`crate::image::ImageFetcher`] passed in.

pub mod claude_types;
pub mod llama_types;
pub mod nova_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
