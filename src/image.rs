//! Image resolution for multimodal messages.
//!
//! Request translation hands every `image_url` part to an [`ImageFetcher`].
//! Failures are reported to the caller, which drops the part and carries on.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;

use crate::config::ImageConfig;
use crate::error::{GatewayError, Result};

/// An image resolved to base64 bytes plus the MIME type it was served with.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub mime_type: String,
    pub data: String,
}

impl FetchedImage {
    /// Short format name for vendors that want `png` rather than `image/png`.
    /// Anything unrecognized is declared as jpeg.
    pub fn format(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpeg",
        }
    }
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_as_base64(&self, url: &str) -> Result<FetchedImage>;
}

/// Fetches `http(s)` URLs with reqwest and decodes inline `data:` URLs locally.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch_as_base64(&self, url: &str) -> Result<FetchedImage> {
        if url.starts_with("data:") {
            return parse_data_url(url);
        }

        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes as u64 {
                return Err(too_large(url, declared, self.max_bytes));
            }
        }

        // Content-Length may be absent or wrong; the cap also holds while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(too_large(
                    url,
                    (bytes.len() + chunk.len()) as u64,
                    self.max_bytes,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedImage {
            mime_type,
            data: STANDARD.encode(&bytes),
        })
    }
}

fn too_large(url: &str, seen: u64, limit: usize) -> GatewayError {
    GatewayError::invalid_input(format!(
        "image at {url} exceeds {limit} bytes (at least {seen})"
    ))
}

/// Parse `data:<mime>;base64,<payload>`. The payload is validated, not re-encoded.
pub fn parse_data_url(url: &str) -> Result<FetchedImage> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| GatewayError::invalid_input("not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| GatewayError::invalid_input("data URL has no payload"))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| GatewayError::invalid_input("only base64 data URLs are supported"))?;

    STANDARD
        .decode(payload)
        .map_err(|e| GatewayError::invalid_input(format!("invalid base64 image: {e}")))?;

    Ok(FetchedImage {
        mime_type: if mime_type.is_empty() {
            "image/jpeg".to_string()
        } else {
            mime_type.to_string()
        },
        data: payload.to_string(),
    })
}
