//! Invocation boundary: performs the authenticated call to Bedrock.
//!
//! Translators never talk to the network. They hand a serialized vendor body to
//! an [`Invoker`] and get back either the response body or a stream of
//! [`VendorStreamEvent`]s. Dropping the stream closes the underlying connection.

use std::pin::Pin;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::types::ResponseStream;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_smithy_types::Blob;
use bytes::Bytes;
use futures::Stream;

use crate::config::AwsConfig;
use crate::error::{GatewayError, Result};

/// One member of a vendor response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorStreamEvent {
    /// A `chunk` member carrying one JSON payload.
    Chunk(Bytes),
    /// A union member this gateway does not understand.
    Unknown { tag: String },
}

pub type VendorEventStream = Pin<Box<dyn Stream<Item = Result<VendorStreamEvent>> + Send>>;

#[async_trait]
pub trait Invoker: Send + Sync {
    /// `InvokeModel`: send `body`, return the raw response body.
    async fn invoke_once(&self, model_id: &str, body: Vec<u8>) -> Result<Bytes>;

    /// `InvokeModelWithResponseStream`: send `body`, return the event stream.
    async fn invoke_streaming(&self, model_id: &str, body: Vec<u8>) -> Result<VendorEventStream>;
}

/// [`Invoker`] backed by the AWS SDK Bedrock runtime client.
pub struct BedrockInvoker {
    client: BedrockClient,
}

impl BedrockInvoker {
    pub fn new(client: BedrockClient) -> Self {
        Self { client }
    }

    /// Build a client from the default credential chain, with optional region
    /// and profile overrides.
    pub async fn from_config(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(ref profile) = config.profile {
            loader = loader.profile_name(profile);
        }

        let sdk_config = loader.load().await;
        Self::new(BedrockClient::new(&sdk_config))
    }
}

#[async_trait]
impl Invoker for BedrockInvoker {
    async fn invoke_once(&self, model_id: &str, body: Vec<u8>) -> Result<Bytes> {
        let output = self
            .client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                tracing::error!(model_id, error = %DisplayErrorContext(&e), "bedrock InvokeModel failed");
                GatewayError::vendor_call("InvokeModel", DisplayErrorContext(&e).to_string(), status)
            })?;

        Ok(Bytes::copy_from_slice(output.body().as_ref()))
    }

    async fn invoke_streaming(&self, model_id: &str, body: Vec<u8>) -> Result<VendorEventStream> {
        let output = self
            .client
            .invoke_model_with_response_stream()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                tracing::error!(
                    model_id,
                    error = %DisplayErrorContext(&e),
                    "bedrock InvokeModelWithResponseStream failed"
                );
                GatewayError::vendor_call(
                    "InvokeModelWithResponseStream",
                    DisplayErrorContext(&e).to_string(),
                    status,
                )
            })?;

        let receiver = output.body;

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(Some(event)) => Some((Ok(to_vendor_event(event)), receiver)),
                Ok(None) => None,
                Err(e) => Some((
                    Err(GatewayError::vendor_call(
                        "InvokeModelWithResponseStream",
                        DisplayErrorContext(&e).to_string(),
                        None,
                    )),
                    receiver,
                )),
            }
        });

        Ok(Box::pin(stream))
    }
}

fn to_vendor_event(event: ResponseStream) -> VendorStreamEvent {
    match event {
        ResponseStream::Chunk(part) => VendorStreamEvent::Chunk(
            part.bytes()
                .map(|b| Bytes::copy_from_slice(b.as_ref()))
                .unwrap_or_default(),
        ),
        other => VendorStreamEvent::Unknown {
            tag: format!("{other:?}"),
        },
    }
}
