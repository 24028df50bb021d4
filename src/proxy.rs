//! Request orchestration: resolve the model, translate, invoke Bedrock and
//! translate back. Every finished request leaves one entry in the usage ledger.

use crate::error::{GatewayError, Result};
use crate::image::ImageFetcher;
use crate::invoke::Invoker;
use crate::logging::{SharedLogger, UsageRecord};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse, ChatUsage};
use crate::translate::request::translate_request;
use crate::translate::response::translate_response;
use crate::translate::streaming::{translate_stream, StreamFrame, StreamTranslator};
use crate::vendors::{ModelRoute, Registry};

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;

/// Translated stream handed to the HTTP layer: chunks, then the sentinel.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame>> + Send>>;

/// Everything a request needs to reach Bedrock.
#[derive(Clone)]
pub struct Upstream {
    pub registry: Registry,
    pub invoker: Arc<dyn Invoker>,
    pub images: Arc<dyn ImageFetcher>,
    pub logger: SharedLogger,
}

/// Serve a non-streaming request: resolve, translate, invoke, translate back.
pub async fn complete(
    req: &ChatCompletionRequest,
    upstream: &Upstream,
) -> Result<ChatCompletionResponse> {
    let route = upstream.registry.resolve(&req.model)?.clone();
    let body = translate_request(route.vendor, req, upstream.images.as_ref())
        .await?
        .to_body()?;

    tracing::info!(
        model = %req.model,
        vendor = %route.vendor,
        model_id = %route.model_id,
        stream = false,
        "Invoking Bedrock"
    );

    let result = match upstream.invoker.invoke_once(&route.model_id, body).await {
        Ok(raw) => translate_response(route.vendor, &raw, &req.model),
        Err(e) => Err(e),
    };

    match result {
        Ok(resp) => {
            tracing::info!(
                model = %req.model,
                prompt_tokens = resp.usage.prompt_tokens,
                completion_tokens = resp.usage.completion_tokens,
                "Completed"
            );
            upstream
                .logger
                .record(ledger_entry(req, &route, false, resp.usage));
            Ok(resp)
        }
        Err(e) => {
            upstream
                .logger
                .record(ledger_entry(req, &route, false, ChatUsage::default()).failed(e.to_string()));
            Err(e)
        }
    }
}

/// Serve a streaming request.
///
/// Errors before the vendor starts streaming are returned directly so the HTTP
/// layer can still pick a status code. Later errors arrive as stream items.
pub async fn stream(req: &ChatCompletionRequest, upstream: &Upstream) -> Result<FrameStream> {
    let route = upstream.registry.resolve(&req.model)?.clone();
    let body = translate_request(route.vendor, req, upstream.images.as_ref())
        .await?
        .to_body()?;

    tracing::info!(
        model = %req.model,
        vendor = %route.vendor,
        model_id = %route.model_id,
        stream = true,
        "Invoking Bedrock"
    );

    let events = match upstream.invoker.invoke_streaming(&route.model_id, body).await {
        Ok(events) => events,
        Err(e) => {
            upstream
                .logger
                .record(ledger_entry(req, &route, true, ChatUsage::default()).failed(e.to_string()));
            return Err(e);
        }
    };

    let frames = translate_stream(events, StreamTranslator::new(route.vendor, &req.model));
    Ok(Box::pin(record_usage(frames, req, route, upstream.logger.clone())))
}

/// Pass frames through, writing one ledger entry when the stream ends or fails.
fn record_usage(
    frames: impl Stream<Item = Result<StreamFrame>> + Send + 'static,
    req: &ChatCompletionRequest,
    route: ModelRoute,
    logger: SharedLogger,
) -> impl Stream<Item = Result<StreamFrame>> + Send + 'static {
    let entry = ledger_entry(req, &route, true, ChatUsage::default());

    async_stream::stream! {
        tokio::pin!(frames);
        let mut seen = ChatUsage::default();

        while let Some(frame) = frames.next().await {
            match &frame {
                Ok(StreamFrame::Chunk(chunk)) => {
                    if let Some(usage) = chunk.usage {
                        seen = usage;
                    }
                }
                Ok(StreamFrame::Done { usage }) => {
                    tracing::info!(
                        model = %entry.model,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "Stream completed"
                    );
                    logger.record(UsageRecord { usage: *usage, ..entry.clone() });
                }
                Err(e) => {
                    logger.record(UsageRecord { usage: seen, ..entry.clone() }.failed(e.to_string()));
                }
            }
            yield frame;
        }
    }
}

fn ledger_entry(
    req: &ChatCompletionRequest,
    route: &ModelRoute,
    stream: bool,
    usage: ChatUsage,
) -> UsageRecord {
    UsageRecord::completed(&req.model, route.vendor, &route.model_id, stream, usage)
}

/// Parse a request body, mapping failures to `InvalidInput`.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::invalid_input(format!("Invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{parse_data_url, FetchedImage};
    use crate::invoke::{VendorEventStream, VendorStreamEvent};
    use crate::logging::Outcome;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInvoker {
        calls: AtomicUsize,
        reply: &'static [u8],
    }

    #[async_trait]
    impl Invoker for CountingInvoker {
        async fn invoke_once(&self, _model_id: &str, _body: Vec<u8>) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(self.reply))
        }

        async fn invoke_streaming(&self, _model_id: &str, _body: Vec<u8>) -> Result<VendorEventStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let events = vec![Ok(VendorStreamEvent::Chunk(Bytes::from_static(self.reply)))];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct NoImages;

    #[async_trait]
    impl ImageFetcher for NoImages {
        async fn fetch_as_base64(&self, url: &str) -> Result<FetchedImage> {
            parse_data_url(url)
        }
    }

    fn upstream(reply: &'static [u8]) -> (Upstream, Arc<CountingInvoker>) {
        let invoker = Arc::new(CountingInvoker {
            calls: AtomicUsize::new(0),
            reply,
        });
        let upstream = Upstream {
            registry: Registry::builtin(),
            invoker: invoker.clone(),
            images: Arc::new(NoImages),
            logger: SharedLogger::in_memory(),
        };
        (upstream, invoker)
    }

    fn request(model: &str) -> ChatCompletionRequest {
        parse_request(
            serde_json::to_vec(&serde_json::json!({
                "model": model,
                "messages": [{"role": "user", "content": "Hi"}]
            }))
            .unwrap()
            .as_slice(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_records_usage() {
        let (upstream, invoker) = upstream(
            br#"{"generation":"Hello","prompt_token_count":3,"generation_token_count":1,"stop_reason":"stop"}"#,
        );

        let resp = complete(&request("llama3-8b-8192"), &upstream).await.unwrap();

        assert_eq!(resp.choices[0].message.content, "Hello");
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        let ledger = upstream.logger.recent(10);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].outcome, Outcome::Completed);
        assert_eq!(ledger[0].model_id, "meta.llama3-8b-instruct-v1:0");
        assert_eq!(ledger[0].usage, ChatUsage::new(3, 1));
    }

    #[tokio::test]
    async fn test_unknown_model_never_reaches_vendor() {
        let (upstream, invoker) = upstream(b"{}");

        let err = complete(&request("gpt-4o"), &upstream).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownModel { .. }));

        assert!(stream(&request("gpt-4o"), &upstream).await.is_err());
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
        assert!(upstream.logger.recent(10).is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_response_is_recorded_as_failure() {
        let (upstream, _) = upstream(b"<html>");
        let err = complete(&request("amazon.nova-lite"), &upstream).await.unwrap_err();
        assert!(matches!(err, GatewayError::VendorDecodeFailed { .. }));
        assert_eq!(upstream.logger.recent(1)[0].outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_stream_records_final_usage() {
        let (upstream, _) = upstream(
            br#"{"generation":"Hi","prompt_token_count":2,"generation_token_count":1,"stop_reason":"stop"}"#,
        );

        let frames: Vec<_> = stream(&request("llama3-70b-8192"), &upstream)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], Ok(StreamFrame::Done { .. })));
        let ledger = upstream.logger.recent(1);
        assert!(ledger[0].stream);
        assert_eq!(ledger[0].usage, ChatUsage::new(2, 1));
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        assert!(matches!(
            parse_request(b"{\"model\":"),
            Err(GatewayError::InvalidInput { .. })
        ));
    }
}
