//! One exchange from inbound request to recorded history.
//!
//! Blocking and streaming requests share the same path; only the last step
//! differs. Each exchange walks `Composing → Dispatched → Relaying` and ends
//! in `Complete`, `Cancelled` or `Failed`. Only `Complete` touches the
//! conversation store.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::models::Message;
use crate::db::ConversationStore;
use crate::doc_processor::{self, Attachment, DocumentLimits};
use crate::error::GatewayError;
use crate::gateway::InferenceGateway;
use crate::llm::router::ModelRouter;
use crate::llm::{BackendCall, LlmError, ModelInfo};
use crate::prompt;
use crate::relay::{self, RelayOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Composing,
    Dispatched,
    Relaying,
    Complete,
    Cancelled,
    Failed,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeState::Complete | ExchangeState::Cancelled | ExchangeState::Failed
        )
    }
}

/// Inbound request, already decoded from the transport.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub conversation_id: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
}

/// A composed and routed request, ready to dispatch.
#[derive(Debug, Clone)]
pub struct PreparedExchange {
    pub conversation_id: String,
    pub user_prompt: String,
    pub call: BackendCall,
    trace: ExchangeTrace,
}

#[cfg(test)]
impl PreparedExchange {
    fn modality(&self) -> prompt::Modality {
        self.call.modality
    }

    fn model(&self) -> &str {
        &self.call.model
    }
}

/// Per-exchange bookkeeping, owned by the task handling the request.
#[derive(Debug, Clone)]
struct ExchangeTrace {
    conversation_id: String,
    state: ExchangeState,
    started: Instant,
}

impl ExchangeTrace {
    fn start(conversation_id: &str) -> Self {
        let trace = Self {
            conversation_id: conversation_id.to_string(),
            state: ExchangeState::Composing,
            started: Instant::now(),
        };
        debug!(conversation_id, state = ?trace.state, "exchange started");
        trace
    }

    fn advance(&mut self, next: ExchangeState) {
        debug!(
            conversation_id = %self.conversation_id,
            from = ?self.state,
            to = ?next,
            "exchange state"
        );
        self.state = next;
        if next.is_terminal() {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            match next {
                ExchangeState::Complete => {
                    info!(conversation_id = %self.conversation_id, elapsed_ms, "exchange complete")
                }
                ExchangeState::Cancelled => {
                    info!(conversation_id = %self.conversation_id, elapsed_ms, "exchange cancelled by caller")
                }
                _ => warn!(conversation_id = %self.conversation_id, elapsed_ms, "exchange failed"),
            }
        }
    }
}

pub struct ChatPipeline {
    gateway: InferenceGateway,
    router: ModelRouter,
    store: Arc<ConversationStore>,
    limits: DocumentLimits,
}

impl ChatPipeline {
    pub fn new(
        gateway: InferenceGateway,
        router: ModelRouter,
        store: Arc<ConversationStore>,
        limits: DocumentLimits,
    ) -> Self {
        Self {
            gateway,
            router,
            store,
            limits,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.router.models(self.gateway.provider().name())
    }

    /// Classify attachments, compose the prompt and pick the model.
    /// CPU-bound; PDF extraction can be slow, so callers on the async
    /// runtime should run it on a blocking thread.
    pub fn prepare(&self, request: ExchangeRequest) -> Result<PreparedExchange, GatewayError> {
        let user_prompt = request.prompt.trim().to_string();
        if user_prompt.is_empty() && request.attachments.is_empty() {
            return Err(GatewayError::InvalidRequest("prompt is empty".into()));
        }

        let mut trace = ExchangeTrace::start(&request.conversation_id);
        info!(
            conversation_id = %request.conversation_id,
            attachments = request.attachments.len(),
            "initializing exchange"
        );

        let classified = doc_processor::classify(&request.attachments, &self.limits);
        let payload = prompt::compose(&user_prompt, &classified);
        let model = match self.router.select(payload.target_modality) {
            Ok(model) => model.to_string(),
            Err(e) => {
                trace.advance(ExchangeState::Failed);
                return Err(e);
            }
        };
        info!(
            conversation_id = %request.conversation_id,
            modality = ?payload.target_modality,
            %model,
            prompt_chars = payload.final_text.chars().count(),
            "routed"
        );

        Ok(PreparedExchange {
            conversation_id: request.conversation_id,
            user_prompt,
            call: BackendCall {
                model,
                prompt: payload.final_text,
                images: payload.images,
                modality: payload.target_modality,
            },
            trace,
        })
    }

    /// Blocking mode: the whole answer or an error, never partial text.
    pub async fn run_blocking(
        &self,
        mut prepared: PreparedExchange,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        prepared.trace.advance(ExchangeState::Dispatched);
        match self.gateway.complete_blocking(&prepared.call, cancel).await {
            Ok(answer) => {
                prepared.trace.advance(ExchangeState::Relaying);
                record(&self.store, &prepared.conversation_id, &prepared.user_prompt, &answer);
                prepared.trace.advance(ExchangeState::Complete);
                Ok(answer)
            }
            Err(e) => Err(fail(&mut prepared.trace, e)),
        }
    }

    /// Streaming mode: fragments as they arrive. Connection errors surface
    /// here, before any event is sent; later failures end the stream with an
    /// error item. The exchange is recorded once the stream completes.
    pub async fn run_streaming(
        &self,
        mut prepared: PreparedExchange,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<String, LlmError>>, GatewayError> {
        prepared.trace.advance(ExchangeState::Dispatched);
        let chunks = match self.gateway.complete_streaming(&prepared.call, cancel).await {
            Ok(chunks) => chunks,
            Err(e) => return Err(fail(&mut prepared.trace, e)),
        };
        prepared.trace.advance(ExchangeState::Relaying);

        let store = Arc::clone(&self.store);
        let PreparedExchange {
            conversation_id,
            user_prompt,
            mut trace,
            ..
        } = prepared;

        Ok(relay::relay_stream(chunks, move |outcome| {
            match outcome {
                RelayOutcome::Complete(answer) => {
                    record(&store, &conversation_id, &user_prompt, &answer);
                    trace.advance(ExchangeState::Complete);
                }
                RelayOutcome::Cancelled => trace.advance(ExchangeState::Cancelled),
                RelayOutcome::Failed(reason) => {
                    warn!(%conversation_id, "stream failed: {reason}");
                    trace.advance(ExchangeState::Failed);
                }
            }
        }))
    }
}

fn fail(trace: &mut ExchangeTrace, err: LlmError) -> GatewayError {
    if matches!(err, LlmError::Cancelled) {
        trace.advance(ExchangeState::Cancelled);
    } else {
        warn!(conversation_id = %trace.conversation_id, "backend unavailable: {err}");
        trace.advance(ExchangeState::Failed);
    }
    err.into()
}

fn record(store: &ConversationStore, conversation_id: &str, prompt: &str, answer: &str) {
    store.add_exchange(
        conversation_id,
        Message::user(conversation_id, prompt),
        Message::assistant(conversation_id, answer),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::llm::Provider;
    use crate::prompt::Modality;

    fn pipeline(text_model: &str, vision_model: &str) -> ChatPipeline {
        // nothing listens on port 9; only used where no call is dispatched
        pipeline_at("http://127.0.0.1:9", text_model, vision_model)
    }

    fn pipeline_at(endpoint: &str, text_model: &str, vision_model: &str) -> ChatPipeline {
        let provider = Provider::from_config(&BackendConfig {
            endpoint: endpoint.into(),
            ..BackendConfig::default()
        })
        .unwrap();
        ChatPipeline::new(
            InferenceGateway::new(provider),
            ModelRouter::new(text_model, vision_model),
            Arc::new(ConversationStore::new()),
            DocumentLimits::default(),
        )
    }

    fn request(prompt: &str, attachments: Vec<Attachment>) -> ExchangeRequest {
        ExchangeRequest {
            conversation_id: "c1".into(),
            prompt: prompt.into(),
            attachments,
        }
    }

    #[test]
    fn test_prepare_text_request() {
        let prepared = pipeline("phi3", "llava").prepare(request("  Summarize \n", vec![])).unwrap();
        assert_eq!(prepared.modality(), Modality::Text);
        assert_eq!(prepared.model(), "phi3");
        assert_eq!(prepared.call.prompt, "Summarize");
        assert_eq!(prepared.user_prompt, "Summarize");
    }

    #[test]
    fn test_prepare_image_routes_to_vision() {
        let image = Attachment {
            filename: "cat.png".into(),
            media_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        };
        let prepared = pipeline("phi3", "llava").prepare(request("Describe", vec![image])).unwrap();
        assert_eq!(prepared.modality(), Modality::Vision);
        assert_eq!(prepared.model(), "llava");
        assert_eq!(prepared.call.images.len(), 1);
        assert_eq!(prepared.call.prompt, "Describe");
    }

    #[test]
    fn test_prepare_zip_is_noted_not_sent() {
        let zip = Attachment {
            filename: "bundle.zip".into(),
            media_type: "application/zip".into(),
            bytes: b"PK\x03\x04secret".to_vec(),
        };
        let prepared = pipeline("phi3", "llava").prepare(request("Q", vec![zip])).unwrap();
        assert_eq!(prepared.modality(), Modality::Text);
        assert!(prepared.call.prompt.contains("bundle.zip"));
        assert!(!prepared.call.prompt.contains("secret"));
        assert!(prepared.call.images.is_empty());
    }

    #[test]
    fn test_prepare_rejects_empty_prompt() {
        let err = pipeline("phi3", "llava").prepare(request("   ", vec![])).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_unconfigured_vision_model() {
        let p = pipeline("phi3", "");
        assert!(p.prepare(request("Q", vec![])).is_ok());
        let image = Attachment {
            filename: "a.png".into(),
            media_type: "image/png".into(),
            bytes: vec![0],
        };
        assert!(matches!(
            p.prepare(request("Q", vec![image])),
            Err(GatewayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_records_nothing() {
        let p = pipeline("phi3", "llava");
        let prepared = p.prepare(request("Q", vec![])).unwrap();
        let err = p.run_blocking(prepared, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
        assert!(p.store().get_messages("c1").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_records_nothing() {
        let p = pipeline("phi3", "llava");
        let prepared = p.prepare(request("Q", vec![])).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p.run_streaming(prepared, cancel).await.err().unwrap();
        assert!(matches!(err, GatewayError::Cancelled));
        assert!(p.store().get_messages("c1").is_empty());
    }

    /// Ollama stand-in that sends one fragment and then holds the body open.
    async fn stalled_backend() -> String {
        use axum::body::{Body, Bytes};
        use axum::routing::post;
        use futures::{stream, StreamExt};

        let app = axum::Router::new().route(
            "/api/generate",
            post(|| async {
                let first = stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(b"{\"response\":\"Hel\",\"done\":false}\n"))
                });
                Body::from_stream(first.chain(stream::pending::<Result<Bytes, std::io::Error>>()))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_stops_and_records_nothing() {
        use futures::StreamExt;
        use std::time::Duration;

        let p = pipeline_at(&stalled_backend().await, "phi3", "llava");
        let prepared = p.prepare(request("Q", vec![])).unwrap();
        let cancel = CancellationToken::new();
        let mut fragments = p.run_streaming(prepared, cancel.clone()).await.unwrap();

        assert_eq!(fragments.next().await.unwrap().unwrap(), "Hel");
        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), fragments.next())
            .await
            .expect("cancellation must not wait for the backend");
        assert!(next.is_none());
        assert!(p.store().get_messages("c1").is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_records_nothing() {
        use futures::StreamExt;

        let p = pipeline_at(&stalled_backend().await, "phi3", "llava");
        let prepared = p.prepare(request("Q", vec![])).unwrap();
        let mut fragments = p.run_streaming(prepared, CancellationToken::new()).await.unwrap();

        assert_eq!(fragments.next().await.unwrap().unwrap(), "Hel");
        drop(fragments);
        assert!(p.store().get_messages("c1").is_empty());
    }
}
