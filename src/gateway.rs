use futures::stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::llm::{BackendCall, ChunkStream, LlmError, Provider};

pub struct InferenceGateway {
    provider: Provider,
}

impl InferenceGateway {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Run the call to completion and return the concatenated answer.
    /// Cancellation or a mid-stream failure returns an error, never partial text.
    pub async fn complete_blocking(
        &self,
        call: &BackendCall,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let chunks = self.complete_streaming(call, cancel.clone()).await?;
        collect_text(chunks).await
    }

    /// Open the backend stream. The returned stream carries only non-empty
    /// fragments, ends at the backend's final marker, and yields a single
    /// [`LlmError::Cancelled`] once `cancel` fires.
    pub async fn complete_streaming(
        &self,
        call: &BackendCall,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, LlmError> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            opened = self.provider.open_stream(call) => opened?,
        };
        Ok(guarded(opened, cancel))
    }
}

/// Drop empty fragments, stop after `done`, and race every read against
/// `cancel`. Dropping the inner stream closes the backend connection.
pub fn guarded(inner: ChunkStream, cancel: CancellationToken) -> ChunkStream {
    stream::unfold(Some((inner, cancel)), |state| async move {
        let (mut inner, cancel) = state?;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some((Err(LlmError::Cancelled), None)),
                next = inner.next() => next,
            };
            match next {
                None => return None,
                Some(Err(e)) => return Some((Err(e), None)),
                Some(Ok(chunk)) if chunk.delta.is_empty() => {
                    if chunk.done {
                        return None;
                    }
                }
                Some(Ok(chunk)) => {
                    let rest = if chunk.done { None } else { Some((inner, cancel)) };
                    return Some((Ok(chunk), rest));
                }
            }
        }
    })
    .boxed()
}

/// Concatenate a chunk stream in arrival order.
pub async fn collect_text(mut chunks: ChunkStream) -> Result<String, LlmError> {
    let mut answer = String::new();
    while let Some(chunk) = chunks.next().await {
        answer.push_str(&chunk?.delta);
    }
    Ok(answer)
}
