use axum::http::HeaderName;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::llm::{ChunkStream, LlmError};

/// Blocking-mode result body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingReply {
    pub message: String,
}

impl IntoResponse for BlockingReply {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// How a relayed stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The backend finished; carries the assembled answer.
    Complete(String),
    Cancelled,
    Failed(String),
}

struct Relay<F> {
    chunks: ChunkStream,
    answer: String,
    on_finish: Option<F>,
}

impl<F: FnOnce(RelayOutcome)> Relay<F> {
    fn finish(&mut self, outcome: RelayOutcome) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(outcome);
        }
    }
}

/// Forward fragments in arrival order while assembling the full answer.
///
/// `on_finish` runs exactly once: with the answer on normal end, or with
/// the cancellation/failure. Cancellation closes the stream quietly; a
/// backend failure is passed through as the last item so the transport can
/// abort the response. A stream dropped by the transport before it ends
/// (caller went away) reports `Cancelled`.
pub fn relay_stream<F>(chunks: ChunkStream, on_finish: F) -> BoxStream<'static, Result<String, LlmError>>
where
    F: FnOnce(RelayOutcome) + Send + 'static,
{
    let relay = RelayGuard(Relay {
        chunks,
        answer: String::new(),
        on_finish: Some(on_finish),
    });

    stream::unfold(Some(relay), |state| async move {
        let mut relay = state?;
        match relay.0.chunks.next().await {
            Some(Ok(chunk)) => {
                relay.0.answer.push_str(&chunk.delta);
                Some((Ok(chunk.delta), Some(relay)))
            }
            None => {
                let answer = std::mem::take(&mut relay.0.answer);
                relay.0.finish(RelayOutcome::Complete(answer));
                None
            }
            Some(Err(LlmError::Cancelled)) => {
                relay.0.finish(RelayOutcome::Cancelled);
                None
            }
            Some(Err(e)) => {
                relay.0.finish(RelayOutcome::Failed(e.to_string()));
                Some((Err(e), None))
            }
        }
    })
    .boxed()
}

struct RelayGuard<F: FnOnce(RelayOutcome)>(Relay<F>);

impl<F: FnOnce(RelayOutcome)> Drop for RelayGuard<F> {
    fn drop(&mut self) {
        self.0.finish(RelayOutcome::Cancelled);
    }
}

/// Wrap relayed fragments as a `text/event-stream` response, one `data:`
/// event per fragment. An `Err` item aborts the response body.
pub fn sse_response(fragments: BoxStream<'static, Result<String, LlmError>>) -> Response {
    let events = fragments.map(|fragment| fragment.map(|text| Event::default().data(text)));
    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{collect_text, guarded};
    use crate::llm::StreamChunk;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    fn recorder() -> (Arc<Mutex<Vec<RelayOutcome>>>, impl FnOnce(RelayOutcome) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |outcome| sink.lock().unwrap().push(outcome))
    }

    fn script(parts: &[&str]) -> Vec<Result<StreamChunk, LlmError>> {
        let mut items: Vec<_> = parts.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
        items.push(Ok(StreamChunk::finished()));
        items
    }

    #[tokio::test]
    async fn test_events_in_backend_order() {
        let (seen, on_finish) = recorder();
        let chunks = guarded(stream::iter(script(&["Hel", "", "lo"])).boxed(), CancellationToken::new());
        let events: Vec<String> = relay_stream(chunks, on_finish)
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(events, vec!["Hel", "lo"]);
        assert_eq!(*seen.lock().unwrap(), vec![RelayOutcome::Complete("Hello".into())]);
    }

    #[tokio::test]
    async fn test_streaming_matches_blocking() {
        let parts = ["The ", "", "quick ", "brown", " fox"];
        let blocking = collect_text(guarded(stream::iter(script(&parts)).boxed(), CancellationToken::new()))
            .await
            .unwrap();
        let (_, on_finish) = recorder();
        let streamed: String = relay_stream(
            guarded(stream::iter(script(&parts)).boxed(), CancellationToken::new()),
            on_finish,
        )
        .map(Result::unwrap)
        .collect::<Vec<_>>()
        .await
        .concat();
        assert_eq!(streamed, blocking);
    }

    #[tokio::test]
    async fn test_cancel_ends_quietly() {
        let (seen, on_finish) = recorder();
        let cancel = CancellationToken::new();
        let chunks = stream::iter(vec![Ok(StreamChunk::text("one"))])
            .chain(stream::pending())
            .boxed();
        let mut events = relay_stream(guarded(chunks, cancel.clone()), on_finish);

        assert_eq!(events.next().await.unwrap().unwrap(), "one");
        cancel.cancel();
        assert!(events.next().await.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![RelayOutcome::Cancelled]);
    }

    #[tokio::test]
    async fn test_failure_passes_error_through() {
        let (seen, on_finish) = recorder();
        let chunks = stream::iter(vec![
            Ok(StreamChunk::text("one")),
            Err(LlmError::Backend("out of memory".into())),
        ])
        .boxed();
        let out: Vec<_> = relay_stream(chunks, on_finish).collect().await;
        assert_eq!(out.len(), 2);
        assert!(out[1].is_err());
        assert!(matches!(&seen.lock().unwrap()[0], RelayOutcome::Failed(msg) if msg.contains("out of memory")));
    }

    #[tokio::test]
    async fn test_dropped_relay_counts_as_cancelled() {
        let (seen, on_finish) = recorder();
        let chunks = stream::iter(vec![Ok(StreamChunk::text("one"))])
            .chain(stream::pending())
            .boxed();
        let mut events = relay_stream(chunks, on_finish);
        events.next().await;
        drop(events);
        assert_eq!(*seen.lock().unwrap(), vec![RelayOutcome::Cancelled]);
    }
}
