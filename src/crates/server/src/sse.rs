//! SSE framing for the research event stream.
//!
//! Every engine event becomes one `data: <json>\n\n` frame with UTF-8
//! preserved (no ASCII escaping), and the stream always terminates with
//! `data: [DONE]\n\n` — including after an in-stream error.

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use research_core::AgentMessage;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

/// Terminal frame payload.
pub const DONE_MARKER: &str = "[DONE]";

/// Render one engine event as an SSE data payload.
pub fn event_payload(message: &AgentMessage) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","content":"serialization failed: {}"}}"#, e)
    })
}

/// Boxed SSE event stream shared by the POST/GET/resume handlers.
pub type BoxedEventStream =
    std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Wrap an engine event stream into an SSE response terminated by the
/// `[DONE]` frame.
pub fn sse_response(stream: ReceiverStream<AgentMessage>) -> Sse<BoxedEventStream> {
    let events = stream
        .map(|message| Ok(Event::default().data(event_payload(&message))))
        .chain(futures::stream::once(async {
            Ok(Event::default().data(DONE_MARKER))
        }));

    Sse::new(Box::pin(events) as BoxedEventStream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::EventKind;
    use serde_json::json;

    #[test]
    fn test_event_payload_preserves_utf8() {
        let message = AgentMessage::from_agent(
            "Writer",
            EventKind::SectionContent,
            json!({"section_title": "市场概况"}),
        );
        let payload = event_payload(&message);
        assert!(payload.contains("市场概况"));
        assert!(!payload.contains("\\u"));
        assert!(payload.contains("\"type\":\"section_content\""));
    }

    #[tokio::test]
    async fn test_stream_ends_with_done() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(AgentMessage::from_agent("Planner", EventKind::Thought, json!({"t": 1})))
            .await
            .unwrap();
        drop(tx);

        let stream = ReceiverStream::new(rx)
            .map(|message| event_payload(&message))
            .chain(futures::stream::once(async { DONE_MARKER.to_string() }));
        let frames: Vec<String> = stream.collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"type\":\"thought\""));
        assert_eq!(frames[1], DONE_MARKER);
    }
}
