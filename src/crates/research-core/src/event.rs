//! The event bus: a bounded FIFO from agents to the caller-facing stream.
//!
//! Agents enqueue progress messages while they work; the engine drains
//! the queue concurrently and forwards each message to the caller. Every
//! message is enriched with the emitting agent and a timestamp at
//! enqueue. A full queue never blocks an agent: the message is logged
//! and dropped.

use crate::phase::ResearchPhase;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Queue capacity per session.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Caller-visible event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Lifecycle
    ResearchStart,
    ResearchResumed,
    ResearchCancelled,
    ResearchComplete,
    Error,
    CheckpointSaved,
    // Phase markers
    Phase,
    // Planner
    Outline,
    Thought,
    // Searcher
    Action,
    SearchProgress,
    SearchResults,
    Observation,
    KnowledgeGraph,
    StockQuote,
    // Analyst
    Code,
    CodeResult,
    CodeFix,
    Chart,
    // Writer
    SectionContent,
    ReportDraft,
    RevisionComplete,
    // Critic
    Review,
    CriticFeedback,
    Warning,
    // Step markers for UI
    ResearchStep,
}

/// One message on the bus / stream.
///
/// Serializes to the flat wire shape the caller consumes:
/// `{"type": …, "agent": …, "timestamp": …, …payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent: Option<String>,
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl AgentMessage {
    /// Build an agent-scoped message; the content goes under the
    /// `content` key.
    pub fn from_agent(agent: &str, kind: EventKind, content: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("content".to_string(), content);
        Self {
            kind,
            agent: Some(agent.to_string()),
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }

    /// Build an engine-level message with a custom payload.
    pub fn system(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            agent: None,
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }

    /// Build a phase-transition marker.
    pub fn phase(phase: ResearchPhase, note: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("phase".to_string(), Value::String(phase.as_str().to_string()));
        payload.insert("content".to_string(), Value::String(note.to_string()));
        Self::system(EventKind::Phase, payload)
    }
}

/// Sending half of the bus held by agents (cheap to clone).
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<AgentMessage>,
}

impl EventBus {
    /// Create a bus, returning the sender half and the engine's receiver.
    pub fn new() -> (Self, mpsc::Receiver<AgentMessage>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Enqueue an agent message. Never blocks: a full queue drops the
    /// message with a warning.
    pub fn emit(&self, agent: &str, kind: EventKind, content: Value) {
        self.send(AgentMessage::from_agent(agent, kind, content));
    }

    /// Enqueue a pre-built message.
    pub fn send(&self, message: AgentMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(kind = ?dropped.kind, "event queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!(kind = ?dropped.kind, "event queue closed, dropping message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let message = AgentMessage::from_agent(
            "Searcher",
            EventKind::SearchProgress,
            json!({"query": "EV sales", "results_count": 5}),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "search_progress");
        assert_eq!(value["agent"], "Searcher");
        assert_eq!(value["content"]["results_count"], 5);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_phase_marker_shape() {
        let message = AgentMessage::phase(ResearchPhase::Planning, "starting to plan");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "phase");
        assert_eq!(value["phase"], "planning");
        assert!(value.get("agent").is_none());
    }

    #[test]
    fn test_kind_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventKind::ResearchComplete).unwrap(),
            "\"research_complete\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::StockQuote).unwrap(),
            "\"stock_quote\""
        );
    }

    #[tokio::test]
    async fn test_emit_and_receive_in_order() {
        let (bus, mut rx) = EventBus::new();
        bus.emit("Planner", EventKind::Thought, json!({"text": "first"}));
        bus.emit("Planner", EventKind::Outline, json!({"sections": 3}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Thought);
        assert_eq!(second.kind, EventKind::Outline);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (bus, mut rx) = EventBus::new();
        for i in 0..(EVENT_QUEUE_CAPACITY + 10) {
            bus.emit("Searcher", EventKind::Thought, json!({"i": i}));
        }
        // The first CAPACITY messages are preserved, the overflow is gone.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, EVENT_QUEUE_CAPACITY);
    }
}
