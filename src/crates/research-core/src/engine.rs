//! The orchestrating engine: drives the phase state machine, streams
//! events, checkpoints at phase boundaries, and honours cancellation.
//!
//! Each agent step runs as a spawned task that takes ownership of the
//! state and hands it back on completion. While the task runs the engine
//! drains the event bus with a 500 ms read timeout, forwarding messages
//! to the caller stream and polling the cancellation flag on every tick.
//! Phases are strictly sequential; the drain loop is the only place two
//! tasks are live at once, and the drainer never touches the state.

use crate::agent::{Agent, Analyst, Critic, Planner, QuoteClient, Searcher, Writer};
use crate::cancel::CancelSignal;
use crate::event::{AgentMessage, EventBus, EventKind, EVENT_QUEUE_CAPACITY};
use crate::phase::ResearchPhase;
use crate::sandbox::CodeRunner;
use crate::state::ResearchState;
use checkpoint::{CheckpointSnapshot, CheckpointStatus, CheckpointStore};
use llm::ChatClient;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use websearch::SearchClient;

/// Cancellation poll cadence while draining the bus.
const DRAIN_TICK: Duration = Duration::from_millis(500);

/// Hard ceiling on state-machine steps; the critic's iteration bound
/// terminates well before this.
const MAX_ENGINE_STEPS: usize = 64;

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default review-loop bound for fresh sessions.
    pub max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume from the saved checkpoint instead of starting fresh.
    pub resume: bool,

    /// Owning user recorded on checkpoints.
    pub user_id: Option<String>,

    /// Override the configured review-loop bound.
    pub max_iterations: Option<u32>,
}

/// The multi-agent research engine.
#[derive(Clone)]
pub struct ResearchEngine {
    planner: Arc<dyn Agent>,
    searcher: Arc<dyn Agent>,
    analyst: Arc<dyn Agent>,
    writer: Arc<dyn Agent>,
    critic: Arc<dyn Agent>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cancel: Arc<dyn CancelSignal>,
    config: EngineConfig,
}

enum StepOutcome {
    Continue(ResearchState),
    Cancelled,
    Failed(String),
}

impl ResearchEngine {
    /// Build an engine over the adapter seams.
    pub fn new(
        chat: Arc<dyn ChatClient>,
        search: Arc<dyn SearchClient>,
        runner: Arc<dyn CodeRunner>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        cancel: Arc<dyn CancelSignal>,
        config: EngineConfig,
    ) -> Self {
        Self {
            planner: Arc::new(Planner::new(chat.clone())),
            searcher: Arc::new(Searcher::new(chat.clone(), search.clone())),
            analyst: Arc::new(Analyst::new(chat.clone(), runner)),
            writer: Arc::new(Writer::new(chat.clone())),
            critic: Arc::new(Critic::new(chat)),
            checkpoints,
            cancel,
            config,
        }
    }

    /// Build an engine whose searcher also performs realtime quote
    /// lookups.
    pub fn with_quotes(
        chat: Arc<dyn ChatClient>,
        search: Arc<dyn SearchClient>,
        runner: Arc<dyn CodeRunner>,
        quotes: Arc<dyn QuoteClient>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        cancel: Arc<dyn CancelSignal>,
        config: EngineConfig,
    ) -> Self {
        let mut engine = Self::new(chat.clone(), search.clone(), runner, checkpoints, cancel, config);
        engine.searcher = Arc::new(Searcher::new(chat, search).with_quotes(quotes));
        engine
    }

    /// Access the cancellation signal shared with the HTTP surface.
    pub fn cancel_signal(&self) -> Arc<dyn CancelSignal> {
        self.cancel.clone()
    }

    /// Access the checkpoint store shared with the HTTP surface.
    pub fn checkpoint_store(&self) -> Option<Arc<dyn CheckpointStore>> {
        self.checkpoints.clone()
    }

    /// Start a research run, returning the caller-facing event stream.
    /// The run proceeds independently of stream consumption.
    pub fn run(
        &self,
        query: String,
        session_id: String,
        options: RunOptions,
    ) -> ReceiverStream<AgentMessage> {
        let (out_tx, out_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_inner(query, session_id, options, out_tx).await;
        });
        ReceiverStream::new(out_rx)
    }

    async fn run_inner(
        &self,
        query: String,
        session_id: String,
        options: RunOptions,
        out: mpsc::Sender<AgentMessage>,
    ) {
        self.cancel.clear(&session_id);

        let mut state = match self.initial_state(&query, &session_id, &options, &out).await {
            Some(state) => state,
            None => return,
        };

        let (bus, mut bus_rx) = EventBus::new();
        let user_id = options.user_id.clone();
        let mut steps = 0usize;

        while !state.phase.is_terminal() {
            steps += 1;
            if steps > MAX_ENGINE_STEPS {
                error!(%session_id, "engine step ceiling reached, aborting run");
                self.emit(&out, AgentMessage::system(EventKind::Error, payload(json!({
                    "content": "internal error: state machine did not converge",
                })))).await;
                self.update_status(&session_id, CheckpointStatus::Failed, Some("state machine did not converge")).await;
                return;
            }

            let (marker, preset_phase, agent): (AgentMessage, Option<ResearchPhase>, Arc<dyn Agent>) =
                match state.phase {
                    ResearchPhase::Init => (
                        AgentMessage::phase(ResearchPhase::Planning, "Planning the research..."),
                        None,
                        self.planner.clone(),
                    ),
                    ResearchPhase::Planning => (
                        AgentMessage::phase(ResearchPhase::Researching, "Starting deep search..."),
                        None,
                        self.searcher.clone(),
                    ),
                    ResearchPhase::Researching => (
                        AgentMessage::phase(ResearchPhase::Analyzing, "Analysing the data..."),
                        Some(ResearchPhase::Analyzing),
                        self.analyst.clone(),
                    ),
                    ResearchPhase::Analyzing => (
                        AgentMessage::phase(ResearchPhase::Writing, "Writing the report..."),
                        Some(ResearchPhase::Writing),
                        self.writer.clone(),
                    ),
                    ResearchPhase::Writing => (
                        AgentMessage::phase(ResearchPhase::Writing, "Writing with the latest information..."),
                        None,
                        self.writer.clone(),
                    ),
                    ResearchPhase::Reviewing => (
                        AgentMessage::phase(
                            ResearchPhase::Reviewing,
                            &format!("Reviewing (round {})...", state.iteration + 1),
                        ),
                        None,
                        self.critic.clone(),
                    ),
                    ResearchPhase::ReResearching => (
                        AgentMessage::phase(
                            ResearchPhase::ReResearching,
                            "Supplementary searches from review feedback...",
                        ),
                        None,
                        self.searcher.clone(),
                    ),
                    ResearchPhase::Revising => (
                        AgentMessage::phase(ResearchPhase::Revising, "Revising from review feedback..."),
                        None,
                        self.writer.clone(),
                    ),
                    ResearchPhase::Completed | ResearchPhase::Failed => break,
                };

            if self.cancel.is_cancelled(&session_id) {
                self.finish_cancelled(&session_id, &out).await;
                return;
            }

            self.emit(&out, marker).await;
            if let Some(phase) = preset_phase {
                state.phase = phase;
            }

            match self.run_agent_step(agent, state, &bus, &mut bus_rx, &out).await {
                StepOutcome::Continue(next_state) => state = next_state,
                StepOutcome::Cancelled => {
                    self.finish_cancelled(&session_id, &out).await;
                    return;
                }
                StepOutcome::Failed(message) => {
                    error!(%session_id, %message, "agent task failed");
                    self.emit(&out, AgentMessage::system(EventKind::Error, payload(json!({
                        "content": message,
                    })))).await;
                    self.update_status(&session_id, CheckpointStatus::Failed, Some("agent task failed")).await;
                    return;
                }
            }

            // The in-phase buffer is transient: flush between phases.
            state.messages.clear();

            if self.save_checkpoint(&state, user_id.as_deref()).await {
                self.emit(&out, AgentMessage::system(EventKind::CheckpointSaved, payload(json!({
                    "phase": state.phase.as_str(),
                    "session_id": session_id,
                })))).await;
            }
        }

        if state.phase == ResearchPhase::Failed {
            self.update_status(&session_id, CheckpointStatus::Failed, None).await;
            self.emit(&out, AgentMessage::system(EventKind::Error, payload(json!({
                "content": "research run failed",
            })))).await;
            return;
        }

        info!(
            %session_id,
            facts = state.facts.len(),
            charts = state.charts.len(),
            iterations = state.iteration,
            report_len = state.final_report.chars().count(),
            "research completed"
        );

        state.phase = ResearchPhase::Completed;
        self.update_status(&session_id, CheckpointStatus::Completed, None).await;

        self.emit(&out, AgentMessage::system(EventKind::ResearchComplete, payload(json!({
            "final_report": state.final_report,
            "quality_score": state.quality_score,
            "facts_count": state.facts.len(),
            "charts_count": state.charts.len(),
            "iterations": state.iteration,
            "references": state.references,
        })))).await;
    }

    /// Fresh state, or the checkpoint snapshot when resuming. Emits the
    /// matching lifecycle event.
    async fn initial_state(
        &self,
        query: &str,
        session_id: &str,
        options: &RunOptions,
        out: &mpsc::Sender<AgentMessage>,
    ) -> Option<ResearchState> {
        if options.resume {
            if let Some(store) = &self.checkpoints {
                match store.load(session_id).await {
                    Ok(Some(snapshot)) => match ResearchState::from_snapshot(snapshot) {
                        Ok(state) => {
                            info!(session_id, phase = %state.phase, "resuming from checkpoint");
                            self.emit(out, AgentMessage::system(EventKind::ResearchResumed, payload(json!({
                                "phase": state.phase.as_str(),
                                "session_id": session_id,
                            })))).await;
                            return Some(state);
                        }
                        Err(e) => {
                            warn!(session_id, error = %e, "checkpoint snapshot did not restore, starting fresh");
                        }
                    },
                    Ok(None) => info!(session_id, "no checkpoint found, starting fresh"),
                    Err(e) => warn!(session_id, error = %e, "checkpoint load failed, starting fresh"),
                }
            }
        }

        let max_iterations = options.max_iterations.unwrap_or(self.config.max_iterations);
        let state = ResearchState::new(query, session_id, max_iterations);
        self.emit(out, AgentMessage::system(EventKind::ResearchStart, payload(json!({
            "query": query,
            "session_id": session_id,
        })))).await;
        Some(state)
    }

    /// Run one agent as a background task, draining the bus while it
    /// works and polling the cancellation flag every tick.
    async fn run_agent_step(
        &self,
        agent: Arc<dyn Agent>,
        state: ResearchState,
        bus: &EventBus,
        bus_rx: &mut mpsc::Receiver<AgentMessage>,
        out: &mpsc::Sender<AgentMessage>,
    ) -> StepOutcome {
        let session_id = state.session_id.clone();
        let agent_name = agent.name();
        let agent_bus = bus.clone();

        info!(agent = agent_name, "starting agent");

        let mut handle = tokio::spawn(async move {
            let mut state = state;
            if let Err(e) = agent.process(&mut state, &agent_bus).await {
                warn!(agent = agent.name(), error = %e, "agent step degraded");
                state.push_error(format!("{}: {}", agent.name(), e));
            }
            state
        });

        loop {
            if self.cancel.is_cancelled(&session_id) {
                info!(agent = agent_name, "cancellation observed, aborting agent task");
                handle.abort();
                let _ = (&mut handle).await;
                return StepOutcome::Cancelled;
            }

            tokio::select! {
                joined = &mut handle => {
                    // Flush whatever the agent enqueued after the last read.
                    while let Ok(message) = bus_rx.try_recv() {
                        self.emit(out, message).await;
                    }
                    return match joined {
                        Ok(state) => {
                            info!(agent = agent_name, "agent completed");
                            StepOutcome::Continue(state)
                        }
                        Err(e) if e.is_cancelled() => StepOutcome::Cancelled,
                        Err(e) => StepOutcome::Failed(format!("{} panicked: {}", agent_name, e)),
                    };
                }
                maybe = bus_rx.recv() => {
                    if let Some(message) = maybe {
                        self.emit(out, message).await;
                    }
                }
                _ = tokio::time::sleep(DRAIN_TICK) => {}
            }
        }
    }

    async fn finish_cancelled(&self, session_id: &str, out: &mpsc::Sender<AgentMessage>) {
        info!(session_id, "research cancelled");
        self.emit(out, AgentMessage::system(EventKind::ResearchCancelled, payload(json!({
            "session_id": session_id,
            "content": "Research cancelled",
        })))).await;
        self.update_status(session_id, CheckpointStatus::Failed, Some("cancelled")).await;
    }

    /// Checkpoint the state. Failures are logged and non-fatal.
    async fn save_checkpoint(&self, state: &ResearchState, user_id: Option<&str>) -> bool {
        let Some(store) = &self.checkpoints else { return false };

        let snapshot = CheckpointSnapshot {
            session_id: state.session_id.clone(),
            user_id: user_id.map(String::from),
            query: state.query.clone(),
            phase: state.phase.as_str().to_string(),
            iteration: state.iteration,
            state: state.snapshot(),
        };

        match store.save(&snapshot).await {
            Ok(id) => {
                info!(checkpoint_id = %id, phase = %state.phase, "checkpoint saved");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to save checkpoint");
                false
            }
        }
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: CheckpointStatus,
        error_message: Option<&str>,
    ) {
        if let Some(store) = &self.checkpoints {
            if let Err(e) = store.update_status(session_id, status, error_message).await {
                warn!(error = %e, "failed to update checkpoint status");
            }
        }
    }

    async fn emit(&self, out: &mpsc::Sender<AgentMessage>, message: AgentMessage) {
        // A disconnected consumer must not stall the run.
        let _ = out.send(message).await;
    }
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("content".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        assert_eq!(EngineConfig::default().max_iterations, 3);
    }

    #[test]
    fn test_payload_wraps_non_objects() {
        let map = payload(json!("plain"));
        assert_eq!(map.get("content").unwrap(), "plain");
        let map = payload(json!({"a": 1}));
        assert_eq!(map.get("a").unwrap(), 1);
    }
}
