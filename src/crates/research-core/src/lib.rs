//! Multi-agent deep-research orchestration engine.
//!
//! Given a research question, the engine runs a team of specialized
//! roles — Planner, Searcher, Analyst, Writer, Critic — through a
//! phase-based state machine: concurrent web search with deduplication
//! and recursive source tracing, structured fact and data extraction,
//! sandboxed analysis-code execution with chart capture, adversarial
//! review with re-research/revise routing, live event streaming, and
//! durable checkpoints for pause/cancel/resume.
//!
//! # Architecture
//!
//! ```text
//! caller ── ResearchEngine::run ──► event stream (ReceiverStream)
//!                │
//!                ▼
//!   Init → Planning → Researching → Analyzing → Writing → Reviewing
//!                        ▲                          ▲        │
//!                        └── ReResearching ◄────────┼────────┤
//!                                                Revising ◄──┤
//!                                                            ▼
//!                                                  Completed / Failed
//! ```
//!
//! Agents mutate one shared [`state::ResearchState`] (one agent at a
//! time, by construction) and stream progress through the bounded
//! [`event::EventBus`]. The engine checkpoints the state after every
//! phase and polls the [`cancel::CancelSignal`] between steps.

pub mod agent;
pub mod cancel;
pub mod engine;
pub mod error;
pub mod event;
pub mod phase;
pub mod sandbox;
pub mod state;

pub use agent::{Agent, Analyst, Critic, Planner, QuoteClient, Searcher, StockQuote, Writer};
pub use cancel::{CancelSignal, MemoryCancelSignal};
pub use engine::{EngineConfig, ResearchEngine, RunOptions};
pub use error::{EngineError, Result};
pub use event::{AgentMessage, EventBus, EventKind};
pub use phase::ResearchPhase;
pub use sandbox::{CodeRunner, ExecutionOutcome, PythonSandbox, FORBIDDEN_ERROR};
pub use state::ResearchState;
