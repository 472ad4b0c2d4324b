//! The research state: one mutable struct shared by all agents in a
//! session.
//!
//! The state is exclusively owned by the engine for the lifetime of a
//! run; agents receive a mutable reference for the duration of one
//! `process` call. At most one agent is active at a time, so there is no
//! cross-agent aliasing by construction. The whole struct serializes to
//! JSON and that projection *is* the checkpoint snapshot — transient
//! machinery (event queue, cancel handle) lives outside the struct.

pub mod types;

use crate::event::AgentMessage;
use crate::phase::ResearchPhase;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use types::*;

/// Global working memory for one research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    /// Original user question. Immutable once set.
    pub query: String,

    /// Session identifier; also the cancel/checkpoint key.
    pub session_id: String,

    /// Current state-machine position.
    pub phase: ResearchPhase,

    /// Completed review cycles.
    #[serde(default)]
    pub iteration: u32,

    /// Upper bound for review loops.
    #[serde(default)]
    pub max_iterations: u32,

    // Planning output
    #[serde(default)]
    pub outline: Vec<Section>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub research_questions: Vec<String>,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub knowledge_graph: KnowledgeGraph,

    // Knowledge base
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub data_points: Vec<DataPoint>,
    #[serde(default)]
    pub insights: Vec<String>,

    // Analysis output
    #[serde(default)]
    pub charts: Vec<Chart>,
    #[serde(default)]
    pub code_executions: Vec<CodeExecution>,

    // Writing output
    #[serde(default)]
    pub draft_sections: BTreeMap<String, String>,
    #[serde(default)]
    pub final_report: String,
    #[serde(default)]
    pub references: Vec<Reference>,

    // Review feedback
    #[serde(default)]
    pub critic_feedback: Vec<CriticFeedback>,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub pending_search_queries: Vec<String>,

    // Audit
    #[serde(default)]
    pub logs: Vec<AgentLog>,
    #[serde(default)]
    pub errors: Vec<String>,

    /// In-phase message buffer, flushed by the engine between phases.
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
}

impl ResearchState {
    /// Create the initial state for a fresh session.
    pub fn new(query: impl Into<String>, session_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            phase: ResearchPhase::Init,
            iteration: 0,
            max_iterations,
            outline: Vec::new(),
            hypotheses: Vec::new(),
            research_questions: Vec::new(),
            key_entities: Vec::new(),
            knowledge_graph: KnowledgeGraph::default(),
            facts: Vec::new(),
            data_points: Vec::new(),
            insights: Vec::new(),
            charts: Vec::new(),
            code_executions: Vec::new(),
            draft_sections: BTreeMap::new(),
            final_report: String::new(),
            references: Vec::new(),
            critic_feedback: Vec::new(),
            quality_score: 0.0,
            pending_search_queries: Vec::new(),
            logs: Vec::new(),
            errors: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// JSON projection used as the checkpoint snapshot.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Restore state from a checkpoint snapshot.
    pub fn from_snapshot(snapshot: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(snapshot)
    }

    /// Append an audit log entry.
    pub fn add_log(&mut self, agent: &str, action: &str, detail: impl Into<String>) {
        self.logs.push(AgentLog {
            timestamp: Utc::now().to_rfc3339(),
            agent: agent.to_string(),
            action: action.to_string(),
            detail: detail.into(),
        });
    }

    /// Record a non-fatal error.
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Sections not yet picked up by the searcher.
    pub fn pending_sections(&self) -> Vec<Section> {
        self.outline
            .iter()
            .filter(|s| s.status == SectionStatus::Pending)
            .cloned()
            .collect()
    }

    /// Look up a hypothesis by id.
    pub fn hypothesis_mut(&mut self, id: &str) -> Option<&mut Hypothesis> {
        self.hypotheses.iter_mut().find(|h| h.id == id)
    }

    /// Whether a hypothesis id exists (referential check for facts).
    pub fn has_hypothesis(&self, id: &str) -> bool {
        self.hypotheses.iter().any(|h| h.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ResearchState::new("EV market", "s1", 3);
        assert_eq!(state.phase, ResearchPhase::Init);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.max_iterations, 3);
        assert!(state.outline.is_empty());
        assert!(state.facts.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut state = ResearchState::new("中国新能源汽车2024市场", "s1", 2);
        state.phase = ResearchPhase::Writing;
        state.iteration = 1;
        state.outline.push(Section {
            id: "sec_1".into(),
            title: "市场概况".into(),
            description: "规模与增速".into(),
            section_type: SectionType::Quantitative,
            requires_data: true,
            requires_chart: true,
            priority: 1,
            search_queries: vec!["新能源汽车 市场规模".into()],
            status: SectionStatus::Drafted,
        });
        state.facts.push(Fact {
            id: short_id("fact"),
            content: "2024年销量突破1200万辆".into(),
            source_url: "https://stats.example".into(),
            source_name: "统计局".into(),
            source_type: SourceType::Official,
            credibility_score: 0.95,
            extracted_at: Utc::now().to_rfc3339(),
            related_sections: vec!["sec_1".into()],
            verified: false,
            related_hypothesis: None,
            hypothesis_support: None,
            search_depth: None,
            is_supplementary: false,
        });

        let snapshot = state.snapshot();
        let restored = ResearchState::from_snapshot(snapshot).unwrap();

        assert_eq!(restored.phase, state.phase);
        assert_eq!(restored.iteration, state.iteration);
        assert_eq!(restored.facts.len(), state.facts.len());
        assert_eq!(restored.outline.len(), state.outline.len());
        assert_eq!(restored.outline[0].title, "市场概况");
        assert_eq!(restored.outline[0].status, SectionStatus::Drafted);
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        // Old snapshots without newer fields still restore.
        let minimal = serde_json::json!({
            "query": "q",
            "session_id": "s1",
            "phase": "researching"
        });
        let restored = ResearchState::from_snapshot(minimal).unwrap();
        assert_eq!(restored.phase, ResearchPhase::Researching);
        assert_eq!(restored.max_iterations, 0);
    }

    #[test]
    fn test_pending_sections_filter() {
        let mut state = ResearchState::new("q", "s", 2);
        for (i, status) in [SectionStatus::Pending, SectionStatus::Drafted, SectionStatus::Pending]
            .iter()
            .enumerate()
        {
            state.outline.push(Section {
                id: format!("sec_{}", i + 1),
                title: format!("Section {}", i + 1),
                description: String::new(),
                section_type: SectionType::Mixed,
                requires_data: false,
                requires_chart: false,
                priority: i as u32,
                search_queries: vec![],
                status: *status,
            });
        }
        let pending = state.pending_sections();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "sec_1");
        assert_eq!(pending[1].id, "sec_3");
    }

    #[test]
    fn test_hypothesis_lookup() {
        let mut state = ResearchState::new("q", "s", 2);
        state.hypotheses.push(Hypothesis {
            id: "h_1".into(),
            content: "c".into(),
            status: HypothesisStatus::Unverified,
            evidence_for: vec![],
            evidence_against: vec![],
        });
        assert!(state.has_hypothesis("h_1"));
        assert!(!state.has_hypothesis("h_9"));
        state.hypothesis_mut("h_1").unwrap().evidence_for.push("e".into());
        assert_eq!(state.hypotheses[0].evidence_for.len(), 1);
    }
}
