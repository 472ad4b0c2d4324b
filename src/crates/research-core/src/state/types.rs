//! Typed records held in the research state.
//!
//! The upstream system this engine models passes snake-case dictionaries
//! between roles; here every record is a named struct with snake_case
//! serde so the same JSON flows over the wire and into checkpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of content a report section carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Qualitative,
    Quantitative,
    Mixed,
}

impl Default for SectionType {
    fn default() -> Self {
        SectionType::Mixed
    }
}

/// Progress of a section through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    Researching,
    Drafted,
    Reviewed,
    Final,
}

impl Default for SectionStatus {
    fn default() -> Self {
        SectionStatus::Pending
    }
}

/// One section of the research outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub section_type: SectionType,
    #[serde(default)]
    pub requires_data: bool,
    #[serde(default)]
    pub requires_chart: bool,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub status: SectionStatus,
}

/// Credibility class of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Official,
    Academic,
    News,
    Report,
    SelfMedia,
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::News
    }
}

/// Direction of the evidence a fact gives a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisSupport {
    Supports,
    Refutes,
    Neutral,
}

/// An atomic, cited statement extracted from search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub content: String,
    pub source_url: String,
    pub source_name: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub credibility_score: f64,
    #[serde(default)]
    pub extracted_at: String,
    #[serde(default)]
    pub related_sections: Vec<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_hypothesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis_support: Option<HypothesisSupport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_depth: Option<u32>,
    #[serde(default)]
    pub is_supplementary: bool,
}

/// A structured numeric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: String,
    pub name: String,
    /// Numeric when the extractor managed a clean parse, free text
    /// otherwise.
    pub value: Value,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_depth: Option<u32>,
}

/// Verification status of a research hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Unverified,
    Supported,
    Refuted,
    PartiallySupported,
}

impl Default for HypothesisStatus {
    fn default() -> Self {
        HypothesisStatus::Unverified
    }
}

/// A claim the engine tries to support or refute with evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub status: HypothesisStatus,
    #[serde(default)]
    pub evidence_for: Vec<String>,
    #[serde(default)]
    pub evidence_against: Vec<String>,
}

impl Hypothesis {
    /// Re-derive the status from the collected evidence: supported at
    /// two or more supporting items with no refutations, the mirror for
    /// refuted, partially supported for anything in between.
    pub fn reassess(&mut self) {
        let for_count = self.evidence_for.len();
        let against_count = self.evidence_against.len();

        self.status = if for_count >= 2 && against_count == 0 {
            HypothesisStatus::Supported
        } else if against_count >= 2 && for_count == 0 {
            HypothesisStatus::Refuted
        } else if for_count + against_count > 0 {
            HypothesisStatus::PartiallySupported
        } else {
            HypothesisStatus::Unverified
        };
    }
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub importance: u32,
}

/// A relation between two knowledge-graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

impl GraphEdge {
    /// Dedup key: `source→target:relation`.
    pub fn key(&self) -> String {
        format!("{}→{}:{}", self.source, self.target, self.relation)
    }
}

/// Entity graph accumulated by the searcher and analyst.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    /// Merge nodes (keyed by name) and edges (keyed by
    /// `source→target:relation`) into the graph.
    pub fn merge(&mut self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) {
        for node in nodes {
            if node.name.is_empty() || self.nodes.iter().any(|n| n.name == node.name) {
                continue;
            }
            self.nodes.push(node);
        }
        for edge in edges {
            if self.edges.iter().any(|e| e.key() == edge.key()) {
                continue;
            }
            self.edges.push(edge);
        }
    }
}

/// A rendered or configured chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chart {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub chart_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echarts_option: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
}

/// Audit record of one sandbox run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecution {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub timestamp: String,
}

/// Category of an issue the critic raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingSource,
    LogicError,
    Bias,
    Hallucination,
    Outdated,
    Incomplete,
}

impl IssueType {
    /// Whether resolving this issue needs new sourcing rather than a
    /// text-only rewrite.
    pub fn needs_research(&self) -> bool {
        matches!(
            self,
            IssueType::MissingSource | IssueType::Outdated | IssueType::Incomplete
        )
    }
}

/// Severity of a critic issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    /// Critical and major issues gate routing decisions.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Major)
    }
}

/// One issue raised during adversarial review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticFeedback {
    pub id: String,
    #[serde(default)]
    pub target_section: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub requires_new_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default)]
    pub resolved: bool,
}

/// Bibliography entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// One line of the agent-level audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLog {
    pub timestamp: String,
    pub agent: String,
    pub action: String,
    #[serde(default)]
    pub detail: String,
}

/// Generate a short prefixed id, e.g. `fact_1a2b3c4d`.
pub fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}
