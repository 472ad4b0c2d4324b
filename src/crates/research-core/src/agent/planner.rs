//! The Planner: turns the user's question into an executable research
//! plan — outline, sub-questions, hypotheses, key entities.

use crate::agent::{add_message, call_llm_json, string_list, Agent};
use crate::error::Result;
use crate::event::{EventBus, EventKind};
use crate::phase::ResearchPhase;
use crate::state::{
    short_id, Hypothesis, HypothesisStatus, KnowledgeGraph, ResearchState, Section, SectionStatus,
    SectionType,
};
use async_trait::async_trait;
use llm::{ChatClient, ChatOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Retries after a failed or too-short plan.
const MAX_PLAN_RETRIES: usize = 2;

/// Minimum sections for a usable outline.
const MIN_SECTIONS: usize = 3;

const PLANNING_SYSTEM: &str = "You are a professional industry research planner. \
Output strictly the requested JSON format with no extra content.";

const PLANNING_PROMPT: &str = r#"Research topic: {query}

Produce a research outline and research hypotheses for this topic as JSON in
exactly this shape:

{
  "hypothesis_1": "a hypothesis about market or industry trends (to verify)",
  "hypothesis_2": "a hypothesis about competition or technology (to verify)",
  "hypothesis_3": "a hypothesis about policy or external factors (to verify)",
  "sec_1_title": "Market overview",
  "sec_1_desc": "market size and growth",
  "sec_1_query": "search keywords",
  "sec_2_title": "Competitive landscape",
  "sec_2_desc": "major players",
  "sec_2_query": "search keywords",
  "sec_3_title": "Technology trends",
  "sec_3_desc": "core technologies",
  "sec_3_query": "search keywords",
  "sec_4_title": "Policy environment",
  "sec_4_desc": "relevant policies",
  "sec_4_query": "search keywords",
  "sec_5_title": "Challenges and opportunities",
  "sec_5_desc": "risks and openings",
  "sec_5_query": "search keywords",
  "sec_6_title": "Outlook",
  "sec_6_desc": "future development",
  "sec_6_query": "search keywords",
  "questions": "core question 1;core question 2;core question 3"
}

Fill in concrete content for the topic. Every field is a string. Write the
content in the language of the research topic."#;

const SIMPLIFIED_PROMPT: &str = r#"Produce a research outline for "{query}" as JSON:

{"outline": [
    {"id": "sec_1", "title": "section title", "description": "what it covers",
     "section_type": "mixed", "requires_data": true, "requires_chart": false,
     "search_queries": ["keyword 1", "keyword 2"]}
], "research_questions": ["question 1", "question 2", "question 3"],
 "hypotheses": ["hypothesis 1", "hypothesis 2", "hypothesis 3"],
 "key_entities": []}

The outline must contain 5-8 sections covering market overview, competition,
technology trends, policy environment, and outlook. Write the content in the
language of the research topic."#;

/// The research-planning role.
pub struct Planner {
    chat: Arc<dyn ChatClient>,
}

impl Planner {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    /// Detect and normalise the legacy flat shape
    /// (`sec_1_title`/`sec_1_desc`/…, `hypothesis_N`, `questions`).
    fn convert_flat_plan(flat: &Value) -> Value {
        let mut outline = Vec::new();
        for i in 1..10 {
            let title = match flat.get(format!("sec_{}_title", i)).and_then(Value::as_str) {
                Some(title) => title.to_string(),
                None => break,
            };
            let description = flat
                .get(format!("sec_{}_desc", i))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let query = flat
                .get(format!("sec_{}_query", i))
                .and_then(Value::as_str)
                .filter(|q| !q.trim().is_empty())
                .unwrap_or(&title);

            outline.push(json!({
                "id": format!("sec_{}", i),
                "title": title,
                "description": description,
                "section_type": "mixed",
                // The leading sections carry the quantitative load.
                "requires_data": i <= 2,
                "requires_chart": i <= 2,
                "search_queries": [query],
            }));
        }

        let research_questions: Vec<String> = flat
            .get("questions")
            .and_then(Value::as_str)
            .map(|q| {
                q.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut hypotheses = Vec::new();
        for i in 1..6 {
            if let Some(content) = flat
                .get(format!("hypothesis_{}", i))
                .and_then(Value::as_str)
                .filter(|c| !c.trim().is_empty())
            {
                hypotheses.push(json!({"id": format!("h_{}", i), "content": content}));
            }
        }

        json!({
            "outline": outline,
            "research_questions": research_questions,
            "hypotheses": hypotheses,
            "key_entities": [],
        })
    }

    fn outline_len(plan: &Value) -> usize {
        plan.get("outline").and_then(Value::as_array).map_or(0, Vec::len)
    }

    /// Process raw outline entries into sections with every field
    /// defaulted and non-empty search queries.
    fn process_outline(plan: &Value) -> Vec<Section> {
        let entries = plan
            .get("outline")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut sections = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let Some(obj) = entry.as_object() else { continue };

            let title = obj
                .get("title")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("Section {}", i + 1));

            let section_type = match obj.get("section_type").and_then(Value::as_str) {
                Some("qualitative") => SectionType::Qualitative,
                Some("quantitative") => SectionType::Quantitative,
                _ => SectionType::Mixed,
            };

            let mut search_queries = string_list(obj.get("search_queries"));
            if search_queries.is_empty() {
                search_queries.push(title.clone());
            }

            sections.push(Section {
                id: obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| format!("sec_{}", i + 1)),
                title,
                description: obj
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                section_type,
                requires_data: obj.get("requires_data").and_then(Value::as_bool).unwrap_or(false),
                requires_chart: obj.get("requires_chart").and_then(Value::as_bool).unwrap_or(false),
                priority: obj
                    .get("priority")
                    .and_then(Value::as_u64)
                    .unwrap_or(i as u64 + 1) as u32,
                search_queries,
                status: SectionStatus::Pending,
            });
        }
        sections
    }

    /// Hypotheses arrive either as strings or as `{id, content}` objects.
    fn process_hypotheses(plan: &Value) -> Vec<Hypothesis> {
        let entries = plan
            .get("hypotheses")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let (id, content) = match entry {
                    Value::String(s) if !s.trim().is_empty() => {
                        (format!("h_{}", i + 1), s.trim().to_string())
                    }
                    Value::Object(obj) => {
                        let content = obj.get("content").and_then(Value::as_str)?.to_string();
                        let id = obj
                            .get("id")
                            .and_then(Value::as_str)
                            .map(String::from)
                            .unwrap_or_else(|| format!("h_{}", i + 1));
                        (id, content)
                    }
                    _ => return None,
                };
                Some(Hypothesis {
                    id,
                    content,
                    status: HypothesisStatus::Unverified,
                    evidence_for: Vec::new(),
                    evidence_against: Vec::new(),
                })
            })
            .collect()
    }

    fn process_entities(plan: &Value) -> Vec<String> {
        plan.get("key_entities")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| match e {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(obj) => {
                            obj.get("name").and_then(Value::as_str).map(String::from)
                        }
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Agent for Planner {
    fn name(&self) -> &'static str {
        "Planner"
    }

    async fn process(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        info!(query = %state.query, "starting initial planning");

        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_id": short_id("step_planning"),
                "step_type": "planning",
                "title": "Research plan",
                "subtitle": "Analysing the question, building the outline",
                "status": "running",
                "stats": {},
            }),
        );
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": "Analysing the research question and drafting the outline..."}),
        );

        let mut plan: Option<Value> = None;
        for attempt in 0..=MAX_PLAN_RETRIES {
            let prompt = if attempt == 0 {
                PLANNING_PROMPT.replace("{query}", &state.query)
            } else {
                SIMPLIFIED_PROMPT.replace("{query}", &state.query)
            };

            let options = ChatOptions::default().with_max_tokens(8000);
            let parsed =
                call_llm_json(self.chat.as_ref(), self.name(), PLANNING_SYSTEM, &prompt, &options)
                    .await;

            let normalized = parsed.map(|value| {
                if value.get("sec_1_title").is_some() && value.get("outline").is_none() {
                    Self::convert_flat_plan(&value)
                } else {
                    value
                }
            });

            match normalized {
                Some(value) if Self::outline_len(&value) >= MIN_SECTIONS => {
                    info!(sections = Self::outline_len(&value), attempt, "outline accepted");
                    plan = Some(value);
                    break;
                }
                Some(value) => {
                    warn!(
                        attempt,
                        sections = Self::outline_len(&value),
                        "outline too short, retrying with simplified prompt"
                    );
                    // Keep the best partial plan: the last attempt's
                    // outline is better than none at all.
                    plan = Some(value);
                }
                None => warn!(attempt, "plan generation produced no JSON"),
            }
        }

        let Some(plan) = plan else {
            state.push_error("Failed to generate research plan after retries");
            state.phase = ResearchPhase::Planning;
            return Ok(());
        };

        state.outline = Self::process_outline(&plan);
        state.hypotheses = Self::process_hypotheses(&plan);
        state.research_questions = string_list(plan.get("research_questions"));
        state.key_entities = Self::process_entities(&plan);
        state.knowledge_graph = KnowledgeGraph::default();
        state.add_log(
            self.name(),
            "plan",
            format!(
                "{} sections, {} hypotheses",
                state.outline.len(),
                state.hypotheses.len()
            ),
        );

        let outline_event = json!({
            "outline": state.outline,
            "research_questions": state.research_questions,
            "hypotheses": state.hypotheses,
            "key_entities": state.key_entities,
        });
        add_message(state, bus, self.name(), EventKind::Outline, outline_event);

        state.phase = ResearchPhase::Planning;

        let stats = json!({
            "sections_count": state.outline.len(),
            "questions_count": state.research_questions.len(),
        });
        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_type": "planning",
                "title": "Research plan",
                "subtitle": "Analysing the question, building the outline",
                "status": "completed",
                "stats": stats,
            }),
        );

        info!(sections = state.outline.len(), "planning completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_plan_conversion() {
        let flat = json!({
            "hypothesis_1": "market keeps growing",
            "hypothesis_2": "exports accelerate",
            "sec_1_title": "Market overview",
            "sec_1_desc": "size and growth",
            "sec_1_query": "NEV market size 2024",
            "sec_2_title": "Competition",
            "sec_2_desc": "major players",
            "sec_2_query": "",
            "questions": "how big is it;who leads;  ",
        });

        let plan = Planner::convert_flat_plan(&flat);
        let outline = plan["outline"].as_array().unwrap();
        assert_eq!(outline.len(), 2);
        assert_eq!(outline[0]["id"], "sec_1");
        assert_eq!(outline[0]["search_queries"][0], "NEV market size 2024");
        // An empty per-section query falls back to the title.
        assert_eq!(outline[1]["search_queries"][0], "Competition");
        assert_eq!(outline[0]["requires_data"], true);

        assert_eq!(plan["research_questions"].as_array().unwrap().len(), 2);
        assert_eq!(plan["hypotheses"].as_array().unwrap().len(), 2);
        assert_eq!(plan["hypotheses"][0]["id"], "h_1");
    }

    #[test]
    fn test_process_outline_defaults() {
        let plan = json!({"outline": [
            {"title": "Only a title"},
            {"id": "sec_x", "title": "Full", "section_type": "quantitative",
             "requires_data": true, "search_queries": ["q1", "q2"]},
            "not an object",
        ]});

        let sections = Planner::process_outline(&plan);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].id, "sec_1");
        assert_eq!(sections[0].search_queries, vec!["Only a title"]);
        assert_eq!(sections[0].status, SectionStatus::Pending);
        assert_eq!(sections[1].id, "sec_x");
        assert_eq!(sections[1].section_type, SectionType::Quantitative);
        assert_eq!(sections[1].search_queries.len(), 2);
    }

    #[test]
    fn test_process_hypotheses_both_shapes() {
        let plan = json!({"hypotheses": [
            "plain string hypothesis",
            {"id": "h_custom", "content": "object hypothesis"},
            {"content": "no id"},
            42,
        ]});

        let hypotheses = Planner::process_hypotheses(&plan);
        assert_eq!(hypotheses.len(), 3);
        assert_eq!(hypotheses[0].id, "h_1");
        assert_eq!(hypotheses[1].id, "h_custom");
        assert_eq!(hypotheses[2].id, "h_3");
        assert!(hypotheses
            .iter()
            .all(|h| h.status == HypothesisStatus::Unverified && h.evidence_for.is_empty()));
    }

    #[test]
    fn test_process_entities_both_shapes() {
        let plan = json!({"key_entities": ["BYD", {"name": "CATL"}, {"type": "no name"}]});
        assert_eq!(Planner::process_entities(&plan), vec!["BYD", "CATL"]);
    }
}
