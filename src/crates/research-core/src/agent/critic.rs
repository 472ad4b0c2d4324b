//! The Critic: adversarial review of the drafted report.
//!
//! Produces a structured assessment (1-10 score, three-valued verdict,
//! issue list, fact-check results, missing aspects) and routes the state
//! machine: pass → completed; fixable-by-text → revising; information
//! gaps → re-researching with concrete search queries for the Searcher.

use crate::agent::{add_message, call_llm_json, truncate_chars, Agent};
use crate::error::Result;
use crate::event::{EventBus, EventKind};
use crate::phase::ResearchPhase;
use crate::state::{short_id, CriticFeedback, IssueType, ResearchState, Severity};
use async_trait::async_trait;
use llm::{ChatClient, ChatOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Score at or above which a `pass` verdict is legitimate.
const PASS_SCORE: f64 = 7.0;

/// Queries handed to the searcher per re-research round.
const MAX_ROUTED_QUERIES: usize = 5;

/// Missing aspects promoted into search queries.
const MAX_MISSING_ASPECT_QUERIES: usize = 3;

const REVIEW_SYSTEM: &str = "You are an extremely strict reviewer and fact checker whose job \
is to find every problem in a research report. You are never easily satisfied.";

/// Three-valued review verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    NeedsRevision,
    MajorIssues,
}

impl Verdict {
    fn parse(s: &str) -> Self {
        match s {
            "pass" => Verdict::Pass,
            "major_issues" => Verdict::MajorIssues,
            _ => Verdict::NeedsRevision,
        }
    }
}

/// Parsed review output.
#[derive(Debug, Default)]
struct Review {
    quality_score: f64,
    verdict: Option<Verdict>,
    summary: String,
    issues: Vec<CriticFeedback>,
    missing_aspects: Vec<String>,
}

/// Where the review sends the state machine next.
#[derive(Debug, PartialEq, Eq)]
struct Routing {
    should_research: bool,
    search_queries: Vec<String>,
}

/// The adversarial-review role.
pub struct Critic {
    chat: Arc<dyn ChatClient>,
}

impl Critic {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    /// Decide between re-researching and revising.
    ///
    /// Re-research when there are concrete queries to run AND the
    /// review points at information gaps (research-class issues or
    /// missing aspects) AND either no blocking issues exist at all or
    /// research-class issues are a substantial share (> 30%) of them.
    fn analyze_routing(issues: &[CriticFeedback], missing_aspects: &[String]) -> Routing {
        let mut search_queries: Vec<String> = Vec::new();
        let mut research_issue_count = 0usize;

        for issue in issues {
            if issue.severity.is_blocking() && issue.issue_type.needs_research() {
                research_issue_count += 1;
            }
            if issue.requires_new_search {
                if let Some(query) = &issue.search_query {
                    if !query.trim().is_empty() {
                        search_queries.push(query.trim().to_string());
                    }
                }
            }
        }

        for aspect in missing_aspects.iter().take(MAX_MISSING_ASPECT_QUERIES) {
            search_queries.push(aspect.clone());
        }

        let blocking_total = issues.iter().filter(|i| i.severity.is_blocking()).count();
        let should_research = !search_queries.is_empty()
            && (research_issue_count > 0 || !missing_aspects.is_empty())
            && (blocking_total == 0
                || research_issue_count as f64 / blocking_total.max(1) as f64 > 0.3);

        // Unique, capped, first occurrence wins.
        let mut unique = Vec::new();
        for query in search_queries {
            if !unique.contains(&query) {
                unique.push(query);
            }
            if unique.len() >= MAX_ROUTED_QUERIES {
                break;
            }
        }

        Routing {
            should_research,
            search_queries: unique,
        }
    }

    fn parse_review(value: &Value) -> Review {
        let assessment = value.get("overall_assessment");
        let quality_score = assessment
            .and_then(|a| a.get("quality_score"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let mut verdict = assessment
            .and_then(|a| a.get("verdict"))
            .and_then(Value::as_str)
            .map(Verdict::parse);

        // The score/verdict contract: a pass below the threshold is a
        // model mistake and demotes to needs_revision.
        if verdict == Some(Verdict::Pass) && quality_score < PASS_SCORE {
            warn!(quality_score, "pass verdict below threshold, demoting to needs_revision");
            verdict = Some(Verdict::NeedsRevision);
        }

        let issues = value
            .get("issues")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let obj = item.as_object()?;
                        let issue_type = match obj.get("issue_type").and_then(Value::as_str)? {
                            "missing_source" => IssueType::MissingSource,
                            "logic_error" => IssueType::LogicError,
                            "bias" => IssueType::Bias,
                            "hallucination" => IssueType::Hallucination,
                            "outdated" => IssueType::Outdated,
                            "incomplete" => IssueType::Incomplete,
                            _ => return None,
                        };
                        let severity = match obj.get("severity").and_then(Value::as_str) {
                            Some("critical") => Severity::Critical,
                            Some("major") => Severity::Major,
                            _ => Severity::Minor,
                        };
                        Some(CriticFeedback {
                            id: short_id("issue"),
                            target_section: obj
                                .get("target_section")
                                .and_then(Value::as_str)
                                .unwrap_or("global")
                                .to_string(),
                            issue_type,
                            severity,
                            description: obj
                                .get("description")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            suggestion: obj
                                .get("suggestion")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            requires_new_search: obj
                                .get("requires_new_search")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                            search_query: obj
                                .get("search_query")
                                .and_then(Value::as_str)
                                .filter(|q| !q.trim().is_empty())
                                .map(String::from),
                            resolved: false,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Review {
            quality_score,
            verdict,
            summary: assessment
                .and_then(|a| a.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            issues,
            missing_aspects: crate::agent::string_list(value.get("missing_aspects")),
        }
    }

    async fn review_content(&self, state: &ResearchState) -> Option<Review> {
        let mut draft_content = String::new();
        for section in &state.outline {
            if let Some(content) = state.draft_sections.get(&section.id) {
                draft_content.push_str(&format!("\n## {}\n{}\n", section.title, content));
            }
        }
        if draft_content.is_empty() {
            draft_content = if state.final_report.is_empty() {
                "(no content yet)".to_string()
            } else {
                state.final_report.clone()
            };
        }

        let facts_summary: Vec<String> = state
            .facts
            .iter()
            .take(20)
            .map(|f| {
                format!(
                    "- [{}] {} (source: {}, credibility: {:.2})",
                    f.id,
                    truncate_chars(&f.content, 150),
                    f.source_name,
                    f.credibility_score
                )
            })
            .collect();

        let data_summary: Vec<String> = state
            .data_points
            .iter()
            .take(15)
            .map(|dp| format!("- {}: {} {} (source: {})", dp.name, dp.value, dp.unit, dp.source))
            .collect();

        let outline_summary: Vec<String> = state
            .outline
            .iter()
            .map(|s| format!("- {}: {} ({:?})", s.id, s.title, s.status))
            .collect();

        let prompt = format!(
            r#"## Review principles (apply strictly)
1. Zero tolerance for hallucination: any data or fact without a clear source
   is an issue.
2. Closed logic: claims need evidence, evidence needs sources.
3. Watch for bias: one-sided or emotive statements are issues.
4. Freshness: data older than two years must be flagged.
5. Completeness: missing major aspects are issues.

## Research question
{query}

## Outline
{outline}

## Content under review
{draft}

## Cited facts
{facts}

## Data points used
{data}

## Task
Review everything above and list every problem you find. You are playing the
fault-finder.

Output JSON:
{{
    "overall_assessment": {{
        "quality_score": 1,
        "verdict": "pass/needs_revision/major_issues",
        "summary": "overall assessment"
    }},
    "issues": [
        {{
            "target_section": "section id or 'global'",
            "issue_type": "missing_source/logic_error/bias/hallucination/outdated/incomplete",
            "severity": "critical/major/minor",
            "description": "what is wrong",
            "suggestion": "how to fix it",
            "requires_new_search": false,
            "search_query": "search keywords when new sourcing is needed"
        }}
    ],
    "fact_check_results": [
        {{"fact_id": "fact id", "status": "verified/unverified/suspicious/false",
          "reason": "why"}}
    ],
    "missing_aspects": ["important aspects the report misses"],
    "strength_points": ["what the report does well"]
}}

Scoring (1-10): 9-10 excellent, 7-8 good (verdict=pass), 5-6 needs revision,
3-4 poor, 1-2 unusable. verdict may only be "pass" when quality_score >= 7."#,
            query = state.query,
            outline = outline_summary.join("\n"),
            draft = truncate_chars(&draft_content, 8000),
            facts = if facts_summary.is_empty() { "(no facts recorded)".to_string() } else { facts_summary.join("\n") },
            data = if data_summary.is_empty() { "(no data points)".to_string() } else { data_summary.join("\n") },
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let value =
            call_llm_json(self.chat.as_ref(), self.name(), REVIEW_SYSTEM, &prompt, &options)
                .await?;
        Some(Self::parse_review(&value))
    }
}

#[async_trait]
impl Agent for Critic {
    fn name(&self) -> &'static str {
        "Critic"
    }

    async fn process(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        if state.phase != ResearchPhase::Reviewing {
            return Ok(());
        }

        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": "Reviewing the report adversarially, hunting for problems..."}),
        );

        let Some(review) = self.review_content(state).await else {
            // Without a usable review the loop cannot converge; finish
            // with what we have rather than spinning.
            state.push_error("Critic review produced no JSON");
            add_message(
                state,
                bus,
                self.name(),
                EventKind::Warning,
                json!({"content": "Review failed to parse; finishing with the current draft"}),
            );
            state.phase = ResearchPhase::Completed;
            return Ok(());
        };

        state.quality_score = review.quality_score;

        let critical = review
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count();
        let major = review.issues.iter().filter(|i| i.severity == Severity::Major).count();

        add_message(
            state,
            bus,
            self.name(),
            EventKind::Review,
            json!({
                "verdict": match review.verdict {
                    Some(Verdict::Pass) => "pass",
                    Some(Verdict::MajorIssues) => "major_issues",
                    _ => "needs_revision",
                },
                "quality_score": review.quality_score,
                "issues_count": review.issues.len(),
                "critical_issues": critical,
                "major_issues": major,
                "summary": review.summary,
                "missing_aspects": review.missing_aspects,
            }),
        );

        for issue in review
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .take(3)
        {
            add_message(
                state,
                bus,
                self.name(),
                EventKind::CriticFeedback,
                json!({
                    "issue_type": issue.issue_type,
                    "severity": issue.severity,
                    "description": issue.description,
                    "suggestion": issue.suggestion,
                }),
            );
        }

        let routing = Self::analyze_routing(&review.issues, &review.missing_aspects);
        state.critic_feedback.extend(review.issues);

        match review.verdict {
            Some(Verdict::Pass) => {
                info!(score = review.quality_score, "review passed");
                state.phase = ResearchPhase::Completed;
            }
            _ if state.iteration >= state.max_iterations => {
                add_message(
                    state,
                    bus,
                    self.name(),
                    EventKind::Warning,
                    json!({"content": "Maximum review iterations reached; some issues may remain unresolved"}),
                );
                state.phase = ResearchPhase::Completed;
            }
            _ => {
                if routing.should_research {
                    add_message(
                        state,
                        bus,
                        self.name(),
                        EventKind::Thought,
                        json!({"content": format!(
                            "Information gaps found, supplementary searches queued: {}",
                            routing.search_queries.join(", ")
                        )}),
                    );
                    state.pending_search_queries = routing.search_queries;
                    state.phase = ResearchPhase::ReResearching;
                } else {
                    state.phase = ResearchPhase::Revising;
                }
                state.iteration += 1;
            }
        }

        state.add_log(
            self.name(),
            "review",
            format!("score {:.1}, next {}", state.quality_score, state.phase),
        );
        Ok(())
    }
}
