//! The Writer: drafts each outline section from the collected evidence,
//! synthesises the full report, and applies critic-driven revisions.

use crate::agent::{add_message, call_llm_json, truncate_chars, Agent};
use crate::error::Result;
use crate::event::{EventBus, EventKind};
use crate::phase::ResearchPhase;
use crate::state::{short_id, Reference, ResearchState, Section, SectionStatus};
use async_trait::async_trait;
use llm::{ChatClient, ChatOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SECTION_SYSTEM: &str =
    "You are a lead analyst at a top-tier research desk who writes deep industry reports.";

const SYNTHESIS_SYSTEM: &str =
    "You are a senior research editor who assembles and polishes final reports.";

const REVISION_SYSTEM: &str = "You are a senior editor revising a report to review feedback.";

/// The report-writing role.
pub struct Writer {
    chat: Arc<dyn ChatClient>,
}

impl Writer {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    async fn write_report(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        let running_step = json!({
            "step_id": short_id("step_writing"),
            "step_type": "writing",
            "title": "Content generation",
            "subtitle": "Writing the research report",
            "status": "running",
            "stats": {"sections_count": state.outline.len(), "word_count": 0},
        });
        add_message(state, bus, self.name(), EventKind::ResearchStep, running_step);
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": "Starting to write the research report..."}),
        );

        let sections: Vec<Section> = state
            .outline
            .iter()
            .filter(|s| !matches!(s.status, SectionStatus::Drafted | SectionStatus::Final))
            .cloned()
            .collect();

        for section in sections {
            self.write_section(state, bus, &section).await;
        }

        self.synthesize_report(state, bus).await;

        // Drafted sections are final once the report around them exists.
        for section in &mut state.outline {
            if section.status == SectionStatus::Drafted {
                section.status = SectionStatus::Final;
            }
        }

        let completed_step = json!({
            "step_type": "writing",
            "title": "Content generation",
            "subtitle": "Writing the research report",
            "status": "completed",
            "stats": {
                "sections_count": state.outline.len(),
                "word_count": state.final_report.chars().count(),
                "references_count": state.references.len(),
            },
        });
        add_message(state, bus, self.name(), EventKind::ResearchStep, completed_step);

        state.phase = ResearchPhase::Reviewing;
        Ok(())
    }

    async fn write_section(&self, state: &mut ResearchState, bus: &EventBus, section: &Section) {
        info!(section = %section.title, "writing section");

        add_message(
            state,
            bus,
            self.name(),
            EventKind::Action,
            json!({"tool": "writing_section", "section": section.title}),
        );

        // Facts tagged for the section, with a general fallback so a
        // sparsely-researched section still gets material.
        let mut related: Vec<&crate::state::Fact> = state
            .facts
            .iter()
            .filter(|f| f.related_sections.contains(&section.id))
            .collect();
        if related.is_empty() {
            related = state.facts.iter().take(10).collect();
        }

        let facts_text: Vec<String> = related
            .iter()
            .map(|f| {
                format!(
                    "- {} (source: {}, credibility: {:.2})",
                    f.content, f.source_name, f.credibility_score
                )
            })
            .collect();

        let data_text: Vec<String> = state
            .data_points
            .iter()
            .take(10)
            .map(|dp| {
                format!(
                    "- {}: {} {} ({})",
                    dp.name,
                    dp.value,
                    dp.unit,
                    dp.year.map_or("N/A".to_string(), |y| y.to_string())
                )
            })
            .collect();

        let insights_text: Vec<String> =
            state.insights.iter().take(5).map(|i| format!("- {}", i)).collect();

        let charts_text: Vec<String> = state
            .charts
            .iter()
            .filter(|c| c.section_id.as_deref() == Some(section.id.as_str()))
            .map(|c| format!("- chart: {} (ID: {})", c.title, c.id))
            .collect();

        let prompt = format!(
            r#"## Research topic
{query}

## Section
Title: {title}
Description: {description}
Type: {section_type:?}

## Material

### Related facts
{facts}

### Data points
{data}

### Insights
{insights}

### Charts
{charts}

## Requirements
1. Professional register with real industry vocabulary.
2. Clear argument structure; every key claim backed by a fact or number.
3. Citations as clickable links: [source name](URL).
4. Reference charts where they fit: ![chart title](chart_id).
5. 500-1000 words; do not repeat the section title in the body.
6. Write in the language of the research topic.

Output JSON:
{{
    "content": "section body in Markdown, without the section title",
    "key_points": ["core takeaways"],
    "citations": [{{"source": "source name", "url": "full URL"}}]
}}"#,
            query = state.query,
            title = section.title,
            description = section.description,
            section_type = section.section_type,
            facts = if facts_text.is_empty() { "(no facts collected)".to_string() } else { facts_text.join("\n") },
            data = if data_text.is_empty() { "(no data points)".to_string() } else { data_text.join("\n") },
            insights = if insights_text.is_empty() { "(no insights)".to_string() } else { insights_text.join("\n") },
            charts = if charts_text.is_empty() { "(no charts)".to_string() } else { charts_text.join("\n") },
        );

        let options = ChatOptions::default().with_temperature(0.4);
        let Some(value) =
            call_llm_json(self.chat.as_ref(), self.name(), SECTION_SYSTEM, &prompt, &options).await
        else {
            state.push_error(format!("Section draft failed: {}", section.title));
            return;
        };

        let Some(content) = value.get("content").and_then(Value::as_str).map(String::from) else {
            state.push_error(format!("Section draft had no content: {}", section.title));
            return;
        };

        for citation in value.get("citations").and_then(Value::as_array).into_iter().flatten() {
            let source = citation.get("source").and_then(Value::as_str).unwrap_or_default();
            let url = citation.get("url").and_then(Value::as_str).unwrap_or_default();
            if source.is_empty() && url.is_empty() {
                continue;
            }
            state.references.push(Reference {
                id: state.references.len() as u32 + 1,
                title: source.to_string(),
                url: url.to_string(),
                author: None,
                date: None,
            });
        }

        let key_points = value
            .get("key_points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        state.draft_sections.insert(section.id.clone(), content.clone());
        if let Some(entry) = state.outline.iter_mut().find(|s| s.id == section.id) {
            entry.status = SectionStatus::Drafted;
        }

        add_message(
            state,
            bus,
            self.name(),
            EventKind::SectionContent,
            json!({
                "section_id": section.id,
                "section_title": section.title,
                "content": content,
                "word_count": content.chars().count(),
                "key_points": key_points,
            }),
        );
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Observation,
            json!({"content": format!(
                "Section \"{}\" drafted ({} chars)",
                section.title,
                content.chars().count()
            )}),
        );
    }

    async fn synthesize_report(&self, state: &mut ResearchState, bus: &EventBus) {
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": "Assembling the sections into the full report..."}),
        );

        let mut sections_content = Vec::new();
        for section in &state.outline {
            if let Some(content) = state.draft_sections.get(&section.id) {
                sections_content.push(format!("## {}\n{}", section.title, content));
            }
        }

        let mut sources: Vec<String> = state
            .references
            .iter()
            .map(|r| format!("- {} ({})", r.title, r.url))
            .collect();
        for fact in &state.facts {
            let entry = format!("- {} ({})", fact.source_name, fact.source_url);
            if !sources.contains(&entry) {
                sources.push(entry);
            }
        }
        sources.truncate(30);

        let prompt = format!(
            r###"## Research topic
{query}

## Section drafts
{sections}

## Collected sources
{sources}

## Task
1. Write an executive summary (300-500 words).
2. Assemble the sections into one coherent report with numbered headings
   (1, 1.1, 1.1.1 style); no duplicate headings.
3. Write conclusions and an outlook.
4. Build the reference list with clickable links.

Structure: start with "## Executive summary" (no top-level # title), sections
as ## with numbered titles, subsections as ###, then "## Conclusions and
outlook", then "## References" as an ordered list of [title](URL) entries.
Write in the language of the research topic.

Output JSON:
{{
    "executive_summary": "the summary",
    "full_report": "the complete report in Markdown",
    "conclusions": ["core conclusion"],
    "references": [
        {{"id": 1, "title": "source title", "url": "URL", "author": "org", "date": "date"}}
    ]
}}"###,
            query = state.query,
            sections = if sections_content.is_empty() { "(no section drafts)".to_string() } else { sections_content.join("\n\n") },
            sources = if sources.is_empty() { "(no sources)".to_string() } else { sources.join("\n") },
        );

        let options = ChatOptions::default();
        let value =
            call_llm_json(self.chat.as_ref(), self.name(), SYNTHESIS_SYSTEM, &prompt, &options)
                .await;

        let mut executive_summary = String::new();
        let mut conclusions = Vec::new();

        match value.as_ref().and_then(|v| v.get("full_report")).and_then(Value::as_str) {
            Some(report) if !report.trim().is_empty() => {
                state.final_report = report.to_string();
                if let Some(value) = &value {
                    executive_summary = value
                        .get("executive_summary")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    conclusions = value
                        .get("conclusions")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();

                    for reference in
                        value.get("references").and_then(Value::as_array).into_iter().flatten()
                    {
                        let title =
                            reference.get("title").and_then(Value::as_str).unwrap_or_default();
                        let url = reference.get("url").and_then(Value::as_str).unwrap_or_default();
                        if title.is_empty() && url.is_empty() {
                            continue;
                        }
                        if state.references.iter().any(|r| r.url == url && r.title == title) {
                            continue;
                        }
                        state.references.push(Reference {
                            id: state.references.len() as u32 + 1,
                            title: title.to_string(),
                            url: url.to_string(),
                            author: reference
                                .get("author")
                                .and_then(Value::as_str)
                                .map(String::from),
                            date: reference.get("date").and_then(Value::as_str).map(String::from),
                        });
                    }
                }
                info!(len = state.final_report.chars().count(), "report synthesised");
            }
            _ => {
                // Synthesis failed: assemble the report from the drafts
                // so the run still delivers something reviewable.
                warn!("report synthesis failed, assembling from section drafts");
                let mut fallback = format!("# {} — research report\n\n", state.query);
                for section in &state.outline {
                    if let Some(content) = state.draft_sections.get(&section.id) {
                        fallback.push_str(&format!("## {}\n\n{}\n\n", section.title, content));
                    }
                }
                state.final_report = fallback;
                state.push_error("Report synthesis failed, used section-draft fallback");
            }
        }

        let draft_event = json!({
            "content": state.final_report,
            "executive_summary": executive_summary,
            "conclusions": conclusions,
            "word_count": state.final_report.chars().count(),
            "references_count": state.references.len(),
        });
        add_message(state, bus, self.name(), EventKind::ReportDraft, draft_event);
    }

    async fn revise_report(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": "Revising the report to address review feedback..."}),
        );

        let unresolved: Vec<String> = state
            .critic_feedback
            .iter()
            .filter(|f| !f.resolved)
            .map(|f| {
                format!(
                    "- [{}] ({:?}) {}\n  suggestion: {}",
                    f.id, f.severity, f.description, f.suggestion
                )
            })
            .collect();

        let new_info: Vec<String> = state
            .facts
            .iter()
            .rev()
            .take(5)
            .map(|f| format!("- {}", truncate_chars(&f.content, 200)))
            .collect();

        let prompt = format!(
            r#"## Current report
{report}

## Review feedback
{feedback}

## Newly collected information
{new_info}

## Task
Revise the report to resolve the feedback: targeted edits only, add sources
where they are missing, fix factual and logical errors, keep the overall
style. List the feedback ids you actually resolved.

Output JSON:
{{
    "revised_content": "the revised report in Markdown",
    "changes_made": ["change"],
    "addressed_issues": ["resolved feedback ids"],
    "unable_to_address": ["unresolvable feedback and why"]
}}"#,
            report = truncate_chars(&state.final_report, 6000),
            feedback = if unresolved.is_empty() { "(no specific feedback)".to_string() } else { unresolved.join("\n") },
            new_info = if new_info.is_empty() { "(none)".to_string() } else { new_info.join("\n") },
        );

        let options = ChatOptions::default();
        let value =
            call_llm_json(self.chat.as_ref(), self.name(), REVISION_SYSTEM, &prompt, &options)
                .await;

        if let Some(value) = value {
            if let Some(revised) = value.get("revised_content").and_then(Value::as_str) {
                if !revised.trim().is_empty() {
                    state.final_report = revised.to_string();
                }

                let addressed: Vec<String> = value
                    .get("addressed_issues")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();

                for feedback in &mut state.critic_feedback {
                    if addressed.contains(&feedback.id) {
                        feedback.resolved = true;
                    }
                }

                add_message(
                    state,
                    bus,
                    self.name(),
                    EventKind::RevisionComplete,
                    json!({
                        "changes_count": value
                            .get("changes_made")
                            .and_then(Value::as_array)
                            .map_or(0, Vec::len),
                        "addressed_issues": addressed,
                        "unable_to_address": value
                            .get("unable_to_address")
                            .cloned()
                            .unwrap_or(Value::Array(Vec::new())),
                    }),
                );
                state.add_log(self.name(), "revise", format!("{} issues addressed", addressed_count(state)));
            }
        } else {
            state.push_error("Revision produced no JSON; report unchanged");
        }

        state.phase = ResearchPhase::Reviewing;
        Ok(())
    }
}

fn addressed_count(state: &ResearchState) -> usize {
    state.critic_feedback.iter().filter(|f| f.resolved).count()
}

#[async_trait]
impl Agent for Writer {
    fn name(&self) -> &'static str {
        "Writer"
    }

    async fn process(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        match state.phase {
            ResearchPhase::Writing => self.write_report(state, bus).await,
            ResearchPhase::Revising => self.revise_report(state, bus).await,
            _ => Ok(()),
        }
    }
}
