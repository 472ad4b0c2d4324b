//! The Searcher: concurrent web research with deduplication, recursive
//! source tracing, and hypothesis scoring.
//!
//! Per section it fans searches out, streams incremental progress, has
//! the model extract structured facts/data/entities from the result set,
//! and — when the extraction surfaces follow-up or source-tracing
//! queries — launches a depth-bounded deep search. Section exploration
//! is pure I/O and runs concurrently; all state mutation happens in a
//! single merge pass afterwards, so the one-writer ownership rule holds.

use crate::agent::{
    add_message, call_llm_json, lenient_f64, lenient_year, non_null_string, string_list,
    truncate_chars, Agent,
};
use crate::error::Result;
use crate::event::{EventBus, EventKind};
use crate::phase::ResearchPhase;
use crate::state::{
    short_id, DataPoint, Fact, GraphEdge, GraphNode, HypothesisSupport, ResearchState, Section,
    SectionStatus, SourceType,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use llm::{ChatClient, ChatOptions};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use websearch::{SearchClient, SearchResult};

/// Sections researched concurrently per pass.
const MAX_CONCURRENT_SECTIONS: usize = 3;

/// Maximum recursion depth for deep searches.
const MAX_SEARCH_DEPTH: u32 = 2;

/// Deep-search queries taken per lead.
const DEEP_QUERIES_PER_LEAD: usize = 2;

/// Supplementary queries processed per re-research pass.
const MAX_SUPPLEMENTARY_QUERIES: usize = 5;

const ANALYSIS_SYSTEM: &str = "You are a professional research analyst who extracts structured \
information from search results, verifies hypotheses, and rates source quality.";

const DEEP_ANALYSIS_SYSTEM: &str = "You are a professional information verifier who extracts \
authoritative facts from search results and traces them to their original sources.";

const SUPPLEMENTARY_SYSTEM: &str = "You are a professional information extractor who pulls \
structured facts out of search results.";

/// Realtime quote for a listed company mentioned in the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockQuote {
    pub code: String,
    pub name: String,
    pub price: String,
    pub change_percent: String,
    #[serde(default)]
    pub high: String,
    #[serde(default)]
    pub low: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub open: String,
    #[serde(default)]
    pub prev_close: String,
}

/// Optional realtime-quote lookup. When wired, queries that mention a
/// listed company get live market data as extra data points.
#[async_trait]
pub trait QuoteClient: Send + Sync {
    /// Resolve the query to at most one quote; `None` when no listed
    /// company is recognised or the lookup fails.
    async fn lookup(&self, query: &str) -> Option<StockQuote>;
}

/// The deep-research role.
pub struct Searcher {
    chat: Arc<dyn ChatClient>,
    search: Arc<dyn SearchClient>,
    quotes: Option<Arc<dyn QuoteClient>>,
}

/// Compute a fact's dedup fingerprint: a hash over up to three numeric
/// tokens and up to five CJK keyword tokens of the content.
pub fn fact_fingerprint(content: &str) -> u64 {
    static NUMBERS: OnceLock<Regex> = OnceLock::new();
    static KEYWORDS: OnceLock<Regex> = OnceLock::new();

    let numbers = NUMBERS.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
    let keywords = KEYWORDS.get_or_init(|| Regex::new(r"[\u{4e00}-\u{9fa5}]{2,4}").unwrap());

    let number_part: Vec<&str> = numbers.find_iter(content).take(3).map(|m| m.as_str()).collect();
    let keyword_part: Vec<&str> = keywords.find_iter(content).take(5).map(|m| m.as_str()).collect();

    let mut hasher = DefaultHasher::new();
    number_part.join(",").hash(&mut hasher);
    "|".hash(&mut hasher);
    keyword_part.join(",").hash(&mut hasher);
    hasher.finish()
}

/// Facts extracted from one analysed batch of search results.
#[derive(Debug, Default, Clone)]
struct RawFact {
    content: String,
    source_name: String,
    source_url: String,
    source_type: SourceType,
    credibility_score: f64,
    data_points: Vec<RawDataPoint>,
    related_hypothesis: Option<String>,
    hypothesis_support: Option<HypothesisSupport>,
}

#[derive(Debug, Default, Clone)]
struct RawDataPoint {
    name: String,
    value: Value,
    unit: String,
    year: Option<i32>,
    source: String,
    confidence: f64,
}

#[derive(Debug, Default, Clone)]
struct RawEntity {
    name: String,
    entity_type: String,
    importance: u32,
    relations: Vec<(String, String)>,
}

#[derive(Debug, Default, Clone)]
struct RawEvidence {
    hypothesis_id: String,
    evidence_type: String,
    evidence_summary: String,
}

/// Everything one LLM extraction pass produced.
#[derive(Debug, Default, Clone)]
struct Analysis {
    facts: Vec<RawFact>,
    data_points: Vec<RawDataPoint>,
    entities: Vec<RawEntity>,
    evidence: Vec<RawEvidence>,
    insights: Vec<String>,
    follow_up_queries: Vec<String>,
    source_tracing_queries: Vec<String>,
    further_tracing_queries: Vec<String>,
    source_quality: String,
}

impl Analysis {
    fn from_value(value: &Value) -> Self {
        let facts = value
            .get("extracted_facts")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_fact).collect())
            .unwrap_or_default();

        let data_points = value
            .get("data_points")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_data_point).collect())
            .unwrap_or_default();

        let entities = value
            .get("entities_discovered")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_entity).collect())
            .unwrap_or_default();

        let evidence = value
            .get("hypothesis_evidence")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let obj = item.as_object()?;
                        Some(RawEvidence {
                            hypothesis_id: obj.get("hypothesis_id")?.as_str()?.to_string(),
                            evidence_type: obj
                                .get("evidence_type")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            evidence_summary: obj
                                .get("evidence_summary")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            facts,
            data_points,
            entities,
            evidence,
            insights: string_list(value.get("key_insights")),
            follow_up_queries: string_list(value.get("follow_up_queries")),
            source_tracing_queries: string_list(value.get("source_tracing_queries")),
            further_tracing_queries: string_list(value.get("further_tracing_queries")),
            source_quality: value
                .get("source_quality_assessment")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn parse_fact(value: &Value) -> Option<RawFact> {
    let obj = value.as_object()?;
    let content = obj.get("content").and_then(Value::as_str)?.trim().to_string();
    if content.is_empty() {
        return None;
    }

    let hypothesis_support = obj
        .get("hypothesis_support")
        .and_then(Value::as_str)
        .and_then(|s| match s {
            "supports" => Some(HypothesisSupport::Supports),
            "refutes" => Some(HypothesisSupport::Refutes),
            "neutral" => Some(HypothesisSupport::Neutral),
            _ => None,
        });

    Some(RawFact {
        content,
        source_name: obj
            .get("source_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        source_url: obj
            .get("source_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        source_type: parse_source_type(obj.get("source_type").and_then(Value::as_str)),
        credibility_score: lenient_f64(obj.get("credibility_score"), 0.5),
        data_points: obj
            .get("data_points")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_data_point).collect())
            .unwrap_or_default(),
        related_hypothesis: non_null_string(obj.get("related_hypothesis")),
        hypothesis_support,
    })
}

fn parse_data_point(value: &Value) -> Option<RawDataPoint> {
    let obj = value.as_object()?;
    let name = obj.get("name").and_then(Value::as_str)?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(RawDataPoint {
        name,
        value: obj.get("value").cloned().unwrap_or(Value::Null),
        unit: obj
            .get("unit")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        year: lenient_year(obj.get("year")),
        source: obj
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        confidence: lenient_f64(obj.get("confidence"), 0.7),
    })
}

fn parse_entity(value: &Value) -> Option<RawEntity> {
    let obj = value.as_object()?;
    let name = obj.get("name").and_then(Value::as_str)?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let relations = obj
        .get("relations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let rel = item.as_object()?;
                    Some((
                        rel.get("target").and_then(Value::as_str)?.to_string(),
                        rel.get("relation")
                            .and_then(Value::as_str)
                            .unwrap_or("related_to")
                            .to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(RawEntity {
        name,
        entity_type: obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        importance: obj.get("importance").and_then(Value::as_u64).unwrap_or(5) as u32,
        relations,
    })
}

fn parse_source_type(s: Option<&str>) -> SourceType {
    match s {
        Some("official") => SourceType::Official,
        Some("academic") => SourceType::Academic,
        Some("report") => SourceType::Report,
        Some("self_media") => SourceType::SelfMedia,
        _ => SourceType::News,
    }
}

/// One analysed batch at a given recursion depth.
struct Batch {
    depth: u32,
    analysis: Analysis,
}

/// Everything gathered for one section before the merge pass.
struct SectionHarvest {
    section_id: String,
    section_title: String,
    shown_results: Vec<SearchResult>,
    batches: Vec<Batch>,
}

impl Searcher {
    pub fn new(chat: Arc<dyn ChatClient>, search: Arc<dyn SearchClient>) -> Self {
        Self {
            chat,
            search,
            quotes: None,
        }
    }

    /// Attach a realtime-quote lookup.
    pub fn with_quotes(mut self, quotes: Arc<dyn QuoteClient>) -> Self {
        self.quotes = Some(quotes);
        self
    }

    async fn run_research(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        self.fetch_quote_if_relevant(state, bus).await;

        state.phase = ResearchPhase::Researching;

        let pending = state.pending_sections();
        if pending.is_empty() {
            info!("no pending sections to research");
            return Ok(());
        }

        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_id": short_id("step_searching"),
                "step_type": "searching",
                "title": "Information retrieval",
                "subtitle": "Deep web search",
                "status": "running",
                "stats": {"sections_count": pending.len(), "results_count": 0},
            }),
        );
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": format!("Starting deep search across {} pending sections...", pending.len())}),
        );

        // Exploration is pure I/O and runs concurrently; nothing below
        // touches the state until the merge pass.
        let allow_deep = state.iteration < state.max_iterations;
        let targets: Vec<Section> = pending.into_iter().take(MAX_CONCURRENT_SECTIONS).collect();
        let harvests = join_all(targets.iter().map(|section| {
            self.explore_section(
                state.query.clone(),
                section.clone(),
                state.hypotheses.iter().map(|h| (h.id.clone(), h.content.clone())).collect(),
                allow_deep,
                bus.clone(),
            )
        }))
        .await;

        let mut seen = seen_fingerprints(state);
        for harvest in harvests {
            self.merge_harvest(state, bus, harvest, &mut seen);
        }

        let results_count = state.facts.len();
        let sources_count = state
            .facts
            .iter()
            .map(|f| f.source_url.as_str())
            .collect::<HashSet<_>>()
            .len();
        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_type": "searching",
                "title": "Information retrieval",
                "subtitle": "Deep web search",
                "status": "completed",
                "stats": {
                    "results_count": results_count,
                    "sources_count": sources_count,
                },
            }),
        );

        self.emit_search_results_event(state, bus);
        Ok(())
    }

    /// Explore one section: search every query, stream progress, run the
    /// extraction, and chase leads depth-first up to the bound. Returns
    /// the harvest; state mutation happens later.
    async fn explore_section(
        &self,
        query: String,
        section: Section,
        hypotheses: Vec<(String, String)>,
        allow_deep: bool,
        bus: EventBus,
    ) -> SectionHarvest {
        let search_queries = if section.search_queries.is_empty() {
            vec![section.title.clone()]
        } else {
            section.search_queries.clone()
        };

        bus.emit(
            self.name(),
            EventKind::Action,
            json!({
                "tool": "parallel_search",
                "section": section.title,
                "queries": search_queries,
            }),
        );

        let mut all_results: Vec<SearchResult> = Vec::new();
        for (i, search_query) in search_queries.iter().enumerate() {
            let results = self
                .search
                .search(search_query, 10)
                .await
                .unwrap_or_default();

            if results.is_empty() {
                continue;
            }

            all_results.extend(results.iter().cloned());
            bus.emit(
                self.name(),
                EventKind::SearchProgress,
                json!({
                    "query": search_query,
                    "results_count": results.len(),
                    "total_so_far": all_results.len(),
                    "section": section.title,
                    "progress": format!("{}/{}", i + 1, search_queries.len()),
                }),
            );
            bus.emit(
                self.name(),
                EventKind::SearchResults,
                json!({
                    "results": results_for_ui(&results, 5),
                    "isIncremental": true,
                }),
            );
        }

        let mut harvest = SectionHarvest {
            section_id: section.id.clone(),
            section_title: section.title.clone(),
            shown_results: all_results.iter().take(10).cloned().collect(),
            batches: Vec::new(),
        };

        if all_results.is_empty() {
            warn!(section = %section.title, "no search results for section");
            return harvest;
        }

        bus.emit(
            self.name(),
            EventKind::Thought,
            json!({"content": format!(
                "Search done with {} results, extracting key information...",
                all_results.len()
            )}),
        );

        let Some(analysis) = self
            .analyze_search_results(&query, &section, &all_results, &hypotheses)
            .await
        else {
            return harvest;
        };

        // Chase source-tracing leads first (they point at primary
        // sources), then follow-ups, both depth-bounded.
        if allow_deep {
            let mut lead_queue: VecDeque<(u32, String, &'static str)> = VecDeque::new();
            for lead in analysis.source_tracing_queries.iter().take(DEEP_QUERIES_PER_LEAD) {
                lead_queue.push_back((1, lead.clone(), "source_tracing"));
            }
            for lead in analysis.follow_up_queries.iter().take(DEEP_QUERIES_PER_LEAD) {
                lead_queue.push_back((1, lead.clone(), "follow_up"));
            }

            if !lead_queue.is_empty() {
                let preview: Vec<&str> =
                    lead_queue.iter().take(2).map(|(_, q, _)| q.as_str()).collect();
                bus.emit(
                    self.name(),
                    EventKind::Thought,
                    json!({"content": format!("Tracing leads: {}", preview.join(", "))}),
                );
            }

            while let Some((depth, lead, kind)) = lead_queue.pop_front() {
                if depth > MAX_SEARCH_DEPTH {
                    continue;
                }

                bus.emit(
                    self.name(),
                    EventKind::Action,
                    json!({"tool": format!("deep_search_{}", kind), "query": lead, "depth": depth}),
                );

                let results = self.search.search(&lead, 6).await.unwrap_or_default();
                if results.is_empty() {
                    continue;
                }

                bus.emit(
                    self.name(),
                    EventKind::SearchResults,
                    json!({
                        "results": results_for_ui(&results, 5),
                        "isIncremental": true,
                        "searchType": kind,
                        "depth": depth,
                    }),
                );

                let Some(deep) = self
                    .analyze_deep_results(&query, &lead, &results, kind, &hypotheses)
                    .await
                else {
                    continue;
                };

                if depth < MAX_SEARCH_DEPTH {
                    for next in deep.further_tracing_queries.iter().take(DEEP_QUERIES_PER_LEAD) {
                        lead_queue.push_back((depth + 1, next.clone(), kind));
                    }
                }

                debug!(lead = %lead, depth, facts = deep.facts.len(), "deep search batch collected");
                harvest.batches.push(Batch { depth, analysis: deep });
            }
        }

        harvest.batches.insert(0, Batch { depth: 0, analysis });
        harvest
    }

    /// Merge one section's harvest into the state: dedup facts, collect
    /// data points, grow the knowledge graph, score hypotheses, and emit
    /// the section observation.
    fn merge_harvest(
        &self,
        state: &mut ResearchState,
        bus: &EventBus,
        harvest: SectionHarvest,
        seen: &mut HashSet<(u64, String)>,
    ) {
        let mut added_facts = 0usize;
        let mut duplicate_facts = 0usize;
        let mut added_data_points = 0usize;
        let mut added_entities = 0usize;
        let mut evidence_updates = 0usize;
        let mut observation_facts: Vec<Value> = Vec::new();
        let mut observation_data: Vec<Value> = Vec::new();
        let mut source_quality = String::new();
        let mut insights_preview: Vec<String> = Vec::new();

        for batch in &harvest.batches {
            let analysis = &batch.analysis;

            for raw in &analysis.facts {
                let key = (fact_fingerprint(&raw.content), raw.source_url.clone());
                if seen.contains(&key) {
                    duplicate_facts += 1;
                    debug!(content = %truncate_chars(&raw.content, 50), "duplicate fact dropped");
                    continue;
                }
                seen.insert(key);

                // Referential integrity: a fact may only point at a
                // hypothesis that exists.
                let related_hypothesis = raw
                    .related_hypothesis
                    .clone()
                    .filter(|id| state.has_hypothesis(id));

                if let (Some(h_id), Some(support)) = (&related_hypothesis, raw.hypothesis_support) {
                    let summary = truncate_chars(&raw.content, 100);
                    if let Some(hypothesis) = state.hypothesis_mut(h_id) {
                        match support {
                            HypothesisSupport::Supports => hypothesis.evidence_for.push(summary),
                            HypothesisSupport::Refutes => hypothesis.evidence_against.push(summary),
                            HypothesisSupport::Neutral => {}
                        }
                        hypothesis.reassess();
                        evidence_updates += 1;
                    }
                }

                for dp in &raw.data_points {
                    observation_data.push(json!({
                        "name": dp.name, "value": dp.value, "unit": dp.unit, "year": dp.year,
                        "source": raw.source_name,
                    }));
                    state.data_points.push(DataPoint {
                        id: short_id("dp"),
                        name: dp.name.clone(),
                        value: dp.value.clone(),
                        unit: dp.unit.clone(),
                        year: dp.year,
                        source: if dp.source.is_empty() {
                            raw.source_name.clone()
                        } else {
                            dp.source.clone()
                        },
                        confidence: raw.credibility_score,
                        search_depth: (batch.depth > 0).then_some(batch.depth),
                    });
                    added_data_points += 1;
                }

                if observation_facts.len() < 8 {
                    observation_facts.push(json!({
                        "content": raw.content,
                        "source_name": raw.source_name,
                        "source_url": raw.source_url,
                        "credibility": raw.credibility_score,
                    }));
                }

                state.facts.push(Fact {
                    id: short_id("fact"),
                    content: raw.content.clone(),
                    source_url: raw.source_url.clone(),
                    source_name: raw.source_name.clone(),
                    source_type: raw.source_type,
                    credibility_score: raw.credibility_score,
                    extracted_at: Utc::now().to_rfc3339(),
                    related_sections: vec![harvest.section_id.clone()],
                    verified: false,
                    related_hypothesis,
                    hypothesis_support: raw.hypothesis_support,
                    search_depth: (batch.depth > 0).then_some(batch.depth),
                    is_supplementary: false,
                });
                added_facts += 1;
            }

            // Batch-level data points from deep extractions.
            for dp in &analysis.data_points {
                state.data_points.push(DataPoint {
                    id: short_id("dp"),
                    name: dp.name.clone(),
                    value: dp.value.clone(),
                    unit: dp.unit.clone(),
                    year: dp.year,
                    source: dp.source.clone(),
                    confidence: dp.confidence,
                    search_depth: (batch.depth > 0).then_some(batch.depth),
                });
                added_data_points += 1;
            }

            if !analysis.entities.is_empty() {
                let (nodes, edges) = graph_updates(&analysis.entities);
                added_entities += nodes.len();
                state.knowledge_graph.merge(nodes, edges);
            }

            for ev in &analysis.evidence {
                if let Some(hypothesis) = state.hypothesis_mut(&ev.hypothesis_id) {
                    match ev.evidence_type.as_str() {
                        "supports" => hypothesis.evidence_for.push(ev.evidence_summary.clone()),
                        "refutes" => hypothesis.evidence_against.push(ev.evidence_summary.clone()),
                        _ => {}
                    }
                    hypothesis.reassess();
                    evidence_updates += 1;
                }
            }

            for insight in &analysis.insights {
                if !state.insights.contains(insight) {
                    if insights_preview.len() < 3 {
                        insights_preview.push(insight.clone());
                    }
                    state.insights.push(insight.clone());
                }
            }

            if source_quality.is_empty() {
                source_quality = analysis.source_quality.clone();
            }
        }

        if added_entities > 0 {
            let graph_event = json!({
                "graph": state.knowledge_graph,
                "stats": {
                    "entitiesCount": state.knowledge_graph.nodes.len(),
                    "relationsCount": state.knowledge_graph.edges.len(),
                },
                "isIncremental": true,
            });
            add_message(state, bus, self.name(), EventKind::KnowledgeGraph, graph_event);
        }

        if duplicate_facts > 0 {
            info!(duplicate_facts, added_facts, section = %harvest.section_title, "facts deduplicated");
        }

        let shown = harvest
            .shown_results
            .iter()
            .map(|r| {
                json!({
                    "title": r.title, "url": r.url, "source": r.site_name,
                    "snippet": r.body(), "date": r.date,
                })
            })
            .collect::<Vec<_>>();

        add_message(
            state,
            bus,
            self.name(),
            EventKind::Observation,
            json!({
                "section": harvest.section_title,
                "facts_count": added_facts,
                "duplicates_removed": duplicate_facts,
                "data_points_count": added_data_points,
                "insights": insights_preview,
                "source_quality": source_quality,
                "hypothesis_updates": evidence_updates,
                "search_results": shown,
                "extracted_facts": observation_facts,
                "data_points": observation_data.into_iter().take(10).collect::<Vec<_>>(),
            }),
        );

        if let Some(section) = state.outline.iter_mut().find(|s| s.id == harvest.section_id) {
            section.status = SectionStatus::Researching;
        }
        state.add_log(
            self.name(),
            "research_section",
            format!("{}: +{} facts", harvest.section_title, added_facts),
        );
    }

    /// Re-research pass: drain the queries the critic asked for and tag
    /// the new facts as supplementary.
    async fn supplementary_research(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        let queries: Vec<String> = state
            .pending_search_queries
            .iter()
            .take(MAX_SUPPLEMENTARY_QUERIES)
            .cloned()
            .collect();

        if queries.is_empty() {
            info!("no pending search queries for supplementary research");
            state.phase = ResearchPhase::Writing;
            return Ok(());
        }

        info!(count = queries.len(), "starting supplementary research");

        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_id": short_id("step_supplementary"),
                "step_type": "searching",
                "title": "Supplementary search",
                "subtitle": "Targeted gap filling",
                "status": "running",
                "stats": {"queries_count": queries.len(), "results_count": 0},
            }),
        );
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": format!(
                "Review feedback requested {} supplementary searches...",
                queries.len()
            )}),
        );

        let initial_count = state.facts.len();
        let mut seen = seen_fingerprints(state);

        for search_query in &queries {
            add_message(
                state,
                bus,
                self.name(),
                EventKind::Action,
                json!({"tool": "supplementary_search", "query": search_query}),
            );

            let results = self.search.search(search_query, 8).await.unwrap_or_default();
            if results.is_empty() {
                continue;
            }

            let Some(analysis) = self
                .analyze_supplementary_results(&state.query, search_query, &results)
                .await
            else {
                continue;
            };

            for raw in &analysis.facts {
                let key = (fact_fingerprint(&raw.content), raw.source_url.clone());
                if seen.contains(&key) {
                    continue;
                }
                seen.insert(key);

                state.facts.push(Fact {
                    id: short_id("fact"),
                    content: raw.content.clone(),
                    source_url: raw.source_url.clone(),
                    source_name: raw.source_name.clone(),
                    source_type: raw.source_type,
                    credibility_score: raw.credibility_score,
                    extracted_at: Utc::now().to_rfc3339(),
                    related_sections: Vec::new(),
                    verified: false,
                    related_hypothesis: None,
                    hypothesis_support: None,
                    search_depth: None,
                    is_supplementary: true,
                });
            }
        }

        state.pending_search_queries.clear();

        let new_facts = state.facts.len() - initial_count;
        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_type": "searching",
                "title": "Supplementary search",
                "subtitle": "Targeted gap filling",
                "status": "completed",
                "stats": {"results_count": new_facts},
            }),
        );
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Observation,
            json!({"content": format!("Supplementary search added {} facts", new_facts)}),
        );

        self.emit_search_results_event(state, bus);
        state.add_log(self.name(), "supplementary_research", format!("+{} facts", new_facts));

        state.phase = ResearchPhase::Writing;
        Ok(())
    }

    async fn fetch_quote_if_relevant(&self, state: &mut ResearchState, bus: &EventBus) {
        let Some(quotes) = &self.quotes else { return };
        let Some(quote) = quotes.lookup(&state.query).await else {
            return;
        };

        info!(code = %quote.code, name = %quote.name, "realtime quote attached");

        for (suffix, value, unit) in [
            ("current price", Value::String(quote.price.clone()), "CNY"),
            ("change percent", Value::String(quote.change_percent.clone()), "%"),
            ("volume", Value::String(quote.volume.clone()), "lots"),
        ] {
            state.data_points.push(DataPoint {
                id: short_id("dp"),
                name: format!("{} {}", quote.name, suffix),
                value,
                unit: unit.to_string(),
                year: None,
                source: "realtime quote service".to_string(),
                confidence: 0.99,
                search_depth: None,
            });
        }

        let payload = serde_json::to_value(&quote).unwrap_or(Value::Null);
        add_message(state, bus, self.name(), EventKind::StockQuote, payload);
        add_message(
            state,
            bus,
            self.name(),
            EventKind::Thought,
            json!({"content": format!(
                "Fetched realtime quote for {}: {} ({})",
                quote.name, quote.price, quote.change_percent
            )}),
        );
    }

    fn emit_search_results_event(&self, state: &mut ResearchState, bus: &EventBus) {
        let results: Vec<Value> = state
            .facts
            .iter()
            .rev()
            .take(20)
            .map(|fact| {
                json!({
                    "id": fact.id,
                    "title": truncate_chars(&fact.content, 80),
                    "source": fact.source_name,
                    "url": fact.source_url,
                    "snippet": truncate_chars(&fact.content, 200),
                    "isSupplementary": fact.is_supplementary,
                })
            })
            .collect();

        if !results.is_empty() {
            add_message(
                state,
                bus,
                self.name(),
                EventKind::SearchResults,
                json!({"results": results}),
            );
        }
    }

    async fn analyze_search_results(
        &self,
        query: &str,
        section: &Section,
        results: &[SearchResult],
        hypotheses: &[(String, String)],
    ) -> Option<Analysis> {
        let formatted = format_results(results, 15, 300);
        let hypotheses_text = if hypotheses.is_empty() {
            "No specific hypotheses.".to_string()
        } else {
            hypotheses
                .iter()
                .map(|(id, content)| format!("- [{}] {}", id, content))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            r#"## Research question
{query}

## Current section
Title: {title}
Description: {description}

## Research hypotheses (look for supporting or refuting evidence)
{hypotheses_text}

## Search results
{formatted}

## Task
1. Extract structured facts from the search results (specific, verifiable).
2. Find evidence that supports or refutes the hypotheses.
3. When an article cites a data source ("according to the National Bureau of
   Statistics..."), produce a source-tracing query for the original data.

Output JSON:
{{
    "extracted_facts": [
        {{
            "content": "the extracted fact",
            "source_name": "source name",
            "source_url": "source URL",
            "source_type": "official/academic/news/report/self_media",
            "credibility_score": 0.0,
            "data_points": [
                {{"name": "metric", "value": 0, "unit": "unit", "year": 2024}}
            ],
            "related_hypothesis": "h_1 or null",
            "hypothesis_support": "supports/refutes/neutral"
        }}
    ],
    "hypothesis_evidence": [
        {{"hypothesis_id": "h_1", "evidence_type": "supports/refutes/inconclusive",
          "evidence_summary": "evidence summary"}}
    ],
    "entities_discovered": [
        {{"name": "entity", "type": "company/person/policy/technology", "importance": 5,
          "relations": [{{"target": "other entity", "relation": "short relation"}}]}}
    ],
    "key_insights": ["insight drawn from these results"],
    "follow_up_queries": ["keywords worth a further search"],
    "source_tracing_queries": ["queries tracing cited primary sources"],
    "source_quality_assessment": "overall source quality"
}}

Credibility guide: official 0.9-1.0, academic 0.8-0.95, major media 0.7-0.85,
industry reports 0.7-0.9, general news 0.5-0.7, self-media 0.2-0.5."#,
            query = query,
            title = section.title,
            description = section.description,
            hypotheses_text = hypotheses_text,
            formatted = formatted,
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let value =
            call_llm_json(self.chat.as_ref(), self.name(), ANALYSIS_SYSTEM, &prompt, &options)
                .await?;
        Some(Analysis::from_value(&value))
    }

    async fn analyze_deep_results(
        &self,
        query: &str,
        lead: &str,
        results: &[SearchResult],
        kind: &str,
        hypotheses: &[(String, String)],
    ) -> Option<Analysis> {
        let formatted = format_results(results, 6, 300);
        let task = if kind == "source_tracing" {
            "tracing cited data back to its original authoritative source"
        } else {
            "following up a promising lead"
        };

        let hypotheses_text = hypotheses
            .iter()
            .take(3)
            .map(|(id, content)| format!("- [{}] {}", id, content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"You are {task}.

## Original research question
{query}

## Current search query
{lead}

## Research hypotheses
{hypotheses_text}

## Search results
{formatted}

## Task
1. Extract key facts and data, prioritising official and authoritative sources.
2. When these results cite further authoritative sources, produce follow-up
   tracing queries.

Output JSON:
{{
    "extracted_facts": [
        {{"content": "the extracted fact", "source_name": "source",
          "source_url": "URL", "source_type": "official/academic/news/report",
          "credibility_score": 0.0, "related_hypothesis": "h_1 or null",
          "hypothesis_support": "supports/refutes/neutral"}}
    ],
    "data_points": [
        {{"name": "metric", "value": 0, "unit": "unit", "year": 2024, "source": "source"}}
    ],
    "further_tracing_queries": ["deeper tracing queries, if any"],
    "source_quality_assessment": "reliability of these sources"
}}"#,
            task = task,
            query = query,
            lead = lead,
            hypotheses_text = hypotheses_text,
            formatted = formatted,
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let value = call_llm_json(
            self.chat.as_ref(),
            self.name(),
            DEEP_ANALYSIS_SYSTEM,
            &prompt,
            &options,
        )
        .await?;
        Some(Analysis::from_value(&value))
    }

    async fn analyze_supplementary_results(
        &self,
        original_query: &str,
        search_query: &str,
        results: &[SearchResult],
    ) -> Option<Analysis> {
        let formatted = format_results(results, 8, 300);

        let prompt = format!(
            r#"A review pass found information gaps; this search fills them.

## Original research question
{original_query}

## Supplementary search query
{search_query}

## Search results
{formatted}

## Task
Extract the key facts and data directly relevant to "{search_query}".

Output JSON:
{{
    "extracted_facts": [
        {{"content": "the extracted fact", "source_name": "source",
          "source_url": "URL", "source_type": "official/academic/news/report",
          "credibility_score": 0.0,
          "data_points": [{{"name": "metric", "value": 0, "unit": "unit"}}]}}
    ],
    "key_insights": ["key finding of this supplementary search"]
}}"#,
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let value = call_llm_json(
            self.chat.as_ref(),
            self.name(),
            SUPPLEMENTARY_SYSTEM,
            &prompt,
            &options,
        )
        .await?;
        Some(Analysis::from_value(&value))
    }
}

#[async_trait]
impl Agent for Searcher {
    fn name(&self) -> &'static str {
        "Searcher"
    }

    async fn process(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        match state.phase {
            ResearchPhase::ReResearching => self.supplementary_research(state, bus).await,
            ResearchPhase::Planning | ResearchPhase::Researching => {
                self.run_research(state, bus).await
            }
            _ => Ok(()),
        }
    }
}

/// Fingerprint/URL pairs for every fact already in the state.
fn seen_fingerprints(state: &ResearchState) -> HashSet<(u64, String)> {
    state
        .facts
        .iter()
        .map(|f| (fact_fingerprint(&f.content), f.source_url.clone()))
        .collect()
}

fn graph_updates(entities: &[RawEntity]) -> (Vec<GraphNode>, Vec<GraphEdge>) {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for entity in entities {
        nodes.push(GraphNode {
            id: short_id("node"),
            name: entity.name.clone(),
            node_type: entity.entity_type.clone(),
            importance: entity.importance.min(10),
        });
        for (target, relation) in &entity.relations {
            edges.push(GraphEdge {
                source: entity.name.clone(),
                target: target.clone(),
                relation: relation.clone(),
            });
        }
    }
    (nodes, edges)
}

fn results_for_ui(results: &[SearchResult], limit: usize) -> Vec<Value> {
    results
        .iter()
        .take(limit)
        .map(|r| {
            json!({
                "id": short_id("sr"),
                "title": truncate_chars(&r.title, 80),
                "source": r.site_name,
                "url": r.url,
                "snippet": r.body(),
                "date": r.date,
            })
        })
        .collect()
}

fn format_results(results: &[SearchResult], limit: usize, body_chars: usize) -> String {
    results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[{}] {}\nURL: {}\nSource: {}\nDate: {}\nSummary: {}\n",
                i + 1,
                r.title,
                r.url,
                r.site_name,
                r.date,
                truncate_chars(r.body(), body_chars),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_tokens() {
        // Same numeric and CJK token runs, different latin filler and
        // punctuation: same print.
        let a = fact_fingerprint("2024年销量 1200万辆, up 增长35.5%");
        let b = fact_fingerprint("2024 [年销量] 1200 (万辆) !! 增长 35.5");
        assert_eq!(a, b);

        // Different numbers: different print.
        let c = fact_fingerprint("2023年销量 950万辆, up 增长35.5%");
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_caps_tokens() {
        // Only the first 3 numbers and 5 keywords participate, so extra
        // trailing tokens do not change the print.
        let a = fact_fingerprint("1 2 3 市场 规模 增长 出口 电池 4 5 6 后缀词");
        let b = fact_fingerprint("1 2 3 市场 规模 增长 出口 电池 7 8 9 其他尾巴");
        assert_eq!(a, b);
    }

    #[test]
    fn test_analysis_from_value_lenient() {
        let value = json!({
            "extracted_facts": [
                {"content": "sales hit 12M units", "source_name": "NBS",
                 "source_url": "https://stats.example", "source_type": "official",
                 "credibility_score": "0.95",
                 "data_points": [{"name": "sales", "value": 1200, "unit": "万辆", "year": "2024"}],
                 "related_hypothesis": "null", "hypothesis_support": "supports"},
                {"no_content": true},
            ],
            "hypothesis_evidence": [
                {"hypothesis_id": "h_1", "evidence_type": "supports", "evidence_summary": "s"}
            ],
            "entities_discovered": [
                {"name": "BYD", "type": "company", "importance": 9,
                 "relations": [{"target": "EV market", "relation": "leads"}]}
            ],
            "key_insights": "a single string insight",
            "follow_up_queries": ["battery exports 2024"],
            "source_tracing_queries": [],
            "source_quality_assessment": "good"
        });

        let analysis = Analysis::from_value(&value);
        assert_eq!(analysis.facts.len(), 1);
        assert_eq!(analysis.facts[0].credibility_score, 0.95);
        assert_eq!(analysis.facts[0].data_points[0].year, Some(2024));
        assert!(analysis.facts[0].related_hypothesis.is_none());
        assert_eq!(analysis.entities.len(), 1);
        assert_eq!(analysis.entities[0].relations[0].0, "EV market");
        assert_eq!(analysis.insights, vec!["a single string insight"]);
        assert_eq!(analysis.follow_up_queries.len(), 1);
    }

    #[test]
    fn test_parse_source_type() {
        assert_eq!(parse_source_type(Some("official")), SourceType::Official);
        assert_eq!(parse_source_type(Some("self_media")), SourceType::SelfMedia);
        assert_eq!(parse_source_type(Some("whatever")), SourceType::News);
        assert_eq!(parse_source_type(None), SourceType::News);
    }

    #[test]
    fn test_graph_updates_from_entities() {
        let entities = vec![RawEntity {
            name: "CATL".into(),
            entity_type: "company".into(),
            importance: 23,
            relations: vec![("BYD".into(), "supplies".into())],
        }];
        let (nodes, edges) = graph_updates(&entities);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].importance, 10);
        assert_eq!(edges[0].key(), "CATL→BYD:supplies");
    }

    #[test]
    fn test_format_results_truncates() {
        let results = vec![SearchResult {
            url: "https://a.example".into(),
            title: "很长的标题".into(),
            summary: "中文".repeat(400),
            snippet: String::new(),
            site_name: "示例网".into(),
            date: "2024-06-01".into(),
        }];
        let formatted = format_results(&results, 15, 300);
        assert!(formatted.contains("[1] 很长的标题"));
        assert!(formatted.chars().count() < 500);
    }
}
