//! The Analyst: structured data extraction, knowledge-graph building,
//! chart configs, and sandboxed statistical analysis.
//!
//! Two coupled passes. The extractor asks the model for data points,
//! time series, distributions, entities, and insights from the collected
//! facts, and turns them into ECharts-style chart configs. The sandbox
//! pass kicks in once enough data points exist: it generates Python
//! analysis code, runs it in the constrained sandbox, and self-heals
//! failed code by feeding the error back to the model (three rounds at
//! most).

use crate::agent::{add_message, call_llm_json, lenient_f64, lenient_year, string_list, Agent};
use crate::error::Result;
use crate::event::{EventBus, EventKind};
use crate::sandbox::CodeRunner;
use crate::state::{short_id, Chart, CodeExecution, DataPoint, GraphEdge, GraphNode, ResearchState};
use async_trait::async_trait;
use chrono::Utc;
use llm::{ChatClient, ChatOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Self-correction rounds for failed analysis code.
const MAX_CODE_RETRIES: u32 = 3;

/// Data points required before the sandbox pass runs.
const MIN_DATA_POINTS_FOR_CODE: usize = 3;

/// Chart-bearing sections rendered per run.
const MAX_SECTION_CHARTS: usize = 2;

const EXTRACTION_SYSTEM: &str =
    "You are a professional data analyst who extracts structured data from text. Output JSON.";

const GRAPH_SYSTEM: &str =
    "You are a knowledge-graph expert who extracts entities and relations from text. Output JSON.";

const CHART_CONFIG_SYSTEM: &str =
    "You are a data-visualization expert who produces ECharts chart configurations. Output JSON.";

const CODE_SYSTEM: &str =
    "You are a professional data analyst fluent in Python data processing and visualization.";

const CODE_FIX_SYSTEM: &str =
    "You are a Python debugging expert who analyses errors and repairs code.";

/// The data-analysis role.
pub struct Analyst {
    chat: Arc<dyn ChatClient>,
    runner: Arc<dyn CodeRunner>,
}

#[derive(Debug, Default)]
struct ExtractedData {
    data_points: usize,
    time_series: Vec<Value>,
    distributions: Vec<Value>,
}

impl Analyst {
    pub fn new(chat: Arc<dyn ChatClient>, runner: Arc<dyn CodeRunner>) -> Self {
        Self { chat, runner }
    }

    async fn extract_structured_data(&self, state: &mut ResearchState) -> ExtractedData {
        let facts_text: Vec<String> = state
            .facts
            .iter()
            .take(20)
            .map(|f| format!("- {} (source: {})", f.content, f.source_name))
            .collect();

        if facts_text.is_empty() {
            info!("no facts to extract data from");
            return ExtractedData::default();
        }

        let prompt = format!(
            r#"## Research question
{query}

## Search findings
{facts}

## Task
Extract every quantifiable data point from the findings: market sizes,
growth rates, market shares, rankings, and time series of the same metric
across years.

Output JSON:
{{
    "data_points": [
        {{"name": "metric name", "value": 5000, "unit": "unit", "year": 2024,
          "source": "source", "confidence": 0.9}}
    ],
    "time_series": [
        {{"metric": "metric name", "unit": "unit", "source": "source",
          "data": [{{"year": 2020, "value": 3200}}]}}
    ],
    "distributions": [
        {{"name": "share by segment", "year": 2024, "source": "source",
          "data": [{{"category": "segment", "value": 32, "unit": "%"}}]}}
    ],
    "insights": ["short data-backed insight"]
}}

Only extract data with a clear source. Return empty arrays when nothing
qualifies."#,
            query = state.query,
            facts = facts_text.join("\n"),
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let Some(value) =
            call_llm_json(self.chat.as_ref(), self.name(), EXTRACTION_SYSTEM, &prompt, &options)
                .await
        else {
            state.push_error("Analyst data extraction produced no JSON");
            return ExtractedData::default();
        };

        let mut added = 0usize;
        if let Some(points) = value.get("data_points").and_then(Value::as_array) {
            for point in points {
                let Some(obj) = point.as_object() else { continue };
                let Some(name) = obj.get("name").and_then(Value::as_str) else { continue };
                state.data_points.push(DataPoint {
                    id: short_id("dp"),
                    name: name.to_string(),
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
                    search_depth: None,
                });
                added += 1;
            }
        }

        for insight in string_list(value.get("insights")) {
            if !state.insights.contains(&insight) {
                state.insights.push(insight);
            }
        }

        let extracted = ExtractedData {
            data_points: added,
            time_series: value
                .get("time_series")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            distributions: value
                .get("distributions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        };

        info!(
            data_points = extracted.data_points,
            time_series = extracted.time_series.len(),
            "structured data extracted"
        );
        extracted
    }

    async fn build_knowledge_graph(&self, state: &mut ResearchState, bus: &EventBus) {
        let content: Vec<String> = state
            .facts
            .iter()
            .take(15)
            .map(|f| f.content.clone())
            .collect();

        if content.is_empty() {
            info!("no content for knowledge graph");
            return;
        }

        let prompt = format!(
            r#"## Research question
{query}

## Text
{content}

## Task
Extract the 5-15 most important entities and their relations.

Entity types: core (core concept), tech, company, policy, product, person.

Output JSON:
{{
    "nodes": [
        {{"id": "short_id", "name": "entity name", "type": "company", "importance": 8}}
    ],
    "edges": [
        {{"source": "entity name", "target": "entity name", "relation": "short relation"}}
    ]
}}

importance is 1-10; core concepts score highest; relations are 1-3 words."#,
            query = state.query,
            content = content.join("\n"),
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let Some(value) =
            call_llm_json(self.chat.as_ref(), self.name(), GRAPH_SYSTEM, &prompt, &options).await
        else {
            return;
        };

        let nodes: Vec<GraphNode> = value
            .get("nodes")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let obj = item.as_object()?;
                        Some(GraphNode {
                            id: obj
                                .get("id")
                                .and_then(Value::as_str)
                                .map(String::from)
                                .unwrap_or_else(|| short_id("node")),
                            name: obj.get("name").and_then(Value::as_str)?.to_string(),
                            node_type: obj
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string(),
                            importance: obj.get("importance").and_then(Value::as_u64).unwrap_or(5)
                                as u32,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let edges: Vec<GraphEdge> = value
            .get("edges")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let obj = item.as_object()?;
                        Some(GraphEdge {
                            source: obj.get("source").and_then(Value::as_str)?.to_string(),
                            target: obj.get("target").and_then(Value::as_str)?.to_string(),
                            relation: obj
                                .get("relation")
                                .and_then(Value::as_str)
                                .unwrap_or("related_to")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if nodes.is_empty() && edges.is_empty() {
            return;
        }

        state.knowledge_graph.merge(nodes, edges);
        info!(
            nodes = state.knowledge_graph.nodes.len(),
            edges = state.knowledge_graph.edges.len(),
            "knowledge graph updated"
        );

        let graph_event = json!({
            "graph": state.knowledge_graph,
            "stats": {
                "entities_count": state.knowledge_graph.nodes.len(),
                "relations_count": state.knowledge_graph.edges.len(),
            },
        });
        add_message(state, bus, self.name(), EventKind::KnowledgeGraph, graph_event);
    }

    async fn generate_chart_configs(
        &self,
        state: &mut ResearchState,
        bus: &EventBus,
        extracted: &ExtractedData,
    ) {
        let total = extracted.data_points + extracted.time_series.len() + extracted.distributions.len();
        if total == 0 && state.data_points.is_empty() {
            info!("no data available for charts");
            return;
        }

        let data = json!({
            "time_series": extracted.time_series,
            "distributions": extracted.distributions,
            "data_points": state.data_points.iter().take(10).collect::<Vec<_>>(),
        });

        let prompt = format!(
            r#"## Research question
{query}

## Available data
{data}

## Task
Produce ECharts configurations for the charts that best express this data.

Chart-type guide: time series → line, categorical comparison → bar, share
breakdown → pie, progress/percentage → horizontal bar.

Style: primary color #1677ff, accents #52c41a / #722ed1 / #fa8c16; concise
titles; no decoration clutter.

Output JSON:
{{
    "charts": [
        {{
            "id": "chart_001",
            "title": "chart title",
            "subtitle": "what it shows",
            "type": "line",
            "echarts_option": {{"xAxis": {{}}, "yAxis": {{}}, "series": []}}
        }}
    ]
}}"#,
            query = state.query,
            data = data,
        );

        let options = ChatOptions::default().with_temperature(0.3);
        let Some(value) = call_llm_json(
            self.chat.as_ref(),
            self.name(),
            CHART_CONFIG_SYSTEM,
            &prompt,
            &options,
        )
        .await
        else {
            return;
        };

        let charts = value
            .get("charts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for chart_value in charts {
            let Some(obj) = chart_value.as_object() else { continue };
            let Some(option) = obj.get("echarts_option") else { continue };

            let chart = Chart {
                id: obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| short_id("chart")),
                title: obj
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Chart")
                    .to_string(),
                chart_type: obj
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("line")
                    .to_string(),
                data: Value::Null,
                code: None,
                image_base64: None,
                echarts_option: Some(option.clone()),
                section_id: None,
            };

            add_message(
                state,
                bus,
                self.name(),
                EventKind::Chart,
                json!({
                    "id": chart.id,
                    "title": chart.title,
                    "chart_type": chart.chart_type,
                    "echarts_option": chart.echarts_option,
                }),
            );
            state.charts.push(chart);
        }
    }

    /// Sandbox pass: generate analysis code, run it, self-heal failures.
    async fn run_sandbox_analysis(&self, state: &mut ResearchState, bus: &EventBus) {
        let data_summary: Vec<String> = state
            .data_points
            .iter()
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

        let prompt = format!(
            r#"## Research question
{query}

## Available data
{data}

## Task
Write Python that cleans this data, computes the key statistics, and renders
one professional chart.

Rules (strict):
1. Never use backslash line continuations; dict/list literals wrap naturally.
2. Pick only the 5-10 most relevant data points; deduplicate repeated metrics.
3. Define data as a column dict: data = {{"Year": [...], "Value": [...]}} then
   df = pd.DataFrame(data).
4. After building the DataFrame, coerce numeric columns with
   pd.to_numeric(..., errors='coerce') and dropna().
5. No import statements (pd, np, plt, sns are preseeded) and no plt.rcParams
   (fonts are preseeded).
6. Style: plt.figure(figsize=(12, 7)); bold title; labeled axes;
   sns.despine(); for line charts linewidth=2.5 with markers.
7. Keep it under 40 lines.

Output JSON (the code field uses \\n for newlines):
{{
    "analysis_plan": "one-line plan",
    "code": "data = {{'Year': [2020, 2022], 'Value': [100, 200]}}\\ndf = pd.DataFrame(data)\\n...",
    "expected_outputs": ["chart description"]
}}"#,
            query = state.query,
            data = data_summary.join("\n"),
        );

        let options = ChatOptions::default();
        let Some(value) =
            call_llm_json(self.chat.as_ref(), self.name(), CODE_SYSTEM, &prompt, &options).await
        else {
            state.push_error("Analyst code generation produced no JSON");
            return;
        };

        let Some(code) = code_field(&value, "code") else {
            warn!("analysis response had no usable code field");
            return;
        };

        add_message(
            state,
            bus,
            self.name(),
            EventKind::Code,
            json!({
                "language": "python",
                "code": code,
                "purpose": value.get("analysis_plan").and_then(Value::as_str).unwrap_or("data analysis"),
            }),
        );

        self.execute_with_self_correction(state, bus, code, Some("analysis".to_string()), "Data analysis chart")
            .await;
    }

    /// Render charts for the sections that asked for one.
    async fn render_section_charts(&self, state: &mut ResearchState, bus: &EventBus) {
        let mut targets: Vec<(String, String)> = state
            .outline
            .iter()
            .filter(|s| s.requires_chart)
            .map(|s| (s.id.clone(), s.title.clone()))
            .collect();

        // Nothing marked: fall back to the leading sections.
        if targets.is_empty() {
            targets = state
                .outline
                .iter()
                .take(MAX_SECTION_CHARTS)
                .map(|s| (s.id.clone(), s.title.clone()))
                .collect();
        }
        targets.truncate(MAX_SECTION_CHARTS);

        for (section_id, section_title) in targets {
            let section_data: Vec<Value> = state
                .data_points
                .iter()
                .take(10)
                .map(|dp| json!({"name": dp.name, "value": dp.value, "unit": dp.unit, "year": dp.year}))
                .collect();

            if section_data.is_empty() {
                continue;
            }

            let prompt = format!(
                r#"## Topic
{section_title}

## Data
{data}

## Task
Write Python that renders one polished chart for this topic.

Rules: no backslash continuations; no import statements (pd, np, plt, sns
preseeded); no plt.rcParams; column-dict data definition;
plt.figure(figsize=(12, 7)); bold title, labeled axes, sns.despine().

Output JSON (the code field uses \\n for newlines):
{{
    "code": "data = {{'Year': [2020, 2022], 'Value': [100, 200]}}\\n...",
    "chart_description": "what the chart shows"
}}"#,
                section_title = section_title,
                data = serde_json::to_string(&section_data).unwrap_or_default(),
            );

            let options = ChatOptions::default();
            let Some(value) =
                call_llm_json(self.chat.as_ref(), self.name(), CODE_SYSTEM, &prompt, &options)
                    .await
            else {
                continue;
            };

            let Some(code) = code_field(&value, "code") else { continue };

            add_message(
                state,
                bus,
                self.name(),
                EventKind::Code,
                json!({
                    "language": "python",
                    "code": code,
                    "purpose": format!("render chart: {}", section_title),
                }),
            );

            self.execute_with_self_correction(state, bus, code, Some(section_id), &section_title)
                .await;
        }
    }

    /// Execute code with up to [`MAX_CODE_RETRIES`] model-driven repairs.
    /// Forbidden code fails immediately with no retry.
    async fn execute_with_self_correction(
        &self,
        state: &mut ResearchState,
        bus: &EventBus,
        code: String,
        section_id: Option<String>,
        chart_title: &str,
    ) {
        let mut current_code = code;
        let mut retries = 0u32;

        loop {
            let outcome = self.runner.execute(&current_code).await;

            if outcome.success {
                state.code_executions.push(CodeExecution {
                    id: short_id("exec"),
                    code: current_code.clone(),
                    output: outcome.output.clone(),
                    error: None,
                    success: true,
                    retries,
                    timestamp: Utc::now().to_rfc3339(),
                });

                add_message(
                    state,
                    bus,
                    self.name(),
                    EventKind::CodeResult,
                    json!({
                        "success": true,
                        "output": crate::agent::truncate_chars(&outcome.output, 500),
                        "has_chart": outcome.image_base64.is_some(),
                        "retries": retries,
                    }),
                );

                if let Some(image) = outcome.image_base64 {
                    let chart = Chart {
                        id: short_id("chart"),
                        title: chart_title.to_string(),
                        chart_type: "generated".to_string(),
                        data: Value::Null,
                        code: Some(current_code),
                        image_base64: Some(image.clone()),
                        echarts_option: None,
                        section_id,
                    };
                    add_message(
                        state,
                        bus,
                        self.name(),
                        EventKind::Chart,
                        json!({
                            "id": chart.id,
                            "title": chart.title,
                            "chart_type": "generated",
                            "image_base64": image,
                        }),
                    );
                    state.charts.push(chart);
                }
                return;
            }

            let error = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
            let give_up = outcome_is_final(&error, retries);

            if give_up {
                warn!(retries, error = %error, "code execution failed permanently");
                state.code_executions.push(CodeExecution {
                    id: short_id("exec"),
                    code: current_code,
                    output: outcome.output,
                    error: Some(error.clone()),
                    success: false,
                    retries,
                    timestamp: Utc::now().to_rfc3339(),
                });
                add_message(
                    state,
                    bus,
                    self.name(),
                    EventKind::CodeResult,
                    json!({"success": false, "error": error, "retries": retries}),
                );
                return;
            }

            add_message(
                state,
                bus,
                self.name(),
                EventKind::Thought,
                json!({"content": format!(
                    "Code execution failed (attempt {}), repairing: {}",
                    retries + 1,
                    crate::agent::truncate_chars(&error, 100)
                )}),
            );

            let Some(fixed) = self.fix_code(&current_code, &error, &outcome.output).await else {
                warn!("no repaired code returned, giving up");
                state.code_executions.push(CodeExecution {
                    id: short_id("exec"),
                    code: current_code,
                    output: outcome.output,
                    error: Some(error.clone()),
                    success: false,
                    retries,
                    timestamp: Utc::now().to_rfc3339(),
                });
                add_message(
                    state,
                    bus,
                    self.name(),
                    EventKind::CodeResult,
                    json!({"success": false, "error": error, "retries": retries}),
                );
                return;
            };

            add_message(
                state,
                bus,
                self.name(),
                EventKind::CodeFix,
                json!({
                    "error_analysis": fixed.error_analysis,
                    "fix_description": fixed.fix_description,
                    "retry": retries + 1,
                }),
            );

            current_code = fixed.code;
            retries += 1;
        }
    }

    async fn fix_code(&self, code: &str, error: &str, stdout: &str) -> Option<FixedCode> {
        let prompt = format!(
            r#"Repair this failed Python analysis code.

Diagnosis guide:
- "could not convert string to float": coerce the column with
  pd.to_numeric(df['col'], errors='coerce') and drop NaN rows first.
- SyntaxError: look for stray backslashes or unbalanced brackets.
- KeyError: column names must match the data definition.
- TypeError: convert types with .astype() or pd.to_numeric().

## Original code
{code}

## Error
{error}

## Stdout
{stdout}

Rules: no import statements (pd, np, plt, sns preseeded); no plt.rcParams;
column-dict data definition; coerce numeric columns right after building the
DataFrame.

Output JSON (the fixed_code field uses \\n for newlines):
{{
    "error_analysis": "why it failed",
    "fix_description": "what changed",
    "fixed_code": "data = {{'Year': [2020, 2021], 'Value': [100, 200]}}\\n..."
}}"#,
            code = code,
            error = error,
            stdout = crate::agent::truncate_chars(stdout, 1000),
        );

        let options = ChatOptions::default().with_temperature(0.2);
        let value =
            call_llm_json(self.chat.as_ref(), self.name(), CODE_FIX_SYSTEM, &prompt, &options)
                .await?;

        let code = code_field(&value, "fixed_code")?;
        Some(FixedCode {
            code,
            error_analysis: value
                .get("error_analysis")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            fix_description: value
                .get("fix_description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

struct FixedCode {
    code: String,
    error_analysis: String,
    fix_description: String,
}

/// Pull a code field out of a reply; models sometimes return a list of
/// lines instead of one string.
fn code_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(code)) if !code.trim().is_empty() => Some(code.clone()),
        Some(Value::Array(lines)) => {
            let joined = lines
                .iter()
                .map(|line| line.as_str().map(String::from).unwrap_or_else(|| line.to_string()))
                .collect::<Vec<_>>()
                .join("\n");
            (!joined.trim().is_empty()).then_some(joined)
        }
        _ => None,
    }
}

/// Whether a failure ends the correction loop: forbidden code is never
/// retried, and the retry budget is bounded.
fn outcome_is_final(error: &str, retries: u32) -> bool {
    error == crate::sandbox::FORBIDDEN_ERROR || retries >= MAX_CODE_RETRIES
}

#[async_trait]
impl Agent for Analyst {
    fn name(&self) -> &'static str {
        "Analyst"
    }

    async fn process(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()> {
        info!(
            data_points = state.data_points.len(),
            facts = state.facts.len(),
            "starting analysis"
        );

        add_message(
            state,
            bus,
            self.name(),
            EventKind::ResearchStep,
            json!({
                "step_id": short_id("step_analyze"),
                "step_type": "analyzing",
                "title": "Data analysis",
                "subtitle": "Building visualizations",
                "status": "running",
                "stats": {"results_count": 0, "charts_count": 0, "entities_count": 0},
            }),
        );
        let opening_thought = json!({"content": format!(
            "Starting data analysis over {} data points...",
            state.data_points.len()
        )});
        add_message(state, bus, self.name(), EventKind::Thought, opening_thought);

        let extracted = self.extract_structured_data(state).await;
        self.build_knowledge_graph(state, bus).await;
        self.generate_chart_configs(state, bus, &extracted).await;

        if state.data_points.len() >= MIN_DATA_POINTS_FOR_CODE {
            self.run_sandbox_analysis(state, bus).await;
            self.render_section_charts(state, bus).await;
        } else {
            info!(
                data_points = state.data_points.len(),
                "not enough data points for sandbox analysis"
            );
        }

        let completed_step = json!({
            "step_type": "analyzing",
            "title": "Data analysis",
            "subtitle": "Building visualizations",
            "status": "completed",
            "stats": {
                "results_count": state.facts.len(),
                "charts_count": state.charts.len(),
                "entities_count": state.knowledge_graph.nodes.len(),
            },
        });
        add_message(state, bus, self.name(), EventKind::ResearchStep, completed_step);

        state.add_log(
            self.name(),
            "analyze",
            format!("{} charts, {} graph nodes", state.charts.len(), state.knowledge_graph.nodes.len()),
        );
        Ok(())
    }
}
