//! The five research roles and their shared contract.
//!
//! An agent is a unit that reads and mutates the research state for one
//! phase step. Agents never call each other: coordination happens
//! exclusively through the shared state and the event bus. The engine
//! guarantees at most one agent is active at a time.

pub mod analyst;
pub mod critic;
pub mod planner;
pub mod searcher;
pub mod writer;

use crate::error::Result;
use crate::event::{EventBus, EventKind};
use crate::state::ResearchState;
use async_trait::async_trait;
use llm::{ChatClient, ChatOptions};
use serde_json::Value;
use tracing::warn;

pub use analyst::Analyst;
pub use critic::Critic;
pub use planner::Planner;
pub use searcher::{QuoteClient, Searcher, StockQuote};
pub use writer::Writer;

/// One research role.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Display name used on emitted events and audit logs.
    fn name(&self) -> &'static str;

    /// Run one phase step: read the state, do the work, mutate the
    /// state, and stream progress to the bus. Must not retain the state
    /// reference beyond the call.
    async fn process(&self, state: &mut ResearchState, bus: &EventBus) -> Result<()>;
}

/// Record a message in the in-phase buffer and push it onto the bus.
pub(crate) fn add_message(
    state: &mut ResearchState,
    bus: &EventBus,
    agent: &str,
    kind: EventKind,
    content: Value,
) {
    let message = crate::event::AgentMessage::from_agent(agent, kind, content);
    state.messages.push(message.clone());
    bus.send(message);
}

/// One JSON-mode chat call with salvage parsing. Failures are logged
/// and collapse to `None`; the caller decides how to degrade.
pub(crate) async fn call_llm_json(
    chat: &dyn ChatClient,
    agent: &str,
    system: &str,
    user: &str,
    options: &ChatOptions,
) -> Option<Value> {
    match chat.chat(system, user, options).await {
        Ok(reply) => {
            let parsed = llm::extract::parse_json_response(&reply);
            if parsed.is_none() {
                warn!(agent, reply_len = reply.len(), "could not extract JSON from reply");
            }
            parsed
        }
        Err(e) => {
            warn!(agent, error = %e, "LLM call failed");
            None
        }
    }
}

/// Character-safe truncation (byte slicing would split CJK text).
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Coerce a JSON value that should be a string list: accepts a list, a
/// single string, or anything stringifiable.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Lenient float: accepts numbers and numeric strings.
pub(crate) fn lenient_f64(value: Option<&Value>, fallback: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(fallback),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
        _ => fallback,
    }
}

/// Lenient year: accepts integers and numeric strings.
pub(crate) fn lenient_year(value: Option<&Value>) -> Option<i32> {
    match value {
        Some(Value::Number(n)) => n.as_i64().map(|y| y as i32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Treat `null`, empty, and "none" markers as absent.
pub(crate) fn non_null_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_chars_handles_cjk() {
        let text = "中国新能源汽车市场规模快速增长";
        let truncated = truncate_chars(text, 5);
        assert_eq!(truncated, "中国新能源");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_string_list_coercion() {
        let list = json!(["a", " b ", ""]);
        assert_eq!(string_list(Some(&list)), vec!["a", "b"]);

        let single = json!("only one");
        assert_eq!(string_list(Some(&single)), vec!["only one"]);

        assert!(string_list(None).is_empty());
        assert!(string_list(Some(&json!(null))).is_empty());
    }

    #[test]
    fn test_lenient_f64() {
        assert_eq!(lenient_f64(Some(&json!(0.8)), 0.5), 0.8);
        assert_eq!(lenient_f64(Some(&json!("0.9")), 0.5), 0.9);
        assert_eq!(lenient_f64(Some(&json!("n/a")), 0.5), 0.5);
        assert_eq!(lenient_f64(None, 0.5), 0.5);
    }

    #[test]
    fn test_lenient_year() {
        assert_eq!(lenient_year(Some(&json!(2024))), Some(2024));
        assert_eq!(lenient_year(Some(&json!("2023"))), Some(2023));
        assert_eq!(lenient_year(Some(&json!("unknown"))), None);
    }

    #[test]
    fn test_non_null_string() {
        assert_eq!(non_null_string(Some(&json!("h_1"))), Some("h_1".to_string()));
        assert_eq!(non_null_string(Some(&json!("null"))), None);
        assert_eq!(non_null_string(Some(&json!(""))), None);
        assert_eq!(non_null_string(Some(&json!(null))), None);
    }
}
