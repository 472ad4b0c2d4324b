//! The research phase state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the research state machine.
///
/// Transitions are driven by the engine and the critic:
///
/// ```text
/// Init → Planning → Researching → Analyzing → Writing → Reviewing
///                                                ↑          │
///                      ReResearching ←───────────┼──────────┤
///                            │                   │          │
///                            └──────→ Writing    Revising ←─┤
///                                                           ↓
///                                             Completed / Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Init,
    Planning,
    Researching,
    Analyzing,
    Writing,
    Reviewing,
    Revising,
    ReResearching,
    Completed,
    Failed,
}

impl ResearchPhase {
    /// Stable string form used in events and checkpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Init => "init",
            ResearchPhase::Planning => "planning",
            ResearchPhase::Researching => "researching",
            ResearchPhase::Analyzing => "analyzing",
            ResearchPhase::Writing => "writing",
            ResearchPhase::Reviewing => "reviewing",
            ResearchPhase::Revising => "revising",
            ResearchPhase::ReResearching => "re_researching",
            ResearchPhase::Completed => "completed",
            ResearchPhase::Failed => "failed",
        }
    }

    /// Whether the machine has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchPhase::Completed | ResearchPhase::Failed)
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ResearchPhase::ReResearching).unwrap(),
            "\"re_researching\""
        );
        let parsed: ResearchPhase = serde_json::from_str("\"researching\"").unwrap();
        assert_eq!(parsed, ResearchPhase::Researching);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(ResearchPhase::Completed.is_terminal());
        assert!(ResearchPhase::Failed.is_terminal());
        assert!(!ResearchPhase::Reviewing.is_terminal());
    }
}
