//! Search result types.

use serde::{Deserialize, Serialize};

/// One web page returned by the search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Page URL.
    pub url: String,

    /// Page title.
    pub title: String,

    /// Provider-generated summary of the page, when available.
    pub summary: String,

    /// Short snippet around the match.
    pub snippet: String,

    /// Publishing site name.
    pub site_name: String,

    /// Publication date as reported by the provider (may be empty).
    pub date: String,
}

impl SearchResult {
    /// The most informative text available for this result: the summary
    /// when present, the snippet otherwise.
    pub fn body(&self) -> &str {
        if self.summary.is_empty() {
            &self.snippet
        } else {
            &self.summary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_prefers_summary() {
        let mut r = SearchResult {
            url: "https://a.example".into(),
            title: "t".into(),
            summary: "full summary".into(),
            snippet: "short".into(),
            site_name: "site".into(),
            date: String::new(),
        };
        assert_eq!(r.body(), "full summary");
        r.summary.clear();
        assert_eq!(r.body(), "short");
    }
}
