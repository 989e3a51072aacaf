//! Query intent model: the structured interpretation of a natural-language
//! question that the Router uses to decide which brains to consult.
//!
//! Grounded on the intent schema implied by `llm_client.py`'s
//! `analyze_query_intent` prompt (the `query_type`, `semantic_terms`,
//! `entities`, `time_constraints`, `metadata_filters`,
//! `relationship_targets`, `confidence`, `reasoning` fields it asks the
//! model to return) and `intelligent_query_orchestrator.py`'s use of those
//! fields to pick a routing strategy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The seven query categories the Intent Analyzer classifies a question
/// into. Unknown labels returned by a model deserialize to `Unknown` rather
/// than failing, since the repair pipeline has to cope with free-form LLM
/// output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Semantic,
    AuthorAttribution,
    MetadataFilter,
    RelationshipDiscovery,
    TemporalAnalysis,
    CrossReference,
    HybridComplex,
    #[serde(other)]
    Unknown,
}

impl QueryType {
    /// Brains this query type would consult when no `priority_brain` hint
    /// overrides it. Mirrors the per-type routing rules from
    /// `intelligent_query_orchestrator.py`. The [`crate::intent::QueryIntent`]
    /// based plan in `nancy-cognitive::router` refines this further using
    /// the intent's populated fields, per spec.md §4.7.
    pub fn default_brains(self) -> &'static [&'static str] {
        match self {
            QueryType::Semantic => &["vector"],
            QueryType::AuthorAttribution => &["analytical", "graph"],
            QueryType::MetadataFilter => &["analytical"],
            QueryType::RelationshipDiscovery => &["graph"],
            QueryType::TemporalAnalysis => &["analytical"],
            QueryType::CrossReference => &["vector", "graph"],
            QueryType::HybridComplex => &["vector", "analytical", "graph"],
            QueryType::Unknown => &["vector"],
        }
    }
}

/// The confidence an Intent Analyzer assigns its classification, and the
/// fixed value used when every repair stage falls through to the heuristic
/// keyword fallback.
pub const FALLBACK_CONFIDENCE: f64 = 0.4;
pub const FALLBACK_REASONING: &str = "fallback";

/// A relative or absolute time window extracted from a query, e.g. "in
/// October 2024" or "last week".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimeConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_expression: Option<String>,
}

/// Structured interpretation of a query, produced by the Intent Analyzer.
///
/// Field shapes follow spec.md §3's Query Intent exactly: `semantic_terms`
/// feeds the vector brain, `entities`/`relationship_targets` feed the graph
/// brain, `time_constraints`/`metadata_filters` feed the analytical brain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryIntent {
    pub query_type: QueryType,
    #[serde(default)]
    pub semantic_terms: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_constraints: Option<TimeConstraints>,
    #[serde(default)]
    pub metadata_filters: HashMap<String, String>,
    #[serde(default)]
    pub relationship_targets: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

impl Default for QueryType {
    fn default() -> Self {
        QueryType::Semantic
    }
}

impl QueryIntent {
    /// Builds the heuristic fallback intent used when every LLM-backed
    /// repair stage in the Intent Analyzer pipeline has been exhausted.
    /// Mirrors `_create_fallback_intent` in the original `llm_client.py`:
    /// fixed low confidence, `reasoning = "fallback"`, and whatever
    /// semantic terms the keyword heuristic pulled out of the raw query.
    pub fn heuristic_fallback(query_type: QueryType, semantic_terms: Vec<String>) -> Self {
        Self {
            query_type,
            semantic_terms,
            entities: Vec::new(),
            time_constraints: None,
            metadata_filters: HashMap::new(),
            relationship_targets: Vec::new(),
            confidence: FALLBACK_CONFIDENCE,
            reasoning: FALLBACK_REASONING.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.reasoning == FALLBACK_REASONING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_query_type_label_deserializes_to_unknown() {
        let parsed: QueryType = serde_json::from_str("\"not_a_real_type\"").unwrap();
        assert_eq!(parsed, QueryType::Unknown);
    }

    #[test]
    fn known_labels_round_trip() {
        for qt in [
            QueryType::Semantic,
            QueryType::AuthorAttribution,
            QueryType::MetadataFilter,
            QueryType::RelationshipDiscovery,
            QueryType::TemporalAnalysis,
            QueryType::CrossReference,
            QueryType::HybridComplex,
        ] {
            let json = serde_json::to_string(&qt).unwrap();
            let back: QueryType = serde_json::from_str(&json).unwrap();
            assert_eq!(qt, back);
        }
    }

    #[test]
    fn heuristic_fallback_has_fixed_confidence_and_reasoning() {
        let intent = QueryIntent::heuristic_fallback(QueryType::Semantic, vec!["thermal".into()]);
        assert_eq!(intent.confidence, FALLBACK_CONFIDENCE);
        assert!(intent.is_fallback());
    }

    #[test]
    fn hybrid_complex_consults_all_three_brains() {
        assert_eq!(
            QueryType::HybridComplex.default_brains(),
            &["vector", "analytical", "graph"]
        );
    }

    #[test]
    fn round_trip_through_json_is_lossless() {
        let mut filters = HashMap::new();
        filters.insert("file_type".to_string(), "pdf".to_string());
        let intent = QueryIntent {
            query_type: QueryType::HybridComplex,
            semantic_terms: vec!["thermal".to_string(), "aluminum".to_string()],
            entities: vec!["Sarah Chen".to_string()],
            time_constraints: Some(TimeConstraints {
                start: Some("2024-10-01".to_string()),
                end: Some("2024-10-31".to_string()),
                relative_expression: None,
            }),
            metadata_filters: filters,
            relationship_targets: vec!["heat sink".to_string()],
            confidence: 0.9,
            reasoning: "multiple domains referenced".to_string(),
        };
        let json = serde_json::to_string(&intent).unwrap();
        let back: QueryIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(intent, back);
    }
}
