//! Intent Analyzer (C6): turns a natural-language query into a structured
//! [`QueryIntent`], never failing.
//!
//! Grounded on `llm_client.py`'s `analyze_query_intent`/`_parse_query_intent`:
//! a schema-constrained prompt, a direct-parse attempt, a progressive-repair
//! pass (code-fence stripping, brace extraction, quote/literal
//! normalization), one re-prompt carrying the malformed output back to the
//! model, and finally a keyword heuristic that never fails.

use std::collections::HashMap;
use std::sync::Arc;

use nancy_core::contracts::LinguisticModel;
use nancy_types::intent::{QueryIntent, QueryType};
use regex::Regex;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are a query intent classifier for an engineering knowledge base. \
Given a user's question, respond with ONLY a JSON object with these fields: \
query_type (one of: semantic, author_attribution, metadata_filter, relationship_discovery, \
temporal_analysis, cross_reference, hybrid_complex), semantic_terms (array of strings), \
entities (array of strings), time_constraints (object with start/end/relative_expression, or null), \
metadata_filters (object of string to string), relationship_targets (array of strings), \
confidence (0.0-1.0), reasoning (short string). Return no other text.";

/// Converts natural-language queries into [`QueryIntent`]s via an LLM,
/// repairing malformed model output before falling back to a heuristic
/// classifier. Never returns an error — per spec.md §4.6's contract, the
/// router must always be able to proceed.
pub struct IntentAnalyzer {
    llm: Option<Arc<dyn LinguisticModel>>,
}

impl IntentAnalyzer {
    pub fn new(llm: Option<Arc<dyn LinguisticModel>>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, query: &str) -> QueryIntent {
        let Some(llm) = &self.llm else {
            debug!("intent analyzer: no linguistic model configured, using heuristic classifier");
            return heuristic_fallback(query);
        };

        let user_prompt = format!("Query: {query}");
        let raw = match llm.complete(SYSTEM_PROMPT, &user_prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "intent analyzer: linguistic model call failed, using heuristic classifier");
                return heuristic_fallback(query);
            }
        };

        if let Some(intent) = parse_direct(&raw) {
            return intent;
        }
        if let Some(intent) = parse_with_repairs(&raw) {
            return intent;
        }

        let reprompt = format!(
            "The following response was not valid JSON:\n{raw}\n\nReturn ONLY a valid JSON object matching the schema, with no commentary or code fences."
        );
        if let Ok(retry_raw) = llm.complete(SYSTEM_PROMPT, &reprompt).await {
            if let Some(intent) = parse_direct(&retry_raw).or_else(|| parse_with_repairs(&retry_raw)) {
                return intent;
            }
        }

        warn!(query, "intent analyzer: exhausted repair pipeline, using heuristic classifier");
        heuristic_fallback(query)
    }
}

fn parse_direct(raw: &str) -> Option<QueryIntent> {
    serde_json::from_str(raw.trim()).ok()
}

fn parse_with_repairs(raw: &str) -> Option<QueryIntent> {
    let without_fences = strip_code_fences(raw);
    if let Some(intent) = parse_direct(&without_fences) {
        return Some(intent);
    }

    let extracted = extract_first_json_object(&without_fences)?;
    if let Some(intent) = parse_direct(&extracted) {
        return Some(intent);
    }

    let normalized = normalize_literals(&extracted);
    parse_direct(&normalized)
}

fn strip_code_fences(raw: &str) -> String {
    static FENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = FENCE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
    match re.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| raw.to_string()),
        None => raw.to_string(),
    }
}

fn extract_first_json_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in raw[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Coerces the common non-JSON literals a language model slips into
/// otherwise-JSON output: single-quoted strings, Python-style
/// `True`/`False`/`None`, and trailing commas before a closing bracket.
fn normalize_literals(raw: &str) -> String {
    static TRAILING_COMMA: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let trailing_comma = TRAILING_COMMA.get_or_init(|| Regex::new(r",(\s*[}\]])").unwrap());

    let single_quotes_normalized = raw.replace('\'', "\"");
    let literals_normalized = single_quotes_normalized
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");
    trailing_comma.replace_all(&literals_normalized, "$1").to_string()
}

/// Keyword-rule classifier used when the LLM is unavailable or every
/// repair stage fails. Mirrors `_create_fallback_intent`'s who/when/
/// relationship/semantic heuristic families.
fn heuristic_fallback(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();

    let query_type = if lower.contains("who wrote")
        || lower.contains("who authored")
        || lower.contains("who created")
        || lower.starts_with("who ")
    {
        QueryType::AuthorAttribution
    } else if lower.contains("when") || lower.contains("last week") || lower.contains("last month") {
        QueryType::TemporalAnalysis
    } else if lower.contains("related to") || lower.contains("relationship") || lower.contains("connected to") {
        QueryType::RelationshipDiscovery
    } else if lower.contains("references") || lower.contains("cites") || lower.contains("cross-reference") {
        QueryType::CrossReference
    } else if lower.contains("type:") || lower.contains("filter") {
        QueryType::MetadataFilter
    } else {
        QueryType::Semantic
    };

    let semantic_terms = significant_words(&lower);
    QueryIntent::heuristic_fallback(query_type, semantic_terms)
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "who", "what", "when", "where", "why", "how", "of", "in", "on",
    "to", "for", "and", "or", "did", "does", "do", "has", "have", "had", "this", "that", "with",
];

fn significant_words(lower: &str) -> Vec<String> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .take(8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nancy_core::contracts::BrainHealth;
    use nancy_types::error::{NancyError, Result};

    struct ScriptedLlm {
        responses: std::sync::Mutex<Vec<String>>,
    }
    #[async_trait::async_trait]
    impl LinguisticModel for ScriptedLlm {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(NancyError::LLMError("no more scripted responses".to_string()));
            }
            Ok(responses.remove(0))
        }
        async fn health(&self) -> Result<BrainHealth> {
            Ok(BrainHealth::ok("scripted"))
        }
    }

    fn valid_json_intent() -> &'static str {
        r#"{"query_type":"semantic","semantic_terms":["thermal","limit"],"entities":[],"time_constraints":null,"metadata_filters":{},"relationship_targets":[],"confidence":0.9,"reasoning":"matched keywords"}"#
    }

    #[tokio::test]
    async fn direct_parse_succeeds_on_well_formed_json() {
        let llm = ScriptedLlm {
            responses: std::sync::Mutex::new(vec![valid_json_intent().to_string()]),
        };
        let analyzer = IntentAnalyzer::new(Some(Arc::new(llm)));
        let intent = analyzer.analyze("What is the thermal limit?").await;
        assert_eq!(intent.query_type, QueryType::Semantic);
        assert!(!intent.is_fallback());
    }

    #[tokio::test]
    async fn repairs_code_fenced_and_single_quoted_output() {
        let malformed = format!("Here is the JSON:\n```json\n{}\n```", valid_json_intent().replace('"', "'"));
        let llm = ScriptedLlm {
            responses: std::sync::Mutex::new(vec![malformed]),
        };
        let analyzer = IntentAnalyzer::new(Some(Arc::new(llm)));
        let intent = analyzer.analyze("What is the thermal limit?").await;
        assert_eq!(intent.query_type, QueryType::Semantic);
        assert!(!intent.is_fallback());
    }

    #[tokio::test]
    async fn reprompts_once_before_falling_back() {
        let llm = ScriptedLlm {
            responses: std::sync::Mutex::new(vec!["not json at all".to_string(), valid_json_intent().to_string()]),
        };
        let analyzer = IntentAnalyzer::new(Some(Arc::new(llm)));
        let intent = analyzer.analyze("What is the thermal limit?").await;
        assert!(!intent.is_fallback(), "second attempt should have parsed successfully");
    }

    #[tokio::test]
    async fn exhausting_repairs_falls_back_to_heuristic_with_fixed_reasoning() {
        let llm = ScriptedLlm {
            responses: std::sync::Mutex::new(vec!["garbage".to_string(), "still garbage".to_string()]),
        };
        let analyzer = IntentAnalyzer::new(Some(Arc::new(llm)));
        let intent = analyzer.analyze("Who wrote the thermal report?").await;
        assert!(intent.is_fallback());
        assert_eq!(intent.query_type, QueryType::AuthorAttribution);
    }

    #[test]
    fn heuristic_classifies_who_questions_as_author_attribution() {
        let intent = heuristic_fallback("Who authored the design review?");
        assert_eq!(intent.query_type, QueryType::AuthorAttribution);
    }

    #[test]
    fn heuristic_classifies_temporal_keywords() {
        let intent = heuristic_fallback("What changed last week?");
        assert_eq!(intent.query_type, QueryType::TemporalAnalysis);
    }

    #[test]
    fn extract_first_json_object_ignores_surrounding_prose() {
        let raw = "Sure, here you go: {\"a\": 1} -- hope that helps";
        assert_eq!(extract_first_json_object(raw).unwrap(), "{\"a\": 1}");
    }
}
