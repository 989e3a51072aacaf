//! Response Synthesizer (C8): fuses ranked brain results into one
//! natural-language answer that cites its sources.
//!
//! Grounded on `llm_client.py`'s `synthesize_response` for the synthesis
//! prompt shape (cite document/author, stay under ~200 words, note when a
//! brain degraded) and `_create_fallback_response` for the templated
//! fallback used when no linguistic model is available or the call fails:
//! up to three numbered `doc_name`/`author`/100-char-snippet entries and an
//! "...and N more results." tail.

use std::sync::Arc;

use nancy_core::contracts::{BrainResult, LinguisticModel};
use nancy_types::intent::QueryIntent;
use tracing::warn;

const MAX_FALLBACK_ENTRIES: usize = 3;
const SNIPPET_CHARS: usize = 100;

pub struct ResponseSynthesizer {
    llm: Option<Arc<dyn LinguisticModel>>,
}

impl ResponseSynthesizer {
    pub fn new(llm: Option<Arc<dyn LinguisticModel>>) -> Self {
        Self { llm }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        results: &[BrainResult],
        intent: &QueryIntent,
        degraded_brains: &[String],
    ) -> String {
        self.synthesize_inner(query, results, intent, degraded_brains, false).await
    }

    /// Same fusion, but notes in the prompt that the answer draws on both a
    /// vector-anchored passage and a graph expansion around its entities,
    /// so the model is encouraged to connect the two rather than treat them
    /// as one flat list (multi-step escalation, spec.md §4.7).
    pub async fn synthesize_combined(
        &self,
        query: &str,
        results: &[BrainResult],
        intent: &QueryIntent,
        degraded_brains: &[String],
    ) -> String {
        self.synthesize_inner(query, results, intent, degraded_brains, true).await
    }

    async fn synthesize_inner(
        &self,
        query: &str,
        results: &[BrainResult],
        intent: &QueryIntent,
        degraded_brains: &[String],
        combined: bool,
    ) -> String {
        let Some(llm) = &self.llm else {
            return fallback_response(results);
        };

        let system_prompt = "You are an engineering knowledge base assistant. Synthesize the provided \
            search results into a single natural-language answer to the user's question. Cite the source \
            document and author by name where available. Keep the answer under 200 words. If the results \
            don't fully answer the question, say so plainly rather than guessing.";

        let user_prompt = build_synthesis_prompt(query, results, intent, degraded_brains, combined);

        match llm.complete(system_prompt, &user_prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                warn!(query, "synthesizer: linguistic model returned an empty answer, using fallback");
                fallback_response(results)
            }
            Err(e) => {
                warn!(query, error = %e, "synthesizer: linguistic model call failed, using fallback");
                fallback_response(results)
            }
        }
    }
}

fn build_synthesis_prompt(
    query: &str,
    results: &[BrainResult],
    intent: &QueryIntent,
    degraded_brains: &[String],
    combined: bool,
) -> String {
    let mut prompt = format!("Question: {query}\n\n");

    if combined {
        prompt.push_str(
            "The following results combine an initial semantic search with a graph expansion around \
            the entities it mentioned. Connect the two where relevant.\n\n",
        );
    }

    if results.is_empty() {
        prompt.push_str("No search results were found.\n");
    } else {
        prompt.push_str("Search results:\n");
        for (i, result) in results.iter().enumerate() {
            let author = result.metadata.get("author").map(String::as_str).unwrap_or("unknown");
            let doc_name = result.metadata.get("doc_name").map(String::as_str).unwrap_or(&result.document_id);
            prompt.push_str(&format!(
                "{}. [{}] by {}: {}\n",
                i + 1,
                doc_name,
                author,
                result.content
            ));
        }
    }

    if !degraded_brains.is_empty() {
        prompt.push_str(&format!(
            "\nNote: the following brains were unavailable or timed out for this query: {}.\n",
            degraded_brains.join(", ")
        ));
    }

    if !intent.entities.is_empty() {
        prompt.push_str(&format!("\nEntities of interest: {}\n", intent.entities.join(", ")));
    }

    prompt
}

/// Mirrors `_create_fallback_response` exactly: empty results produce a
/// fixed "couldn't find" sentence; otherwise up to
/// [`MAX_FALLBACK_ENTRIES`] numbered entries followed by a "...and N more
/// results." tail when there were more.
fn fallback_response(results: &[BrainResult]) -> String {
    if results.is_empty() {
        return "I couldn't find any relevant documents for your query.".to_string();
    }

    let mut response = format!("I found {} relevant result(s):\n", results.len());
    for (i, result) in results.iter().take(MAX_FALLBACK_ENTRIES).enumerate() {
        let author = result.metadata.get("author").map(String::as_str).unwrap_or("unknown author");
        let doc_name = result.metadata.get("doc_name").map(String::as_str).unwrap_or(&result.document_id);
        let snippet: String = result.content.chars().take(SNIPPET_CHARS).collect();
        response.push_str(&format!("{}. {} (by {}): {}\n", i + 1, doc_name, author, snippet));
    }

    let remaining = results.len().saturating_sub(MAX_FALLBACK_ENTRIES);
    if remaining > 0 {
        response.push_str(&format!("...and {remaining} more results.\n"));
    }

    response
}
