//! Router / Query Orchestrator (C7): plans which brains a query consults,
//! fans the sub-queries out in parallel under a global deadline, and merges
//! the fragments into one ranked, deduplicated result list.
//!
//! Grounded on `intelligent_query_orchestrator.py`'s `_execute_intelligent_search`
//! / `_deduplicate_and_rank_results` for the per-brain enable rules and the
//! distance-sort-then-first-100-chars dedup key, and on
//! `enhanced_query_orchestrator.py`'s `_strategy_hybrid` for the
//! vector-anchor-then-graph-expand multi-step shape. The parallel fan-out
//! with a global timeout wrapping per-branch timeouts follows
//! `brain-cognitive::orchestrator::executor::StandardExecutionEngine::execute_batch`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nancy_core::contracts::{BrainResult, Brains};
use nancy_types::intent::{QueryIntent, QueryType};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::intent::IntentAnalyzer;
use crate::synthesis::ResponseSynthesizer;

/// Planning/execution knobs, normally sourced from
/// `NancyConfig::orchestration` at startup.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub global_query_timeout: Duration,
    pub per_brain_timeout: Duration,
    pub confidence_threshold: f64,
    pub top_k: usize,
    pub dedup_prefix_chars: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            global_query_timeout: Duration::from_secs(10),
            per_brain_timeout: Duration::from_secs(4),
            confidence_threshold: 0.7,
            top_k: 10,
            dedup_prefix_chars: 100,
        }
    }
}

/// Which brains a plan enables for a given intent. Mirrors spec.md §4.7's
/// per-brain enable rules exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryPlan {
    pub vector: bool,
    pub analytical: bool,
    pub graph: bool,
    pub multi_step: bool,
}

/// Cooperative cancellation for an in-flight query: dropping or calling
/// [`QueryCancellation::cancel`] on the sender side signals every
/// outstanding sub-query's [`tokio::select!`] branch.
pub struct QueryCancellation {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancellationToken(watch::Receiver<bool>);

impl QueryCancellation {
    pub fn new() -> (Self, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancellationToken(rx))
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled; used in a `tokio::select!` alongside the
    /// sub-query future so cancellation pre-empts a long brain call.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }
}

/// The result of one complete query: the merged, ranked result list, the
/// intent that produced it, which brains (if any) degraded, and whether the
/// query was cut short by cancellation or the global deadline.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: String,
    pub results: Vec<BrainResult>,
    pub intent: QueryIntent,
    pub degraded_brains: Vec<String>,
    pub cancelled: bool,
    pub timed_out: bool,
}

/// Multi-brain query planner and executor. Owns the brain bundle,
/// delegates intent classification to [`IntentAnalyzer`] and final-answer
/// fusion to [`ResponseSynthesizer`].
pub struct QueryOrchestrator {
    brains: Arc<Brains>,
    intent_analyzer: IntentAnalyzer,
    synthesizer: ResponseSynthesizer,
    config: RouterConfig,
}

impl QueryOrchestrator {
    pub fn new(brains: Arc<Brains>, config: RouterConfig) -> Self {
        let intent_analyzer = IntentAnalyzer::new(brains.llm.clone());
        let synthesizer = ResponseSynthesizer::new(brains.llm.clone());
        Self {
            brains,
            intent_analyzer,
            synthesizer,
            config,
        }
    }

    /// Builds the brain-enable plan for an intent, per spec.md §4.7.
    /// Deterministic given identical intent and brain health (Testable
    /// Property 3): this function reads only its `intent` argument.
    pub fn plan(&self, intent: &QueryIntent) -> QueryPlan {
        let vector = !intent.semantic_terms.is_empty() || intent.confidence < self.config.confidence_threshold;

        let analytical = !intent.metadata_filters.is_empty()
            || intent.time_constraints.is_some()
            || matches!(intent.query_type, QueryType::MetadataFilter | QueryType::TemporalAnalysis);

        let graph = matches!(
            intent.query_type,
            QueryType::AuthorAttribution | QueryType::RelationshipDiscovery | QueryType::CrossReference
        ) || !intent.entities.is_empty()
            || !intent.relationship_targets.is_empty();

        let (vector, analytical, graph) = if intent.query_type == QueryType::HybridComplex {
            (true, true, true)
        } else {
            (vector, analytical, graph)
        };

        let multi_step = is_multi_step_query(intent);

        QueryPlan {
            vector,
            analytical,
            graph,
            multi_step,
        }
    }

    /// Runs a query end to end: classify intent, plan, fan out, merge,
    /// synthesize. Equivalent to calling [`Self::run_cancellable`] with a
    /// token that is never cancelled.
    pub async fn query(&self, query_text: &str) -> QueryResponse {
        let (_guard, token) = QueryCancellation::new();
        self.run_cancellable(query_text, token).await
    }

    /// Runs a query, honoring cancellation signaled through `token`. Every
    /// outstanding sub-query observes cancellation via `tokio::select!`
    /// against [`CancellationToken::cancelled`], so no sub-query call
    /// outlives the caller's cancel signal (spec.md Testable Property 8).
    pub async fn run_cancellable(&self, query_text: &str, token: CancellationToken) -> QueryResponse {
        let intent = self.intent_analyzer.analyze(query_text).await;
        let plan = self.plan(&intent);

        info!(
            query = query_text,
            query_type = ?intent.query_type,
            vector = plan.vector,
            analytical = plan.analytical,
            graph = plan.graph,
            multi_step = plan.multi_step,
            "query orchestrator planned brain dispatch"
        );

        let run = self.execute_plan(query_text, &intent, plan, token.clone());

        match timeout(self.config.global_query_timeout, run).await {
            Ok(mut response) => {
                response.cancelled = token.is_cancelled();
                response
            }
            Err(_) => {
                warn!(query = query_text, "query orchestrator hit global deadline");
                QueryResponse {
                    answer: "The query timed out before a complete answer could be produced.".to_string(),
                    results: Vec::new(),
                    intent,
                    degraded_brains: vec!["timeout".to_string()],
                    cancelled: false,
                    timed_out: true,
                }
            }
        }
    }

    async fn execute_plan(
        &self,
        query_text: &str,
        intent: &QueryIntent,
        plan: QueryPlan,
        token: CancellationToken,
    ) -> QueryResponse {
        if plan.multi_step {
            return self.execute_multi_step(query_text, intent, token).await;
        }

        let (results, degraded_brains) = self.dispatch(query_text, intent, plan, token).await;
        let merged = merge_results(results, self.config.top_k, self.config.dedup_prefix_chars);
        let answer = self
            .synthesizer
            .synthesize(query_text, &merged, intent, &degraded_brains)
            .await;

        QueryResponse {
            answer,
            results: merged,
            intent: intent.clone(),
            degraded_brains,
            cancelled: false,
            timed_out: false,
        }
    }

    /// Vector recall anchors context, then graph expansion explores entities
    /// mentioned in that context (expertise, decision provenance,
    /// collaborations, cross-references), per spec.md §4.7's escalation
    /// algorithm. Both artifacts are handed to the synthesizer together.
    async fn execute_multi_step(
        &self,
        query_text: &str,
        intent: &QueryIntent,
        token: CancellationToken,
    ) -> QueryResponse {
        let mut degraded = Vec::new();

        let anchor = if let Some(vector) = &self.brains.vector {
            match run_with_cancellation(
                token.clone(),
                timeout(self.config.per_brain_timeout, vector.search(query_text, self.config.top_k)),
            )
            .await
            {
                Some(Ok(Ok(results))) => results,
                Some(Ok(Err(e))) => {
                    warn!(error = %e, "multi-step: vector anchor failed");
                    degraded.push("vector".to_string());
                    Vec::new()
                }
                Some(Err(_)) => {
                    warn!("multi-step: vector anchor timed out");
                    degraded.push("vector".to_string());
                    Vec::new()
                }
                None => Vec::new(),
            }
        } else {
            degraded.push("vector".to_string());
            Vec::new()
        };

        let anchor_entities = extract_anchor_entities(&anchor, intent);

        let expansion = if let Some(graph) = &self.brains.graph {
            let mut results = Vec::new();
            for entity in &anchor_entities {
                match run_with_cancellation(
                    token.clone(),
                    timeout(self.config.per_brain_timeout, graph.expertise_for(entity)),
                )
                .await
                {
                    Some(Ok(Ok(mut hits))) => results.append(&mut hits),
                    Some(Ok(Err(e))) => warn!(error = %e, entity, "multi-step: graph expansion failed"),
                    Some(Err(_)) => warn!(entity, "multi-step: graph expansion timed out"),
                    None => {}
                }
                match run_with_cancellation(
                    token.clone(),
                    timeout(self.config.per_brain_timeout, graph.decision_provenance(entity)),
                )
                .await
                {
                    Some(Ok(Ok(mut hits))) => results.append(&mut hits),
                    Some(Ok(Err(e))) => warn!(error = %e, entity, "multi-step: decision provenance lookup failed"),
                    _ => {}
                }
                match run_with_cancellation(
                    token.clone(),
                    timeout(self.config.per_brain_timeout, graph.collaborations(Some(entity))),
                )
                .await
                {
                    Some(Ok(Ok(mut hits))) => results.append(&mut hits),
                    _ => {}
                }
            }
            match run_with_cancellation(
                token.clone(),
                timeout(self.config.per_brain_timeout, graph.cross_references()),
            )
            .await
            {
                Some(Ok(Ok(mut hits))) => results.append(&mut hits),
                _ => {}
            }
            results
        } else {
            degraded.push("graph".to_string());
            Vec::new()
        };

        let mut combined = anchor;
        combined.extend(expansion);
        let merged = merge_results(combined, self.config.top_k, self.config.dedup_prefix_chars);

        let answer = self
            .synthesizer
            .synthesize_combined(query_text, &merged, intent, &degraded)
            .await;

        QueryResponse {
            answer,
            results: merged,
            intent: intent.clone(),
            degraded_brains: degraded,
            cancelled: false,
            timed_out: false,
        }
    }

    async fn dispatch(
        &self,
        query_text: &str,
        intent: &QueryIntent,
        plan: QueryPlan,
        token: CancellationToken,
    ) -> (Vec<BrainResult>, Vec<String>) {
        let mut vector_fut = None;
        let mut analytical_fut = None;
        let mut graph_fut = None;

        if plan.vector {
            if let Some(vector) = &self.brains.vector {
                vector_fut = Some(run_with_cancellation(
                    token.clone(),
                    timeout(self.config.per_brain_timeout, vector.search(query_text, self.config.top_k)),
                ));
            }
        }
        if plan.analytical {
            if let Some(analytical) = &self.brains.analytical {
                analytical_fut = Some(run_with_cancellation(
                    token.clone(),
                    timeout(self.config.per_brain_timeout, analytical.query_by_filters(&intent.metadata_filters)),
                ));
            }
        }
        if plan.graph {
            if let Some(graph) = &self.brains.graph {
                let anchor_terms: Vec<String> = intent
                    .entities
                    .iter()
                    .chain(intent.relationship_targets.iter())
                    .cloned()
                    .collect();
                graph_fut = Some(run_with_cancellation(
                    token.clone(),
                    timeout(self.config.per_brain_timeout, graph_query(graph.as_ref(), intent, &anchor_terms)),
                ));
            }
        }

        let (vector_outcome, analytical_outcome, graph_outcome) =
            tokio::join!(opt_await(vector_fut), opt_await(analytical_fut), opt_await(graph_fut));

        let mut results = Vec::new();
        let mut degraded = Vec::new();

        collect_branch("vector", plan.vector, vector_outcome, &mut results, &mut degraded);
        collect_branch("analytical", plan.analytical, analytical_outcome, &mut results, &mut degraded);
        collect_branch("graph", plan.graph, graph_outcome, &mut results, &mut degraded);

        (results, degraded)
    }
}

async fn graph_query(
    graph: &dyn nancy_core::contracts::GraphStore,
    intent: &QueryIntent,
    anchor_terms: &[String],
) -> nancy_types::error::Result<Vec<BrainResult>> {
    match intent.query_type {
        QueryType::AuthorAttribution => {
            let mut results = Vec::new();
            for entity in anchor_terms {
                results.extend(graph.authored_documents(entity).await?);
            }
            Ok(results)
        }
        QueryType::CrossReference => graph.cross_references().await,
        _ => {
            let mut results = Vec::new();
            for entity in anchor_terms {
                results.extend(graph.neighbors(entity, 1).await?);
            }
            Ok(results)
        }
    }
}

/// Races a future against cancellation. Returns `None` if the token fired
/// first; otherwise `Some` of the future's own (possibly timed-out) outcome.
async fn run_with_cancellation<F, T>(mut token: CancellationToken, fut: F) -> Option<Result<T, tokio::time::error::Elapsed>>
where
    F: std::future::Future<Output = Result<T, tokio::time::error::Elapsed>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        outcome = fut => Some(outcome),
    }
}

async fn opt_await<F, T>(fut: Option<F>) -> Option<Result<T, tokio::time::error::Elapsed>>
where
    F: std::future::Future<Output = Option<Result<T, tokio::time::error::Elapsed>>>,
{
    match fut {
        Some(fut) => fut.await,
        None => None,
    }
}

fn collect_branch(
    name: &str,
    enabled: bool,
    outcome: Option<Result<nancy_types::error::Result<Vec<BrainResult>>, tokio::time::error::Elapsed>>,
    results: &mut Vec<BrainResult>,
    degraded: &mut Vec<String>,
) {
    if !enabled {
        return;
    }
    match outcome {
        Some(Ok(Ok(hits))) => results.extend(hits),
        Some(Ok(Err(e))) => {
            warn!(brain = name, error = %e, "brain sub-query failed");
            degraded.push(name.to_string());
        }
        Some(Err(_)) => {
            warn!(brain = name, "brain sub-query timed out");
            degraded.push(name.to_string());
        }
        None => {
            debug!(brain = name, "brain sub-query cancelled or not wired up");
            degraded.push(name.to_string());
        }
    }
}

/// Vector results sort by distance ascending; analytical/graph results
/// carry a synthetic distance of 0.0, so they sort ahead of any vector hit
/// and are stable-ordered against each other by arrival order. Duplicates
/// are removed by the first `dedup_prefix_chars` of the rendered content,
/// keeping the first occurrence — matching
/// `_deduplicate_and_rank_results`'s `text[:100]` key exactly.
fn merge_results(mut results: Vec<BrainResult>, top_k: usize, dedup_prefix_chars: usize) -> Vec<BrainResult> {
    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    let mut seen = HashSet::new();
    let mut deduped = Vec::with_capacity(results.len());
    for result in results {
        let key: String = result.content.chars().take(dedup_prefix_chars).collect();
        if seen.insert(key) {
            deduped.push(result);
        }
        if deduped.len() >= top_k {
            break;
        }
    }
    deduped
}

/// Detects the "content-plus-relationships" pattern spec.md §4.7 names:
/// a query that needs both anchored textual context and a graph expansion
/// around the entities it mentions, e.g. decision provenance ("why was X
/// chosen") or a hybrid query naming concrete entities.
fn is_multi_step_query(intent: &QueryIntent) -> bool {
    if intent.query_type != QueryType::HybridComplex {
        return false;
    }
    !intent.entities.is_empty() || !intent.relationship_targets.is_empty() || !intent.semantic_terms.is_empty()
}

/// Pulls candidate entity names out of anchor chunks' metadata (populated
/// by the vector brain's `source`/`author` fields) plus whatever the intent
/// already named, for the graph-expansion phase.
fn extract_anchor_entities(anchor: &[BrainResult], intent: &QueryIntent) -> Vec<String> {
    let mut entities: Vec<String> = intent.entities.clone();
    entities.extend(intent.relationship_targets.iter().cloned());
    for result in anchor {
        if let Some(author) = result.metadata.get("author") {
            entities.push(author.clone());
        }
    }
    entities.sort();
    entities.dedup();
    entities
}
