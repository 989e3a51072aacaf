//! Cross-module query integration tests: the [`QueryOrchestrator`] driven
//! end to end against a real in-memory graph store, a real in-memory SQLite
//! analytical store, and hand-written fakes for the vector store and the
//! linguistic model (no Chroma/Gemini endpoint is reachable in tests).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nancy_cognitive::router::{QueryCancellation, QueryOrchestrator, RouterConfig};
use nancy_core::contracts::{BrainHealth, BrainResult, Brains, LinguisticModel, VectorStore};
use nancy_infra::{GraphBrainSettings, InMemoryGraphStore};
use nancy_types::error::Result;
use nancy_types::packet::VectorData;

struct FakeVectorStore {
    hits: Vec<BrainResult>,
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert(&self, _document_id: &str, _data: &VectorData) -> Result<()> {
        Ok(())
    }

    async fn delete_document(&self, _document_id: &str) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _query_text: &str, top_k: usize) -> Result<Vec<BrainResult>> {
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }

    async fn health(&self) -> Result<BrainHealth> {
        Ok(BrainHealth::ok("fake vector store"))
    }
}

/// Returns canned JSON so the Intent Analyzer never falls back to the
/// heuristic classifier, letting these tests exercise the real planning
/// path for a known intent.
struct ScriptedLlm {
    intent_json: String,
}

#[async_trait]
impl LinguisticModel for ScriptedLlm {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if system_prompt.contains("query intent classifier") {
            return Ok(self.intent_json.clone());
        }
        let _ = user_prompt;
        Ok("Sarah Chen wrote the thermal analysis report (thermal_analysis_report.txt).".to_string())
    }

    async fn health(&self) -> Result<BrainHealth> {
        Ok(BrainHealth::ok("scripted llm"))
    }
}

struct UnavailableLlm;

#[async_trait]
impl LinguisticModel for UnavailableLlm {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        Err(nancy_types::error::NancyError::LLMError("simulated outage".to_string()))
    }

    async fn health(&self) -> Result<BrainHealth> {
        Ok(BrainHealth::unhealthy("simulated outage"))
    }
}

fn graph() -> Arc<InMemoryGraphStore> {
    Arc::new(InMemoryGraphStore::new(GraphBrainSettings {
        uri: "bolt://localhost:7687".to_string(),
        username: "neo4j".to_string(),
        password: "test".to_string(),
        database: "neo4j".to_string(),
    }))
}

fn sample_hit(document_id: &str, content: &str, distance: f64) -> BrainResult {
    BrainResult {
        source_brain: "vector",
        document_id: document_id.to_string(),
        chunk_id: Some(format!("{document_id}_chunk_0")),
        content: content.to_string(),
        distance,
        metadata: HashMap::new(),
    }
}

#[tokio::test]
async fn author_attribution_query_enables_graph_and_vector() {
    use nancy_core::contracts::GraphStore;

    let graph_store = graph();
    graph_store
        .upsert_edge(
            &nancy_core::contracts::GraphNodeRef::new("Person", "Sarah Chen"),
            "AUTHORED",
            &nancy_core::contracts::GraphNodeRef::new("Document", "thermal_analysis_report.txt"),
            &HashMap::new(),
        )
        .await
        .unwrap();

    let intent_json = serde_json::json!({
        "query_type": "author_attribution",
        "semantic_terms": ["thermal", "analysis", "report"],
        "entities": ["Sarah Chen"],
        "time_constraints": null,
        "metadata_filters": {},
        "relationship_targets": ["Sarah Chen"],
        "confidence": 0.92,
        "reasoning": "asks who authored a named document"
    })
    .to_string();

    let vector = Arc::new(FakeVectorStore {
        hits: vec![sample_hit(
            "thermal_analysis_report.txt",
            "CPU temperatures exceeded 85C, prompting a redesign.",
            0.1,
        )],
    });
    let llm = Arc::new(ScriptedLlm { intent_json });

    let brains = Arc::new(Brains {
        vector: Some(vector),
        analytical: None,
        graph: Some(graph_store),
        llm: Some(llm),
    });
    let orchestrator = QueryOrchestrator::new(brains, RouterConfig::default());

    let response = orchestrator.query("Who wrote the thermal analysis report?").await;

    assert!(!response.timed_out);
    assert!(!response.cancelled);
    assert!(response.answer.contains("Sarah Chen"));
    assert!(response.results.iter().any(|r| r.source_brain == "graph"));
    assert!(response.results.iter().any(|r| r.source_brain == "vector"));
}

#[tokio::test]
async fn graph_outage_still_returns_a_degraded_but_nonempty_answer() {
    struct FailingGraph;

    #[async_trait]
    impl nancy_core::contracts::GraphStore for FailingGraph {
        async fn upsert_node(
            &self,
            _node: &nancy_core::contracts::GraphNodeRef,
            _properties: &HashMap<String, String>,
        ) -> Result<()> {
            Ok(())
        }
        async fn upsert_edge(
            &self,
            _src: &nancy_core::contracts::GraphNodeRef,
            _edge_type: &str,
            _dst: &nancy_core::contracts::GraphNodeRef,
            _properties: &HashMap<String, String>,
        ) -> Result<()> {
            Ok(())
        }
        async fn upsert_entities_and_relationships(
            &self,
            _document_id: &str,
            _data: &nancy_types::packet::GraphData,
        ) -> Result<()> {
            Ok(())
        }
        async fn delete_document(&self, _document_id: &str) -> Result<()> {
            Ok(())
        }
        async fn neighbors(&self, _entity_name: &str, _depth: u32) -> Result<Vec<BrainResult>> {
            Err(nancy_types::error::NancyError::BackendUnavailable {
                brain: "graph".to_string(),
            })
        }
        async fn authored_documents(&self, _person: &str) -> Result<Vec<BrainResult>> {
            Err(nancy_types::error::NancyError::BackendUnavailable {
                brain: "graph".to_string(),
            })
        }
        async fn decision_provenance(&self, _topic: &str) -> Result<Vec<BrainResult>> {
            Err(nancy_types::error::NancyError::BackendUnavailable {
                brain: "graph".to_string(),
            })
        }
        async fn expertise_for(&self, _topic_or_person: &str) -> Result<Vec<BrainResult>> {
            Err(nancy_types::error::NancyError::BackendUnavailable {
                brain: "graph".to_string(),
            })
        }
        async fn collaborations(&self, _person: Option<&str>) -> Result<Vec<BrainResult>> {
            Err(nancy_types::error::NancyError::BackendUnavailable {
                brain: "graph".to_string(),
            })
        }
        async fn cross_references(&self) -> Result<Vec<BrainResult>> {
            Err(nancy_types::error::NancyError::BackendUnavailable {
                brain: "graph".to_string(),
            })
        }
        async fn health(&self) -> Result<BrainHealth> {
            Ok(BrainHealth::unhealthy("simulated outage"))
        }
    }

    let intent_json = serde_json::json!({
        "query_type": "cross_reference",
        "semantic_terms": ["heat", "sink"],
        "entities": [],
        "time_constraints": null,
        "metadata_filters": {},
        "relationship_targets": ["heat sink"],
        "confidence": 0.8,
        "reasoning": "asks about cross-referenced documents"
    })
    .to_string();

    let vector = Arc::new(FakeVectorStore {
        hits: vec![sample_hit("heat_sink_design.pdf", "Aluminum chosen for heat sink.", 0.2)],
    });
    let llm = Arc::new(ScriptedLlm { intent_json });

    let brains = Arc::new(Brains {
        vector: Some(vector),
        analytical: None,
        graph: Some(Arc::new(FailingGraph)),
        llm: Some(llm),
    });
    let orchestrator = QueryOrchestrator::new(brains, RouterConfig::default());

    let response = orchestrator.query("What references the heat sink design?").await;

    assert!(!response.results.is_empty(), "vector results should still come back");
    assert!(response.degraded_brains.iter().any(|b| b == "graph"));
}

#[tokio::test]
async fn cancelling_mid_query_returns_promptly_with_cancelled_marker() {
    let vector = Arc::new(FakeVectorStore { hits: Vec::new() });
    let llm = Arc::new(UnavailableLlm);
    let brains = Arc::new(Brains {
        vector: Some(vector),
        analytical: None,
        graph: Some(graph()),
        llm: Some(llm),
    });
    let config = RouterConfig {
        global_query_timeout: Duration::from_secs(5),
        per_brain_timeout: Duration::from_secs(5),
        ..RouterConfig::default()
    };
    let orchestrator = QueryOrchestrator::new(brains, config);
    let (cancellation, token) = QueryCancellation::new();
    cancellation.cancel();

    let response = orchestrator.run_cancellable("Who collaborated on the power budget?", token).await;

    assert!(response.cancelled);
}

#[tokio::test]
async fn malformed_llm_output_falls_back_to_heuristic_intent_with_low_confidence() {
    struct GarbageLlm;

    #[async_trait]
    impl LinguisticModel for GarbageLlm {
        async fn complete(&self, system_prompt: &str, _user_prompt: &str) -> Result<String> {
            if system_prompt.contains("query intent classifier") {
                return Ok("Here is the JSON: {not valid at all".to_string());
            }
            Ok("fallback summary".to_string())
        }
        async fn health(&self) -> Result<BrainHealth> {
            Ok(BrainHealth::ok("garbage llm"))
        }
    }

    let vector = Arc::new(FakeVectorStore { hits: Vec::new() });
    let brains = Arc::new(Brains {
        vector: Some(vector),
        analytical: None,
        graph: Some(graph()),
        llm: Some(Arc::new(GarbageLlm)),
    });
    let orchestrator = QueryOrchestrator::new(brains, RouterConfig::default());

    let response = orchestrator.query("What documents mention the power budget?").await;

    assert!(response.intent.confidence < 0.7);
    assert_eq!(response.intent.reasoning, "fallback");
}
