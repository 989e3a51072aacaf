//! Graph brain: entity and relationship storage.
//!
//! Grounded on `brain_infra::concepts::ConceptGraphManager`: an in-memory
//! `HashMap` fallback with the Neo4j call left as a `TODO`, since neither
//! this repo nor the original Nancy implementation ships a live graph
//! database dependency. Unlike the teacher's manager, whose repository
//! trait takes `&mut self`, the `GraphStore` contract takes `&self` (brains
//! are shared behind an `Arc` across concurrent router fan-out), so
//! mutation goes through an internal `RwLock`.
//!
//! `upsert_node`/`upsert_edge` key on `(label, name)` and `(src, type, dst)`
//! respectively, giving the MERGE semantics spec.md Testable Property 5
//! requires: repeated upserts of the same key overwrite properties in
//! place instead of accumulating duplicates.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use nancy_core::contracts::{BrainHealth, BrainResult, GraphNodeRef, GraphStore};
use nancy_types::error::Result;
use nancy_types::packet::GraphData;

/// The canonical node/edge labels from spec.md §3's foundational graph
/// schema. Kept as constants rather than an enum since the in-memory store
/// treats labels/edge types as opaque strings; the original producer of
/// these packets (the extractors) is the source of truth for the set.
pub mod schema {
    pub const NODE_PERSON: &str = "Person";
    pub const NODE_DOCUMENT: &str = "Document";
    pub const NODE_DECISION: &str = "Decision";
    pub const NODE_FEATURE: &str = "Feature";
    pub const NODE_CONCEPT: &str = "Concept";
    pub const NODE_MEETING: &str = "Meeting";
    pub const NODE_ERA: &str = "Era";
    pub const NODE_TECHNICAL_CONCEPT: &str = "TechnicalConcept";
    pub const NODE_DECISION_TARGET: &str = "DecisionTarget";

    pub const EDGE_AUTHORED: &str = "AUTHORED";
    pub const EDGE_MENTIONED_IN: &str = "MENTIONED_IN";
    pub const EDGE_REFERENCES: &str = "REFERENCES";
    pub const EDGE_DISCUSSES: &str = "DISCUSSES";
    pub const EDGE_DECISION_MADE: &str = "DECISION_MADE";
    pub const EDGE_INFLUENCED_BY: &str = "INFLUENCED_BY";
    pub const EDGE_LED_TO: &str = "LED_TO";
    pub const EDGE_RESULTED_IN: &str = "RESULTED_IN";
    pub const EDGE_CREATED_IN: &str = "CREATED_IN";
    pub const EDGE_AFFECTS: &str = "AFFECTS";
    pub const EDGE_INFLUENCES: &str = "INFLUENCES";
    pub const EDGE_CONSTRAINS: &str = "CONSTRAINS";
    pub const EDGE_DEPENDS_ON: &str = "DEPENDS_ON";
    pub const EDGE_COLLABORATES_WITH: &str = "COLLABORATES_WITH";
    pub const EDGE_REQUIRES: &str = "REQUIRES";
}

#[derive(Debug, Clone)]
struct Node {
    properties: HashMap<String, String>,
    document_ids: HashSet<String>,
}

#[derive(Debug, Clone)]
struct Edge {
    src: GraphNodeRef,
    edge_type: String,
    dst: GraphNodeRef,
    properties: HashMap<String, String>,
    document_ids: HashSet<String>,
}

/// Configuration for a future Neo4j-backed graph brain. Held but unused
/// today; kept so `NancyConfig::brains::graph` has somewhere concrete to
/// land once a real driver is wired in.
#[derive(Debug, Clone)]
pub struct GraphBrainSettings {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

pub struct InMemoryGraphStore {
    #[allow(dead_code)]
    settings: GraphBrainSettings,
    nodes: RwLock<HashMap<GraphNodeRef, Node>>,
    edges: RwLock<Vec<Edge>>,
}

impl InMemoryGraphStore {
    pub fn new(settings: GraphBrainSettings) -> Self {
        Self {
            settings,
            nodes: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
        }
    }

    fn upsert_node_for(&self, node: &GraphNodeRef, properties: &HashMap<String, String>, document_id: &str) {
        let mut nodes = self.nodes.write().expect("graph node lock poisoned");
        let entry = nodes.entry(node.clone()).or_insert_with(|| Node {
            properties: HashMap::new(),
            document_ids: HashSet::new(),
        });
        entry.properties.extend(properties.clone());
        entry.document_ids.insert(document_id.to_string());
    }

    fn upsert_edge_for(
        &self,
        src: &GraphNodeRef,
        edge_type: &str,
        dst: &GraphNodeRef,
        properties: &HashMap<String, String>,
        document_id: &str,
    ) {
        let mut edges = self.edges.write().expect("graph edge lock poisoned");
        if let Some(existing) = edges
            .iter_mut()
            .find(|e| &e.src == src && e.edge_type == edge_type && &e.dst == dst)
        {
            existing.properties.extend(properties.clone());
            existing.document_ids.insert(document_id.to_string());
        } else {
            let mut document_ids = HashSet::new();
            document_ids.insert(document_id.to_string());
            edges.push(Edge {
                src: src.clone(),
                edge_type: edge_type.to_string(),
                dst: dst.clone(),
                properties: properties.clone(),
                document_ids,
            });
        }
    }

    fn edges_matching(&self, edge_type: &str, name: Option<&str>) -> Vec<BrainResult> {
        let edges = self.edges.read().expect("graph edge lock poisoned");
        edges
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .filter(|e| match name {
                None => true,
                Some(n) => e.src.name == n || e.dst.name == n,
            })
            .flat_map(|e| e.document_ids.iter().map(move |doc_id| edge_to_result(e, doc_id)))
            .collect()
    }
}

fn edge_to_result(edge: &Edge, document_id: &str) -> BrainResult {
    BrainResult {
        source_brain: "graph",
        document_id: document_id.to_string(),
        chunk_id: None,
        content: format!(
            "{} ({}) --{}--> {} ({})",
            edge.src.name, edge.src.label, edge.edge_type, edge.dst.name, edge.dst.label
        ),
        distance: 0.0,
        metadata: edge.properties.clone(),
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, node: &GraphNodeRef, properties: &HashMap<String, String>) -> Result<()> {
        self.upsert_node_for(node, properties, "");
        Ok(())
    }

    async fn upsert_edge(
        &self,
        src: &GraphNodeRef,
        edge_type: &str,
        dst: &GraphNodeRef,
        properties: &HashMap<String, String>,
    ) -> Result<()> {
        self.upsert_edge_for(src, edge_type, dst, properties, "");
        Ok(())
    }

    async fn upsert_entities_and_relationships(&self, document_id: &str, data: &GraphData) -> Result<()> {
        for entity in &data.entities {
            let node = GraphNodeRef::new(entity.entity_type.clone(), entity.name.clone());
            self.upsert_node_for(&node, &entity.properties, document_id);
        }

        for rel in &data.relationships {
            let src = GraphNodeRef::new(rel.source.entity_type.clone(), rel.source.name.clone());
            let dst = GraphNodeRef::new(rel.target.entity_type.clone(), rel.target.name.clone());
            self.upsert_edge_for(&src, &rel.relationship, &dst, &rel.properties, document_id);
        }

        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut nodes = self.nodes.write().expect("graph node lock poisoned");
        nodes.retain(|_, node| {
            node.document_ids.remove(document_id);
            !node.document_ids.is_empty()
        });
        drop(nodes);

        let mut edges = self.edges.write().expect("graph edge lock poisoned");
        edges.retain_mut(|edge| {
            edge.document_ids.remove(document_id);
            !edge.document_ids.is_empty()
        });
        Ok(())
    }

    async fn neighbors(&self, entity_name: &str, depth: u32) -> Result<Vec<BrainResult>> {
        let edges = self.edges.read().expect("graph edge lock poisoned");

        let mut frontier: Vec<String> = vec![entity_name.to_string()];
        let mut visited = HashSet::new();
        visited.insert(entity_name.to_string());
        let mut results = Vec::new();

        for _ in 0..depth.max(1) {
            let mut next_frontier = Vec::new();
            for name in &frontier {
                for edge in edges.iter() {
                    let neighbor = if &edge.src.name == name {
                        Some(edge.dst.name.clone())
                    } else if &edge.dst.name == name {
                        Some(edge.src.name.clone())
                    } else {
                        None
                    };
                    if let Some(neighbor) = neighbor {
                        if visited.insert(neighbor.clone()) {
                            for doc_id in &edge.document_ids {
                                results.push(edge_to_result(edge, doc_id));
                            }
                            next_frontier.push(neighbor);
                        }
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        Ok(results)
    }

    async fn authored_documents(&self, person: &str) -> Result<Vec<BrainResult>> {
        Ok(self.edges_matching(schema::EDGE_AUTHORED, Some(person)))
    }

    async fn decision_provenance(&self, topic: &str) -> Result<Vec<BrainResult>> {
        let mut results = Vec::new();
        for edge_type in [
            schema::EDGE_DECISION_MADE,
            schema::EDGE_INFLUENCED_BY,
            schema::EDGE_LED_TO,
            schema::EDGE_RESULTED_IN,
        ] {
            results.extend(self.edges_matching(edge_type, Some(topic)));
        }
        Ok(results)
    }

    async fn expertise_for(&self, topic_or_person: &str) -> Result<Vec<BrainResult>> {
        let mut results = Vec::new();
        for edge_type in [schema::EDGE_DISCUSSES, schema::EDGE_REQUIRES, schema::EDGE_CONSTRAINS] {
            results.extend(self.edges_matching(edge_type, Some(topic_or_person)));
        }
        Ok(results)
    }

    async fn collaborations(&self, person: Option<&str>) -> Result<Vec<BrainResult>> {
        Ok(self.edges_matching(schema::EDGE_COLLABORATES_WITH, person))
    }

    async fn cross_references(&self) -> Result<Vec<BrainResult>> {
        Ok(self.edges_matching(schema::EDGE_REFERENCES, None))
    }

    async fn health(&self) -> Result<BrainHealth> {
        Ok(BrainHealth::ok("in-memory graph store (no Neo4j driver configured)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nancy_types::packet::{GraphEntity, GraphEntityRef, GraphRelationship};

    fn settings() -> GraphBrainSettings {
        GraphBrainSettings {
            uri: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }

    fn sample_data() -> GraphData {
        GraphData {
            entities: vec![
                GraphEntity {
                    entity_type: "Person".to_string(),
                    name: "Sarah Chen".to_string(),
                    properties: HashMap::new(),
                    confidence: 1.0,
                },
                GraphEntity {
                    entity_type: "Component".to_string(),
                    name: "PCB-001".to_string(),
                    properties: HashMap::new(),
                    confidence: 1.0,
                },
            ],
            relationships: vec![GraphRelationship {
                source: GraphEntityRef {
                    entity_type: "Person".to_string(),
                    name: "Sarah Chen".to_string(),
                },
                relationship: "designed".to_string(),
                target: GraphEntityRef {
                    entity_type: "Component".to_string(),
                    name: "PCB-001".to_string(),
                },
                properties: HashMap::new(),
            }],
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn neighbors_returns_direct_relationship() {
        let store = InMemoryGraphStore::new(settings());
        store.upsert_entities_and_relationships("doc1", &sample_data()).await.unwrap();

        let neighbors = store.neighbors("Sarah Chen", 1).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert!(neighbors[0].content.contains("PCB-001"));
    }

    #[tokio::test]
    async fn delete_document_removes_its_entities_and_relationships() {
        let store = InMemoryGraphStore::new(settings());
        store.upsert_entities_and_relationships("doc1", &sample_data()).await.unwrap();
        store.delete_document("doc1").await.unwrap();

        let neighbors = store.neighbors("Sarah Chen", 1).await.unwrap();
        assert!(neighbors.is_empty());
    }

    #[tokio::test]
    async fn health_is_always_ok_for_in_memory_store() {
        let store = InMemoryGraphStore::new(settings());
        let health = store.health().await.unwrap();
        assert!(health.healthy);
    }

    #[tokio::test]
    async fn repeated_upsert_of_same_edge_produces_one_edge() {
        let store = InMemoryGraphStore::new(settings());
        store.upsert_entities_and_relationships("doc1", &sample_data()).await.unwrap();
        store.upsert_entities_and_relationships("doc2", &sample_data()).await.unwrap();

        let neighbors = store.neighbors("Sarah Chen", 1).await.unwrap();
        // Same edge observed from two documents: one logical edge, two result
        // rows (one per contributing document), never a duplicated edge per doc.
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.iter().all(|r| r.content.contains("PCB-001")));
    }

    #[tokio::test]
    async fn upsert_node_overwrites_properties_on_repeat() {
        let store = InMemoryGraphStore::new(settings());
        let node = GraphNodeRef::new("Person", "Sarah Chen");
        let mut props = HashMap::new();
        props.insert("role".to_string(), "engineer".to_string());
        store.upsert_node(&node, &props).await.unwrap();

        let mut updated = HashMap::new();
        updated.insert("role".to_string(), "lead engineer".to_string());
        store.upsert_node(&node, &updated).await.unwrap();

        let nodes = store.nodes.read().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes.get(&node).unwrap().properties.get("role").unwrap(), "lead engineer");
    }

    #[tokio::test]
    async fn authored_documents_filters_by_edge_type_and_person() {
        let store = InMemoryGraphStore::new(settings());
        let sarah = GraphNodeRef::new(schema::NODE_PERSON, "Sarah Chen");
        let doc = GraphNodeRef::new(schema::NODE_DOCUMENT, "design_review.pdf");
        store.upsert_edge(&sarah, schema::EDGE_AUTHORED, &doc, &HashMap::new()).await.unwrap();
        store
            .upsert_edge(
                &sarah,
                schema::EDGE_DISCUSSES,
                &GraphNodeRef::new(schema::NODE_CONCEPT, "thermal limits"),
                &HashMap::new(),
            )
            .await
            .unwrap();

        let results = store.authored_documents("Sarah Chen").await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("design_review.pdf"));
    }

    #[tokio::test]
    async fn cross_references_returns_all_references_edges() {
        let store = InMemoryGraphStore::new(settings());
        let a = GraphNodeRef::new(schema::NODE_DOCUMENT, "a.pdf");
        let b = GraphNodeRef::new(schema::NODE_DOCUMENT, "b.pdf");
        store.upsert_edge(&a, schema::EDGE_REFERENCES, &b, &HashMap::new()).await.unwrap();

        let results = store.cross_references().await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
