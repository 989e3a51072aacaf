//! Brain contracts: the storage and language-model abstractions every
//! backend implementation in `nancy-infra` must satisfy.
//!
//! These traits describe domain behavior only, with no I/O performed here.
//! Every contract is consulted through `Arc<dyn Trait>` in the [`Brains`]
//! bundle, so methods are boxed through `async-trait` (following the
//! teacher's `brain_core::memory::Memory` trait) rather than native
//! `async fn`, which isn't dyn-compatible.

use std::collections::HashMap;

use async_trait::async_trait;
use nancy_types::{
    error::Result,
    intent::QueryIntent,
    packet::{AnalyticalData, GraphData, VectorData},
    storage::{DocumentMetadataRecord, DocumentQueryFilter, DocumentRecord, FileStateObservation},
};

/// Liveness/readiness report shared by every brain contract.
#[derive(Debug, Clone, PartialEq)]
pub struct BrainHealth {
    pub healthy: bool,
    pub detail: String,
}

impl BrainHealth {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// A single scored hit returned by a brain in response to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct BrainResult {
    pub source_brain: &'static str,
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub content: String,
    pub distance: f64,
    pub metadata: std::collections::HashMap<String, String>,
}

/// The semantic/embedding store. Implemented over a local vector index in
/// `nancy-infra`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, document_id: &str, data: &VectorData) -> Result<()>;
    async fn delete_document(&self, document_id: &str) -> Result<()>;
    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<BrainResult>>;
    async fn health(&self) -> Result<BrainHealth>;
}

/// The structured/relational store. Implemented over SQLite in
/// `nancy-infra`.
///
/// `upsert`/`delete_document` apply a packet's `analytical_data` fragment
/// (structured fields, tables, statistics); the remaining methods implement
/// spec.md §4.2's document registry, spreadsheet registry, and directory
/// change-detection surface, which exist independently of any one packet.
#[async_trait]
pub trait AnalyticalStore: Send + Sync {
    async fn upsert(&self, document_id: &str, data: &AnalyticalData) -> Result<()>;
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Idempotent on `doc_id`: re-ingesting the same document updates the
    /// existing row rather than inserting a duplicate (spec.md Testable
    /// Property 4).
    async fn upsert_document_metadata(&self, record: &DocumentMetadataRecord) -> Result<()>;

    /// Registers one extracted table against a document, normalizing its
    /// column names to an identifier-safe form
    /// ([`nancy_types::storage::normalize_column_name`]).
    async fn register_table(
        &self,
        document_id: &str,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<serde_json::Value>],
    ) -> Result<()>;

    async fn query_documents(&self, filter: &DocumentQueryFilter) -> Result<Vec<DocumentRecord>>;

    async fn query_by_filters(&self, filters: &HashMap<String, String>) -> Result<Vec<BrainResult>>;

    /// Executes a read-only SQL statement verbatim. This is the design's
    /// "escape hatch" (spec.md §4.2); per the Open Question resolution in
    /// DESIGN.md it is restricted to internal callers (the packet
    /// processor and router), never exposed on an external-facing surface,
    /// and gated by `SecurityConfig::allow_raw_sql` at the call site.
    async fn query_sql(&self, sql: &str) -> Result<Vec<BrainResult>>;

    /// Upserts an observation of a file on disk and reports whether it
    /// changed: the content hash differs from the stored one, or the
    /// file's prior processing status was not `completed` (spec.md
    /// Testable Property 6).
    async fn upsert_file_state(&self, observation: &FileStateObservation) -> Result<bool>;

    /// Marks a previously observed file's processing outcome, so the next
    /// `upsert_file_state` call can tell whether the file was left in a
    /// completed state. Supplemental to spec.md's `upsert_file_state`
    /// signature, since tracking "prior processing_status" (Testable
    /// Property 6) requires a write distinct from the observation itself.
    async fn mark_file_processed(&self, path: &str, completed: bool, error_message: Option<&str>) -> Result<()>;

    async fn health(&self) -> Result<BrainHealth>;
}

/// A (label, name) pair identifying a graph node, used by [`GraphStore`]'s
/// node/edge operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphNodeRef {
    pub label: String,
    pub name: String,
}

impl GraphNodeRef {
    pub fn new(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
        }
    }
}

/// The entity/relationship store. Implemented in-memory with a
/// TODO-gated path to a real graph database in `nancy-infra`, following the
/// same pattern the teacher's concept graph manager uses.
///
/// `upsert_node`/`upsert_edge` are the MERGE-semantics primitives spec.md
/// §4.2 names directly; `upsert_entities_and_relationships` is the bulk
/// packet-application convenience the Packet Processor calls, built on top
/// of them.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// MERGE semantics on `(label, name)`: repeated calls with the same key
    /// produce one node, with `properties` overwritten by the last write
    /// (spec.md Testable Property 5).
    async fn upsert_node(&self, node: &GraphNodeRef, properties: &HashMap<String, String>) -> Result<()>;

    /// MERGE semantics on `(src, edge_type, dst)`: repeated calls with the
    /// same key produce one edge, with `properties` overwritten by the
    /// last write.
    async fn upsert_edge(
        &self,
        src: &GraphNodeRef,
        edge_type: &str,
        dst: &GraphNodeRef,
        properties: &HashMap<String, String>,
    ) -> Result<()>;

    async fn upsert_entities_and_relationships(&self, document_id: &str, data: &GraphData) -> Result<()>;
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    async fn neighbors(&self, entity_name: &str, depth: u32) -> Result<Vec<BrainResult>>;

    /// Documents a person authored: MENTIONED_IN/AUTHORED edges rooted at
    /// a `Person` node, per spec.md S2.
    async fn authored_documents(&self, person: &str) -> Result<Vec<BrainResult>>;

    /// Decision provenance for a topic: the DECISION_MADE/INFLUENCED_BY
    /// chain leading to a `Decision` node, per spec.md S3.
    async fn decision_provenance(&self, topic: &str) -> Result<Vec<BrainResult>>;

    /// People/documents connected to a topic or person through
    /// DISCUSSES/REQUIRES/CONSTRAINS edges, approximating "expertise".
    async fn expertise_for(&self, topic_or_person: &str) -> Result<Vec<BrainResult>>;

    /// COLLABORATES_WITH edges, optionally anchored at one person.
    async fn collaborations(&self, person: Option<&str>) -> Result<Vec<BrainResult>>;

    /// Documents that REFERENCES one another.
    async fn cross_references(&self) -> Result<Vec<BrainResult>>;

    async fn health(&self) -> Result<BrainHealth>;
}

/// The linguistic model brain: intent analysis and response synthesis are
/// layered on top of this in `nancy-cognitive`; this trait only covers the
/// raw completion call.
#[async_trait]
pub trait LinguisticModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
    async fn health(&self) -> Result<BrainHealth>;
}

/// Bundle of brains a [`crate::routing::BrainRouter`] dispatches against.
/// Any subset may be absent; the router treats an absent brain the same as
/// a disabled one. Cloning is shallow (each field is an `Arc`), so the same
/// bundle can be handed to the packet processor, the lifecycle manager, and
/// the query orchestrator independently.
#[derive(Clone)]
pub struct Brains {
    pub vector: Option<std::sync::Arc<dyn VectorStore>>,
    pub analytical: Option<std::sync::Arc<dyn AnalyticalStore>>,
    pub graph: Option<std::sync::Arc<dyn GraphStore>>,
    pub llm: Option<std::sync::Arc<dyn LinguisticModel>>,
}

impl Default for Brains {
    fn default() -> Self {
        Self {
            vector: None,
            analytical: None,
            graph: None,
            llm: None,
        }
    }
}

/// Convenience used by the Router when deciding which brains a
/// [`QueryIntent`] should consult, restricted to the brains actually wired
/// up in this [`Brains`] bundle.
impl Brains {
    pub fn available_for(&self, intent: &QueryIntent) -> Vec<&'static str> {
        intent
            .query_type
            .default_brains()
            .iter()
            .copied()
            .filter(|brain| self.is_available(brain))
            .collect()
    }

    pub fn is_available(&self, brain: &str) -> bool {
        match brain {
            "vector" => self.vector.is_some(),
            "analytical" => self.analytical.is_some(),
            "graph" => self.graph.is_some(),
            "llm" => self.llm.is_some(),
            _ => false,
        }
    }
}
