//! The Knowledge Packet: the typed, validated intermediate representation
//! produced by extractors and consumed by the brains' storage writers.
//!
//! Grounded on the field shapes implied by `knowledge_packet_processor.py`
//! (`packet.source`, `packet.metadata`, `packet.content.{vector_data,
//! analytical_data, graph_data}`, `packet.processing_hints`) in the original
//! Nancy implementation, expressed as typed Rust structs in the style of
//! `brain_types::common`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The major packet-version this build understands. Validators reject any
/// packet whose `packet_version` major component differs.
pub const SUPPORTED_PACKET_MAJOR_VERSION: u32 = 1;

/// Top-level Knowledge Packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgePacket {
    pub packet_id: String,
    /// Stable content-addressed document identity: `sha256(filename, bytes)`
    /// computed once at ingestion (see `nancy_types::common::document_id_for`).
    /// Unlike `packet_id`, this does not change across re-extraction of the
    /// same unchanged file, so every brain write keys on this field rather
    /// than `packet_id`.
    pub document_id: String,
    pub packet_version: String,
    pub timestamp: DateTime<Utc>,
    pub source: PacketSource,
    pub metadata: PacketMetadata,
    pub content: PacketContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_hints: Option<ProcessingHints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacketSource {
    pub extractor_name: String,
    pub extractor_version: String,
    pub original_location: String,
    pub content_type: String,
    pub extraction_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PacketMetadata {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// The packet's payload. At least one sub-type must be populated — this is
/// enforced by [`KnowledgePacketValidator::validate`], not by the type
/// system, since extractors build these incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PacketContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_data: Option<VectorData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytical_data: Option<AnalyticalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_data: Option<GraphData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorData {
    pub chunks: Vec<Chunk>,
    pub embedding_model: String,
    pub chunk_strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub chunk_metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalyticalData {
    #[serde(default)]
    pub structured_fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub table_data: Vec<NamedTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series: Option<Vec<TimeSeriesPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedTable {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphData {
    #[serde(default)]
    pub entities: Vec<GraphEntity>,
    #[serde(default)]
    pub relationships: Vec<GraphRelationship>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelationship {
    pub source: GraphEntityRef,
    pub relationship: String,
    pub target: GraphEntityRef,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBrain {
    Vector,
    Analytical,
    Graph,
    Auto,
}

impl Default for PriorityBrain {
    fn default() -> Self {
        PriorityBrain::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProcessingHints {
    #[serde(default)]
    pub priority_brain: PriorityBrain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_classification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QualityMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_completeness: Option<f64>,
}

impl KnowledgePacket {
    pub fn has_vector_data(&self) -> bool {
        self.content
            .vector_data
            .as_ref()
            .is_some_and(|v| !v.chunks.is_empty())
    }

    pub fn has_analytical_data(&self) -> bool {
        match &self.content.analytical_data {
            Some(a) => {
                !a.structured_fields.is_empty()
                    || !a.table_data.is_empty()
                    || a.time_series.as_ref().is_some_and(|t| !t.is_empty())
                    || a.statistics.as_ref().is_some_and(|s| !s.is_empty())
            }
            None => false,
        }
    }

    pub fn has_graph_data(&self) -> bool {
        self.content
            .graph_data
            .as_ref()
            .is_some_and(|g| !g.entities.is_empty() || !g.relationships.is_empty())
    }
}

/// Validates Knowledge Packets against the design's schema invariants.
///
/// `validate` never panics or raises: every failure mode is surfaced as a
/// [`ValidationError`] in the returned `Vec`, so callers can report every
/// offending path in one pass rather than failing fast on the first problem.
#[derive(Debug, Default, Clone, Copy)]
pub struct KnowledgePacketValidator;

impl KnowledgePacketValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, packet: &KnowledgePacket) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if packet.packet_id.trim().is_empty() {
            errors.push(ValidationError::new("packet_id", "must not be empty"));
        }
        if packet.document_id.trim().is_empty() {
            errors.push(ValidationError::new("document_id", "must not be empty"));
        }

        match parse_major_version(&packet.packet_version) {
            Some(major) if major == SUPPORTED_PACKET_MAJOR_VERSION => {}
            Some(major) => errors.push(ValidationError::new(
                "packet_version",
                format!(
                    "unsupported major version {major}, expected {SUPPORTED_PACKET_MAJOR_VERSION}"
                ),
            )),
            None => errors.push(ValidationError::new(
                "packet_version",
                format!("malformed semver string: '{}'", packet.packet_version),
            )),
        }

        if packet.source.extractor_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "source.extractor_name",
                "must not be empty",
            ));
        }
        if packet.source.original_location.trim().is_empty() {
            errors.push(ValidationError::new(
                "source.original_location",
                "must not be empty",
            ));
        }
        if packet.metadata.title.trim().is_empty() {
            errors.push(ValidationError::new("metadata.title", "must not be empty"));
        }

        if !packet.has_vector_data() && !packet.has_analytical_data() && !packet.has_graph_data() {
            errors.push(ValidationError::new(
                "content",
                "packet must populate at least one of vector_data, analytical_data, graph_data",
            ));
        }

        if let Some(vector_data) = &packet.content.vector_data {
            for (i, chunk) in vector_data.chunks.iter().enumerate() {
                if chunk.chunk_id.trim().is_empty() {
                    errors.push(ValidationError::new(
                        format!("content.vector_data.chunks[{i}].chunk_id"),
                        "must not be empty",
                    ));
                }
            }
        }

        if let Some(graph_data) = &packet.content.graph_data {
            for (i, entity) in graph_data.entities.iter().enumerate() {
                if !(0.0..=1.0).contains(&entity.confidence) {
                    errors.push(ValidationError::new(
                        format!("content.graph_data.entities[{i}].confidence"),
                        "must be within [0.0, 1.0]",
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Parses the major component out of a `"major.minor.patch"` semver string.
/// Deliberately hand-rolled rather than pulling in a full semver crate — the
/// validator only ever needs the leading integer.
fn parse_major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> KnowledgePacket {
        KnowledgePacket {
            packet_id: "abc123".to_string(),
            document_id: "doc-abc123".to_string(),
            packet_version: "1.0.0".to_string(),
            timestamp: Utc::now(),
            source: PacketSource {
                extractor_name: "spreadsheet".to_string(),
                extractor_version: "1.0.0".to_string(),
                original_location: "components.csv".to_string(),
                content_type: "text/csv".to_string(),
                extraction_method: "pandas".to_string(),
            },
            metadata: PacketMetadata {
                title: "components.csv".to_string(),
                author: Some("Sarah Chen".to_string()),
                file_size: Some(1024),
                extra: HashMap::new(),
            },
            content: PacketContent {
                vector_data: Some(VectorData {
                    chunks: vec![Chunk {
                        chunk_id: "chunk_0".to_string(),
                        text: "component_id,owner,thermal_limit_c".to_string(),
                        chunk_metadata: HashMap::new(),
                    }],
                    embedding_model: "bge-small".to_string(),
                    chunk_strategy: "row".to_string(),
                }),
                analytical_data: None,
                graph_data: None,
            },
            processing_hints: None,
            quality_metrics: None,
        }
    }

    #[test]
    fn valid_packet_passes() {
        let validator = KnowledgePacketValidator::new();
        assert!(validator.validate(&sample_packet()).is_ok());
    }

    #[test]
    fn empty_content_is_rejected() {
        let mut p = sample_packet();
        p.content = PacketContent::default();
        let validator = KnowledgePacketValidator::new();
        let errors = validator.validate(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "content"));
    }

    #[test]
    fn empty_document_id_is_rejected() {
        let mut p = sample_packet();
        p.document_id = String::new();
        let validator = KnowledgePacketValidator::new();
        let errors = validator.validate(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "document_id"));
    }

    #[test]
    fn unknown_major_version_is_rejected() {
        let mut p = sample_packet();
        p.packet_version = "2.0.0".to_string();
        let validator = KnowledgePacketValidator::new();
        let errors = validator.validate(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "packet_version"));
    }

    #[test]
    fn malformed_version_is_rejected() {
        let mut p = sample_packet();
        p.packet_version = "not-a-version".to_string();
        let validator = KnowledgePacketValidator::new();
        let errors = validator.validate(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "packet_version"));
    }

    #[test]
    fn round_trip_serialize_deserialize_is_lossless() {
        let p = sample_packet();
        let json = serde_json::to_string(&p).expect("serialize");
        let back: KnowledgePacket = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(p, back);
    }

    #[test]
    fn has_vector_data_reflects_populated_chunks() {
        let p = sample_packet();
        assert!(p.has_vector_data());
        assert!(!p.has_analytical_data());
        assert!(!p.has_graph_data());
    }

    #[test]
    fn out_of_range_entity_confidence_is_rejected() {
        let mut p = sample_packet();
        p.content.vector_data = None;
        p.content.graph_data = Some(GraphData {
            entities: vec![GraphEntity {
                entity_type: "Person".to_string(),
                name: "Sarah Chen".to_string(),
                properties: HashMap::new(),
                confidence: 1.5,
            }],
            relationships: Vec::new(),
            context: HashMap::new(),
        });
        let validator = KnowledgePacketValidator::new();
        let errors = validator.validate(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.path.contains("confidence")));
    }
}
