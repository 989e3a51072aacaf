//! Ingestion routing policy: decides which storage brains a Knowledge
//! Packet should be written to.
//!
//! A direct port of `BrainRouter.determine_routing` /
//! `_auto_detect_routing` from the original implementation's packet
//! processor: an explicit `priority_brain` hint routes to that brain alone,
//! `auto` (or no hint at all) unions whichever sub-payloads the packet
//! actually populated, and a packet with none of the three falls back to
//! the vector brain so plain text is never silently dropped.

use nancy_types::packet::{KnowledgePacket, PriorityBrain};

/// Which brains a packet should be written to. Metadata is recorded for
/// every packet unconditionally, mirroring the original's
/// `routing["metadata"] = True` default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingDecision {
    pub vector: bool,
    pub analytical: bool,
    pub graph: bool,
    pub metadata: bool,
}

impl RoutingDecision {
    pub fn any_storage_brain(&self) -> bool {
        self.vector || self.analytical || self.graph
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BrainRouter;

impl BrainRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn determine_routing(&self, packet: &KnowledgePacket) -> RoutingDecision {
        let mut decision = RoutingDecision {
            metadata: true,
            ..Default::default()
        };

        let priority = packet
            .processing_hints
            .as_ref()
            .map(|h| h.priority_brain)
            .unwrap_or(PriorityBrain::Auto);

        match priority {
            PriorityBrain::Vector => decision.vector = true,
            PriorityBrain::Analytical => decision.analytical = true,
            PriorityBrain::Graph => decision.graph = true,
            PriorityBrain::Auto => self.auto_detect_routing(packet, &mut decision),
        }

        decision
    }

    fn auto_detect_routing(&self, packet: &KnowledgePacket, decision: &mut RoutingDecision) {
        decision.vector = packet.has_vector_data();
        decision.analytical = packet.has_analytical_data();
        decision.graph = packet.has_graph_data();

        if !decision.any_storage_brain() {
            decision.vector = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nancy_types::packet::{
        Chunk, PacketContent, PacketMetadata, PacketSource, ProcessingHints, VectorData,
    };
    use std::collections::HashMap;

    fn base_packet() -> KnowledgePacket {
        KnowledgePacket {
            packet_id: "p1".to_string(),
            document_id: "doc1".to_string(),
            packet_version: "1.0.0".to_string(),
            timestamp: chrono::Utc::now(),
            source: PacketSource {
                extractor_name: "test".to_string(),
                extractor_version: "1.0.0".to_string(),
                original_location: "test.txt".to_string(),
                content_type: "text/plain".to_string(),
                extraction_method: "test".to_string(),
            },
            metadata: PacketMetadata {
                title: "test.txt".to_string(),
                author: None,
                file_size: None,
                extra: HashMap::new(),
            },
            content: PacketContent::default(),
            processing_hints: None,
            quality_metrics: None,
        }
    }

    #[test]
    fn empty_content_with_no_hints_falls_back_to_vector() {
        let packet = base_packet();
        let decision = BrainRouter::new().determine_routing(&packet);
        assert!(decision.vector);
        assert!(!decision.analytical);
        assert!(!decision.graph);
        assert!(decision.metadata);
    }

    #[test]
    fn explicit_priority_brain_overrides_populated_content() {
        let mut packet = base_packet();
        packet.content.vector_data = Some(VectorData {
            chunks: vec![Chunk {
                chunk_id: "c0".to_string(),
                text: "hello".to_string(),
                chunk_metadata: HashMap::new(),
            }],
            embedding_model: "bge-small".to_string(),
            chunk_strategy: "fixed".to_string(),
        });
        packet.processing_hints = Some(ProcessingHints {
            priority_brain: nancy_types::packet::PriorityBrain::Analytical,
            semantic_weight: None,
            content_classification: None,
        });

        let decision = BrainRouter::new().determine_routing(&packet);
        assert!(!decision.vector, "priority hint should suppress auto-detected vector routing");
        assert!(decision.analytical);
        assert!(!decision.graph);
    }

    #[test]
    fn auto_hint_unions_all_populated_sub_types() {
        let mut packet = base_packet();
        packet.content.vector_data = Some(VectorData {
            chunks: vec![Chunk {
                chunk_id: "c0".to_string(),
                text: "hello".to_string(),
                chunk_metadata: HashMap::new(),
            }],
            embedding_model: "bge-small".to_string(),
            chunk_strategy: "fixed".to_string(),
        });
        packet.content.analytical_data = Some(nancy_types::packet::AnalyticalData {
            structured_fields: {
                let mut m = HashMap::new();
                m.insert("owner".to_string(), serde_json::json!("Sarah Chen"));
                m
            },
            table_data: Vec::new(),
            time_series: None,
            statistics: None,
        });
        packet.processing_hints = Some(ProcessingHints {
            priority_brain: nancy_types::packet::PriorityBrain::Auto,
            semantic_weight: None,
            content_classification: None,
        });

        let decision = BrainRouter::new().determine_routing(&packet);
        assert!(decision.vector);
        assert!(decision.analytical);
        assert!(!decision.graph);
    }
}
