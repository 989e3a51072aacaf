//! Common identifier types and small helpers shared across Nancy crates.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generic identifier type.
pub type Id = Uuid;

/// Document identifier, derived from the hash of (filename, bytes) at
/// ingestion time.
pub type DocumentId = String;

/// Chunk identifier, derived from the document ID plus an ordinal.
pub type ChunkId = String;

pub fn new_id() -> Id {
    Uuid::new_v4()
}

pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

pub fn default_true() -> bool {
    true
}

/// Derives a chunk id from a document id and an ordinal position, following
/// the `{packet_id}_{chunk_id}` convention used when Knowledge Packets are
/// applied to the vector brain.
pub fn derive_chunk_id(doc_id: &str, ordinal: usize) -> ChunkId {
    format!("{doc_id}_chunk_{ordinal}")
}

/// Computes the content-addressed document id for a file: the hex-encoded
/// SHA-256 of the filename followed by its raw bytes.
pub fn document_id_for(filename: &str, bytes: &[u8]) -> DocumentId {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Computes a Knowledge Packet's `packet_id`: the hex-encoded SHA-256 of the
/// source's original location followed by the packet's extraction timestamp
/// in RFC 3339 form, per spec §3.1. Distinct from [`document_id_for`]: this
/// identifies the extraction event, not the document's content.
pub fn packet_id_for(original_location: &str, extraction_timestamp: DateTime<Utc>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(original_location.as_bytes());
    hasher.update(extraction_timestamp.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_for_identical_input() {
        let a = document_id_for("report.txt", b"hello world");
        let b = document_id_for("report.txt", b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn document_id_differs_for_different_bytes() {
        let a = document_id_for("report.txt", b"hello world");
        let b = document_id_for("report.txt", b"goodbye world");
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_id_includes_ordinal() {
        assert_eq!(derive_chunk_id("doc1", 3), "doc1_chunk_3");
    }

    #[test]
    fn packet_id_is_stable_for_identical_location_and_timestamp() {
        let ts = Utc::now();
        let a = packet_id_for("components.csv", ts);
        let b = packet_id_for("components.csv", ts);
        assert_eq!(a, b);
    }

    #[test]
    fn packet_id_differs_for_different_locations() {
        let ts = Utc::now();
        let a = packet_id_for("components.csv", ts);
        let b = packet_id_for("other.csv", ts);
        assert_ne!(a, b);
    }
}
