//! Typed configuration schema for the Nancy system.
//!
//! These structs describe the shape of `nancy.toml`; loading the file,
//! interpolating `${VAR}` references against the environment, and applying
//! environment-variable overrides are I/O concerns and live in
//! `nancy-infra::config`. This module only defines the schema, its defaults,
//! and pure structural validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NancyConfig {
    pub nancy_core: NancyCoreConfig,
    pub orchestration: OrchestrationConfig,
    pub brains: BrainsConfig,
    pub extractors: ExtractorsConfig,
    pub security: SecurityConfig,
    pub performance: PerformanceConfig,
    pub logging: LoggingConfig,
}

impl Default for NancyConfig {
    fn default() -> Self {
        Self {
            nancy_core: NancyCoreConfig::default(),
            orchestration: OrchestrationConfig::default(),
            brains: BrainsConfig::default(),
            extractors: ExtractorsConfig::default(),
            security: SecurityConfig::default(),
            performance: PerformanceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NancyCoreConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
}

impl Default for NancyCoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            data_dir: "./data".to_string(),
        }
    }
}

/// Router/orchestrator timeout and retry policy.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub global_query_timeout_ms: u64,
    pub per_brain_timeout_ms: u64,
    pub max_escalation_steps: u32,
    pub ingestion_queue_capacity: usize,
    pub ingestion_worker_count: usize,
    /// Intent confidence below this triggers broader brain selection
    /// (spec.md §4.6/§4.7) and multi-step escalation eligibility.
    pub confidence_threshold: f64,
    /// Results kept per query after ranking/dedup (spec.md §4.7's `K`).
    pub top_k: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            global_query_timeout_ms: 10_000,
            per_brain_timeout_ms: 4_000,
            max_escalation_steps: 2,
            ingestion_queue_capacity: 256,
            ingestion_worker_count: 4,
            confidence_threshold: 0.7,
            top_k: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrainsConfig {
    pub vector: VectorBrainConfig,
    pub analytical: AnalyticalBrainConfig,
    pub graph: GraphBrainConfig,
    pub llm: LlmBrainConfig,
}

impl Default for BrainsConfig {
    fn default() -> Self {
        Self {
            vector: VectorBrainConfig::default(),
            analytical: AnalyticalBrainConfig::default(),
            graph: GraphBrainConfig::default(),
            llm: LlmBrainConfig::default(),
        }
    }
}

/// Which vector database implementation `base_url` is pointed at. Unknown
/// backend strings deserialize to `Unknown` rather than failing so
/// `validate()` can reject them with a structured error instead of a raw
/// TOML parse failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Chroma,
    #[serde(other)]
    Unknown,
}

impl Default for VectorBackend {
    fn default() -> Self {
        Self::Chroma
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VectorBrainConfig {
    pub enabled: bool,
    pub backend: VectorBackend,
    /// Base URL of the Chroma-compatible vector database HTTP API.
    pub base_url: String,
    pub collection_path: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub request_timeout_ms: u64,
}

impl Default for VectorBrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: VectorBackend::Chroma,
            base_url: "http://localhost:8000".to_string(),
            collection_path: "./data/vector".to_string(),
            embedding_model: "bge-small-en".to_string(),
            embedding_dimension: 384,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticalBackend {
    Sqlite,
    #[serde(other)]
    Unknown,
}

impl Default for AnalyticalBackend {
    fn default() -> Self {
        Self::Sqlite
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyticalBrainConfig {
    pub enabled: bool,
    pub backend: AnalyticalBackend,
    pub database_url: String,
    pub max_pool_connections: u32,
}

impl Default for AnalyticalBrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: AnalyticalBackend::Sqlite,
            database_url: "sqlite://./data/nancy.db".to_string(),
            max_pool_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GraphBackend {
    Neo4j,
    #[serde(other)]
    Unknown,
}

impl Default for GraphBackend {
    fn default() -> Self {
        Self::Neo4j
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GraphBrainConfig {
    pub enabled: bool,
    pub backend: GraphBackend,
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Default for GraphBrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: GraphBackend::Neo4j,
            uri: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LlmBrainConfig {
    pub enabled: bool,
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

impl Default for LlmBrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "gemini".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: String::new(),
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractorsConfig {
    /// Maps a content type (e.g. `"text/csv"`) to the extractor worker
    /// command that handles it.
    pub content_type_map: HashMap<String, String>,
    pub worker_startup_timeout_ms: u64,
    pub worker_request_timeout_ms: u64,
    pub max_restart_attempts: u32,
    pub restart_backoff_base_ms: u64,
}

impl Default for ExtractorsConfig {
    fn default() -> Self {
        let mut content_type_map = HashMap::new();
        content_type_map.insert("text/csv".to_string(), "nancy-extractor-spreadsheet".to_string());
        content_type_map.insert(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            "nancy-extractor-spreadsheet".to_string(),
        );
        content_type_map.insert("application/pdf".to_string(), "nancy-extractor-document".to_string());
        content_type_map.insert("text/plain".to_string(), "nancy-extractor-document".to_string());
        Self {
            content_type_map,
            worker_startup_timeout_ms: 5_000,
            worker_request_timeout_ms: 30_000,
            max_restart_attempts: 3,
            restart_backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allow_raw_sql: bool,
    pub max_upload_bytes: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_raw_sql: false,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_queries: usize,
    pub result_merge_dedup_prefix_chars: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 16,
            result_merge_dedup_prefix_chars: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl NancyConfig {
    /// Structural validation only: no I/O, no env lookups. Reachability of
    /// backends is checked separately, at lifecycle startup.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.nancy_core.port == 0 {
            errors.push(ValidationError::new("nancy_core.port", "must not be 0"));
        }
        if self.orchestration.global_query_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "orchestration.global_query_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.orchestration.per_brain_timeout_ms > self.orchestration.global_query_timeout_ms {
            errors.push(ValidationError::new(
                "orchestration.per_brain_timeout_ms",
                "must not exceed global_query_timeout_ms",
            ));
        }
        if self.orchestration.ingestion_worker_count == 0 {
            errors.push(ValidationError::new(
                "orchestration.ingestion_worker_count",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.orchestration.confidence_threshold) {
            errors.push(ValidationError::new(
                "orchestration.confidence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.orchestration.top_k == 0 {
            errors.push(ValidationError::new("orchestration.top_k", "must be at least 1"));
        }
        if !self.brains.vector.enabled
            && !self.brains.analytical.enabled
            && !self.brains.graph.enabled
        {
            errors.push(ValidationError::new(
                "brains",
                "at least one storage brain must be enabled",
            ));
        }
        if self.brains.vector.enabled && self.brains.vector.embedding_dimension == 0 {
            errors.push(ValidationError::new(
                "brains.vector.embedding_dimension",
                "must be greater than 0",
            ));
        }
        if self.brains.vector.enabled && self.brains.vector.backend == VectorBackend::Unknown {
            errors.push(ValidationError::new("brains.vector.backend", "unrecognized backend"));
        }
        if self.brains.analytical.enabled && self.brains.analytical.backend == AnalyticalBackend::Unknown {
            errors.push(ValidationError::new("brains.analytical.backend", "unrecognized backend"));
        }
        if self.brains.graph.enabled && self.brains.graph.backend == GraphBackend::Unknown {
            errors.push(ValidationError::new("brains.graph.backend", "unrecognized backend"));
        }
        if self.performance.max_concurrent_queries == 0 {
            errors.push(ValidationError::new(
                "performance.max_concurrent_queries",
                "must be at least 1",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(NancyConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut cfg = NancyConfig::default();
        cfg.nancy_core.port = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.path == "nancy_core.port"));
    }

    #[test]
    fn per_brain_timeout_exceeding_global_is_rejected() {
        let mut cfg = NancyConfig::default();
        cfg.orchestration.global_query_timeout_ms = 1_000;
        cfg.orchestration.per_brain_timeout_ms = 2_000;
        let errors = cfg.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.path == "orchestration.per_brain_timeout_ms"));
    }

    #[test]
    fn disabling_all_brains_is_rejected() {
        let mut cfg = NancyConfig::default();
        cfg.brains.vector.enabled = false;
        cfg.brains.analytical.enabled = false;
        cfg.brains.graph.enabled = false;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.path == "brains"));
    }

    #[test]
    fn unknown_vector_backend_is_rejected() {
        let mut cfg = NancyConfig::default();
        cfg.brains.vector.backend = VectorBackend::Unknown;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.path == "brains.vector.backend"));
    }

    #[test]
    fn unrecognized_backend_string_deserializes_to_unknown() {
        let toml_str = r#"
            [brains.vector]
            backend = "pinecone"
        "#;
        let cfg: NancyConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(cfg.brains.vector.backend, VectorBackend::Unknown);
    }

    #[test]
    fn deserializes_partial_toml_with_defaults_filled_in() {
        let toml_str = r#"
            [nancy_core]
            port = 9000
        "#;
        let cfg: NancyConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(cfg.nancy_core.port, 9000);
        assert_eq!(cfg.nancy_core.host, "127.0.0.1");
        assert!(cfg.brains.vector.enabled);
    }
}
