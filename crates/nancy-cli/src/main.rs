//! Thin command-line entry point for Nancy: wires configuration into the
//! four brain adapters, then dispatches to ingestion, querying, or a health
//! check.
//!
//! Grounded on `brain-cli::main`'s shape (derive-based subcommands over
//! `#[tokio::main]`, `tracing-subscriber` initialized before anything else
//! runs) with `clap::Parser` derive macros in place of the teacher's
//! builder-style `Command`/`Arg` API, matching the `ioi-local`-style
//! derive CLIs also present in the retrieved pack.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nancy_cognitive::router::{QueryOrchestrator, RouterConfig};
use nancy_cognitive::StoryExtractor;
use nancy_core::contracts::Brains;
use nancy_infra::config::load_config_file;
use nancy_infra::{
    ChromaVectorStore, ExtractorHost, ExtractorWorker, ExtractorWorkerConfig, GeminiLinguisticModel,
    GraphBrainSettings, InMemoryGraphStore, KnowledgePacketProcessor, LifecycleManager, SqliteAnalyticalStore,
};
use nancy_types::common::document_id_for;
use nancy_types::config::NancyConfig;
use nancy_types::packet::{Chunk, KnowledgePacket, PacketContent, PacketMetadata, PacketSource, VectorData};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nancy", version, about = "Multi-backend engineering knowledge base")]
struct Cli {
    #[arg(long, default_value = "nancy.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a file into the knowledge base.
    Ingest {
        path: PathBuf,
        #[arg(long)]
        author: Option<String>,
    },
    /// Ask a natural-language question.
    Query {
        text: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Report aggregated health across every configured brain.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match load_config_file(cli.config.to_string_lossy().as_ref()) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = %cli.config.display(), "no usable config file found, falling back to defaults");
            NancyConfig::default()
        }
    };

    let brains = Arc::new(build_brains(&config).await?);
    let lifecycle = LifecycleManager::new(brains.clone());
    lifecycle.mark_initializing();
    lifecycle.mark_ready();

    match cli.command {
        Commands::Ingest { path, author } => run_ingest(&config, brains, &path, author).await,
        Commands::Query { text, top_k } => run_query(&config, brains, &text, top_k).await,
        Commands::Status => run_status(&config, &lifecycle).await,
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Connects every enabled brain per `config.brains`, leaving disabled or
/// unreachable ones absent from the bundle (the router and lifecycle
/// manager both treat an absent brain the same as a disabled one).
async fn build_brains(config: &NancyConfig) -> anyhow::Result<Brains> {
    let vector = if config.brains.vector.enabled {
        match ChromaVectorStore::new(
            config.brains.vector.base_url.clone(),
            Duration::from_millis(config.brains.vector.request_timeout_ms),
        ) {
            Ok(store) => Some(Arc::new(store) as Arc<dyn nancy_core::contracts::VectorStore>),
            Err(e) => {
                error!(error = %e, "vector brain client failed to build");
                None
            }
        }
    } else {
        None
    };

    let analytical = if config.brains.analytical.enabled {
        match SqliteAnalyticalStore::connect(&config.brains.analytical.database_url).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn nancy_core::contracts::AnalyticalStore>),
            Err(e) => {
                error!(error = %e, "analytical brain unavailable at startup");
                None
            }
        }
    } else {
        None
    };

    let graph = if config.brains.graph.enabled {
        Some(Arc::new(InMemoryGraphStore::new(GraphBrainSettings {
            uri: config.brains.graph.uri.clone(),
            username: config.brains.graph.username.clone(),
            password: config.brains.graph.password.clone(),
            database: config.brains.graph.database.clone(),
        })) as Arc<dyn nancy_core::contracts::GraphStore>)
    } else {
        None
    };

    let llm = if config.brains.llm.enabled && !config.brains.llm.api_key.is_empty() {
        match GeminiLinguisticModel::new(
            config.brains.llm.base_url.clone(),
            config.brains.llm.model.clone(),
            config.brains.llm.api_key.clone(),
            Duration::from_millis(config.brains.llm.request_timeout_ms),
        ) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn nancy_core::contracts::LinguisticModel>),
            Err(e) => {
                error!(error = %e, "llm brain client failed to build");
                None
            }
        }
    } else {
        None
    };

    Ok(Brains {
        vector,
        analytical,
        graph,
        llm,
    })
}

/// Builds an [`ExtractorHost`] from `config.extractors.content_type_map`,
/// one [`ExtractorWorker`] per distinct worker command.
fn build_extractor_host(config: &NancyConfig) -> ExtractorHost {
    let mut seen = std::collections::HashSet::new();
    let mut workers = Vec::new();
    for executable in config.extractors.content_type_map.values() {
        if !seen.insert(executable.clone()) {
            continue;
        }
        let extensions: Vec<String> = config
            .extractors
            .content_type_map
            .iter()
            .filter(|(_, cmd)| *cmd == executable)
            .map(|(content_type, _)| content_type.clone())
            .collect();
        workers.push(Arc::new(ExtractorWorker::new(ExtractorWorkerConfig {
            name: executable.clone(),
            executable: executable.clone(),
            args: Vec::new(),
            environment: HashMap::new(),
            supported_extensions: extensions,
            startup_timeout: Duration::from_millis(config.extractors.worker_startup_timeout_ms),
            request_timeout: Duration::from_millis(config.extractors.worker_request_timeout_ms),
            health_check_interval: Duration::from_secs(30),
            max_restart_attempts: config.extractors.max_restart_attempts,
            restart_backoff_base: Duration::from_millis(config.extractors.restart_backoff_base_ms),
        })));
    }
    ExtractorHost::new(workers, None)
}

async fn run_ingest(
    config: &NancyConfig,
    brains: Arc<Brains>,
    path: &PathBuf,
    author: Option<String>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let document_id = document_id_for(&path.to_string_lossy(), &bytes);

    let host = build_extractor_host(config);
    let packets = match host.select_worker(&path.to_string_lossy()) {
        Ok(worker) => {
            if worker.start().await.is_err() {
                warn!(worker = worker.name(), "extractor worker failed to start, falling back to plain text ingestion");
                vec![plain_text_packet(&document_id, path, &bytes, author)]
            } else {
                worker.ingest(&path.to_string_lossy(), serde_json::json!({})).await.unwrap_or_else(|e| {
                    warn!(error = %e, "extractor worker ingest failed, falling back to plain text ingestion");
                    vec![plain_text_packet(&document_id, path, &bytes, author.clone())]
                })
            }
        }
        Err(_) => vec![plain_text_packet(&document_id, path, &bytes, author)],
    };

    let story_extractor = StoryExtractor::new(brains.llm.clone());
    let processor = Arc::new(KnowledgePacketProcessor::new((*brains).clone()));
    for mut packet in packets {
        enrich_with_story_graph(&story_extractor, &mut packet).await;
        let result = processor.process_packet(&packet).await;
        info!(
            packet_id = %result.packet_id,
            status = ?result.status,
            brains_succeeded = ?result.brains_succeeded,
            "ingested packet"
        );
        if !result.errors.is_empty() {
            for err in &result.errors {
                warn!(packet_id = %result.packet_id, error = err, "brain write failed");
            }
        }
    }

    Ok(())
}

/// Runs the story extractor over a packet's chunk text and folds the
/// resulting `Decision`/`Meeting`/`Era`/`Feature`/`Collaboration` entities
/// and relationships into the packet's graph payload, so a running ingest
/// actually produces the project-story graph nodes spec.md §4.2 describes
/// instead of just `extract_story` sitting unused.
async fn enrich_with_story_graph(story_extractor: &StoryExtractor, packet: &mut KnowledgePacket) {
    let Some(vector_data) = &packet.content.vector_data else {
        return;
    };
    let text = vector_data
        .chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        return;
    }

    let story = story_extractor.extract_story(&packet.metadata.title, &text).await;
    if story.is_empty() {
        return;
    }

    let mut story_graph = story.to_graph_data();
    match &mut packet.content.graph_data {
        Some(existing) => {
            existing.entities.append(&mut story_graph.entities);
            existing.relationships.append(&mut story_graph.relationships);
        }
        None => packet.content.graph_data = Some(story_graph),
    }
}

/// Builds a single-chunk packet directly from a file's raw bytes, used when
/// no extractor worker is registered for the file's content type (or the
/// worker is unavailable). Mirrors the shape an extractor would otherwise
/// produce for unstructured text.
fn plain_text_packet(document_id: &str, path: &PathBuf, bytes: &[u8], author: Option<String>) -> KnowledgePacket {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| document_id.to_string());
    let original_location = path.to_string_lossy().into_owned();
    let timestamp = nancy_types::common::current_timestamp();

    KnowledgePacket {
        packet_id: nancy_types::common::packet_id_for(&original_location, timestamp),
        document_id: document_id.to_string(),
        packet_version: "1.0".to_string(),
        timestamp,
        source: PacketSource {
            extractor_name: "nancy-cli-plain-text".to_string(),
            extractor_version: env!("CARGO_PKG_VERSION").to_string(),
            original_location: original_location.clone(),
            content_type: "text/plain".to_string(),
            extraction_method: "whole-file".to_string(),
        },
        metadata: PacketMetadata {
            title: filename,
            author,
            file_size: Some(bytes.len() as u64),
            extra: HashMap::new(),
        },
        content: PacketContent {
            vector_data: Some(VectorData {
                chunks: vec![Chunk {
                    chunk_id: nancy_types::common::derive_chunk_id(document_id, 0),
                    text,
                    chunk_metadata: HashMap::new(),
                }],
                embedding_model: "none".to_string(),
                chunk_strategy: "whole-file".to_string(),
            }),
            analytical_data: None,
            graph_data: None,
        },
        processing_hints: None,
        quality_metrics: None,
    }
}

async fn run_query(config: &NancyConfig, brains: Arc<Brains>, text: &str, top_k: usize) -> anyhow::Result<()> {
    let router_config = RouterConfig {
        global_query_timeout: Duration::from_millis(config.orchestration.global_query_timeout_ms),
        per_brain_timeout: Duration::from_millis(config.orchestration.per_brain_timeout_ms),
        confidence_threshold: config.orchestration.confidence_threshold,
        top_k,
        dedup_prefix_chars: config.performance.result_merge_dedup_prefix_chars,
    };
    let orchestrator = QueryOrchestrator::new(brains, router_config);
    let response = orchestrator.query(text).await;

    println!("{}", response.answer);
    if !response.degraded_brains.is_empty() {
        println!("\n(degraded brains: {})", response.degraded_brains.join(", "));
    }
    Ok(())
}

async fn run_status(config: &NancyConfig, lifecycle: &LifecycleManager) -> anyhow::Result<()> {
    let health = lifecycle
        .health(Duration::from_millis(config.orchestration.per_brain_timeout_ms))
        .await;
    println!("overall: {:?}", health.overall);
    for component in &health.components {
        println!("  {}: {} ({})", component.name, component.healthy, component.detail);
    }
    Ok(())
}
