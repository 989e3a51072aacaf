//! Packet Processor: validates, routes, and writes a Knowledge Packet to
//! its selected brains, plus the bounded ingestion queue in front of it.
//!
//! Grounded on `knowledge_packet_processor.py`'s `KnowledgePacketProcessor`
//! and `PacketProcessingQueue`: per-brain writes run independently so one
//! backend's failure doesn't abort the others, hooks run before and after
//! processing, and running metrics (`total_processed`, `total_failed`,
//! per-packet latency) are tracked. Unlike the original, which only
//! distinguishes `COMPLETED`/`FAILED`, the packet is reported as
//! `Completed` (every routed brain succeeded), `Partial` (some failed), or
//! `Failed` (every routed brain failed), matching the design's
//! three-way status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nancy_core::contracts::Brains;
use nancy_core::routing::{BrainRouter, RoutingDecision};
use nancy_types::error::NancyError;
use nancy_types::packet::{KnowledgePacket, KnowledgePacketValidator};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PacketProcessingResult {
    pub packet_id: String,
    pub status: ProcessingStatus,
    pub message: String,
    pub brains_attempted: Vec<&'static str>,
    pub brains_succeeded: Vec<&'static str>,
    pub errors: Vec<String>,
    pub processing_time: Duration,
}

type PreHook = Arc<dyn Fn(&KnowledgePacket) + Send + Sync>;
type PostHook = Arc<dyn Fn(&KnowledgePacket, &PacketProcessingResult) + Send + Sync>;

#[derive(Default)]
struct Metrics {
    total_processed: u64,
    total_failed: u64,
    processing_times: Vec<Duration>,
}

/// Validates, routes, and writes Knowledge Packets to the enabled brains.
pub struct KnowledgePacketProcessor {
    brains: Brains,
    router: BrainRouter,
    validator: KnowledgePacketValidator,
    pre_hooks: Vec<PreHook>,
    post_hooks: Vec<PostHook>,
    metrics: Mutex<Metrics>,
}

impl KnowledgePacketProcessor {
    pub fn new(brains: Brains) -> Self {
        Self {
            brains,
            router: BrainRouter::new(),
            validator: KnowledgePacketValidator::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            metrics: Mutex::new(Metrics::default()),
        }
    }

    pub fn add_pre_processing_hook(&mut self, hook: PreHook) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_processing_hook(&mut self, hook: PostHook) {
        self.post_hooks.push(hook);
    }

    pub async fn process_packet(&self, packet: &KnowledgePacket) -> PacketProcessingResult {
        let start = Instant::now();

        for hook in &self.pre_hooks {
            hook(packet);
        }

        if let Err(validation_errors) = self.validator.validate(packet) {
            let errors: Vec<String> = validation_errors.iter().map(|e| e.to_string()).collect();
            warn!(packet_id = %packet.packet_id, ?errors, "packet failed validation");
            let result = PacketProcessingResult {
                packet_id: packet.packet_id.clone(),
                status: ProcessingStatus::Failed,
                message: "packet failed schema validation".to_string(),
                brains_attempted: Vec::new(),
                brains_succeeded: Vec::new(),
                errors,
                processing_time: start.elapsed(),
            };
            self.record_outcome(&result).await;
            return result;
        }

        let routing = self.router.determine_routing(packet);
        let (attempted, succeeded, errors) = self.write_to_brains(packet, routing).await;

        let status = if errors.is_empty() {
            ProcessingStatus::Completed
        } else if succeeded.is_empty() && !attempted.is_empty() {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Partial
        };

        let message = match status {
            ProcessingStatus::Completed => {
                format!("successfully processed through {} brains", succeeded.len())
            }
            ProcessingStatus::Partial => format!(
                "processed through {}/{} brains, {} errors",
                succeeded.len(),
                attempted.len(),
                errors.len()
            ),
            ProcessingStatus::Failed => format!("all {} routed brains failed", attempted.len()),
        };

        let result = PacketProcessingResult {
            packet_id: packet.packet_id.clone(),
            status,
            message,
            brains_attempted: attempted,
            brains_succeeded: succeeded,
            errors,
            processing_time: start.elapsed(),
        };

        self.record_outcome(&result).await;

        for hook in &self.post_hooks {
            hook(packet, &result);
        }

        info!(
            packet_id = %packet.packet_id,
            status = ?result.status,
            elapsed_ms = result.processing_time.as_millis() as u64,
            "processed knowledge packet"
        );

        result
    }

    /// Invokes every routed brain's adapter concurrently (spec.md §4.4: "for
    /// each enabled brain, invoke the adapter in parallel"), so one slow
    /// backend's write latency doesn't serialize behind another's.
    async fn write_to_brains(
        &self,
        packet: &KnowledgePacket,
        routing: RoutingDecision,
    ) -> (Vec<&'static str>, Vec<&'static str>, Vec<String>) {
        let vector_fut = async {
            if !routing.vector {
                return None;
            }
            let Some(vector_data) = &packet.content.vector_data else {
                return None;
            };
            Some(match &self.brains.vector {
                Some(store) => store
                    .upsert(&packet.document_id, vector_data)
                    .await
                    .map_err(|e| format!("vector brain processing failed: {e}")),
                None => Err("vector brain processing failed: no adapter configured".to_string()),
            })
        };

        let analytical_fut = async {
            if !routing.analytical {
                return None;
            }
            let Some(analytical_data) = &packet.content.analytical_data else {
                return None;
            };
            Some(match &self.brains.analytical {
                Some(store) => store
                    .upsert(&packet.document_id, analytical_data)
                    .await
                    .map_err(|e| format!("analytical brain processing failed: {e}")),
                None => Err("analytical brain processing failed: no adapter configured".to_string()),
            })
        };

        let graph_fut = async {
            if !routing.graph {
                return None;
            }
            let Some(graph_data) = &packet.content.graph_data else {
                return None;
            };
            Some(match &self.brains.graph {
                Some(store) => store
                    .upsert_entities_and_relationships(&packet.document_id, graph_data)
                    .await
                    .map_err(|e| format!("graph brain processing failed: {e}")),
                None => Err("graph brain processing failed: no adapter configured".to_string()),
            })
        };

        // Metadata is always recorded, matching routing.metadata's unconditional default.
        let metadata_fut = async {
            if !routing.metadata {
                return None;
            }
            Some(match &self.brains.analytical {
                Some(store) => {
                    let record = nancy_types::storage::DocumentMetadataRecord {
                        doc_id: packet.document_id.clone(),
                        filename: packet.metadata.title.clone(),
                        size: packet.metadata.file_size.unwrap_or(0),
                        file_type: packet.source.content_type.clone(),
                        author: packet.metadata.author.clone(),
                        ingested_at: Some(packet.timestamp),
                        metadata: HashMap::new(),
                    };
                    store
                        .upsert_document_metadata(&record)
                        .await
                        .map_err(|e| format!("metadata persistence failed: {e}"))
                }
                None => Err("metadata persistence failed: no analytical adapter configured".to_string()),
            })
        };

        let (vector_outcome, analytical_outcome, graph_outcome, metadata_outcome) =
            tokio::join!(vector_fut, analytical_fut, graph_fut, metadata_fut);

        let mut attempted = Vec::new();
        let mut succeeded = Vec::new();
        let mut errors = Vec::new();

        for (name, outcome) in [
            ("vector", vector_outcome),
            ("analytical", analytical_outcome),
            ("graph", graph_outcome),
            ("metadata", metadata_outcome),
        ] {
            if let Some(outcome) = outcome {
                attempted.push(name);
                match outcome {
                    Ok(()) => succeeded.push(name),
                    Err(e) => errors.push(e),
                }
            }
        }

        (attempted, succeeded, errors)
    }

    async fn record_outcome(&self, result: &PacketProcessingResult) {
        let mut metrics = self.metrics.lock().await;
        metrics.processing_times.push(result.processing_time);
        match result.status {
            ProcessingStatus::Completed => metrics.total_processed += 1,
            ProcessingStatus::Partial => metrics.total_processed += 1,
            ProcessingStatus::Failed => metrics.total_failed += 1,
        }
    }

    pub async fn processing_metrics(&self) -> ProcessingMetrics {
        let metrics = self.metrics.lock().await;
        let count = metrics.processing_times.len() as u64;
        let average_ms = if count == 0 {
            0.0
        } else {
            let total: Duration = metrics.processing_times.iter().sum();
            total.as_secs_f64() * 1000.0 / count as f64
        };
        ProcessingMetrics {
            total_processed: metrics.total_processed,
            total_failed: metrics.total_failed,
            average_processing_time_ms: average_ms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessingMetrics {
    pub total_processed: u64,
    pub total_failed: u64,
    pub average_processing_time_ms: f64,
}

/// Bounded ingestion queue in front of a [`KnowledgePacketProcessor`]: a
/// fixed pool of worker tasks drains the channel, so a burst of uploads
/// backpressures the producer instead of spawning unbounded tasks.
pub struct PacketProcessingQueue {
    sender: mpsc::Sender<QueueItem>,
    workers: Vec<JoinHandle<()>>,
}

struct QueueItem {
    packet: KnowledgePacket,
    reply: tokio::sync::oneshot::Sender<PacketProcessingResult>,
}

impl PacketProcessingQueue {
    pub fn start(processor: Arc<KnowledgePacketProcessor>, capacity: usize, worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let processor = processor.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let item = {
                            let mut guard = receiver.lock().await;
                            guard.recv().await
                        };
                        let Some(item) = item else {
                            debug!(worker_id, "packet processing worker shutting down");
                            break;
                        };
                        let result = processor.process_packet(&item.packet).await;
                        if item.reply.send(result).is_err() {
                            error!(worker_id, "caller dropped before processing result was delivered");
                        }
                    }
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Enqueues a packet and awaits its processing result. Returns
    /// [`NancyError::Other`] if the queue has been stopped.
    pub async fn enqueue(
        &self,
        packet: KnowledgePacket,
    ) -> Result<PacketProcessingResult, NancyError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(QueueItem {
                packet,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NancyError::Other("packet processing queue is not accepting work".to_string()))?;

        reply_rx
            .await
            .map_err(|_| NancyError::Other("packet processing worker dropped before replying".to_string()))
    }

    pub fn queue_capacity(&self) -> usize {
        self.sender.capacity()
    }

    pub async fn stop(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
