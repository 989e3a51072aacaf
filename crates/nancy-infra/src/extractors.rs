//! Extractor Host: supervises out-of-process extraction workers and talks
//! JSON-RPC 2.0 over stdio to them.
//!
//! Grounded on `mcp_host.py`'s `MCPServerProcess`/`MCPClient`: a
//! `tokio::process::Child` with piped stdio, a `starting -> healthy ->
//! degraded/crashed` lifecycle, and request/response correlation by id.
//! The original leaves the wire protocol as a `# TODO: Implement actual
//! MCP protocol communication` mock; this implementation sends real
//! newline-delimited JSON-RPC 2.0 frames, since the design names concrete
//! methods (`nancy/ingest`, `nancy/health_check`, `nancy/capabilities`,
//! `nancy/shutdown`) for workers to implement.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nancy_types::error::{NancyError, Result};
use nancy_types::packet::KnowledgePacket;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractorWorkerConfig {
    pub name: String,
    pub executable: String,
    pub args: Vec<String>,
    pub environment: HashMap<String, String>,
    pub supported_extensions: Vec<String>,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
    pub health_check_interval: Duration,
    pub max_restart_attempts: u32,
    pub restart_backoff_base: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Healthy,
    Degraded,
    Crashed,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[allow(dead_code)]
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Supervises a single extractor worker subprocess.
pub struct ExtractorWorker {
    config: ExtractorWorkerConfig,
    state: Mutex<WorkerState>,
    process: Mutex<Option<ChildHandle>>,
    next_request_id: AtomicU64,
    consecutive_health_failures: Mutex<u32>,
    restart_attempts: Mutex<u32>,
}

struct ChildHandle {
    child: Child,
    stdin: tokio::process::ChildStdin,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl ExtractorWorker {
    pub fn new(config: ExtractorWorkerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WorkerState::Stopped),
            process: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            consecutive_health_failures: Mutex::new(0),
            restart_attempts: Mutex::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        self.config
            .supported_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.lock().await
    }

    /// Spawns the subprocess, waits a bounded warm-up, and runs a health
    /// check before declaring the worker healthy.
    pub async fn start(&self) -> Result<()> {
        *self.state.lock().await = WorkerState::Starting;

        let mut command = Command::new(&self.config.executable);
        command
            .args(&self.config.args)
            .envs(&self.config.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            NancyError::ExtractorError {
                worker: self.config.name.clone(),
                rpc_error: format!("failed to spawn process: {e}"),
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| NancyError::ExtractorError {
            worker: self.config.name.clone(),
            rpc_error: "child process has no stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| NancyError::ExtractorError {
            worker: self.config.name.clone(),
            rpc_error: "child process has no stdout".to_string(),
        })?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let worker_name = self.config.name.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RpcResponse>(&line) {
                            Ok(response) => {
                                let mut pending = reader_pending.lock().await;
                                if let Some(sender) = pending.remove(&response.id) {
                                    let _ = sender.send(response);
                                }
                            }
                            Err(e) => warn!(worker = %worker_name, error = %e, "malformed RPC frame from extractor"),
                        }
                    }
                    Ok(None) => {
                        debug!(worker = %worker_name, "extractor stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(worker = %worker_name, error = %e, "error reading extractor stdout");
                        break;
                    }
                }
            }
        });

        *self.process.lock().await = Some(ChildHandle {
            child,
            stdin,
            pending,
            reader_task,
        });

        tokio::time::sleep(Duration::from_millis(200).min(self.config.startup_timeout)).await;

        match timeout(self.config.startup_timeout, self.health_check()).await {
            Ok(Ok(true)) => {
                *self.state.lock().await = WorkerState::Healthy;
                info!(worker = %self.config.name, "extractor worker healthy");
                Ok(())
            }
            _ => {
                *self.state.lock().await = WorkerState::Crashed;
                Err(NancyError::ExtractorCrash {
                    worker: self.config.name.clone(),
                })
            }
        }
    }

    pub async fn stop(&self) {
        let handle = self.process.lock().await.take();
        if let Some(mut handle) = handle {
            let _ = self.call_raw(&mut handle, "nancy/shutdown", serde_json::json!({})).await;
            let _ = timeout(Duration::from_secs(5), handle.child.wait()).await;
            let _ = handle.child.start_kill();
            handle.reader_task.abort();
        }
        *self.state.lock().await = WorkerState::Stopped;
    }

    pub async fn health_check(&self) -> Result<bool> {
        let mut process = self.process.lock().await;
        let Some(handle) = process.as_mut() else {
            return Ok(false);
        };
        match handle.child.try_wait() {
            Ok(Some(_)) => {
                drop(process);
                *self.state.lock().await = WorkerState::Crashed;
                return Ok(false);
            }
            Ok(None) => {}
            Err(e) => {
                return Err(NancyError::ExtractorError {
                    worker: self.config.name.clone(),
                    rpc_error: format!("try_wait failed: {e}"),
                })
            }
        }

        let response = self.call_raw(handle, "nancy/health_check", serde_json::json!({})).await;
        drop(process);

        let mut failures = self.consecutive_health_failures.lock().await;
        match response {
            Ok(_) => {
                *failures = 0;
                Ok(true)
            }
            Err(e) => {
                *failures += 1;
                if *failures >= 3 {
                    *self.state.lock().await = WorkerState::Degraded;
                }
                warn!(worker = %self.config.name, error = %e, failures = *failures, "extractor health check failed");
                Ok(false)
            }
        }
    }

    /// Restarts a crashed worker with exponential backoff
    /// (`restart_backoff_base * 2^attempt`), giving up after
    /// `max_restart_attempts` consecutive failed attempts. Resets the
    /// attempt counter on a successful restart, per spec.md §4.5's bounded
    /// restart policy.
    pub async fn restart_with_backoff(&self) -> Result<()> {
        let mut attempts = self.restart_attempts.lock().await;
        if *attempts >= self.config.max_restart_attempts {
            warn!(
                worker = %self.config.name,
                attempts = *attempts,
                "extractor worker exhausted restart attempts, leaving crashed"
            );
            return Err(NancyError::ExtractorCrash {
                worker: self.config.name.clone(),
            });
        }

        let backoff = self.config.restart_backoff_base * 2u32.pow(*attempts);
        *attempts += 1;
        let attempt_number = *attempts;
        drop(attempts);

        info!(
            worker = %self.config.name,
            attempt = attempt_number,
            backoff_ms = backoff.as_millis() as u64,
            "restarting crashed extractor worker"
        );
        tokio::time::sleep(backoff).await;

        match self.start().await {
            Ok(()) => {
                *self.restart_attempts.lock().await = 0;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a supervision loop at `health_check_interval`: routine health
    /// checks keep the degraded/healthy state current, and an unexpected
    /// exit (the process table shows `Crashed`) triggers
    /// [`Self::restart_with_backoff`]. Returns once the worker has been
    /// [`Self::stop`]ped (state transitions to `Stopped`) or restarts have
    /// been exhausted.
    pub async fn supervise(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.health_check_interval).await;

            match self.state().await {
                WorkerState::Stopped => return,
                WorkerState::Crashed => {
                    if self.restart_with_backoff().await.is_err() {
                        return;
                    }
                }
                _ => {
                    let _ = self.health_check().await;
                }
            }
        }
    }

    pub async fn ingest(&self, file_path: &str, metadata: serde_json::Value) -> Result<Vec<KnowledgePacket>> {
        let mut process = self.process.lock().await;
        let handle = process.as_mut().ok_or_else(|| NancyError::ExtractorError {
            worker: self.config.name.clone(),
            rpc_error: "worker is not running".to_string(),
        })?;

        let params = serde_json::json!({ "file_path": file_path, "metadata": metadata });
        let response = self.call_raw(handle, "nancy/ingest", params).await?;

        #[derive(Deserialize)]
        struct IngestResult {
            packets: Vec<KnowledgePacket>,
        }
        let parsed: IngestResult = serde_json::from_value(response)?;
        Ok(parsed.packets)
    }

    async fn call_raw(
        &self,
        handle: &mut ChildHandle,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        handle.pending.lock().await.insert(id, tx);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        handle.stdin.write_all(line.as_bytes()).await.map_err(|e| {
            NancyError::ExtractorError {
                worker: self.config.name.clone(),
                rpc_error: format!("failed to write request: {e}"),
            }
        })?;

        let response = timeout(self.config.request_timeout, rx).await.map_err(|_| {
            NancyError::BackendTimeout {
                brain: self.config.name.clone(),
                operation: method.to_string(),
            }
        })?;

        let response = response.map_err(|_| NancyError::ExtractorError {
            worker: self.config.name.clone(),
            rpc_error: "response channel dropped".to_string(),
        })?;

        if let Some(error) = response.error {
            return Err(NancyError::ExtractorError {
                worker: self.config.name.clone(),
                rpc_error: format!("[{}] {}", error.code, error.message),
            });
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

/// The set of registered extractor workers, selected by file extension.
pub struct ExtractorHost {
    workers: Vec<Arc<ExtractorWorker>>,
    generic_document_worker: Option<String>,
}

impl ExtractorHost {
    pub fn new(workers: Vec<Arc<ExtractorWorker>>, generic_document_worker: Option<String>) -> Self {
        Self {
            workers,
            generic_document_worker,
        }
    }

    pub async fn start_all(&self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::new();
        for worker in &self.workers {
            let outcome = worker.start().await;
            results.push((worker.name().to_string(), outcome));
        }
        results
    }

    pub async fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop().await;
        }
    }

    /// Spawns one supervision loop per worker (see
    /// [`ExtractorWorker::supervise`]), returning their join handles so the
    /// caller can await clean shutdown after [`Self::stop_all`].
    pub fn spawn_supervisors(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.supervise().await })
            })
            .collect()
    }

    /// Selects a worker for a file by extension. Matches against every
    /// registered worker's declared extensions and, should more than one
    /// match, prefers the one with the fewest declared extensions (the
    /// narrowest, most specialized match).
    pub fn select_worker(&self, file_path: &str) -> Result<Arc<ExtractorWorker>> {
        let extension = std::path::Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let mut candidates: Vec<&Arc<ExtractorWorker>> = self
            .workers
            .iter()
            .filter(|w| w.supports_extension(extension))
            .collect();

        candidates.sort_by_key(|w| w.config.supported_extensions.len());

        if let Some(worker) = candidates.into_iter().next() {
            return Ok(worker.clone());
        }

        if let Some(generic_name) = &self.generic_document_worker {
            if let Some(worker) = self.workers.iter().find(|w| w.name() == generic_name) {
                return Ok(worker.clone());
            }
        }

        Err(NancyError::NoExtractorForContentType(extension.to_string()))
    }

    pub async fn fleet_health(&self) -> HashMap<String, WorkerState> {
        let mut health = HashMap::new();
        for worker in &self.workers {
            health.insert(worker.name().to_string(), worker.state().await);
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, extensions: &[&str]) -> ExtractorWorkerConfig {
        ExtractorWorkerConfig {
            name: name.to_string(),
            executable: "true".to_string(),
            args: Vec::new(),
            environment: HashMap::new(),
            supported_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            startup_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(5),
            max_restart_attempts: 3,
            restart_backoff_base: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn narrowest_matching_worker_is_preferred() {
        let spreadsheet = Arc::new(ExtractorWorker::new(config("spreadsheet", &["csv"])));
        let generic = Arc::new(ExtractorWorker::new(config("generic", &["csv", "txt", "pdf"])));
        let host = ExtractorHost::new(vec![generic, spreadsheet.clone()], None);

        let selected = host.select_worker("components.csv").unwrap();
        assert_eq!(selected.name(), "spreadsheet");
    }

    #[tokio::test]
    async fn no_match_falls_back_to_generic_document_worker() {
        let generic = Arc::new(ExtractorWorker::new(config("generic_document", &["txt"])));
        let host = ExtractorHost::new(vec![generic], Some("generic_document".to_string()));

        let selected = host.select_worker("notes.unknownext").unwrap();
        assert_eq!(selected.name(), "generic_document");
    }

    #[tokio::test]
    async fn no_match_and_no_generic_fails_with_no_extractor_error() {
        let spreadsheet = Arc::new(ExtractorWorker::new(config("spreadsheet", &["csv"])));
        let host = ExtractorHost::new(vec![spreadsheet], None);

        let err = host.select_worker("notes.unknownext").unwrap_err();
        assert!(matches!(err, NancyError::NoExtractorForContentType(_)));
    }

    #[tokio::test]
    async fn worker_starts_in_stopped_state() {
        let worker = ExtractorWorker::new(config("spreadsheet", &["csv"]));
        assert_eq!(worker.state().await, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn restart_gives_up_after_max_attempts_for_an_unspawnable_executable() {
        let mut cfg = config("spreadsheet", &["csv"]);
        cfg.executable = "/no/such/extractor-binary".to_string();
        cfg.max_restart_attempts = 2;
        cfg.restart_backoff_base = Duration::from_millis(1);
        let worker = ExtractorWorker::new(cfg);

        assert!(worker.restart_with_backoff().await.is_err());
        assert!(worker.restart_with_backoff().await.is_err());
        let err = worker.restart_with_backoff().await.unwrap_err();
        assert!(matches!(err, NancyError::ExtractorCrash { .. }));
    }
}
