//! Distributed backend: a master shipping chunk work to remote workers.
//!
//! The graph is registered once per worker (`POST /cube`); afterwards each
//! chunk is a start request followed by a download of the chunk bytes.
//! A worker that cannot be reached is retired for the rest of the run and
//! its outstanding chunk goes back into the queue for another worker, up
//! to the retry budget. Workers must compute chunks idempotently.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::chunk::ChunkData;
use crate::config::EngineConfig;
use crate::cube::{CubeRef, CubeSpec};
use crate::error::{CubeError, Result};
use crate::reference::ChunkIndex;

use super::{
    normalize, ChunkCallback, ChunkProcessor, ProgressSink, RunControl, RunOutcome, RunTracker,
};

/// Response of a graph registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub cube_id: u64,
}

/// Error body sent by workers for failed requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&CubeError> for WireError {
    fn from(e: &CubeError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<WireError> for CubeError {
    fn from(e: WireError) -> Self {
        CubeError::from_kind(&e.kind, e.message)
    }
}

/// One remote worker as seen by the master.
///
/// Implementations return [`CubeError::WorkerUnreachable`] for transport
/// problems; any other error is a failure of that particular request.
#[async_trait]
pub trait WorkerEndpoint: Send + Sync {
    fn name(&self) -> &str;

    /// Ship a graph description; returns the worker-local cube id.
    async fn register(&self, spec: &CubeSpec) -> Result<u64>;

    /// Compute one chunk (by linear id) and return its buffer.
    async fn compute(&self, cube_id: u64, chunk_id: u64) -> Result<ChunkData>;
}

/// Worker endpoint speaking the cube-worker HTTP API.
#[derive(Clone)]
pub struct HttpWorkerEndpoint {
    base_url: String,
    client: reqwest::Client,
}

impl HttpWorkerEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CubeError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Read worker URLs from a text file, one per line. Blank lines and
    /// lines starting with `#` are ignored.
    pub fn from_txtfile(path: impl AsRef<Path>, timeout: Duration) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CubeError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let workers = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| Self::new(l, timeout))
            .collect::<Result<Vec<_>>>()?;
        if workers.is_empty() {
            return Err(CubeError::config(format!(
                "no worker URLs in {}",
                path.display()
            )));
        }
        Ok(workers)
    }

    fn unreachable(&self, e: reqwest::Error) -> CubeError {
        CubeError::worker_unreachable(&self.base_url, e.to_string())
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.map_err(|e| self.unreachable(e))?;
        match serde_json::from_slice::<WireError>(&body) {
            Ok(wire) => Err(wire.into()),
            Err(_) => Err(CubeError::Internal(format!(
                "worker {} answered {}: {}",
                self.base_url,
                status,
                String::from_utf8_lossy(&body)
            ))),
        }
    }
}

#[async_trait]
impl WorkerEndpoint for HttpWorkerEndpoint {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn register(&self, spec: &CubeSpec) -> Result<u64> {
        let response = self
            .client
            .post(format!("{}/cube", self.base_url))
            .json(spec)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let response = self.check(response).await?;
        let body = response.bytes().await.map_err(|e| self.unreachable(e))?;
        let registered: RegisterResponse = serde_json::from_slice(&body)?;
        Ok(registered.cube_id)
    }

    async fn compute(&self, cube_id: u64, chunk_id: u64) -> Result<ChunkData> {
        let response = self
            .client
            .post(format!("{}/cube/{}/{}/start", self.base_url, cube_id, chunk_id))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response).await?;

        let response = self
            .client
            .get(format!(
                "{}/cube/{}/{}/download",
                self.base_url, cube_id, chunk_id
            ))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let response = self.check(response).await?;
        let body = response.bytes().await.map_err(|e| self.unreachable(e))?;
        ChunkData::decode(&body)
    }
}

/// Mutable run state shared by the per-worker tasks.
struct Dispatch {
    /// Chunks waiting for a worker, with the number of reassignments so far.
    pending: VecDeque<(ChunkIndex, u32)>,
    in_flight: usize,
    live: usize,
    delivered: HashSet<ChunkIndex>,
    tracker: RunTracker,
}

impl Dispatch {
    /// All workers are gone: fail whatever is still queued.
    fn fail_pending(&mut self) {
        while let Some((idx, _)) = self.pending.pop_front() {
            self.tracker.record(
                idx,
                Err(CubeError::worker_unreachable(
                    "swarm",
                    "no reachable worker left",
                )),
            );
        }
    }
}

struct RunContext {
    cube: CubeRef,
    callback: Arc<dyn ChunkCallback>,
    completion: Arc<parking_lot::Mutex<()>>,
    control: RunControl,
    state: Mutex<Dispatch>,
    notify: Notify,
    retry_budget: u32,
    timeout: Duration,
}

/// Master side of the swarm backend.
pub struct SwarmProcessor {
    workers: Vec<Arc<dyn WorkerEndpoint>>,
    retry_budget: u32,
    timeout: Duration,
}

impl SwarmProcessor {
    pub fn new(workers: Vec<Arc<dyn WorkerEndpoint>>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            workers,
            retry_budget: defaults.swarm_retry_budget,
            timeout: defaults.swarm_request_timeout(),
        }
    }

    /// Take retry budget and request timeout from the engine configuration.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.retry_budget = config.swarm_retry_budget;
        self.timeout = config.swarm_request_timeout();
        self
    }

    /// How often a chunk may be reassigned after its worker became unreachable.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Register the graph on every worker; unreachable workers are left out.
    async fn register_all(&self, spec: &CubeSpec) -> Result<Vec<(Arc<dyn WorkerEndpoint>, u64)>> {
        let requests = self.workers.iter().map(|w| {
            let w = Arc::clone(w);
            async move {
                let result = match tokio::time::timeout(self.timeout, w.register(spec)).await {
                    Ok(r) => r,
                    Err(_) => Err(CubeError::worker_unreachable(
                        w.name(),
                        "registration timed out",
                    )),
                };
                (w, result)
            }
        });

        let mut registered = Vec::new();
        for (worker, result) in join_all(requests).await {
            match result {
                Ok(id) => {
                    debug!(worker = worker.name(), cube_id = id, "Registered cube");
                    registered.push((worker, id));
                }
                Err(e @ CubeError::WorkerUnreachable { .. }) => {
                    warn!(worker = worker.name(), error = %e, "Worker unreachable at registration");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(registered)
    }
}

#[async_trait]
impl ChunkProcessor for SwarmProcessor {
    fn name(&self) -> &'static str {
        "swarm"
    }

    async fn run(
        &self,
        cube: CubeRef,
        chunks: Vec<ChunkIndex>,
        callback: Arc<dyn ChunkCallback>,
        progress: Arc<dyn ProgressSink>,
        control: RunControl,
    ) -> Result<RunOutcome> {
        if self.workers.is_empty() {
            return Err(CubeError::config("swarm backend needs at least one worker"));
        }
        let chunks = normalize(chunks);
        let tracker = RunTracker::new(self.name(), chunks.len(), progress);

        let registered = self.register_all(&cube.spec()).await?;
        info!(
            workers = registered.len(),
            configured = self.workers.len(),
            "Swarm workers ready"
        );

        let ctx = Arc::new(RunContext {
            cube,
            callback,
            completion: Arc::new(parking_lot::Mutex::new(())),
            control: control.clone(),
            state: Mutex::new(Dispatch {
                pending: chunks.into_iter().map(|idx| (idx, 0)).collect(),
                in_flight: 0,
                live: registered.len(),
                delivered: HashSet::new(),
                tracker,
            }),
            notify: Notify::new(),
            retry_budget: self.retry_budget,
            timeout: self.timeout,
        });

        if registered.is_empty() {
            error!("No swarm worker could be reached");
            ctx.state.lock().fail_pending();
        }

        let handles: Vec<_> = registered
            .into_iter()
            .map(|(worker, remote_id)| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { worker_loop(ctx, worker, remote_id).await })
            })
            .collect();
        for handle in handles {
            handle
                .await
                .map_err(|e| CubeError::Internal(format!("swarm task failed: {}", e)))?;
        }

        let mut state = ctx.state.lock();
        while let Some((idx, _)) = state.pending.pop_front() {
            state.tracker.skip(idx);
        }
        Ok(state.tracker.finish(control.is_cancelled()))
    }
}

/// Feed one worker until the queue is drained, the run is cancelled or the
/// worker becomes unreachable.
async fn worker_loop(ctx: Arc<RunContext>, worker: Arc<dyn WorkerEndpoint>, remote_id: u64) {
    loop {
        let notified = ctx.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let job = {
            let mut state = ctx.state.lock();
            if ctx.control.is_cancelled() {
                return;
            }
            match state.pending.pop_front() {
                Some(job) => {
                    state.in_flight += 1;
                    Some(job)
                }
                None if state.in_flight == 0 => return,
                None => None,
            }
        };
        let Some((idx, attempts)) = job else {
            // Another worker may still hand a chunk back.
            notified.await;
            continue;
        };

        let chunk_id = ctx.cube.reference().to_linear(idx);
        debug!(worker = worker.name(), chunk = %idx, attempt = attempts, "Dispatching chunk");
        let result = match tokio::time::timeout(ctx.timeout, worker.compute(remote_id, chunk_id)).await {
            Ok(r) => r,
            Err(_) => Err(CubeError::worker_unreachable(
                worker.name(),
                format!("no reply within {:?}", ctx.timeout),
            )),
        };

        match result {
            Err(e @ CubeError::WorkerUnreachable { .. }) => {
                warn!(worker = worker.name(), chunk = %idx, error = %e, "Worker unreachable, retiring it");
                {
                    let mut state = ctx.state.lock();
                    state.in_flight -= 1;
                    state.live -= 1;
                    if attempts < ctx.retry_budget && state.live > 0 {
                        state.pending.push_back((idx, attempts + 1));
                    } else {
                        state.tracker.record(idx, Err(e));
                    }
                    if state.live == 0 {
                        state.fail_pending();
                    }
                }
                ctx.notify.notify_waiters();
                return;
            }
            result => {
                let delivered = deliver(&ctx, idx, result).await;
                {
                    let mut state = ctx.state.lock();
                    state.in_flight -= 1;
                    match delivered {
                        Ok(()) if !state.delivered.insert(idx) => {
                            debug!(chunk = %idx, "Duplicate chunk result ignored");
                        }
                        other => state.tracker.record(idx, other),
                    }
                }
                ctx.notify.notify_waiters();
            }
        }
    }
}

/// Check a downloaded chunk against the local graph and hand it to the callback.
async fn deliver(ctx: &Arc<RunContext>, idx: ChunkIndex, result: Result<ChunkData>) -> Result<()> {
    let chunk = result?;
    let expected = ctx.cube.chunk_shape(idx)?;
    if chunk.shape() != expected {
        return Err(CubeError::Serialization(format!(
            "worker returned shape {:?} for chunk {}, expected {:?}",
            chunk.shape(),
            idx,
            expected
        )));
    }
    let duplicate = ctx.state.lock().delivered.contains(&idx);
    if duplicate {
        return Ok(());
    }
    let callback = Arc::clone(&ctx.callback);
    let completion = Arc::clone(&ctx.completion);
    tokio::task::spawn_blocking(move || {
        let _guard = completion.lock();
        callback.on_chunk(idx, chunk)
    })
    .await
    .unwrap_or_else(|e| Err(CubeError::Internal(format!("callback task failed: {}", e))))
}
