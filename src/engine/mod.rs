//! Job Engine (spec §4.6).
//!
//! Owns job lifecycle and coordinates the Arbiter/Builder/RPC Pool/Store/
//! Receipt Watcher. Generalizes original_source's `JobEngine` (a priority
//! `queue.PriorityQueue` drained by one daemon thread, one OS thread per
//! active job, a synchronous `callbacks` dict) into an async coordinator:
//! a `tokio::time::interval` loop at ~10Hz drains a `BinaryHeap<Reverse<_>>`
//! keyed by `(priority, submitted_at)`, each admitted job gets a
//! `tokio::spawn` worker, and `callbacks`/`_trigger_callback` become a
//! `tokio::sync::broadcast` channel of `JobEvent` (DESIGN NOTES §9:
//! "Dynamic job dispatch by string mode" -> tagged `JobMode` enum with
//! exhaustive handling in the executor factory).

use dashmap::DashMap;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::builder::TxBuilder;
use crate::error::EngineError;
use crate::executor::{
    auto_buy::{AutoBuyConfig, AutoBuyExecutor},
    auto_sell::{AutoSellConfig, AutoSellExecutor},
    distribution::{DistributionConfig, DistributionExecutor},
    rewards::{RewardsConfig, RewardsExecutor},
    ExecutionContext, Executor,
};
use crate::keystore::Keystore;
use crate::nonce::NonceArbiter;
use crate::notifier::Notifier;
use crate::rpc::RpcPool;
use crate::store::{JobPatch, JobState, NewJob, Store};
use crate::watcher::ReceiptWatcher;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobMode {
    Distribution(DistributionConfig),
    AutoBuy(AutoBuyConfig),
    AutoSell(AutoSellConfig),
    Rewards(RewardsConfig),
}

impl JobMode {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            JobMode::Distribution(_) => "distribution",
            JobMode::AutoBuy(_) => "auto_buy",
            JobMode::AutoSell(_) => "auto_sell",
            JobMode::Rewards(_) => "rewards",
        }
    }

    pub(crate) fn total_items(&self) -> i64 {
        match self {
            JobMode::Distribution(c) => c.recipients.len() as i64,
            JobMode::AutoBuy(c) => c.total_buys as i64,
            JobMode::AutoSell(c) => c.total_sells as i64 * c.seller_keys.len().max(1) as i64,
            JobMode::Rewards(_) => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobSpec {
    pub title: String,
    pub mode: JobMode,
    pub priority: u8,
}

/// Validates a `JobSpec` and writes its Pending row (spec §4.6's "—  →
/// Pending" transition, §7's "Configuration error ... rejected at
/// `submit_job`"). Split out of [`JobEngine::submit_job`] so the CLI's
/// `submit` subcommand — a separate process with no in-memory queue — can
/// perform the same admission check and hand the row to whichever engine
/// process is running `run` (picked up by `ingest_external_jobs`).
pub async fn write_job_row(store: &Store, spec: JobSpec) -> Result<i64, EngineError> {
    if let JobMode::Distribution(cfg) = &spec.mode {
        if cfg.recipients.is_empty() {
            return Err(EngineError::JobRejected("distribution requires at least one recipient".into()));
        }
    }
    if let JobMode::AutoSell(cfg) = &spec.mode {
        if cfg.seller_keys.is_empty() {
            return Err(EngineError::JobRejected("auto-sell requires at least one seller key".into()));
        }
    }

    let config_json = serde_json::to_string(&spec.mode)
        .map_err(|e| EngineError::JobRejected(format!("config serialization failed: {e}")))?;

    store
        .create_job(NewJob {
            title: spec.title,
            mode: spec.mode.label().to_string(),
            config_json,
            priority: spec.priority as i64,
            total: spec.mode.total_items(),
        })
        .await
        .map_err(EngineError::from)
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { job_id: i64 },
    Progress { job_id: i64, done: i64, failed: i64, total: i64 },
    Completed { job_id: i64 },
    Failed { job_id: i64, reason: String },
    Paused { job_id: i64 },
    Resumed { job_id: i64 },
    Cancelled { job_id: i64 },
}

/// Per-executor control block: a binary pause latch and a cancellation
/// flag, both read at item boundaries, plus live progress counters used
/// for `eta()` — the async equivalent of original_source's
/// `threading.Event`-backed `BaseExecutor`.
pub struct JobControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    done: AtomicI64,
    failed: AtomicI64,
    total: AtomicI64,
    started_at: std::sync::Mutex<Option<Instant>>,
}

impl JobControl {
    fn new(total: i64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            done: AtomicI64::new(0),
            failed: AtomicI64::new(0),
            total: AtomicI64::new(total),
            started_at: std::sync::Mutex::new(None),
        }
    }

    pub fn mark_started(&self) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
    }

    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::SeqCst)
    }

    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn record_success(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Corrects the total for modes whose item count is unknown until the
    /// executor starts (e.g. rewards: the unsent queue depth at dispatch
    /// time, not at `submit_job`).
    pub fn set_total(&self, total: i64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> (i64, i64, i64) {
        (
            self.done.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    /// Blocks cooperatively while paused, returning `false` once cancelled.
    /// Mirrors original_source's `pause_event.wait()` / `is_cancelled`.
    pub async fn wait_if_paused(&self) -> bool {
        while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        !self.cancelled.load(Ordering::SeqCst)
    }

    /// Linear extrapolation from current throughput; undefined until at
    /// least one item has completed (spec §4.7).
    pub fn eta(&self) -> Option<Duration> {
        let started_at = (*self.started_at.lock().unwrap())?;
        let done = self.done.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        if done == 0 || total == 0 {
            return None;
        }
        let elapsed = started_at.elapsed().as_secs_f64();
        let rate = done as f64 / elapsed;
        if rate <= 0.0 {
            return None;
        }
        let remaining = (total - done).max(0) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    priority: u8,
    submitted_at: i64,
    job_id: i64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.submitted_at == other.submitted_at
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.submitted_at).cmp(&(other.priority, other.submitted_at))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Shared dependency bundle handed to every executor (spec §4.7's shared
/// base contract generalized to hold the component handles instead of a
/// single wallet/nonce pair).
pub struct EngineDeps {
    pub store: Arc<Store>,
    pub rpc: Arc<RpcPool>,
    pub arbiter: Arc<NonceArbiter>,
    pub builder: Arc<TxBuilder>,
    pub keystore: Arc<dyn Keystore>,
    pub watcher: Arc<ReceiptWatcher>,
    pub notifier: Arc<Notifier>,
    pub router: Address,
    pub wrapped_native: Address,
    pub usdt: Option<Address>,
    pub consecutive_failure_threshold: u32,
}

pub struct JobEngine {
    deps: Arc<EngineDeps>,
    queue: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    pending_modes: DashMap<i64, JobMode>,
    controls: DashMap<i64, Arc<JobControl>>,
    handles: DashMap<i64, JoinHandle<()>>,
    /// Job ids already admitted or queued, so a CLI-submitted row in the
    /// store is never picked up twice by `ingest_external_jobs`.
    known: DashMap<i64, ()>,
    events: broadcast::Sender<JobEvent>,
}

impl JobEngine {
    pub fn new(deps: EngineDeps) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            deps: Arc::new(deps),
            queue: Mutex::new(BinaryHeap::new()),
            pending_modes: DashMap::new(),
            controls: DashMap::new(),
            handles: DashMap::new(),
            known: DashMap::new(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Exposes the shared dependency bundle to the entrypoint binary, for
    /// startup tasks (notifier greeting, periodic RPC health checks) that
    /// live outside the coordinator loop.
    pub fn deps(&self) -> &Arc<EngineDeps> {
        &self.deps
    }

    /// `submit_job` (spec §6). Config errors are rejected here - the job
    /// never enters Pending (spec §7).
    pub async fn submit_job(&self, spec: JobSpec) -> Result<i64, EngineError> {
        let priority = spec.priority;
        let mode = spec.mode.clone();
        let job_id = write_job_row(&self.deps.store, spec).await?;

        self.pending_modes.insert(job_id, mode);
        self.known.insert(job_id, ());

        let mut queue = self.queue.lock().await;
        queue.push(Reverse(QueueEntry {
            priority,
            submitted_at: now_millis(),
            job_id,
        }));

        info!("job #{} submitted with priority {}", job_id, priority);
        Ok(job_id)
    }

    /// Picks up jobs created directly in the store by another process (the
    /// CLI's `submit` subcommand writes a Pending row and exits rather than
    /// holding the in-memory queue).
    async fn ingest_external_jobs(self: &Arc<Self>) {
        let Ok(pending) = self.deps.store.list_jobs(Some(JobState::Pending)).await else {
            return;
        };

        for job in pending {
            if self.known.contains_key(&job.id) {
                continue;
            }
            self.known.insert(job.id, ());

            match serde_json::from_str::<JobMode>(&job.config_json) {
                Ok(mode) => {
                    self.pending_modes.insert(job.id, mode);
                    let mut queue = self.queue.lock().await;
                    queue.push(Reverse(QueueEntry {
                        priority: job.priority as u8,
                        submitted_at: job.created_at,
                        job_id: job.id,
                    }));
                }
                Err(e) => {
                    warn!("job #{} has unparseable config, skipping: {}", job.id, e);
                }
            }
        }
    }

    /// Applies pause/resume/cancel requests issued out-of-process (the CLI
    /// writes directly to `jobs.state`) to the in-memory control of a
    /// currently-running job.
    async fn sync_external_controls(&self) {
        for entry in self.controls.iter() {
            let job_id = *entry.key();
            if let Ok(Some(job)) = self.deps.store.get_job(job_id).await {
                match job.state {
                    JobState::Paused => {
                        entry.value().pause();
                    }
                    JobState::Running => {
                        entry.value().resume();
                    }
                    JobState::Cancelled => {
                        entry.value().cancel();
                    }
                    _ => {}
                }
            }
        }
    }

    pub fn pause_job(&self, job_id: i64) -> bool {
        self.controls
            .get(&job_id)
            .map(|c| {
                let changed = c.pause();
                if changed {
                    let _ = self.events.send(JobEvent::Paused { job_id });
                }
                changed
            })
            .unwrap_or(false)
    }

    pub fn resume_job(&self, job_id: i64) -> bool {
        self.controls
            .get(&job_id)
            .map(|c| {
                let changed = c.resume();
                if changed {
                    let _ = self.events.send(JobEvent::Resumed { job_id });
                }
                changed
            })
            .unwrap_or(false)
    }

    pub fn cancel_job(&self, job_id: i64) -> bool {
        self.controls
            .get(&job_id)
            .map(|c| {
                let changed = c.cancel();
                if changed {
                    let _ = self.events.send(JobEvent::Cancelled { job_id });
                }
                changed
            })
            .unwrap_or(false)
    }

    pub async fn get_progress(&self, job_id: i64) -> Result<Option<(i64, i64, i64)>, EngineError> {
        if let Some(control) = self.controls.get(&job_id) {
            return Ok(Some(control.snapshot()));
        }
        let job = self.deps.store.get_job(job_id).await?;
        Ok(job.map(|j| (j.done, j.failed, j.total)))
    }

    /// Resolves `tx_history` rows left `pending` by a prior process
    /// lifetime (spec §8 Property 6, scenario S6). Arbiter state is
    /// intentionally not restored here: the per-signer map reseeds from
    /// chain on first `reserve` after restart.
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let pending = self.deps.store.reconcile_pending().await?;
        let mut resolved = 0;
        for record in pending {
            let client = match self.deps.rpc.acquire_with_retry().await {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Ok(Some(receipt)) = client.get_transaction_receipt(record.tx_hash).await {
                let status = if receipt.status.map(|s| s.as_u64()) == Some(1) {
                    crate::store::TxStatus::Mined
                } else {
                    crate::store::TxStatus::Failed
                };
                self.deps
                    .store
                    .set_tx_status(record.tx_hash, status, None, None)
                    .await?;
                resolved += 1;
            }
        }
        info!("reconciliation resolved {} pending tx_history rows", resolved);
        Ok(resolved)
    }

    /// The ~10Hz coordinator loop: drains admission queue, reaps finished
    /// workers. Never returns under normal operation.
    pub async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            self.ingest_external_jobs().await;
            self.sync_external_controls().await;
            self.admit_ready_jobs().await;
            self.reap_finished_jobs();
        }
    }

    async fn admit_ready_jobs(self: &Arc<Self>) {
        let entry = {
            let mut queue = self.queue.lock().await;
            queue.pop()
        };
        let Some(Reverse(entry)) = entry else {
            return;
        };

        let Some((_, mode)) = self.pending_modes.remove(&entry.job_id) else {
            return;
        };

        self.start_job(entry.job_id, mode).await;
    }

    async fn start_job(self: &Arc<Self>, job_id: i64, mode: JobMode) {
        let total = mode.total_items();
        let control = Arc::new(JobControl::new(total));
        control.mark_started();
        self.controls.insert(job_id, control.clone());

        if let Err(e) = self
            .deps
            .store
            .update_job(
                job_id,
                JobPatch {
                    state: Some(JobState::Running),
                    started_at: Some(Some(now_millis() / 1000)),
                    ..Default::default()
                },
            )
            .await
        {
            warn!("failed to mark job #{} running: {:?}", job_id, e);
        }
        let _ = self.events.send(JobEvent::Started { job_id });

        let deps = self.deps.clone();
        let engine = self.clone();

        let handle = tokio::spawn(async move {
            let ctx = ExecutionContext {
                job_id,
                deps: deps.clone(),
                control: control.clone(),
            };

            let result: Result<(), EngineError> = match mode {
                JobMode::Distribution(cfg) => DistributionExecutor { config: cfg }.run(&ctx).await,
                JobMode::AutoBuy(cfg) => AutoBuyExecutor { config: cfg }.run(&ctx).await,
                JobMode::AutoSell(cfg) => AutoSellExecutor { config: cfg }.run(&ctx).await,
                JobMode::Rewards(cfg) => RewardsExecutor { config: cfg }.run(&ctx).await,
            };

            let (done, failed, total) = control.snapshot();
            let cancelled = control.is_cancelled();

            let final_state = if cancelled {
                JobState::Cancelled
            } else if result.is_err() || failed > 0 && done == 0 && total > 0 {
                JobState::Failed
            } else {
                JobState::Completed
            };

            let error_message = result.as_ref().err().map(|e| e.to_string());

            let _ = deps
                .store
                .update_job(
                    job_id,
                    JobPatch {
                        state: Some(final_state),
                        done: Some(done),
                        failed: Some(failed),
                        completed_at: Some(Some(now_millis() / 1000)),
                        error_message: Some(error_message.clone()),
                        ..Default::default()
                    },
                )
                .await;

            match final_state {
                JobState::Cancelled => {
                    let _ = engine.events.send(JobEvent::Cancelled { job_id });
                }
                JobState::Failed => {
                    deps.notifier
                        .notify_job_failed(job_id, error_message.clone().unwrap_or_default())
                        .await;
                    let _ = engine.events.send(JobEvent::Failed {
                        job_id,
                        reason: error_message.unwrap_or_default(),
                    });
                }
                _ => {
                    deps.notifier.notify_job_completed(job_id, done, failed).await;
                    let _ = engine.events.send(JobEvent::Completed { job_id });
                }
            }
        });

        self.handles.insert(job_id, handle);
    }

    fn reap_finished_jobs(&self) {
        let finished: Vec<i64> = self
            .handles
            .iter()
            .filter(|h| h.is_finished())
            .map(|h| *h.key())
            .collect();

        for job_id in finished {
            self.handles.remove(&job_id);
            self.controls.remove(&job_id);
        }
    }
}
