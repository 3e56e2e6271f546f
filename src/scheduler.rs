//! The periodic watch loop.
//!
//! `LoopScheduler` composes session acquisition, the batch runner, the
//! record sink and the summary collaborator into one cycle, and repeats it
//! on a fixed interval until `stop()` or process shutdown. Exactly one
//! cycle is in flight at any instant: the periodic loop and the HTTP
//! trigger both go through `run_cycle_once`, which serializes on the cycle
//! mutex, so cycle N+1 can never begin acquiring a session before cycle
//! N's session is fully released.
//!
//! Every cycle-level failure is caught here, logged, and turned into a
//! no-data cycle; the loop itself never dies.

use crate::config::{Target, WatchConfig};
use crate::cycle::{BatchRunner, CycleResult};
use crate::memory;
use crate::renderer::EngineFactory;
use crate::session::{AuthError, LoginConfig, Session, SessionManager};
use crate::sink::{RecordSink, SinkError};
use crate::summary::{self, Summarizer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Time source for the loop, injectable so tests can drive cycles without
/// waiting on real time.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why a cycle produced no (or fewer) records. Caught at the cycle
/// boundary; never fatal to the loop.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] SinkError),

    #[error("unclassified cycle fault: {0}")]
    Unclassified(#[from] anyhow::Error),
}

/// What a completed cycle looked like, for the log and the HTTP trigger.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub attempted: usize,
    pub succeeded: usize,
}

pub struct LoopScheduler {
    manager: SessionManager,
    runner: BatchRunner,
    sink: RecordSink,
    summarizer: Summarizer,
    targets: Vec<Target>,
    client: String,
    poll_interval: Duration,
    memory_threshold_mb: u64,
    clock: Arc<dyn Clock>,
    shutdown: Notify,
    stopped: AtomicBool,
    cycle_count: AtomicU64,
    cycle_lock: Mutex<()>,
}

impl LoopScheduler {
    pub fn new(
        cfg: &WatchConfig,
        factory: Arc<dyn EngineFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager: SessionManager::new(factory, LoginConfig::from_watch(cfg)),
            runner: BatchRunner::new(cfg),
            sink: RecordSink::new(cfg.data_dir.clone()),
            summarizer: Summarizer::new(cfg.data_dir.clone(), &cfg.client),
            targets: cfg.targets.clone(),
            client: cfg.client.clone(),
            poll_interval: cfg.poll_interval,
            memory_threshold_mb: cfg.memory_threshold_mb,
            clock,
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
            cycle_count: AtomicU64::new(0),
            cycle_lock: Mutex::new(()),
        }
    }

    /// Cycles started so far (including failed ones).
    pub fn cycles_started(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    /// Run exactly one cycle. Serialized: concurrent callers (the periodic
    /// loop, the HTTP trigger) queue behind the cycle mutex.
    pub async fn run_cycle_once(&self) -> Result<CycleReport, CycleError> {
        let _guard = self.cycle_lock.lock().await;
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let started = self.clock.now();
        info!("cycle {cycle} started");

        let outcome = self.cycle_body(cycle).await;
        match &outcome {
            Ok(report) => info!(
                "cycle {cycle} finished: attempted={} succeeded={} elapsed_ms={}",
                report.attempted,
                report.succeeded,
                (self.clock.now() - started).num_milliseconds()
            ),
            Err(e) => warn!("cycle {cycle} failed: {e}"),
        }
        outcome
    }

    async fn cycle_body(&self, cycle: u64) -> Result<CycleReport, CycleError> {
        let mut session = self.manager.acquire().await?;
        let persisted = self.scrape_and_append(&session).await;
        // Release happens before the error (if any) propagates, so the
        // engine is torn down on every exit path.
        self.manager.release(&mut session).await;
        let result = persisted?;

        summary::regenerate_logged(&self.summarizer);

        Ok(CycleReport {
            cycle,
            attempted: result.attempted,
            succeeded: result.succeeded,
        })
    }

    async fn scrape_and_append(&self, session: &Session) -> Result<CycleResult, CycleError> {
        let result = self.runner.run_cycle(session, &self.targets).await;
        for record in &result.records {
            self.sink.append(&self.client, record)?;
        }
        Ok(result)
    }

    /// Spawn the periodic loop. Idle → Running → Sleeping → Running …,
    /// ending only when `stop()` is called.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            info!(
                "watch loop started: {} target(s), interval {:?}",
                scheduler.targets.len(),
                scheduler.poll_interval
            );
            while !scheduler.stopped.load(Ordering::SeqCst) {
                let _ = scheduler.run_cycle_once().await;
                scheduler.sample_memory();

                tokio::select! {
                    _ = scheduler.shutdown.notified() => {}
                    _ = scheduler.clock.sleep(scheduler.poll_interval) => {}
                }
            }
            info!("watch loop stopped");
        })
    }

    /// Request loop shutdown. The in-flight cycle finishes first; the loop
    /// exits instead of sleeping.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    fn sample_memory(&self) {
        if let Some(rss) = memory::rss_bytes() {
            let rss_mb = rss / (1024 * 1024);
            if rss_mb >= self.memory_threshold_mb {
                warn!(
                    "rss {rss_mb}MB at or above threshold {}MB; requesting reclamation",
                    self.memory_threshold_mb
                );
                memory::reclaim();
            } else {
                debug!("rss {rss_mb}MB (threshold {}MB)", self.memory_threshold_mb);
            }
        }
    }
}
