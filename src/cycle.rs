//! Batched iteration over the target list.
//!
//! Targets are visited strictly sequentially, in fixed-size batches, with a
//! short pause between visits and a longer one between batches. Batching
//! exists to bound the engine's peak memory, not to parallelize: everything
//! shares one authenticated session. A single target's omission never
//! aborts the cycle.

use crate::config::{Target, WatchConfig};
use crate::extract::{ExtractionRecord, TargetExtractor};
use crate::memory;
use crate::session::Session;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of one full pass over the target list.
#[derive(Debug, Default)]
pub struct CycleResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub records: Vec<ExtractionRecord>,
}

/// Drives the extractor over the full target list in bounded batches.
pub struct BatchRunner {
    extractor: TargetExtractor,
    batch_size: usize,
    target_pause: Duration,
    batch_pause: Duration,
}

impl BatchRunner {
    pub fn new(cfg: &WatchConfig) -> Self {
        Self {
            extractor: TargetExtractor::new(cfg),
            batch_size: cfg.batch_size.max(1),
            target_pause: cfg.target_pause,
            batch_pause: cfg.batch_pause,
        }
    }

    pub fn with_extractor(
        extractor: TargetExtractor,
        batch_size: usize,
        target_pause: Duration,
        batch_pause: Duration,
    ) -> Self {
        Self {
            extractor,
            batch_size: batch_size.max(1),
            target_pause,
            batch_pause,
        }
    }

    /// Visit every target once. Omissions count as attempted but produce
    /// no record; they never prevent later targets from being attempted.
    pub async fn run_cycle(&self, session: &Session, targets: &[Target]) -> CycleResult {
        let mut result = CycleResult::default();
        let batch_count = targets.len().div_ceil(self.batch_size);

        for (batch_index, batch) in targets.chunks(self.batch_size).enumerate() {
            debug!(
                "batch {}/{}: {} target(s)",
                batch_index + 1,
                batch_count,
                batch.len()
            );

            for (i, target) in batch.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(self.target_pause).await;
                }

                result.attempted += 1;
                if let Some(record) = self.extractor.extract(session, target).await {
                    result.succeeded += 1;
                    result.records.push(record);
                }
            }

            // Give the allocator a chance to hand freed pages back while
            // the engine is between batches.
            memory::reclaim();

            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        info!(
            "cycle pass complete: attempted={} succeeded={}",
            result.attempted, result.succeeded
        );
        result
    }
}
