//! Periodic compaction of a fixed set of partitions.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream::FuturesUnordered};
use glacier_resources::PartitionName;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::compactor::Compactor;

pub struct CompactionScheduler {
    compactor: Arc<Compactor>,
    partitions: Vec<PartitionName>,
    interval: Duration,
}

/// Outcome of one pass over all partitions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionRound {
    pub succeeded: usize,
    pub failed: usize,
}

pub async fn run_compaction_scheduler(scheduler: CompactionScheduler, ct: CancellationToken) {
    scheduler.run(ct).await
}

impl CompactionScheduler {
    pub fn new(compactor: Compactor, partitions: Vec<PartitionName>, interval: Duration) -> Self {
        Self {
            compactor: Arc::new(compactor),
            partitions,
            interval,
        }
    }

    /// Compacts every partition once per interval, starting immediately,
    /// until cancelled. A round in progress is finished before returning.
    pub async fn run(self, ct: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            partitions = self.partitions.len(),
            interval = ?self.interval,
            "Compaction scheduler started"
        );

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("Compaction scheduler stopped");
    }

    /// Compacts all partitions concurrently. Failures are logged and the
    /// partition is tried again on the next round.
    pub async fn run_once(&self) -> CompactionRound {
        let mut round = CompactionRound::default();

        let mut runs: FuturesUnordered<_> = self
            .partitions
            .iter()
            .map(|partition| {
                let compactor = self.compactor.clone();
                async move { (partition, compactor.compact(partition).await) }
            })
            .collect();

        while let Some((partition, result)) = runs.next().await {
            match result {
                Ok(_) => round.succeeded += 1,
                Err(err) => {
                    warn!(
                        %partition,
                        err = %err,
                        kind = ?err.kind(),
                        "Compaction failed. Retrying next round"
                    );
                    round.failed += 1;
                }
            }
        }

        round
    }
}
