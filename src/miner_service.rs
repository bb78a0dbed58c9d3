//! Background mining on the tokio runtime.
//!
//! Each round runs on the blocking pool so the nonce search never stalls
//! async tasks. Between rounds the service sleeps for `mining_interval_ms`
//! or until nudged.

use crate::api::MineOutcome;
use crate::engine::{EngineError, LedgerEngine};
use omni_consensus::CancelToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

pub struct MinerService {
    token: CancelToken,
    wake: Arc<Notify>,
    handle: JoinHandle<u64>,
}

impl MinerService {
    /// Start mining rounds against `engine`. Must be called inside a tokio runtime.
    pub fn spawn(engine: Arc<LedgerEngine>) -> Self {
        let token = CancelToken::new();
        let wake = Arc::new(Notify::new());
        let interval = Duration::from_millis(engine.config().mining_interval_ms);

        let handle = tokio::spawn(run(engine, token.clone(), wake.clone(), interval));
        info!("Miner service started (interval {:?})", interval);
        MinerService { token, wake, handle }
    }

    /// Start the next round without waiting out the interval
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    /// Abandon the current round, stop the loop and return the number of
    /// blocks mined. Transactions of an abandoned round stay pending.
    pub async fn shutdown(self) -> Result<u64, JoinError> {
        self.token.cancel();
        self.wake.notify_one();
        let mined = self.handle.await?;
        info!("Miner service stopped after {} blocks", mined);
        Ok(mined)
    }
}

async fn run(
    engine: Arc<LedgerEngine>,
    token: CancelToken,
    wake: Arc<Notify>,
    interval: Duration,
) -> u64 {
    let mut mined = 0u64;

    while !token.is_cancelled() {
        let dropped = engine.prune_mempool();
        if !dropped.is_empty() {
            warn!("Pruned {} expired transactions", dropped.len());
        }

        let round_engine = engine.clone();
        let round_token = token.clone();
        let outcome =
            tokio::task::spawn_blocking(move || round_engine.mine_pending_cancellable(&round_token))
                .await;

        match outcome {
            Ok(Ok(MineOutcome::Mined(summary))) => {
                mined += 1;
                info!(
                    "Mined block {} with {} transactions ({} failed)",
                    summary.index, summary.tx_count, summary.failed
                );
            }
            Ok(Ok(MineOutcome::NothingToMine)) => {}
            Ok(Err(EngineError::Cancelled)) => break,
            Ok(Err(err)) => error!("Mining round failed: {}", err),
            Err(err) => {
                error!("Mining task panicked: {}", err);
                break;
            }
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }

    mined
}
