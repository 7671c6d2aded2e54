//! Receipt Watcher (spec §4.4).
//!
//! A pool of long-lived tasks consuming a channel of `(tx_hash, ticket,
//! deadline)` requests and polling for receipts with exponential backoff.
//! Rewrite of the teacher's DEX-swap-log `EventWatcher`/`CombinedWatcher`
//! (WebSocket log subscriptions, irrelevant to this engine's synchronous
//! request/response model) into the literal contract this spec calls for.
//!
//! Timeout never finalizes a ticket as failed - grounded in
//! original_source's `_wait_receipt_async`, whose trailing comment reads
//! "НЕ финализируем как ошибку" (do not finalize as an error): the
//! transaction may still land later, so a timed-out ticket stays Pending.

use ethers::types::{H256, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::nonce::{NonceArbiter, Ticket};
use crate::rpc::RpcPool;
use crate::store::{Store, TxStatus};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(3);
const MAX_ATTEMPTS: u32 = 10;
const PER_TX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct WatchRequest {
    pub tx_hash: H256,
    pub ticket: Ticket,
}

#[derive(Debug, Clone)]
pub enum ReceiptOutcome {
    Confirmed {
        ticket: Ticket,
        tx_hash: H256,
        block_number: Option<u64>,
        gas_used: Option<U256>,
    },
    Reverted {
        ticket: Ticket,
        tx_hash: H256,
        reason: String,
    },
    /// Still unresolved after the polling budget. The ticket is returned
    /// unchanged (still Pending) so the caller can decide whether to
    /// re-watch it.
    TimedOut {
        ticket: Ticket,
        tx_hash: H256,
    },
}

/// Dispatches receipt-polling work to a fixed pool of background tasks.
pub struct ReceiptWatcher {
    requests: mpsc::UnboundedSender<WatchRequest>,
}

impl ReceiptWatcher {
    /// Spawns `worker_count` long-lived poller tasks sharing one request
    /// queue, plus a single consumer task that folds every outcome back
    /// into `tx_history` (spec §4.4: confirmed/reverted receipts update
    /// persisted status; a timeout leaves the row `pending` for the next
    /// reconcile pass rather than finalizing it).
    pub fn spawn(rpc: Arc<RpcPool>, arbiter: Arc<NonceArbiter>, store: Arc<Store>, worker_count: usize) -> Self {
        let (req_tx, req_rx) = mpsc::unbounded_channel::<WatchRequest>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<ReceiptOutcome>();
        let req_rx = Arc::new(Mutex::new(req_rx));

        for worker_id in 0..worker_count.max(1) {
            let req_rx = req_rx.clone();
            let out_tx = out_tx.clone();
            let rpc = rpc.clone();
            let arbiter = arbiter.clone();

            tokio::spawn(async move {
                loop {
                    let request = {
                        let mut guard = req_rx.lock().await;
                        guard.recv().await
                    };
                    let Some(request) = request else {
                        debug!("receipt watcher worker {} shutting down", worker_id);
                        break;
                    };

                    let outcome = Self::poll_one(&rpc, &arbiter, request).await;
                    if out_tx.send(outcome).is_err() {
                        warn!("receipt outcome receiver dropped");
                        break;
                    }
                }
            });
        }

        tokio::spawn(Self::run_store_sink(out_rx, store));

        Self { requests: req_tx }
    }

    async fn run_store_sink(mut out_rx: mpsc::UnboundedReceiver<ReceiptOutcome>, store: Arc<Store>) {
        while let Some(outcome) = out_rx.recv().await {
            let result = match outcome {
                ReceiptOutcome::Confirmed { tx_hash, gas_used, .. } => {
                    store.set_tx_status(tx_hash, TxStatus::Mined, gas_used, None).await
                }
                ReceiptOutcome::Reverted { tx_hash, reason, .. } => {
                    store.set_tx_status(tx_hash, TxStatus::Failed, None, Some(reason)).await
                }
                ReceiptOutcome::TimedOut { .. } => continue,
            };
            if let Err(e) = result {
                warn!("failed to persist receipt outcome: {}", e);
            }
        }
    }

    /// Enqueues a transaction to watch. Never blocks the caller.
    pub fn watch(&self, tx_hash: H256, ticket: Ticket) -> Result<(), WatchRequest> {
        self.requests
            .send(WatchRequest { tx_hash, ticket })
            .map_err(|e| e.0)
    }

    async fn poll_one(rpc: &RpcPool, arbiter: &NonceArbiter, request: WatchRequest) -> ReceiptOutcome {
        let WatchRequest { tx_hash, ticket } = request;
        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;

        while attempt < MAX_ATTEMPTS && start.elapsed() < PER_TX_TIMEOUT {
            attempt += 1;

            let client = match rpc.acquire_with_retry().await {
                Ok(c) => c,
                Err(e) => {
                    warn!("rpc unavailable while polling {:?}: {:?}", tx_hash, e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            match client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let block_number = receipt.block_number.map(|n| n.as_u64());
                    let gas_used = receipt.gas_used;
                    return if receipt.status.map(|s| s.as_u64()) == Some(1) {
                        info!("tx confirmed: {:?} (attempt {})", tx_hash, attempt);
                        let ticket = arbiter.confirm(ticket).await;
                        ReceiptOutcome::Confirmed {
                            ticket,
                            tx_hash,
                            block_number,
                            gas_used,
                        }
                    } else {
                        warn!("tx reverted on-chain: {:?}", tx_hash);
                        let ticket = arbiter.fail(ticket, "reverted on-chain").await;
                        ReceiptOutcome::Reverted {
                            ticket,
                            tx_hash,
                            reason: "reverted on-chain".into(),
                        }
                    };
                }
                Ok(None) => {
                    debug!(
                        "receipt not yet available for {:?}, attempt {}/{}",
                        tx_hash, attempt, MAX_ATTEMPTS
                    );
                }
                Err(e) => {
                    debug!("error polling receipt for {:?}: {:?}", tx_hash, e);
                    rpc.report_failure(&client.url).await;
                }
            }

            let remaining = PER_TX_TIMEOUT.saturating_sub(start.elapsed());
            tokio::time::sleep(backoff.min(remaining)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        warn!(
            "receipt poll timed out for {:?} after {} attempts - leaving ticket pending",
            tx_hash, attempt
        );
        ReceiptOutcome::TimedOut { ticket, tx_hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_three_seconds() {
        let mut backoff = INITIAL_BACKOFF;
        for _ in 0..5 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
