//! Distribution executor (spec §4.7).
//!
//! Sends one native or ERC-20 transfer per recipient from a single signer.
//! Grounded on original_source's `DistributionExecutor`: per-recipient
//! nonce reserve, build, sign, send, ticket finalize, progress flush every
//! ten items, and a fixed inter-transaction delay to avoid flooding the
//! sequencer/mempool.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::keystore::KeyHandle;
use crate::store::{JobPatch, NewTxRecord};

use super::{submit_with_nonce_retry, ExecutionContext, Executor, FailureStreak};

const PROGRESS_FLUSH_EVERY: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub signer_handle: String,
    /// `None` sends the native asset; `Some` sends an ERC-20.
    pub token: Option<Address>,
    pub recipients: Vec<Address>,
    pub amount_wei: U256,
    pub gas_price_wei: Option<U256>,
    pub inter_tx_delay_ms: u64,
}

pub struct DistributionExecutor {
    pub config: DistributionConfig,
}

#[async_trait]
impl Executor for DistributionExecutor {
    async fn run(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let cfg = &self.config;
        let handle = KeyHandle::new(cfg.signer_handle.clone());
        let signer = ctx.deps.keystore.address(&handle)?;
        let mut streak = FailureStreak::new(ctx.deps.consecutive_failure_threshold);

        for (i, recipient) in cfg.recipients.iter().enumerate() {
            if !ctx.control.wait_if_paused().await {
                info!("job #{} cancelled during distribution", ctx.job_id);
                break;
            }

            let result = submit_with_nonce_retry(ctx, &handle, || async {
                if let Some(token) = cfg.token {
                    ctx.deps
                        .builder
                        .build_token_transfer(signer, token, *recipient, cfg.amount_wei, cfg.gas_price_wei)
                        .await
                } else {
                    ctx.deps
                        .builder
                        .build_native_transfer(signer, *recipient, cfg.amount_wei, cfg.gas_price_wei)
                        .await
                }
            })
            .await;

            match result {
                Ok((hash, ticket)) => {
                    let _ = ctx
                        .deps
                        .store
                        .append_tx(NewTxRecord {
                            job_id: ctx.job_id,
                            kind: if cfg.token.is_some() { "erc20_transfer" } else { "native_transfer" }.into(),
                            token_addr: cfg.token,
                            from: signer,
                            to: *recipient,
                            amount_wei: cfg.amount_wei,
                            gas_price_wei: cfg.gas_price_wei.unwrap_or_default(),
                            tx_hash: hash,
                        })
                        .await;

                    let _ = ctx.deps.watcher.watch(hash, ticket);
                    ctx.control.record_success();
                    streak.record_success();
                }
                Err(e) => {
                    warn!("distribution item failed for {:?}: {}", recipient, e);
                    ctx.control.record_failure();
                    streak.record_failure()?;
                }
            }

            if (i as u64 + 1) % PROGRESS_FLUSH_EVERY == 0 {
                let (done, failed, _) = ctx.control.snapshot();
                let _ = ctx
                    .deps
                    .store
                    .update_job(ctx.job_id, JobPatch { done: Some(done), failed: Some(failed), ..Default::default() })
                    .await;
            }

            if cfg.inter_tx_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(cfg.inter_tx_delay_ms)).await;
            }
        }

        Ok(())
    }
}
