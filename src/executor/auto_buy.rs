//! Auto-buy executor (spec §4.7).
//!
//! Repeatedly swaps a fixed input amount into a target token through the
//! best of the candidate router paths. original_source's `AutoBuyExecutor`
//! is a stub (`# TODO: Реализовать swap через роутер`); this builds the
//! real swap using the path-selection and slippage-floor math in
//! [`crate::path`], mirrored from the sibling `AutoSellExecutor`'s fully
//! implemented swap sequence (quote, allowance, build, sign, send).

use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::builder::SwapKind;
use crate::error::EngineError;
use crate::keystore::KeyHandle;
use crate::path::{apply_slippage_floor, candidate_paths, select_best_path};
use crate::store::{JobPatch, NewTxRecord};

use super::{ExecutionContext, Executor, FailureStreak};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoBuyConfig {
    pub signer_handle: String,
    pub router: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in_wei: U256,
    pub total_buys: u64,
    pub slippage_percent: u64,
    pub interval_s: u64,
    pub gas_price_wei: Option<U256>,
}

pub struct AutoBuyExecutor {
    pub config: AutoBuyConfig,
}

#[async_trait]
impl Executor for AutoBuyExecutor {
    async fn run(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let cfg = &self.config;
        let handle = KeyHandle::new(cfg.signer_handle.clone());
        let signer = ctx.deps.keystore.address(&handle)?;
        let is_native_in = cfg.token_in == ctx.deps.wrapped_native;
        let mut streak = FailureStreak::new(ctx.deps.consecutive_failure_threshold);

        for cycle in 0..cfg.total_buys {
            if !ctx.control.wait_if_paused().await {
                info!("job #{} cancelled during auto-buy", ctx.job_id);
                break;
            }

            if let Err(e) = self.buy_once(ctx, &handle, signer, is_native_in).await {
                warn!("auto-buy cycle {} failed: {}", cycle, e);
                ctx.control.record_failure();
                streak.record_failure()?;
            } else {
                ctx.control.record_success();
                streak.record_success();
            }

            let (done, failed, _) = ctx.control.snapshot();
            let _ = ctx
                .deps
                .store
                .update_job(ctx.job_id, JobPatch { done: Some(done), failed: Some(failed), ..Default::default() })
                .await;

            if cfg.interval_s > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(cfg.interval_s)).await;
            }
        }

        Ok(())
    }
}

impl AutoBuyExecutor {
    async fn buy_once(
        &self,
        ctx: &ExecutionContext,
        handle: &KeyHandle,
        signer: Address,
        is_native_in: bool,
    ) -> Result<(), EngineError> {
        let cfg = &self.config;

        let candidates = candidate_paths(cfg.token_in, cfg.token_out, ctx.deps.wrapped_native, ctx.deps.usdt);
        let quote = select_best_path(&ctx.deps.builder, cfg.router, cfg.amount_in_wei, &candidates)
            .await
            .map_err(EngineError::Build)?;
        let min_out = apply_slippage_floor(quote.amount_out, cfg.slippage_percent);
        if min_out.is_zero() {
            return Err(EngineError::Build(crate::error::BuildError::SimulationReverted(
                "quoted output is zero".into(),
            )));
        }

        if !is_native_in {
            if let Some(approve) = ctx
                .deps
                .builder
                .ensure_allowance(signer, cfg.token_in, cfg.router, cfg.amount_in_wei, cfg.gas_price_wei)
                .await
                .map_err(EngineError::Build)?
            {
                let ticket = approve.ticket.clone();
                let signed = ctx.deps.builder.sign(approve, handle).await.map_err(EngineError::Build)?;
                match ctx.deps.builder.broadcast(&signed).await {
                    Ok(hash) => {
                        ctx.deps.arbiter.complete(signed.ticket, hash).await?;
                        self.wait_for_receipt(ctx, hash).await;
                    }
                    Err(e) => {
                        ctx.deps.arbiter.fail(ticket, e.to_string()).await;
                        return Err(EngineError::Build(e));
                    }
                }
            }
        }

        let kind = if is_native_in { SwapKind::EthForTokens } else { SwapKind::TokensForTokens };
        let native_value = if is_native_in { Some(cfg.amount_in_wei) } else { None };

        let (hash, ticket) = super::submit_with_nonce_retry(ctx, handle, || async {
            ctx.deps
                .builder
                .build_router_swap(
                    kind,
                    signer,
                    cfg.router,
                    cfg.amount_in_wei,
                    min_out,
                    quote.path.clone(),
                    native_value,
                    None,
                    cfg.gas_price_wei,
                )
                .await
        })
        .await?;

        let _ = ctx
            .deps
            .store
            .append_tx(NewTxRecord {
                job_id: ctx.job_id,
                kind: "router_swap".into(),
                token_addr: Some(cfg.token_out),
                from: signer,
                to: cfg.router,
                amount_wei: cfg.amount_in_wei,
                gas_price_wei: cfg.gas_price_wei.unwrap_or_default(),
                tx_hash: hash,
            })
            .await;
        let _ = ctx.deps.watcher.watch(hash, ticket);
        Ok(())
    }

    /// Blocks only long enough for the approve to land before reserving a
    /// fresh nonce for the swap - original_source waits on the approve
    /// receipt synchronously before building the swap call.
    async fn wait_for_receipt(&self, ctx: &ExecutionContext, tx_hash: ethers::types::H256) {
        for _ in 0..15 {
            if let Ok(client) = ctx.deps.rpc.acquire_with_retry().await {
                if let Ok(Some(receipt)) = client.get_transaction_receipt(tx_hash).await {
                    if receipt.status.map(|s| s.as_u64()) == Some(1) {
                        return;
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}
