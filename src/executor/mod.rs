//! Executors (spec §4.7).
//!
//! One `Executor` impl per `JobMode`, all built on the shared progress/
//! pause/cancel contract `engine::JobControl`. Grounded on original_source's
//! `BaseExecutor` (shared `pause()`/`resume()`/`cancel()`/`wait_if_paused()`/
//! `update_progress()`) with its four subclasses `DistributionExecutor`,
//! `AutoBuyExecutor`, `AutoSellExecutor`, `RewardsExecutor` - this module
//! replaces the teacher's Arbitrum-specific single-wallet `Executor`
//! (`submit_with_resubmission` against one arb contract), which has no
//! counterpart in this engine's multi-signer, multi-mode scheduling model.

pub mod auto_buy;
pub mod auto_sell;
pub mod distribution;
pub mod rewards;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::builder::PreparedTx;
use crate::engine::{EngineDeps, JobControl};
use crate::error::{BuildError, EngineError};
use crate::keystore::KeyHandle;
use crate::nonce::Ticket;

/// Everything an executor needs to run one job to completion.
pub struct ExecutionContext {
    pub job_id: i64,
    pub deps: Arc<EngineDeps>,
    pub control: Arc<JobControl>,
}

/// Tracks back-to-back item failures within one executor's run loop and
/// fails the job once `threshold` is reached without an intervening
/// success (spec §4.7, e.g. auto-buy: "consecutive-failure threshold
/// (default 5) triggers job failure"). A `threshold` of 0 disables the
/// check.
pub struct FailureStreak {
    count: u32,
    threshold: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self { count: 0, threshold }
    }

    pub fn record_success(&mut self) {
        self.count = 0;
    }

    pub fn record_failure(&mut self) -> Result<(), EngineError> {
        self.count += 1;
        if self.threshold > 0 && self.count >= self.threshold {
            Err(EngineError::ConsecutiveFailures(self.count))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait Executor {
    async fn run(&self, ctx: &ExecutionContext) -> Result<(), EngineError>;
}

/// Builds, signs, broadcasts and (on success) completes the nonce ticket
/// for one transaction, retrying exactly once on `nonce too low`/`nonce
/// too high` after resyncing the signer's arbiter state (spec §7 "Nonce
/// drift ... the item is retried once in the same cycle; if the retry
/// also drifts, the item fails" — the uniform policy resolving spec.md
/// Open Question 1). `build` is called again from scratch on retry so the
/// rebuilt transaction carries a freshly reserved nonce. On success the
/// returned [`Ticket`] is already `Pending` and ready to hand to the
/// [`crate::watcher::ReceiptWatcher`].
pub async fn submit_with_nonce_retry<F, Fut>(
    ctx: &ExecutionContext,
    handle: &KeyHandle,
    build: F,
) -> Result<(H256, Ticket), EngineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<PreparedTx, BuildError>>,
{
    match try_once(ctx, handle, &build).await {
        Ok(outcome) => Ok(outcome),
        Err((e, Some(signer))) if e.is_nonce_drift() => {
            warn!("nonce drift ({}) for signer {:?}, resyncing and retrying once", e, signer);
            ctx.deps.arbiter.resync(signer, &ctx.deps.rpc).await;
            try_once(ctx, handle, &build).await.map_err(|(e, _)| EngineError::Build(e))
        }
        Err((e, _)) => Err(EngineError::Build(e)),
    }
}

async fn try_once<F, Fut>(
    ctx: &ExecutionContext,
    handle: &KeyHandle,
    build: &F,
) -> Result<(H256, Ticket), (BuildError, Option<Address>)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<PreparedTx, BuildError>>,
{
    let prepared = build().await.map_err(|e| (e, None))?;
    let signer = prepared.ticket.signer;
    let ticket_on_sign_failure = prepared.ticket.clone();

    let signed = match ctx.deps.builder.sign(prepared, handle).await {
        Ok(s) => s,
        Err(e) => {
            ctx.deps.arbiter.fail(ticket_on_sign_failure, e.to_string()).await;
            return Err((e, Some(signer)));
        }
    };

    match ctx.deps.builder.broadcast(&signed).await {
        Ok(hash) => {
            let ticket = ctx
                .deps
                .arbiter
                .complete(signed.ticket, hash)
                .await
                .map_err(|e| (BuildError::Rejected(e.to_string()), Some(signer)))?;
            Ok((hash, ticket))
        }
        Err(e) => {
            ctx.deps.arbiter.fail(signed.ticket, e.to_string()).await;
            Err((e, Some(signer)))
        }
    }
}
