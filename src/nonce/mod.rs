//! Nonce Arbiter (spec §4.2)
//!
//! Serializes transaction submissions per signer while allowing the caller
//! to discover nonce drift. The teacher's `Executor` carried a single
//! `AtomicU64` nonce for its one wallet (`src/executor/mod.rs`); this
//! generalizes that to a map `signer -> per-signer mutex-guarded state`,
//! per DESIGN NOTES §9 ("map `signer -> mutex` plus in-memory ticket
//! counter; ensure concurrent `reserve` calls for the same signer cannot
//! interleave the read-then-increment sequence").

use dashmap::DashMap;
use ethers::types::{Address, BlockId, BlockNumber, H256};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NonceError;
use crate::rpc::RpcPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceStatus {
    Reserved,
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub signer: Address,
    pub nonce: u64,
    pub status: NonceStatus,
    pub tx_hash: Option<H256>,
    pub reason: Option<String>,
    pub reserved_at: Instant,
    pub finalized_at: Option<Instant>,
}

impl Ticket {
    fn new(signer: Address, nonce: u64) -> Self {
        Self {
            signer,
            nonce,
            status: NonceStatus::Reserved,
            tx_hash: None,
            reason: None,
            reserved_at: Instant::now(),
            finalized_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignerStats {
    pub pending_count: u64,
    pub reserved_count: u64,
}

#[derive(Default)]
struct SignerFields {
    /// Nonce of the last ticket issued, or `None` before the first reserve.
    last_issued: Option<u64>,
    /// The nonce currently held in state Reserved, if any (at-most-one
    /// invariant from spec §8 Property 2).
    reserved_nonce: Option<u64>,
    pending_count: u64,
}

/// The per-signer mutex IS the serialization point: holding the guard across
/// a reserve's read-then-increment prevents two concurrent `reserve` calls
/// for the same signer from issuing the same nonce (spec §8 Property 2).
struct SignerState {
    fields: Mutex<SignerFields>,
}

impl SignerState {
    fn new() -> Self {
        Self {
            fields: Mutex::new(SignerFields::default()),
        }
    }
}

/// Per-signer nonce broker (spec §4.2).
pub struct NonceArbiter {
    signers: DashMap<Address, Arc<SignerState>>,
}

impl NonceArbiter {
    pub fn new() -> Self {
        Self {
            signers: DashMap::new(),
        }
    }

    fn state_for(&self, signer: Address) -> Arc<SignerState> {
        self.signers
            .entry(signer)
            .or_insert_with(|| Arc::new(SignerState::new()))
            .clone()
    }

    /// Issues the next nonce for `signer`. Seeds from chain on first use
    /// (`max(get_count(latest), get_count(pending))`), otherwise
    /// `last_issued + 1`.
    pub async fn reserve(&self, signer: Address, rpc: &RpcPool) -> Result<Ticket, NonceError> {
        let state = self.state_for(signer);
        let mut fields = state.fields.lock().await;

        let next = match fields.last_issued {
            Some(n) => n + 1,
            None => self.seed_from_chain(signer, rpc).await,
        };

        fields.last_issued = Some(next);
        fields.reserved_nonce = Some(next);
        drop(fields);

        debug!("reserved nonce {} for signer {:?}", next, signer);
        Ok(Ticket::new(signer, next))
    }

    async fn seed_from_chain(&self, signer: Address, rpc: &RpcPool) -> u64 {
        let client = match rpc.acquire_with_retry().await {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to acquire RPC client while seeding nonce: {:?}", e);
                return 0;
            }
        };

        let latest = client
            .get_transaction_count(signer, Some(BlockId::Number(BlockNumber::Latest)))
            .await
            .map(|n| n.as_u64())
            .unwrap_or(0);
        let pending = client
            .get_transaction_count(signer, Some(BlockId::Number(BlockNumber::Pending)))
            .await
            .map(|n| n.as_u64())
            .unwrap_or(latest);

        latest.max(pending)
    }

    /// Records that the reserved nonce has been broadcast.
    pub async fn complete(&self, mut ticket: Ticket, tx_hash: H256) -> Result<Ticket, NonceError> {
        if ticket.status != NonceStatus::Reserved {
            return Err(NonceError::AlreadyFinalized);
        }
        let state = self.state_for(ticket.signer);
        let mut fields = state.fields.lock().await;
        fields.pending_count += 1;
        drop(fields);

        ticket.status = NonceStatus::Pending;
        ticket.tx_hash = Some(tx_hash);
        Ok(ticket)
    }

    /// Confirms a Pending ticket as mined successfully.
    pub async fn confirm(&self, mut ticket: Ticket) -> Ticket {
        let state = self.state_for(ticket.signer);
        let mut fields = state.fields.lock().await;
        fields.pending_count = fields.pending_count.saturating_sub(1);
        if fields.reserved_nonce == Some(ticket.nonce) {
            fields.reserved_nonce = None;
        }
        drop(fields);

        ticket.status = NonceStatus::Confirmed;
        ticket.finalized_at = Some(Instant::now());
        ticket
    }

    /// Fails a ticket (Reserved or Pending) with a reason.
    ///
    /// Failing a Reserved ticket releases its nonce only if no later nonce
    /// for the same signer has been reserved since; otherwise the slot is
    /// burned until the next `resync` (spec §4.2 Policy).
    pub async fn fail(&self, mut ticket: Ticket, reason: impl Into<String>) -> Ticket {
        let state = self.state_for(ticket.signer);
        let mut fields = state.fields.lock().await;

        let was_pending = ticket.status == NonceStatus::Pending;
        if was_pending {
            fields.pending_count = fields.pending_count.saturating_sub(1);
        }
        if !was_pending && fields.last_issued == Some(ticket.nonce) {
            // Only a still-Reserved ticket can give its nonce back: a
            // Pending ticket was already broadcast, so the chain's nonce
            // counter has already moved past it and reissuing it here
            // would collide on the next broadcast.
            fields.last_issued = ticket.nonce.checked_sub(1);
        }
        if fields.reserved_nonce == Some(ticket.nonce) {
            fields.reserved_nonce = None;
        }
        drop(fields);

        ticket.status = NonceStatus::Failed;
        ticket.reason = Some(reason.into());
        ticket.finalized_at = Some(Instant::now());
        ticket
    }

    /// Clears in-memory state and re-seeds from chain.
    pub async fn resync(&self, signer: Address, rpc: &RpcPool) {
        let state = self.state_for(signer);
        let mut fields = state.fields.lock().await;
        let fresh = self.seed_from_chain(signer, rpc).await;
        fields.last_issued = fresh.checked_sub(1);
        fields.reserved_nonce = None;
        fields.pending_count = 0;
        drop(fields);

        warn!("resynced nonce state for signer {:?} to {}", signer, fresh);
    }

    pub async fn stats(&self, signer: Address) -> SignerStats {
        match self.signers.get(&signer) {
            Some(state) => {
                let fields = state.fields.lock().await;
                SignerStats {
                    pending_count: fields.pending_count,
                    reserved_count: if fields.reserved_nonce.is_some() { 1 } else { 0 },
                }
            }
            None => SignerStats::default(),
        }
    }
}

impl Default for NonceArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_starts_reserved() {
        let ticket = Ticket::new(Address::zero(), 5);
        assert_eq!(ticket.status, NonceStatus::Reserved);
        assert_eq!(ticket.nonce, 5);
    }

    #[tokio::test]
    async fn stats_default_to_zero() {
        let arbiter = NonceArbiter::new();
        let stats = arbiter.stats(Address::zero()).await;
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.reserved_count, 0);
    }
}
