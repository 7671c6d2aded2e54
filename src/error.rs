//! Error taxonomy for the job engine.
//!
//! Each component has its own error enum; all convert into [`EngineError`]
//! via `#[from]` so executors can propagate with `?` while still recording
//! a semantic reason (spec §7) rather than a raw transport error.

use ethers::types::H256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no healthy RPC endpoint available")]
    NoHealthyEndpoint,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("json-rpc application error: {0}")]
    Application(String),
}

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("signer {0:?} has no reserved ticket to complete")]
    NoReservedTicket(ethers::types::Address),
    #[error("ticket already finalized")]
    AlreadyFinalized,
}

/// Typed reasons surfaced by the builder/sender (spec §4.3).
#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("insufficient allowance for spender")]
    InsufficientAllowance,
    #[error("simulation reverted: {0}")]
    SimulationReverted(String),
    #[error("gas price underpriced relative to network")]
    Underpriced,
    #[error("nonce too low")]
    NonceTooLow,
    #[error("nonce too high")]
    NonceTooHigh,
    #[error("transient network error: {0}")]
    NetworkTransient(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl BuildError {
    /// `true` if the nonce must be resynced before the arbiter issues another ticket.
    pub fn is_nonce_drift(&self) -> bool {
        matches!(self, BuildError::NonceTooLow | BuildError::NonceTooHigh)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("duplicate tx_hash: {0:?}")]
    DuplicateTxHash(H256),
    #[error("job {0} not found")]
    JobNotFound(i64),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("keystore error: {0}")]
    Keystore(String),
    #[error("job rejected at submission: {0}")]
    JobRejected(String),
    #[error("aborted after {0} consecutive item failures")]
    ConsecutiveFailures(u32),
}
