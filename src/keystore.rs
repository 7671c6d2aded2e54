//! Keystore (spec §6, ambient).
//!
//! A trait seam so the engine never hard-codes "private key in a config
//! field" — concrete enough to exercise end-to-end in tests without
//! pretending to be an HSM integration, per SPEC_FULL.md §6.

use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle(pub String);

impl KeyHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

#[async_trait]
pub trait Keystore: Send + Sync {
    /// The signer address registered under `handle`.
    fn address(&self, handle: &KeyHandle) -> Result<Address, EngineError>;

    /// Signs a typed transaction for broadcast.
    async fn sign(&self, handle: &KeyHandle, tx: &TypedTransaction) -> Result<Signature, EngineError>;
}

/// In-process keystore backed by `ethers::signers::LocalWallet`.
///
/// Keys are registered at startup from environment/config and looked up by
/// an opaque handle so executors never see raw key material.
pub struct LocalKeystore {
    wallets: std::collections::HashMap<String, LocalWallet>,
}

impl LocalKeystore {
    pub fn new() -> Self {
        Self {
            wallets: std::collections::HashMap::new(),
        }
    }

    pub fn register(&mut self, handle: KeyHandle, wallet: LocalWallet) {
        self.wallets.insert(handle.0, wallet);
    }

    pub fn register_from_private_key(
        &mut self,
        handle: KeyHandle,
        private_key_hex: &str,
        chain_id: u64,
    ) -> Result<(), EngineError> {
        let key_bytes = hex::decode(private_key_hex.trim_start_matches("0x"))
            .map_err(|e| EngineError::Keystore(format!("invalid private key hex: {e}")))?;
        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| EngineError::Keystore(format!("invalid private key: {e}")))?;
        let wallet: LocalWallet = LocalWallet::from(signing_key).with_chain_id(chain_id);
        self.register(handle, wallet);
        Ok(())
    }
}

impl Default for LocalKeystore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Keystore for LocalKeystore {
    fn address(&self, handle: &KeyHandle) -> Result<Address, EngineError> {
        self.wallets
            .get(&handle.0)
            .map(|w| w.address())
            .ok_or_else(|| EngineError::Keystore(format!("unknown key handle: {}", handle.0)))
    }

    async fn sign(&self, handle: &KeyHandle, tx: &TypedTransaction) -> Result<Signature, EngineError> {
        let wallet = self
            .wallets
            .get(&handle.0)
            .ok_or_else(|| EngineError::Keystore(format!("unknown key handle: {}", handle.0)))?;
        wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| EngineError::Keystore(format!("signing failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_handle_errors() {
        let keystore = LocalKeystore::new();
        let handle = KeyHandle::new("missing");
        assert!(keystore.address(&handle).is_err());
    }

    #[test]
    fn register_from_private_key_roundtrips_address() {
        let mut keystore = LocalKeystore::new();
        // well-known anvil/hardhat test key #0
        let pk = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        keystore
            .register_from_private_key(KeyHandle::new("signer-0"), pk, 56)
            .unwrap();
        let addr = keystore.address(&KeyHandle::new("signer-0")).unwrap();
        assert_ne!(addr, Address::zero());
    }
}
