//! Deposit wallet lifecycle: generate, encrypt, persist, decrypt, retire.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::chain::{ChainAdapter, ChainRegistry};
use crate::crypto::{CryptoError, KeyVault};
use crate::domain::{Network, TempWallet};
use crate::error::{EngineError, EngineResult};
use crate::ports::{LedgerStore, UnitOfWork};

#[derive(Clone)]
pub struct WalletLifecycleManager {
    store: Arc<dyn LedgerStore>,
    chains: ChainRegistry,
    vault: Arc<KeyVault>,
}

impl WalletLifecycleManager {
    pub fn new(store: Arc<dyn LedgerStore>, chains: ChainRegistry, vault: Arc<KeyVault>) -> Self {
        Self {
            store,
            chains,
            vault,
        }
    }

    pub fn adapter(&self, network: Network) -> EngineResult<Arc<dyn ChainAdapter>> {
        self.chains
            .get(network)
            .ok_or_else(|| {
                EngineError::Config(format!("no chain adapter configured for {network}"))
            })
    }

    /// Generates and encrypts a fresh deposit wallet without saving it.
    pub fn new_deposit_wallet(&self, user_id: Uuid, network: Network) -> EngineResult<TempWallet> {
        let keypair = self.adapter(network)?.generate_keypair()?;
        let encrypted = self
            .vault
            .encrypt(&keypair.private_key, &keypair.address)
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(TempWallet::new(
            user_id,
            network,
            keypair.address,
            encrypted,
            self.vault.current_key_hash().to_string(),
        ))
    }

    #[instrument(skip(self))]
    pub async fn create_deposit_wallet(
        &self,
        user_id: Uuid,
        network: Network,
    ) -> EngineResult<TempWallet> {
        let wallet = self.new_deposit_wallet(user_id, network)?;
        self.store
            .commit(UnitOfWork::new().insert_wallet(wallet.clone()))
            .await?;

        info!(wallet_id = %wallet.id, address = %wallet.address, "Deposit wallet created");
        Ok(wallet)
    }

    pub fn get_decrypted_private_key(
        &self,
        wallet: &TempWallet,
    ) -> EngineResult<Zeroizing<String>> {
        self.vault
            .decrypt(
                &wallet.encrypted_private_key,
                &wallet.address,
                wallet.encryption_key_hash.as_deref(),
            )
            .map_err(|e| match e {
                CryptoError::NoKeyMatched { key_hash } => EngineError::KeyDecryptionFailure {
                    wallet_id: wallet.id,
                    address: wallet.address.clone(),
                    key_hash,
                },
                other => EngineError::Config(other.to_string()),
            })
    }
}
