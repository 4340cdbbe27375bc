#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use escrow_settlement::adapters::MemoryLedgerStore;
use escrow_settlement::chain::keys;
use escrow_settlement::chain::{ChainAdapter, ChainError, ChainRegistry, GeneratedKeypair};
use escrow_settlement::config::{FeePolicy, MonitorConfig};
use escrow_settlement::crypto::KeyVault;
use escrow_settlement::domain::Network;
use escrow_settlement::ports::{EngineEvent, LedgerStore, Notifier};
use escrow_settlement::secrets::MasterKeySource;
use escrow_settlement::services::BroadcastRelay;
use escrow_settlement::{Engine, EngineDeps};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const MASTER_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const POLYGON_DESTINATION: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";
pub const TRON_DESTINATION: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

#[derive(Debug, Clone)]
enum BalanceScript {
    Amount(BigDecimal),
    Fail,
    Hang,
}

/// Chain adapter with real key derivation and scripted balances and transfers.
pub struct FakeChain {
    network: Network,
    balances: Mutex<HashMap<String, BalanceScript>>,
    transfers: Mutex<Vec<(String, BigDecimal)>>,
    fail_transfers: Mutex<Option<String>>,
    unconfirmed_transfers: Mutex<Option<String>>,
    balance_calls: AtomicUsize,
}

impl FakeChain {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            balances: Mutex::new(HashMap::new()),
            transfers: Mutex::new(Vec::new()),
            fail_transfers: Mutex::new(None),
            unconfirmed_transfers: Mutex::new(None),
            balance_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_balance(&self, address: &str, amount: &str) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), BalanceScript::Amount(dec(amount)));
    }

    pub fn fail_balance(&self, address: &str) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), BalanceScript::Fail);
    }

    pub fn hang_balance(&self, address: &str) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), BalanceScript::Hang);
    }

    pub fn fail_transfers_with(&self, message: &str) {
        *self.fail_transfers.lock().unwrap() = Some(message.to_string());
    }

    /// Transfers are recorded as sent, then reported with an unknown outcome.
    pub fn leave_transfers_unconfirmed(&self, reason: &str) {
        *self.unconfirmed_transfers.lock().unwrap() = Some(reason.to_string());
    }

    pub fn transfers(&self) -> Vec<(String, BigDecimal)> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainAdapter for FakeChain {
    fn network(&self) -> Network {
        self.network
    }

    fn generate_keypair(&self) -> Result<GeneratedKeypair, ChainError> {
        let key = keys::generate_signing_key();
        let address = self.address_of(&keys::private_key_hex(&key))?;
        Ok(GeneratedKeypair {
            address,
            private_key: keys::private_key_hex(&key),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        match self.network {
            Network::Tron => keys::parse_tron_address(address).is_some(),
            Network::Polygon => keys::parse_evm_address(address).is_some(),
        }
    }

    fn address_of(&self, private_key: &str) -> Result<String, ChainError> {
        let key = keys::signing_key_from_hex(private_key)?;
        Ok(match self.network {
            Network::Tron => keys::tron_base58(&keys::tron_address_bytes(key.verifying_key())),
            Network::Polygon => {
                keys::to_checksum_address(&keys::evm_address_bytes(key.verifying_key()))
            }
        })
    }

    async fn token_balance(&self, address: &str) -> Result<BigDecimal, ChainError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.balances.lock().unwrap().get(address).cloned();
        match script {
            None => Ok(BigDecimal::from(0)),
            Some(BalanceScript::Amount(amount)) => Ok(amount),
            Some(BalanceScript::Fail) => Err(ChainError::Rpc("node unavailable".to_string())),
            Some(BalanceScript::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(BigDecimal::from(0))
            }
        }
    }

    async fn transfer(
        &self,
        private_key: &str,
        to: &str,
        amount: &BigDecimal,
    ) -> Result<String, ChainError> {
        keys::signing_key_from_hex(private_key)?;
        if let Some(message) = self.fail_transfers.lock().unwrap().clone() {
            return Err(ChainError::Rpc(message));
        }
        let mut transfers = self.transfers.lock().unwrap();
        transfers.push((to.to_string(), amount.clone()));
        let hash = format!("0x{:064x}", transfers.len());
        if let Some(reason) = self.unconfirmed_transfers.lock().unwrap().clone() {
            return Err(ChainError::BroadcastUnconfirmed { hash, reason });
        }
        Ok(hash)
    }
}

pub struct StaticMasterKeys;

#[async_trait]
impl MasterKeySource for StaticMasterKeys {
    async fn master_key(&self, _network: Network) -> anyhow::Result<Zeroizing<String>> {
        Ok(Zeroizing::new(MASTER_KEY.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: MemoryLedgerStore,
    pub tron: Arc<FakeChain>,
    pub polygon: Arc<FakeChain>,
    pub notifier: Arc<RecordingNotifier>,
    pub relay: Arc<BroadcastRelay>,
    pub vault: Arc<KeyVault>,
    pub admin_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_monitor(MonitorConfig {
            chain_timeout: Duration::from_millis(200),
            ..MonitorConfig::default()
        })
    }

    pub fn with_monitor(monitor: MonitorConfig) -> Self {
        let store = MemoryLedgerStore::new();
        let tron = Arc::new(FakeChain::new(Network::Tron));
        let polygon = Arc::new(FakeChain::new(Network::Polygon));
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = Arc::new(BroadcastRelay::default());
        let vault = Arc::new(KeyVault::new("test-wallet-key", &[]));
        let admin_id = Uuid::new_v4();

        let engine = Engine::new(EngineDeps {
            store: Arc::new(store.clone()) as Arc<dyn LedgerStore>,
            chains: ChainRegistry::new()
                .with(tron.clone())
                .with(polygon.clone()),
            vault: vault.clone(),
            master_keys: Arc::new(StaticMasterKeys),
            notifier: notifier.clone(),
            relay: relay.clone(),
            fees: FeePolicy::default(),
            monitor,
            platform_admin_user_id: admin_id,
        });

        Self {
            engine,
            store,
            tron,
            polygon,
            notifier,
            relay,
            vault,
            admin_id,
        }
    }

    pub async fn funded_user(&self, amount: &str) -> Uuid {
        let user = Uuid::new_v4();
        self.store.set_balance(user, dec(amount)).await;
        user
    }

    pub async fn balance(&self, user: Uuid) -> BigDecimal {
        self.engine.get_balance(user).await.unwrap()
    }
}
