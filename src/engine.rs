//! The engine facade: every provided operation in one cloneable handle.

use std::sync::Arc;

use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::Utc;
use uuid::Uuid;

use crate::chain::{ChainRegistry, PolygonAdapter, TronAdapter};
use crate::config::{Config, FeePolicy, MasterKeySourceKind, MonitorConfig};
use crate::crypto::KeyVault;
use crate::domain::{Milestone, MilestoneStatus, Network, Transaction};
use crate::error::EngineResult;
use crate::ports::{ConversationRelay, LedgerStore, Notifier};
use crate::secrets::{EnvMasterKeys, MasterKeySource, VaultMasterKeys};
use crate::services::{
    BroadcastRelay, ChargeQuote, CreateMilestone, LedgerService, MilestoneEscrow, PaymentMonitor,
    PaymentService, PollReport, TracingNotifier, WalletLifecycleManager, WebhookNotifier,
    WithdrawalRunReport, WithdrawalSettler,
};

/// Collaborators the engine is assembled from.
pub struct EngineDeps {
    pub store: Arc<dyn LedgerStore>,
    pub chains: ChainRegistry,
    pub vault: Arc<KeyVault>,
    pub master_keys: Arc<dyn MasterKeySource>,
    pub notifier: Arc<dyn Notifier>,
    pub relay: Arc<dyn ConversationRelay>,
    pub fees: FeePolicy,
    pub monitor: MonitorConfig,
    pub platform_admin_user_id: Uuid,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn LedgerStore>,
    pub wallets: WalletLifecycleManager,
    pub ledger: LedgerService,
    pub payments: PaymentService,
    pub monitor: PaymentMonitor,
    pub withdrawals: WithdrawalSettler,
    pub milestones: MilestoneEscrow,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Self {
        let wallets =
            WalletLifecycleManager::new(deps.store.clone(), deps.chains.clone(), deps.vault);
        let payments = PaymentService::new(
            deps.store.clone(),
            wallets.clone(),
            deps.fees.clone(),
            deps.monitor.charge_ttl_minutes,
        );
        let monitor = PaymentMonitor::new(
            deps.store.clone(),
            wallets.clone(),
            deps.fees.clone(),
            deps.monitor,
            deps.notifier.clone(),
        );
        let withdrawals = WithdrawalSettler::new(
            deps.store.clone(),
            deps.chains,
            deps.fees.clone(),
            deps.master_keys,
            deps.notifier.clone(),
        );
        let milestones = MilestoneEscrow::new(
            deps.store.clone(),
            deps.fees,
            deps.platform_admin_user_id,
            deps.notifier,
            deps.relay,
        );

        Self {
            ledger: LedgerService::new(deps.store.clone()),
            store: deps.store,
            wallets,
            payments,
            monitor,
            withdrawals,
            milestones,
        }
    }

    /// Wires chain adapters, key sources and notifiers from configuration around `store`.
    pub async fn from_config(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        relay: Arc<dyn ConversationRelay>,
    ) -> Result<Self> {
        let chains = ChainRegistry::new()
            .with(Arc::new(TronAdapter::new(config.tron.clone())))
            .with(Arc::new(PolygonAdapter::new(config.polygon.clone())));

        let master_keys: Arc<dyn MasterKeySource> = match config.master_key_source {
            MasterKeySourceKind::Env => Arc::new(EnvMasterKeys),
            MasterKeySourceKind::Vault => Arc::new(VaultMasterKeys::new().await?),
        };

        let notifier: Arc<dyn Notifier> = match &config.notify {
            Some(notify) => Arc::new(WebhookNotifier::new(
                notify.webhook_url.clone(),
                notify.webhook_secret.clone(),
            )),
            None => Arc::new(TracingNotifier),
        };

        Ok(Self::new(EngineDeps {
            store,
            chains,
            vault: Arc::new(KeyVault::from_config(&config.wallet_keys)),
            master_keys,
            notifier,
            relay,
            fees: config.fees.clone(),
            monitor: config.monitor.clone(),
            platform_admin_user_id: config.platform_admin_user_id,
        }))
    }

    /// Default relay for callers that do not bring their own.
    pub fn default_relay() -> Arc<BroadcastRelay> {
        Arc::new(BroadcastRelay::default())
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn get_balance(&self, user_id: Uuid) -> EngineResult<BigDecimal> {
        self.ledger.get_balance(user_id).await
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
    ) -> EngineResult<Vec<Transaction>> {
        self.ledger.list_transactions(user_id, page, limit).await
    }

    pub async fn initiate_charge(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
        network: Network,
    ) -> EngineResult<ChargeQuote> {
        self.payments.initiate_charge(user_id, amount, network).await
    }

    pub async fn get_charge_status(&self, id: Uuid) -> EngineResult<Transaction> {
        self.payments.get_charge_status(id).await
    }

    pub async fn cancel_charge(&self, id: Uuid, user_id: Uuid) -> EngineResult<Transaction> {
        self.payments.cancel_charge(id, user_id).await
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
        destination: &str,
        network: Network,
    ) -> EngineResult<Transaction> {
        self.withdrawals
            .withdraw(user_id, amount, destination, network)
            .await
    }

    pub async fn process_withdraw(&self, id: Uuid) -> EngineResult<Transaction> {
        self.withdrawals.process_withdraw(id).await
    }

    pub async fn process_pending_withdrawals(
        &self,
        limit: i64,
    ) -> EngineResult<WithdrawalRunReport> {
        self.withdrawals.process_pending_withdrawals(limit).await
    }

    pub async fn get_withdraw_status(&self, id: Uuid) -> EngineResult<Transaction> {
        self.withdrawals.get_withdraw_status(id).await
    }

    pub async fn create_milestone(
        &self,
        client_id: Uuid,
        input: CreateMilestone,
    ) -> EngineResult<Milestone> {
        self.milestones.create_milestone(client_id, input).await
    }

    pub async fn transition_milestone(
        &self,
        id: Uuid,
        actor_id: Uuid,
        to: MilestoneStatus,
    ) -> EngineResult<Milestone> {
        self.milestones.transition_milestone(id, actor_id, to).await
    }

    pub async fn accept_pending_payment(
        &self,
        transaction_id: Uuid,
        provider_id: Uuid,
    ) -> EngineResult<Transaction> {
        self.milestones
            .accept_pending_payment(transaction_id, provider_id)
            .await
    }

    pub async fn override_disputed_amount(
        &self,
        transaction_id: Uuid,
        new_amount: BigDecimal,
    ) -> EngineResult<Transaction> {
        self.milestones
            .override_disputed_amount(transaction_id, new_amount)
            .await
    }

    pub async fn list_milestones(&self, user_id: Uuid) -> EngineResult<Vec<Milestone>> {
        self.milestones.list_milestones(user_id).await
    }

    pub async fn get_milestone(&self, id: Uuid, user_id: Uuid) -> EngineResult<Milestone> {
        self.milestones.get_milestone(id, user_id).await
    }

    pub async fn poll_once(&self) -> EngineResult<PollReport> {
        self.monitor.poll_once(Utc::now()).await
    }

    pub async fn sweep_expired(&self) -> EngineResult<u64> {
        self.monitor.sweep_expired(Utc::now()).await
    }
}
