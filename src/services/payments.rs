//! Charge initiation and the user-facing side of charge status.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::FeePolicy;
use crate::domain::{money, Network, Transaction, TransactionKind, TransactionStatus};
use crate::error::{EngineError, EngineResult};
use crate::ports::{LedgerStore, UnitOfWork};
use crate::services::wallets::WalletLifecycleManager;
use crate::validation::validate_ledger_amount;

/// What the payer needs to complete a charge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeQuote {
    pub transaction_id: Uuid,
    pub deposit_address: String,
    pub network: Network,
    pub token: &'static str,
    pub amount: BigDecimal,
    pub platform_fee: BigDecimal,
    pub expected_total: BigDecimal,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    wallets: WalletLifecycleManager,
    fees: FeePolicy,
    charge_ttl: Duration,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: WalletLifecycleManager,
        fees: FeePolicy,
        charge_ttl_minutes: i64,
    ) -> Self {
        Self {
            store,
            wallets,
            fees,
            charge_ttl: Duration::minutes(charge_ttl_minutes),
        }
    }

    /// Opens a pending charge backed by a fresh deposit wallet.
    /// The wallet and the charge are written together.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn initiate_charge(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
        network: Network,
    ) -> EngineResult<ChargeQuote> {
        validate_ledger_amount(&amount).map_err(|e| EngineError::InvalidAmount(e.to_string()))?;
        let amount = money::to_ledger(&amount);

        let wallet = self.wallets.new_deposit_wallet(user_id, network)?;
        let platform_fee = self.fees.platform_fee(network);
        let expected_total = self.fees.expected_total(&amount, network);
        let expires_at = Utc::now() + self.charge_ttl;

        let tx = Transaction::new(
            TransactionKind::Charge {
                user_id,
                network,
                expected_amount: expected_total.clone(),
                platform_fee: platform_fee.clone(),
                temp_wallet_id: wallet.id,
                deposit_address: wallet.address.clone(),
                expires_at,
            },
            TransactionStatus::Pending,
            amount.clone(),
            format!(
                "Charge of {} {} on {}",
                money::display(&amount),
                network.token_symbol(),
                network
            ),
        );

        let quote = ChargeQuote {
            transaction_id: tx.id,
            deposit_address: wallet.address.clone(),
            network,
            token: network.token_symbol(),
            amount,
            platform_fee,
            expected_total,
            expires_at,
        };

        self.store
            .commit(UnitOfWork::new().insert_wallet(wallet).insert_transaction(tx))
            .await?;

        info!(
            transaction_id = %quote.transaction_id,
            deposit_address = %quote.deposit_address,
            expected_total = %quote.expected_total,
            "Charge initiated"
        );
        Ok(quote)
    }

    pub async fn get_charge_status(&self, id: Uuid) -> EngineResult<Transaction> {
        let tx = self.store.transaction(id).await?;
        match tx.kind {
            TransactionKind::Charge { .. } => Ok(tx),
            _ => Err(EngineError::NotFound { entity: "charge", id }),
        }
    }

    /// Cancels a still-pending charge on behalf of its owner and retires the deposit wallet.
    #[instrument(skip(self))]
    pub async fn cancel_charge(&self, id: Uuid, user_id: Uuid) -> EngineResult<Transaction> {
        let tx = self.get_charge_status(id).await?;
        if tx.client_id() != user_id {
            return Err(EngineError::Forbidden(format!(
                "charge {id} does not belong to this user"
            )));
        }
        if tx.status != TransactionStatus::Pending {
            return Err(EngineError::SettlementConflict {
                entity: "charge",
                id,
            });
        }

        let mut work = UnitOfWork::new().transition_with(
            &tx,
            TransactionStatus::Cancelled,
            None,
            Some("Charge cancelled by user".to_string()),
        );
        if let TransactionKind::Charge { temp_wallet_id, .. } = &tx.kind {
            work = work.wallet_status(*temp_wallet_id, crate::domain::WalletStatus::Inactive);
        }
        self.store.commit(work).await?;

        info!(transaction_id = %id, "Charge cancelled");
        Ok(self.store.transaction(id).await?)
    }
}
