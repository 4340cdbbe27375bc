//! Withdrawal request intake and on-chain settlement from the master wallet.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::chain::{ChainError, ChainRegistry};
use crate::config::FeePolicy;
use crate::domain::{money, Network, Transaction, TransactionKind, TransactionStatus};
use crate::error::{EngineError, EngineResult};
use crate::ports::{EngineEvent, LedgerStore, Mutation, Notifier, UnitOfWork};
use crate::secrets::MasterKeySource;
use crate::services::notify::announce;
use crate::validation::{validate_destination_address, validate_ledger_amount};

/// Description a claimed withdrawal carries until its transfer outcome is recorded.
/// A row left in this state after a crash may already be on chain and needs an operator.
pub const CLAIM_PREFIX: &str = "Processing withdrawal";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WithdrawalRunReport {
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct WithdrawalSettler {
    store: Arc<dyn LedgerStore>,
    chains: ChainRegistry,
    fees: FeePolicy,
    master_keys: Arc<dyn MasterKeySource>,
    notifier: Arc<dyn Notifier>,
}

impl WithdrawalSettler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chains: ChainRegistry,
        fees: FeePolicy,
        master_keys: Arc<dyn MasterKeySource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            chains,
            fees,
            master_keys,
            notifier,
        }
    }

    /// Debits the user and records a pending withdrawal. No chain call happens here.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
        destination: &str,
        network: Network,
    ) -> EngineResult<Transaction> {
        validate_ledger_amount(&amount).map_err(|e| EngineError::InvalidAmount(e.to_string()))?;
        if amount <= self.fees.min_withdrawal {
            return Err(EngineError::BelowMinimumWithdrawal {
                minimum: self.fees.min_withdrawal.clone(),
                requested: amount,
            });
        }

        let destination = destination.trim();
        let adapter = self
            .chains
            .get(network)
            .ok_or_else(|| {
                EngineError::Config(format!("no chain adapter configured for {network}"))
            })?;
        if validate_destination_address(destination).is_err()
            || !adapter.is_valid_address(destination)
        {
            return Err(EngineError::InvalidAddress {
                network,
                address: destination.to_string(),
            });
        }

        let amount = money::to_ledger(&amount);
        let tx = Transaction::new(
            TransactionKind::Withdraw {
                user_id,
                network,
                destination_address: destination.to_string(),
            },
            TransactionStatus::Pending,
            amount.clone(),
            format!(
                "Withdrawal of {} {} to {}",
                money::display(&amount),
                network.token_symbol(),
                destination
            ),
        );

        self.store
            .commit(
                UnitOfWork::new()
                    .debit(user_id, amount.clone())
                    .insert_transaction(tx.clone()),
            )
            .await?;

        info!(transaction_id = %tx.id, "Withdrawal requested");
        Ok(tx)
    }

    /// Sends a pending withdrawal on chain.
    ///
    /// The row is claimed with a version bump before the transfer, so a second processor loses the
    /// swap and gets `SettlementConflict`. A transfer rejected before it could reach the chain
    /// refunds the user and fails the row in one commit. A broadcast with an unknown outcome is
    /// never refunded: the row stays claimed and pending with its hash for an operator.
    #[instrument(skip(self))]
    pub async fn process_withdraw(&self, id: Uuid) -> EngineResult<Transaction> {
        let tx = self.get_withdraw_status(id).await?;
        let TransactionKind::Withdraw {
            user_id,
            network,
            destination_address,
        } = &tx.kind
        else {
            return Err(EngineError::NotFound {
                entity: "withdrawal",
                id,
            });
        };
        if tx.status != TransactionStatus::Pending || tx.description.starts_with(CLAIM_PREFIX) {
            return Err(EngineError::SettlementConflict {
                entity: "withdrawal",
                id,
            });
        }

        let adapter = self
            .chains
            .get(*network)
            .ok_or_else(|| {
                EngineError::Config(format!("no chain adapter configured for {network}"))
            })?;
        let master_key = self
            .master_keys
            .master_key(*network)
            .await
            .map_err(|e| EngineError::Config(format!("master wallet key unavailable: {e:#}")))?;

        self.store
            .commit(UnitOfWork::new().push(Mutation::ClaimTransaction {
                id,
                expected_version: tx.version,
                description: format!("{CLAIM_PREFIX} to {destination_address}"),
            }))
            .await?;
        let claimed = Transaction {
            version: tx.version + 1,
            ..tx.clone()
        };

        match adapter
            .transfer(&master_key, destination_address, &tx.amount)
            .await
        {
            Ok(hash) => {
                if let Err(e) = self
                    .store
                    .commit(UnitOfWork::new().transition_with(
                        &claimed,
                        TransactionStatus::Success,
                        Some(hash.clone()),
                        Some(format!("Withdrawal sent: {hash}")),
                    ))
                    .await
                {
                    error!(
                        transaction_hash = %hash,
                        error = %e,
                        "Withdrawal broadcast but not recorded"
                    );
                    return Err(e.into());
                }

                info!(transaction_hash = %hash, "Withdrawal completed");
                announce(
                    self.notifier.as_ref(),
                    EngineEvent::WithdrawalCompleted {
                        user_id: *user_id,
                        transaction_id: id,
                        amount: tx.amount.clone(),
                        transaction_hash: hash,
                    },
                )
                .await;
                Ok(self.store.transaction(id).await?)
            }
            Err(ChainError::BroadcastUnconfirmed { hash, reason }) => {
                error!(
                    transaction_hash = %hash,
                    reason = %reason,
                    "Withdrawal broadcast unconfirmed; left claimed for an operator"
                );
                self.store
                    .commit(UnitOfWork::new().transition_with(
                        &claimed,
                        TransactionStatus::Pending,
                        Some(hash.clone()),
                        Some(format!(
                            "{CLAIM_PREFIX} to {destination_address}; broadcast {hash} unconfirmed"
                        )),
                    ))
                    .await?;
                Err(ChainError::BroadcastUnconfirmed { hash, reason }.into())
            }
            Err(chain_error) => {
                warn!(error = %chain_error, "Withdrawal transfer failed; refunding");
                self.store
                    .commit(
                        UnitOfWork::new()
                            .credit(*user_id, tx.amount.clone())
                            .transition_with(
                                &claimed,
                                TransactionStatus::Failed,
                                None,
                                Some(format!("Withdrawal failed: {chain_error}")),
                            ),
                    )
                    .await?;

                let balance = self.store.balance(*user_id).await?;
                announce(
                    self.notifier.as_ref(),
                    EngineEvent::BalanceChanged {
                        user_id: *user_id,
                        balance,
                        transaction_id: id,
                    },
                )
                .await;
                Err(chain_error.into())
            }
        }
    }

    pub async fn get_withdraw_status(&self, id: Uuid) -> EngineResult<Transaction> {
        let tx = self.store.transaction(id).await?;
        match tx.kind {
            TransactionKind::Withdraw { .. } => Ok(tx),
            _ => Err(EngineError::NotFound {
                entity: "withdrawal",
                id,
            }),
        }
    }

    /// Processes up to `limit` pending withdrawals, oldest first.
    pub async fn process_pending_withdrawals(
        &self,
        limit: i64,
    ) -> EngineResult<WithdrawalRunReport> {
        let pending = self.store.pending_withdrawals(limit).await?;
        let mut report = WithdrawalRunReport {
            scanned: pending.len(),
            ..WithdrawalRunReport::default()
        };

        for tx in pending {
            match self.process_withdraw(tx.id).await {
                Ok(_) => report.succeeded += 1,
                Err(EngineError::SettlementConflict { .. }) => report.skipped += 1,
                Err(e) => {
                    error!(transaction_id = %tx.id, error = %e, "Withdrawal processing failed");
                    report.failed += 1;
                }
            }
        }

        info!(report = ?report, "Withdrawal run finished");
        Ok(report)
    }
}
