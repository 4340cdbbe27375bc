//! In-memory implementation of [`LedgerStore`].
//!
//! A single `RwLock` guards the whole ledger. A commit stages its mutations against a copy of the
//! state and swaps it in only when every guard passed, which gives the same all-or-nothing
//! behaviour as the Postgres store. Used by tests and by `serve --in-memory` for local runs.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    money, Milestone, TempWallet, Transaction, TransactionKind, TransactionStatus,
    TransactionType, WalletStatus,
};
use crate::ports::{LedgerError, LedgerResult, LedgerStore, Mutation, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<Uuid, BigDecimal>,
    transactions: HashMap<Uuid, Transaction>,
    wallets: HashMap<Uuid, TempWallet>,
    milestones: HashMap<Uuid, Milestone>,
}

#[derive(Default, Clone)]
pub struct MemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a balance directly. Test and fixture helper; production code credits
    /// through a unit of work.
    pub async fn set_balance(&self, user_id: Uuid, amount: BigDecimal) {
        self.state.write().await.balances.insert(user_id, amount);
    }
}

impl LedgerState {
    fn apply(&mut self, mutation: Mutation, now: DateTime<Utc>) -> LedgerResult<()> {
        match mutation {
            Mutation::Debit { user_id, amount } => {
                let available = self.balances.get(&user_id).cloned().unwrap_or_else(money::zero);
                if available < amount {
                    return Err(LedgerError::InsufficientFunds {
                        user_id,
                        available,
                        requested: amount,
                    });
                }
                self.balances.insert(user_id, available - amount);
            }
            Mutation::Credit { user_id, amount } => {
                let entry = self.balances.entry(user_id).or_insert_with(money::zero);
                *entry = entry.clone() + amount;
            }
            Mutation::InsertTransaction(tx) => {
                self.transactions.insert(tx.id, tx);
            }
            Mutation::TransitionTransaction {
                id,
                expected_version,
                to,
                transaction_hash,
                description,
            } => {
                let tx = self.guarded_transaction(id, expected_version)?;
                tx.status = to;
                if transaction_hash.is_some() {
                    tx.transaction_hash = transaction_hash;
                }
                if let Some(description) = description {
                    tx.description = description;
                }
                tx.version += 1;
                tx.updated_at = now;
            }
            Mutation::ClaimTransaction {
                id,
                expected_version,
                description,
            } => {
                let tx = self.guarded_transaction(id, expected_version)?;
                tx.description = description;
                tx.version += 1;
                tx.updated_at = now;
            }
            Mutation::OverrideTransactionAmount {
                id,
                expected_version,
                amount,
                to,
            } => {
                let tx = self.guarded_transaction(id, expected_version)?;
                tx.amount = amount;
                tx.status = to;
                tx.version += 1;
                tx.updated_at = now;
            }
            Mutation::InsertWallet(wallet) => {
                self.wallets.insert(wallet.id, wallet);
            }
            Mutation::UpdateWallet {
                id,
                status,
                total_received,
                last_checked_at,
            } => {
                let wallet = self.wallets.get_mut(&id).ok_or(LedgerError::NotFound {
                    entity: "wallet",
                    id,
                })?;
                if let Some(status) = status {
                    wallet.status = status;
                }
                if let Some(total_received) = total_received {
                    wallet.total_received = total_received;
                }
                if let Some(last_checked_at) = last_checked_at {
                    wallet.last_checked_at = Some(last_checked_at);
                }
            }
            Mutation::InsertMilestone(milestone) => {
                self.milestones.insert(milestone.id, milestone);
            }
            Mutation::TransitionMilestone {
                id,
                expected_version,
                to,
            } => {
                let milestone = self.milestones.get_mut(&id).ok_or(LedgerError::NotFound {
                    entity: "milestone",
                    id,
                })?;
                if milestone.version != expected_version {
                    return Err(LedgerError::VersionConflict {
                        entity: "milestone",
                        id,
                    });
                }
                milestone.status = to;
                milestone.version += 1;
                milestone.updated_at = now;
            }
        }
        Ok(())
    }

    fn guarded_transaction(
        &mut self,
        id: Uuid,
        expected_version: i64,
    ) -> LedgerResult<&mut Transaction> {
        let tx = self.transactions.get_mut(&id).ok_or(LedgerError::NotFound {
            entity: "transaction",
            id,
        })?;
        if tx.version != expected_version {
            return Err(LedgerError::VersionConflict {
                entity: "transaction",
                id,
            });
        }
        if tx.status.is_terminal() {
            return Err(LedgerError::Terminal {
                entity: "transaction",
                id,
                status: tx.status.to_string(),
            });
        }
        Ok(tx)
    }

    fn oldest_pending(&self, kind: TransactionType, limit: i64) -> Vec<Transaction> {
        let mut pending: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|tx| tx.transaction_type() == kind && tx.status == TransactionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        pending.truncate(limit.max(0) as usize);
        pending
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn commit(&self, work: UnitOfWork) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let now = Utc::now();
        for mutation in work.into_mutations() {
            staged.apply(mutation, now)?;
        }
        *state = staged;
        Ok(())
    }

    async fn balance(&self, user_id: Uuid) -> LedgerResult<BigDecimal> {
        let mut state = self.state.write().await;
        Ok(state
            .balances
            .entry(user_id)
            .or_insert_with(money::zero)
            .clone())
    }

    async fn transaction(&self, id: Uuid) -> LedgerResult<Transaction> {
        let state = self.state.read().await;
        state
            .transactions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "transaction",
                id,
            })
    }

    async fn transactions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.involves(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn pending_charges(&self, limit: i64) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .state
            .read()
            .await
            .oldest_pending(TransactionType::Charge, limit))
    }

    async fn pending_withdrawals(&self, limit: i64) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .state
            .read()
            .await
            .oldest_pending(TransactionType::Withdraw, limit))
    }

    async fn expire_pending_charges(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let mut state = self.state.write().await;
        let mut wallets = Vec::new();
        for tx in state.transactions.values_mut() {
            if tx.status != TransactionStatus::Pending {
                continue;
            }
            if let TransactionKind::Charge {
                expires_at,
                temp_wallet_id,
                ..
            } = &tx.kind
            {
                if *expires_at < now {
                    wallets.push(*temp_wallet_id);
                    tx.status = TransactionStatus::Cancelled;
                    tx.description = "Charge expired".to_string();
                    tx.version += 1;
                    tx.updated_at = now;
                }
            }
        }
        for id in &wallets {
            if let Some(wallet) = state.wallets.get_mut(id) {
                if wallet.status == WalletStatus::Active {
                    wallet.status = WalletStatus::Inactive;
                }
            }
        }
        Ok(wallets.len() as u64)
    }

    async fn wallet(&self, id: Uuid) -> LedgerResult<TempWallet> {
        let state = self.state.read().await;
        state.wallets.get(&id).cloned().ok_or(LedgerError::NotFound {
            entity: "wallet",
            id,
        })
    }

    async fn milestone(&self, id: Uuid) -> LedgerResult<Milestone> {
        let state = self.state.read().await;
        state
            .milestones
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "milestone",
                id,
            })
    }

    async fn milestones_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Milestone>> {
        let state = self.state.read().await;
        let mut rows: Vec<Milestone> = state
            .milestones
            .values()
            .filter(|m| m.client_id == user_id || m.provider_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn milestone_payment(&self, milestone_id: Uuid) -> LedgerResult<Transaction> {
        let state = self.state.read().await;
        state
            .transactions
            .values()
            .find(|tx| {
                tx.transaction_type() == TransactionType::MilestonePayment
                    && tx.milestone_id() == Some(milestone_id)
            })
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "milestone payment",
                id: milestone_id,
            })
    }

    async fn health_check(&self) -> LedgerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Network;

    fn withdraw_tx(user_id: Uuid, amount: i64) -> Transaction {
        Transaction::new(
            TransactionKind::Withdraw {
                user_id,
                network: Network::Polygon,
                destination_address: "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".to_string(),
            },
            TransactionStatus::Pending,
            BigDecimal::from(amount),
            "Withdrawal",
        )
    }

    #[tokio::test]
    async fn test_failed_guard_leaves_no_partial_effect() {
        let store = MemoryLedgerStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.set_balance(alice, BigDecimal::from(10)).await;

        let work = UnitOfWork::new()
            .credit(bob, BigDecimal::from(5))
            .debit(alice, BigDecimal::from(11));
        let err = store.commit(work).await.unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(store.balance(alice).await.unwrap(), BigDecimal::from(10));
        assert_eq!(store.balance(bob).await.unwrap(), BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryLedgerStore::new();
        let tx = withdraw_tx(Uuid::new_v4(), 20);
        store
            .commit(UnitOfWork::new().insert_transaction(tx.clone()))
            .await
            .unwrap();

        store
            .commit(UnitOfWork::new().transition(&tx, TransactionStatus::Success))
            .await
            .unwrap();
        let err = store
            .commit(UnitOfWork::new().transition(&tx, TransactionStatus::Failed))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::VersionConflict { .. }));
        let stored = store.transaction(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_terminal_transaction_never_moves() {
        let store = MemoryLedgerStore::new();
        let mut tx = withdraw_tx(Uuid::new_v4(), 20);
        tx.status = TransactionStatus::Failed;
        store
            .commit(UnitOfWork::new().insert_transaction(tx.clone()))
            .await
            .unwrap();

        let err = store
            .commit(UnitOfWork::new().transition(&tx, TransactionStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Terminal { .. }));
    }

    #[tokio::test]
    async fn test_balance_is_created_lazily() {
        let store = MemoryLedgerStore::new();
        assert_eq!(
            store.balance(Uuid::new_v4()).await.unwrap(),
            BigDecimal::from(0)
        );
    }
}
