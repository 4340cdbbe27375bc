//! Postgres implementation of [`LedgerStore`].
//!
//! A unit of work maps onto one database transaction. Every guarded statement is a conditional
//! `UPDATE`; when one touches no rows the transaction is dropped (rolled back) and the guard's
//! error is returned.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::TransactionRow;
use crate::db::queries;
use crate::domain::{Milestone, TempWallet, Transaction, TransactionType};
use crate::ports::{LedgerError, LedgerResult, LedgerStore, Mutation, UnitOfWork};

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn rows_into_domain(rows: Vec<TransactionRow>) -> LedgerResult<Vec<Transaction>> {
    rows.into_iter().map(TransactionRow::into_domain).collect()
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn commit(&self, work: UnitOfWork) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;

        for mutation in work.into_mutations() {
            match mutation {
                Mutation::Debit { user_id, amount } => {
                    queries::debit_balance(&mut tx, user_id, &amount).await?
                }
                Mutation::Credit { user_id, amount } => {
                    queries::credit_balance(&mut tx, user_id, &amount).await?
                }
                Mutation::InsertTransaction(transaction) => {
                    queries::insert_transaction(&mut tx, &TransactionRow::from_domain(&transaction))
                        .await?
                }
                Mutation::TransitionTransaction {
                    id,
                    expected_version,
                    to,
                    transaction_hash,
                    description,
                } => {
                    queries::transition_transaction(
                        &mut tx,
                        id,
                        expected_version,
                        to,
                        transaction_hash.as_deref(),
                        description.as_deref(),
                    )
                    .await?
                }
                Mutation::ClaimTransaction {
                    id,
                    expected_version,
                    description,
                } => queries::claim_transaction(&mut tx, id, expected_version, &description).await?,
                Mutation::OverrideTransactionAmount {
                    id,
                    expected_version,
                    amount,
                    to,
                } => {
                    queries::override_transaction_amount(&mut tx, id, expected_version, &amount, to)
                        .await?
                }
                Mutation::InsertWallet(wallet) => queries::insert_wallet(&mut tx, &wallet).await?,
                Mutation::UpdateWallet {
                    id,
                    status,
                    total_received,
                    last_checked_at,
                } => {
                    queries::update_wallet(
                        &mut tx,
                        id,
                        status,
                        total_received.as_ref(),
                        last_checked_at,
                    )
                    .await?
                }
                Mutation::InsertMilestone(milestone) => {
                    queries::insert_milestone(&mut tx, &milestone).await?
                }
                Mutation::TransitionMilestone {
                    id,
                    expected_version,
                    to,
                } => queries::transition_milestone(&mut tx, id, expected_version, to).await?,
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn balance(&self, user_id: Uuid) -> LedgerResult<BigDecimal> {
        Ok(queries::get_or_create_balance(&self.pool, user_id).await?)
    }

    async fn transaction(&self, id: Uuid) -> LedgerResult<Transaction> {
        queries::get_transaction(&self.pool, id)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "transaction",
                id,
            })?
            .into_domain()
    }

    async fn transactions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        rows_into_domain(
            queries::list_transactions_for_user(&self.pool, user_id, limit, offset).await?,
        )
    }

    async fn pending_charges(&self, limit: i64) -> LedgerResult<Vec<Transaction>> {
        rows_into_domain(
            queries::list_pending_by_type(&self.pool, TransactionType::Charge.as_str(), limit)
                .await?,
        )
    }

    async fn pending_withdrawals(&self, limit: i64) -> LedgerResult<Vec<Transaction>> {
        rows_into_domain(
            queries::list_pending_by_type(&self.pool, TransactionType::Withdraw.as_str(), limit)
                .await?,
        )
    }

    async fn expire_pending_charges(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let mut tx = self.pool.begin().await?;
        let wallets = queries::cancel_expired_charges(&mut tx, now).await?;
        queries::deactivate_wallets(&mut tx, &wallets).await?;
        tx.commit().await?;
        Ok(wallets.len() as u64)
    }

    async fn wallet(&self, id: Uuid) -> LedgerResult<TempWallet> {
        queries::get_wallet(&self.pool, id)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "wallet",
                id,
            })?
            .into_domain()
    }

    async fn milestone(&self, id: Uuid) -> LedgerResult<Milestone> {
        queries::get_milestone(&self.pool, id)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "milestone",
                id,
            })?
            .into_domain()
    }

    async fn milestones_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Milestone>> {
        queries::list_milestones_for_user(&self.pool, user_id)
            .await?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn milestone_payment(&self, milestone_id: Uuid) -> LedgerResult<Transaction> {
        queries::get_milestone_payment(&self.pool, milestone_id)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "milestone payment",
                id: milestone_id,
            })?
            .into_domain()
    }

    async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
