//! Ports the engine depends on: the ledger store and the outbound announcement channels.
//!
//! Every money movement is expressed as a [`UnitOfWork`]: an ordered list of mutations that a
//! [`LedgerStore`] applies all-or-nothing. Guards (sufficient funds, version compare-and-swap,
//! terminal status) are evaluated inside the same atomic commit, so callers never observe a
//! half-applied debit/credit pair.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Milestone, MilestoneStatus, TempWallet, Transaction, TransactionStatus, WalletStatus,
};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient funds for user {user_id}: balance {available}, requested {requested}")]
    InsufficientFunds {
        user_id: Uuid,
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("{entity} {id} was modified concurrently")]
    VersionConflict { entity: &'static str, id: Uuid },

    #[error("{entity} {id} is {status} and cannot change")]
    Terminal {
        entity: &'static str,
        id: Uuid,
        status: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// One step of a unit of work. Applied in order.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Fails the whole unit of work if the balance would go negative.
    Debit { user_id: Uuid, amount: BigDecimal },
    Credit { user_id: Uuid, amount: BigDecimal },
    InsertTransaction(Transaction),
    /// Compare-and-swap on `version`; refuses to leave a terminal status.
    TransitionTransaction {
        id: Uuid,
        expected_version: i64,
        to: TransactionStatus,
        transaction_hash: Option<String>,
        description: Option<String>,
    },
    /// Bumps the version without a status change, so a second claimant loses the swap.
    ClaimTransaction {
        id: Uuid,
        expected_version: i64,
        description: String,
    },
    /// Administrative dispute bypass.
    OverrideTransactionAmount {
        id: Uuid,
        expected_version: i64,
        amount: BigDecimal,
        to: TransactionStatus,
    },
    InsertWallet(TempWallet),
    UpdateWallet {
        id: Uuid,
        status: Option<WalletStatus>,
        total_received: Option<BigDecimal>,
        last_checked_at: Option<DateTime<Utc>>,
    },
    InsertMilestone(Milestone),
    TransitionMilestone {
        id: Uuid,
        expected_version: i64,
        to: MilestoneStatus,
    },
}

#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    mutations: Vec<Mutation>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn debit(self, user_id: Uuid, amount: BigDecimal) -> Self {
        self.push(Mutation::Debit { user_id, amount })
    }

    pub fn credit(self, user_id: Uuid, amount: BigDecimal) -> Self {
        self.push(Mutation::Credit { user_id, amount })
    }

    pub fn insert_transaction(self, tx: Transaction) -> Self {
        self.push(Mutation::InsertTransaction(tx))
    }

    /// Moves `tx` to `to`, guarded by the version it was read at.
    pub fn transition(self, tx: &Transaction, to: TransactionStatus) -> Self {
        self.push(Mutation::TransitionTransaction {
            id: tx.id,
            expected_version: tx.version,
            to,
            transaction_hash: None,
            description: None,
        })
    }

    pub fn transition_with(
        self,
        tx: &Transaction,
        to: TransactionStatus,
        transaction_hash: Option<String>,
        description: Option<String>,
    ) -> Self {
        self.push(Mutation::TransitionTransaction {
            id: tx.id,
            expected_version: tx.version,
            to,
            transaction_hash,
            description,
        })
    }

    pub fn insert_wallet(self, wallet: TempWallet) -> Self {
        self.push(Mutation::InsertWallet(wallet))
    }

    pub fn wallet_status(self, id: Uuid, status: WalletStatus) -> Self {
        self.push(Mutation::UpdateWallet {
            id,
            status: Some(status),
            total_received: None,
            last_checked_at: None,
        })
    }

    pub fn insert_milestone(self, milestone: Milestone) -> Self {
        self.push(Mutation::InsertMilestone(milestone))
    }

    pub fn transition_milestone(self, milestone: &Milestone, to: MilestoneStatus) -> Self {
        self.push(Mutation::TransitionMilestone {
            id: milestone.id,
            expected_version: milestone.version,
            to,
        })
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Storage for balances, transactions, deposit wallets and milestones.
/// The engine owns these rows exclusively; nothing else writes them.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Applies every mutation or none of them.
    async fn commit(&self, work: UnitOfWork) -> LedgerResult<()>;

    /// Current balance, creating a zero row on first access.
    async fn balance(&self, user_id: Uuid) -> LedgerResult<BigDecimal>;

    async fn transaction(&self, id: Uuid) -> LedgerResult<Transaction>;

    /// Transactions where the user is either party, newest first.
    async fn transactions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Pending charges, oldest first.
    async fn pending_charges(&self, limit: i64) -> LedgerResult<Vec<Transaction>>;

    /// Pending withdrawals, oldest first.
    async fn pending_withdrawals(&self, limit: i64) -> LedgerResult<Vec<Transaction>>;

    /// Cancels every pending charge whose `expires_at` is before `now` and deactivates its wallet.
    /// Returns the number of charges cancelled.
    async fn expire_pending_charges(&self, now: DateTime<Utc>) -> LedgerResult<u64>;

    async fn wallet(&self, id: Uuid) -> LedgerResult<TempWallet>;

    async fn milestone(&self, id: Uuid) -> LedgerResult<Milestone>;

    async fn milestones_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Milestone>>;

    /// The `MilestonePayment` transaction paired with a milestone.
    async fn milestone_payment(&self, milestone_id: Uuid) -> LedgerResult<Transaction>;

    async fn health_check(&self) -> LedgerResult<()>;
}

/// Events announced to the notification dispatcher after a commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    BalanceChanged {
        user_id: Uuid,
        balance: BigDecimal,
        transaction_id: Uuid,
    },
    PaymentAccepted {
        client_id: Uuid,
        provider_id: Uuid,
        milestone_id: Uuid,
        transaction_id: Uuid,
        amount: BigDecimal,
        provider_amount: BigDecimal,
    },
    WithdrawalCompleted {
        user_id: Uuid,
        transaction_id: Uuid,
        amount: BigDecimal,
        transaction_hash: String,
    },
    ChargeFailed {
        user_id: Uuid,
        transaction_id: Uuid,
        description: String,
    },
}

/// Outbound notifications. Delivery failures never roll back a ledger mutation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &EngineEvent) -> anyhow::Result<()>;
}

/// In-conversation status announcements for milestones.
#[async_trait]
pub trait ConversationRelay: Send + Sync {
    async fn milestone_updated(&self, milestone: &Milestone) -> anyhow::Result<()>;
}
