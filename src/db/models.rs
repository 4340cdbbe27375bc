//! Row types for the ledger tables and their conversion to domain entities.
//! The transaction table keeps a flat layout; the tagged union is rebuilt on read.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    Milestone, Network, TempWallet, Transaction, TransactionKind, TransactionType,
};
use crate::ports::LedgerError;

#[derive(Debug, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    pub temp_wallet_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    pub tx_type: String,
    pub status: String,
    pub amount: BigDecimal,
    pub expected_amount: Option<BigDecimal>,
    pub platform_fee: Option<BigDecimal>,
    pub network: Option<String>,
    pub deposit_address: Option<String>,
    pub destination_address: Option<String>,
    pub transaction_hash: Option<String>,
    pub description: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn required<T>(value: Option<T>, id: Uuid, column: &str) -> Result<T, LedgerError> {
    value.ok_or_else(|| LedgerError::Corrupt(format!("transaction {id} is missing {column}")))
}

fn parse<T>(value: &str) -> Result<T, LedgerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| LedgerError::Corrupt(e.to_string()))
}

impl TransactionRow {
    pub fn into_domain(self) -> Result<Transaction, LedgerError> {
        let id = self.id;
        let kind = match parse::<TransactionType>(&self.tx_type)? {
            TransactionType::Charge => TransactionKind::Charge {
                user_id: self.client_id,
                network: parse(&required(self.network, id, "network")?)?,
                expected_amount: required(self.expected_amount, id, "expected_amount")?,
                platform_fee: required(self.platform_fee, id, "platform_fee")?,
                temp_wallet_id: required(self.temp_wallet_id, id, "temp_wallet_id")?,
                deposit_address: required(self.deposit_address, id, "deposit_address")?,
                expires_at: required(self.expires_at, id, "expires_at")?,
            },
            TransactionType::Withdraw => TransactionKind::Withdraw {
                user_id: self.client_id,
                network: parse(&required(self.network, id, "network")?)?,
                destination_address: required(
                    self.destination_address,
                    id,
                    "destination_address",
                )?,
            },
            TransactionType::MilestonePayment => TransactionKind::MilestonePayment {
                client_id: self.client_id,
                provider_id: required(self.provider_id, id, "provider_id")?,
                milestone_id: required(self.milestone_id, id, "milestone_id")?,
            },
            TransactionType::PlatformFee => TransactionKind::PlatformFee {
                payer_id: self.client_id,
                admin_id: required(self.provider_id, id, "provider_id")?,
                milestone_id: required(self.milestone_id, id, "milestone_id")?,
            },
        };

        Ok(Transaction {
            id,
            kind,
            status: parse(&self.status)?,
            amount: self.amount,
            transaction_hash: self.transaction_hash,
            description: self.description,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn from_domain(tx: &Transaction) -> Self {
        let mut row = TransactionRow {
            id: tx.id,
            client_id: tx.client_id(),
            provider_id: tx.provider_id(),
            milestone_id: tx.milestone_id(),
            temp_wallet_id: None,
            tx_type: tx.transaction_type().as_str().to_string(),
            status: tx.status.as_str().to_string(),
            amount: tx.amount.clone(),
            expected_amount: None,
            platform_fee: None,
            network: tx.network().map(|n| n.as_str().to_string()),
            deposit_address: None,
            destination_address: None,
            transaction_hash: tx.transaction_hash.clone(),
            description: tx.description.clone(),
            expires_at: None,
            version: tx.version,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        };

        match &tx.kind {
            TransactionKind::Charge {
                expected_amount,
                platform_fee,
                temp_wallet_id,
                deposit_address,
                expires_at,
                ..
            } => {
                row.expected_amount = Some(expected_amount.clone());
                row.platform_fee = Some(platform_fee.clone());
                row.temp_wallet_id = Some(*temp_wallet_id);
                row.deposit_address = Some(deposit_address.clone());
                row.expires_at = Some(*expires_at);
            }
            TransactionKind::Withdraw {
                destination_address,
                ..
            } => {
                row.destination_address = Some(destination_address.clone());
            }
            TransactionKind::MilestonePayment { .. } | TransactionKind::PlatformFee { .. } => {}
        }
        row
    }
}

#[derive(Debug, FromRow)]
pub struct WalletRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub encrypted_private_key: String,
    pub encryption_key_hash: Option<String>,
    pub network: String,
    pub status: String,
    pub total_received: BigDecimal,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WalletRow {
    pub fn into_domain(self) -> Result<TempWallet, LedgerError> {
        Ok(TempWallet {
            id: self.id,
            user_id: self.user_id,
            address: self.address,
            encrypted_private_key: self.encrypted_private_key,
            encryption_key_hash: self.encryption_key_hash,
            network: parse::<Network>(&self.network)?,
            status: parse(&self.status)?,
            total_received: self.total_received,
            last_checked_at: self.last_checked_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct MilestoneRow {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub balance: BigDecimal,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MilestoneRow {
    pub fn into_domain(self) -> Result<Milestone, LedgerError> {
        Ok(Milestone {
            id: self.id,
            client_id: self.client_id,
            provider_id: self.provider_id,
            service_id: self.service_id,
            conversation_id: self.conversation_id,
            title: self.title,
            description: self.description,
            balance: self.balance,
            status: parse(&self.status)?,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
