//! Transaction domain entity.
//! The durable record of an intent to move money. Chain calls are effects of its status
//! transitions, never the source of truth.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Network, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Charge,
    Withdraw,
    MilestonePayment,
    PlatformFee,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Charge => "charge",
            TransactionType::Withdraw => "withdraw",
            TransactionType::MilestonePayment => "milestone_payment",
            TransactionType::PlatformFee => "platform_fee",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charge" => Ok(TransactionType::Charge),
            "withdraw" => Ok(TransactionType::Withdraw),
            "milestone_payment" => Ok(TransactionType::MilestonePayment),
            "platform_fee" => Ok(TransactionType::PlatformFee),
            _ => Err(ParseEnumError::new("transaction type", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Draft,
    Pending,
    Success,
    Failed,
    Cancelled,
    Withdraw,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Draft => "draft",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Withdraw => "withdraw",
        }
    }

    /// Terminal rows never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Withdraw
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TransactionStatus::Draft),
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "withdraw" => Ok(TransactionStatus::Withdraw),
            _ => Err(ParseEnumError::new("transaction status", s)),
        }
    }
}

/// Per-type payload. Fields that only make sense for one kind of movement live on that variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Charge {
        user_id: Uuid,
        network: Network,
        expected_amount: BigDecimal,
        platform_fee: BigDecimal,
        temp_wallet_id: Uuid,
        deposit_address: String,
        expires_at: DateTime<Utc>,
    },
    Withdraw {
        user_id: Uuid,
        network: Network,
        destination_address: String,
    },
    MilestonePayment {
        client_id: Uuid,
        provider_id: Uuid,
        milestone_id: Uuid,
    },
    PlatformFee {
        payer_id: Uuid,
        admin_id: Uuid,
        milestone_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
    pub transaction_hash: Option<String>,
    pub description: String,
    /// Monotonic counter bumped on every update; compared-and-swapped by the ledger store.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        status: TransactionStatus,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status,
            amount,
            transaction_hash: None,
            description: description.into(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self.kind {
            TransactionKind::Charge { .. } => TransactionType::Charge,
            TransactionKind::Withdraw { .. } => TransactionType::Withdraw,
            TransactionKind::MilestonePayment { .. } => TransactionType::MilestonePayment,
            TransactionKind::PlatformFee { .. } => TransactionType::PlatformFee,
        }
    }

    /// The paying (or sole) party of the movement.
    pub fn client_id(&self) -> Uuid {
        match &self.kind {
            TransactionKind::Charge { user_id, .. } | TransactionKind::Withdraw { user_id, .. } => {
                *user_id
            }
            TransactionKind::MilestonePayment { client_id, .. } => *client_id,
            TransactionKind::PlatformFee { payer_id, .. } => *payer_id,
        }
    }

    /// The receiving party, for movements between two users.
    pub fn provider_id(&self) -> Option<Uuid> {
        match &self.kind {
            TransactionKind::MilestonePayment { provider_id, .. } => Some(*provider_id),
            TransactionKind::PlatformFee { admin_id, .. } => Some(*admin_id),
            _ => None,
        }
    }

    pub fn milestone_id(&self) -> Option<Uuid> {
        match &self.kind {
            TransactionKind::MilestonePayment { milestone_id, .. }
            | TransactionKind::PlatformFee { milestone_id, .. } => Some(*milestone_id),
            _ => None,
        }
    }

    pub fn network(&self) -> Option<Network> {
        match &self.kind {
            TransactionKind::Charge { network, .. } | TransactionKind::Withdraw { network, .. } => {
                Some(*network)
            }
            _ => None,
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.client_id() == user_id || self.provider_id() == Some(user_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.kind {
            TransactionKind::Charge { expires_at, .. } => now > *expires_at,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn charge(expires_at: DateTime<Utc>) -> Transaction {
        Transaction::new(
            TransactionKind::Charge {
                user_id: Uuid::new_v4(),
                network: Network::Tron,
                expected_amount: BigDecimal::from(101),
                platform_fee: BigDecimal::from(1),
                temp_wallet_id: Uuid::new_v4(),
                deposit_address: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string(),
                expires_at,
            },
            TransactionStatus::Pending,
            BigDecimal::from(100),
            "Charge",
        )
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TransactionStatus::Draft.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
        assert!(TransactionStatus::Withdraw.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_column_text() {
        for status in [
            TransactionStatus::Draft,
            TransactionStatus::Pending,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
            TransactionStatus::Withdraw,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("settled".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_charge_expiry() {
        let now = Utc::now();
        let tx = charge(now + Duration::minutes(5));
        assert!(!tx.is_expired(now));
        assert!(tx.is_expired(now + Duration::minutes(6)));
        assert_eq!(tx.transaction_type(), TransactionType::Charge);
        assert_eq!(tx.network(), Some(Network::Tron));
        assert!(tx.provider_id().is_none());
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let tx = charge(Utc::now());
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "charge");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["network"], "tron");
    }
}
