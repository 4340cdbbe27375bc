//! Milestone escrow entity and its role-gated state table.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Draft,
    Processing,
    Completed,
    Withdraw,
    Released,
    Dispute,
    Canceled,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Draft => "draft",
            MilestoneStatus::Processing => "processing",
            MilestoneStatus::Completed => "completed",
            MilestoneStatus::Withdraw => "withdraw",
            MilestoneStatus::Released => "released",
            MilestoneStatus::Dispute => "dispute",
            MilestoneStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MilestoneStatus::Released | MilestoneStatus::Canceled | MilestoneStatus::Withdraw
        )
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(MilestoneStatus::Draft),
            "processing" => Ok(MilestoneStatus::Processing),
            "completed" => Ok(MilestoneStatus::Completed),
            "withdraw" => Ok(MilestoneStatus::Withdraw),
            "released" => Ok(MilestoneStatus::Released),
            "dispute" => Ok(MilestoneStatus::Dispute),
            "canceled" => Ok(MilestoneStatus::Canceled),
            _ => Err(ParseEnumError::new("milestone status", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Provider,
}

/// Statuses `role` may move a milestone to from `current`.
/// Dispute resolution is an administrative bypass and does not appear here.
pub fn allowed_transitions(current: MilestoneStatus, role: Role) -> &'static [MilestoneStatus] {
    use MilestoneStatus::*;

    match (current, role) {
        (Draft, Role::Provider) => &[Processing],
        (Draft, Role::Client) => &[Canceled],
        (Processing, Role::Provider) => &[Completed, Withdraw],
        (Processing, Role::Client) => &[Canceled],
        (Completed, Role::Client) => &[Released, Dispute],
        (Completed, Role::Provider) => &[Dispute],
        (Released | Canceled | Withdraw | Dispute, _) => &[],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    /// Escrowed amount.
    pub balance: BigDecimal,
    pub status: MilestoneStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Milestone {
    pub fn role_of(&self, user_id: Uuid) -> Option<Role> {
        if user_id == self.client_id {
            Some(Role::Client)
        } else if user_id == self.provider_id {
            Some(Role::Provider)
        } else {
            None
        }
    }

    pub fn can_transition(&self, actor: Uuid, to: MilestoneStatus) -> bool {
        self.role_of(actor)
            .map(|role| allowed_transitions(self.status, role).contains(&to))
            .unwrap_or(false)
    }
}
