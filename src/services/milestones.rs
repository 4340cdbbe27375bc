//! Milestone escrow: funds are held at creation and released, refunded or disputed through a
//! role-gated state machine.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::FeePolicy;
use crate::domain::{
    money, Milestone, MilestoneStatus, Transaction, TransactionKind, TransactionStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::ports::{ConversationRelay, EngineEvent, LedgerStore, Mutation, Notifier, UnitOfWork};
use crate::services::notify::{announce, relay_milestone};
use crate::validation::{sanitize_string, validate_ledger_amount, validate_milestone_text};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMilestone {
    pub provider_id: Uuid,
    pub service_id: Uuid,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: BigDecimal,
}

#[derive(Clone)]
pub struct MilestoneEscrow {
    store: Arc<dyn LedgerStore>,
    fees: FeePolicy,
    admin_id: Uuid,
    notifier: Arc<dyn Notifier>,
    relay: Arc<dyn ConversationRelay>,
}

impl MilestoneEscrow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        fees: FeePolicy,
        admin_id: Uuid,
        notifier: Arc<dyn Notifier>,
        relay: Arc<dyn ConversationRelay>,
    ) -> Self {
        Self {
            store,
            fees,
            admin_id,
            notifier,
            relay,
        }
    }

    /// Debits the client and opens a draft milestone with its draft payment.
    #[instrument(skip(self, input), fields(provider_id = %input.provider_id))]
    pub async fn create_milestone(
        &self,
        client_id: Uuid,
        input: CreateMilestone,
    ) -> EngineResult<Milestone> {
        validate_ledger_amount(&input.amount)
            .map_err(|e| EngineError::InvalidAmount(e.to_string()))?;
        let title = sanitize_string(&input.title);
        let description = input.description.trim().to_string();
        validate_milestone_text(&title, &description)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        if client_id == input.provider_id {
            return Err(EngineError::Forbidden(
                "client and provider must be different users".to_string(),
            ));
        }

        let amount = money::to_ledger(&input.amount);
        let now = Utc::now();
        let milestone = Milestone {
            id: Uuid::new_v4(),
            client_id,
            provider_id: input.provider_id,
            service_id: input.service_id,
            conversation_id: input.conversation_id,
            title,
            description,
            balance: amount.clone(),
            status: MilestoneStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let payment = Transaction::new(
            TransactionKind::MilestonePayment {
                client_id,
                provider_id: input.provider_id,
                milestone_id: milestone.id,
            },
            TransactionStatus::Draft,
            amount.clone(),
            format!("Milestone payment: {}", milestone.title),
        );
        let payment_id = payment.id;

        self.store
            .commit(
                UnitOfWork::new()
                    .debit(client_id, amount)
                    .insert_milestone(milestone.clone())
                    .insert_transaction(payment),
            )
            .await?;

        info!(milestone_id = %milestone.id, "Milestone created");
        self.announce_balance(client_id, payment_id).await;
        relay_milestone(self.relay.as_ref(), &milestone).await;
        Ok(milestone)
    }

    /// Moves a milestone on behalf of one of its parties, applying the payment effects of the move
    /// in the same commit.
    #[instrument(skip(self))]
    pub async fn transition_milestone(
        &self,
        id: Uuid,
        actor_id: Uuid,
        to: MilestoneStatus,
    ) -> EngineResult<Milestone> {
        let milestone = self.store.milestone(id).await?;
        if milestone.role_of(actor_id).is_none() {
            return Err(EngineError::Forbidden(format!(
                "user is not a party to milestone {id}"
            )));
        }
        if !milestone.can_transition(actor_id, to) {
            return Err(EngineError::InvalidTransition {
                from: milestone.status.to_string(),
                to: to.to_string(),
            });
        }

        let mut work = UnitOfWork::new().transition_milestone(&milestone, to);
        let mut refunded_payment = None;

        match to {
            MilestoneStatus::Released => {
                let payment = self.store.milestone_payment(id).await?;
                if payment.status == TransactionStatus::Draft {
                    work = work.transition(&payment, TransactionStatus::Pending);
                }
            }
            MilestoneStatus::Withdraw | MilestoneStatus::Canceled => {
                let payment = self.store.milestone_payment(id).await?;
                let payment_to = if to == MilestoneStatus::Withdraw {
                    TransactionStatus::Withdraw
                } else {
                    TransactionStatus::Cancelled
                };

                work = work.credit(milestone.client_id, milestone.balance.clone());
                if payment.status == TransactionStatus::Success {
                    work = work.debit(milestone.provider_id, milestone.balance.clone());
                } else if !payment.status.is_terminal() {
                    work = work.transition(&payment, payment_to);
                }
                refunded_payment = Some(payment.id);
            }
            _ => {}
        }

        self.store.commit(work).await?;
        info!(from = %milestone.status, to = %to, "Milestone transitioned");

        let updated = self.store.milestone(id).await?;
        if let Some(payment_id) = refunded_payment {
            self.announce_balance(updated.client_id, payment_id).await;
        }
        relay_milestone(self.relay.as_ref(), &updated).await;
        Ok(updated)
    }

    /// Provider accepts a released payment: the provider's share and the platform fee are credited
    /// together.
    #[instrument(skip(self))]
    pub async fn accept_pending_payment(
        &self,
        transaction_id: Uuid,
        provider_id: Uuid,
    ) -> EngineResult<Transaction> {
        let tx = self.store.transaction(transaction_id).await?;
        let TransactionKind::MilestonePayment {
            client_id,
            provider_id: owner,
            milestone_id,
        } = tx.kind.clone()
        else {
            return Err(EngineError::NotFound {
                entity: "milestone payment",
                id: transaction_id,
            });
        };
        if owner != provider_id {
            return Err(EngineError::Forbidden(
                "only the milestone provider can accept this payment".to_string(),
            ));
        }
        match tx.status {
            TransactionStatus::Pending => {}
            status if status.is_terminal() => {
                return Err(EngineError::SettlementConflict {
                    entity: "milestone payment",
                    id: transaction_id,
                })
            }
            status => {
                return Err(EngineError::InvalidTransition {
                    from: status.to_string(),
                    to: TransactionStatus::Success.to_string(),
                })
            }
        }

        let provider_amount = self.fees.provider_amount(&tx.amount);
        let admin_fee = self.fees.admin_fee(&tx.amount);
        let fee_tx = Transaction::new(
            TransactionKind::PlatformFee {
                payer_id: client_id,
                admin_id: self.admin_id,
                milestone_id,
            },
            TransactionStatus::Success,
            admin_fee.clone(),
            format!("Platform fee for milestone {milestone_id}"),
        );

        self.store
            .commit(
                UnitOfWork::new()
                    .transition(&tx, TransactionStatus::Success)
                    .credit(provider_id, provider_amount.clone())
                    .credit(self.admin_id, admin_fee.clone())
                    .insert_transaction(fee_tx),
            )
            .await?;

        info!(
            provider_amount = %provider_amount,
            admin_fee = %admin_fee,
            "Milestone payment accepted"
        );

        announce(
            self.notifier.as_ref(),
            EngineEvent::PaymentAccepted {
                client_id,
                provider_id,
                milestone_id,
                transaction_id,
                amount: tx.amount.clone(),
                provider_amount,
            },
        )
        .await;
        self.announce_balance(provider_id, transaction_id).await;

        Ok(self.store.transaction(transaction_id).await?)
    }

    /// Administrative settlement of a disputed milestone. Refunds the difference to the client and
    /// leaves the payment pending for the provider to accept.
    #[instrument(skip(self, new_amount), fields(new_amount = %new_amount))]
    pub async fn override_disputed_amount(
        &self,
        transaction_id: Uuid,
        new_amount: BigDecimal,
    ) -> EngineResult<Transaction> {
        let tx = self.store.transaction(transaction_id).await?;
        let TransactionKind::MilestonePayment {
            client_id,
            milestone_id,
            ..
        } = tx.kind.clone()
        else {
            return Err(EngineError::NotFound {
                entity: "milestone payment",
                id: transaction_id,
            });
        };

        let milestone = self.store.milestone(milestone_id).await?;
        if milestone.status != MilestoneStatus::Dispute {
            return Err(EngineError::InvalidTransition {
                from: milestone.status.to_string(),
                to: "dispute settlement".to_string(),
            });
        }
        if tx.status.is_terminal() {
            return Err(EngineError::SettlementConflict {
                entity: "milestone payment",
                id: transaction_id,
            });
        }

        validate_ledger_amount(&new_amount)
            .map_err(|e| EngineError::InvalidAmount(e.to_string()))?;
        if new_amount > tx.amount {
            return Err(EngineError::InvalidAmount(format!(
                "{} exceeds the escrowed {}",
                money::display(&new_amount),
                money::display(&tx.amount)
            )));
        }

        let new_amount = money::to_ledger(&new_amount);
        let refund = &tx.amount - &new_amount;
        let mut work = UnitOfWork::new().push(Mutation::OverrideTransactionAmount {
            id: transaction_id,
            expected_version: tx.version,
            amount: new_amount.clone(),
            to: TransactionStatus::Pending,
        });
        if refund > money::zero() {
            work = work.credit(client_id, refund.clone());
        }
        self.store.commit(work).await?;

        info!(refund = %refund, "Disputed milestone amount overridden");
        if refund > money::zero() {
            self.announce_balance(client_id, transaction_id).await;
        }
        Ok(self.store.transaction(transaction_id).await?)
    }

    pub async fn list_milestones(&self, user_id: Uuid) -> EngineResult<Vec<Milestone>> {
        Ok(self.store.milestones_for_user(user_id).await?)
    }

    pub async fn get_milestone(&self, id: Uuid, user_id: Uuid) -> EngineResult<Milestone> {
        let milestone = self.store.milestone(id).await?;
        if milestone.role_of(user_id).is_none() {
            return Err(EngineError::Forbidden(format!(
                "user is not a party to milestone {id}"
            )));
        }
        Ok(milestone)
    }

    async fn announce_balance(&self, user_id: Uuid, transaction_id: Uuid) {
        match self.store.balance(user_id).await {
            Ok(balance) => {
                announce(
                    self.notifier.as_ref(),
                    EngineEvent::BalanceChanged {
                        user_id,
                        balance,
                        transaction_id,
                    },
                )
                .await
            }
            Err(e) => tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Balance read for notification failed"
            ),
        }
    }
}
