//! Background reconciliation of pending charges against on-chain deposit balances.
//!
//! Each pending charge is evaluated independently: expired charges are cancelled, charges with a
//! deposit at or above the settlement threshold are credited, short deposits are failed once, and
//! everything else waits for the next tick. Chain failures never change ledger state.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::chain::ChainError;
use crate::config::{FeePolicy, MonitorConfig};
use crate::domain::{money, Transaction, TransactionKind, TransactionStatus, WalletStatus};
use crate::error::{EngineError, EngineResult};
use crate::ports::{EngineEvent, LedgerStore, Mutation, Notifier, UnitOfWork};
use crate::services::notify::announce;
use crate::services::wallets::WalletLifecycleManager;

/// Counters from one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub scanned: usize,
    pub settled: usize,
    pub underpaid: usize,
    pub expired: usize,
    pub awaiting: usize,
    pub chain_errors: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Settled,
    Underpaid,
    Expired,
    Awaiting,
    ChainError,
    Conflict,
}

impl PollReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Settled => self.settled += 1,
            Outcome::Underpaid => self.underpaid += 1,
            Outcome::Expired => self.expired += 1,
            Outcome::Awaiting => self.awaiting += 1,
            Outcome::ChainError => self.chain_errors += 1,
            Outcome::Conflict => self.conflicts += 1,
        }
    }
}

#[derive(Clone)]
pub struct PaymentMonitor {
    store: Arc<dyn LedgerStore>,
    wallets: WalletLifecycleManager,
    fees: FeePolicy,
    config: MonitorConfig,
    notifier: Arc<dyn Notifier>,
}

impl PaymentMonitor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: WalletLifecycleManager,
        fees: FeePolicy,
        config: MonitorConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            wallets,
            fees,
            config,
            notifier,
        }
    }

    /// One pass over the oldest pending charges.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> EngineResult<PollReport> {
        let pending = self.store.pending_charges(self.config.batch_size).await?;
        let mut report = PollReport {
            scanned: pending.len(),
            ..PollReport::default()
        };

        for tx in pending {
            let id = tx.id;
            let outcome = match self.evaluate(tx, now).await {
                Ok(outcome) => outcome,
                Err(EngineError::SettlementConflict { .. }) => {
                    debug!(transaction_id = %id, "Charge changed during evaluation; skipping");
                    Outcome::Conflict
                }
                Err(EngineError::ChainCallFailure(e)) => {
                    warn!(
                        transaction_id = %id,
                        error = %e,
                        "Balance check failed; retrying next cycle"
                    );
                    Outcome::ChainError
                }
                Err(e) => {
                    error!(transaction_id = %id, error = %e, "Charge evaluation failed");
                    Outcome::ChainError
                }
            };
            report.record(outcome);
        }

        if report.scanned > 0 {
            info!(report = ?report, "Payment monitor pass finished");
        }
        Ok(report)
    }

    #[instrument(skip(self, tx), fields(transaction_id = %tx.id))]
    async fn evaluate(&self, tx: Transaction, now: DateTime<Utc>) -> EngineResult<Outcome> {
        let TransactionKind::Charge {
            user_id,
            network,
            expected_amount,
            temp_wallet_id,
            deposit_address,
            ..
        } = &tx.kind
        else {
            return Ok(Outcome::Conflict);
        };

        if tx.is_expired(now) {
            self.store
                .commit(
                    UnitOfWork::new()
                        .transition_with(
                            &tx,
                            TransactionStatus::Cancelled,
                            None,
                            Some("Charge expired".to_string()),
                        )
                        .wallet_status(*temp_wallet_id, WalletStatus::Inactive),
                )
                .await?;
            info!("Charge expired");
            return Ok(Outcome::Expired);
        }

        let adapter = self.wallets.adapter(*network)?;
        let balance = adapter.token_balance(deposit_address);
        let observed = match timeout(self.config.chain_timeout, balance).await {
            Ok(result) => result?,
            Err(_) => return Err(ChainError::Timeout(self.config.chain_timeout).into()),
        };

        if observed <= money::zero() {
            self.store
                .commit(UnitOfWork::new().push(Mutation::UpdateWallet {
                    id: *temp_wallet_id,
                    status: None,
                    total_received: None,
                    last_checked_at: Some(now),
                }))
                .await?;
            return Ok(Outcome::Awaiting);
        }

        let threshold = self.fees.settlement_threshold(expected_amount);
        if observed < threshold {
            let description = EngineError::UnderpaidCharge {
                received: money::display(&observed),
                expected: money::display(expected_amount),
                token: network.token_symbol(),
            }
            .to_string();

            self.store
                .commit(
                    UnitOfWork::new()
                        .transition_with(
                            &tx,
                            TransactionStatus::Failed,
                            None,
                            Some(description.clone()),
                        )
                        .push(Mutation::UpdateWallet {
                            id: *temp_wallet_id,
                            status: Some(WalletStatus::Inactive),
                            total_received: Some(observed.clone()),
                            last_checked_at: Some(now),
                        }),
                )
                .await?;

            warn!(received = %observed, threshold = %threshold, "Charge underpaid");
            announce(
                self.notifier.as_ref(),
                EngineEvent::ChargeFailed {
                    user_id: *user_id,
                    transaction_id: tx.id,
                    description,
                },
            )
            .await;
            return Ok(Outcome::Underpaid);
        }

        self.settle_charge(tx.id, observed).await?;
        Ok(Outcome::Settled)
    }

    /// Credits a pending charge with `observed - platform_fee` and completes its wallet.
    /// Safe to call more than once: only the first call finds the charge pending.
    #[instrument(skip(self, observed), fields(observed = %observed))]
    pub async fn settle_charge(&self, id: Uuid, observed: BigDecimal) -> EngineResult<Transaction> {
        let tx = self.store.transaction(id).await?;
        let TransactionKind::Charge {
            user_id,
            platform_fee,
            temp_wallet_id,
            ..
        } = &tx.kind
        else {
            return Err(EngineError::NotFound { entity: "charge", id });
        };
        if tx.status != TransactionStatus::Pending {
            return Err(EngineError::SettlementConflict {
                entity: "charge",
                id,
            });
        }

        let net = money::to_ledger(&(&observed - platform_fee));
        let credit = if net > money::zero() { net } else { money::zero() };
        let now = Utc::now();

        self.store
            .commit(
                UnitOfWork::new()
                    .transition(&tx, TransactionStatus::Success)
                    .credit(*user_id, credit.clone())
                    .push(Mutation::UpdateWallet {
                        id: *temp_wallet_id,
                        status: Some(WalletStatus::Completed),
                        total_received: Some(observed.clone()),
                        last_checked_at: Some(now),
                    }),
            )
            .await?;

        info!(transaction_id = %id, credited = %credit, "Charge settled");

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

        Ok(self.store.transaction(id).await?)
    }

    /// Cancels every pending charge past its expiry in one statement.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> EngineResult<u64> {
        let cancelled = self.store.expire_pending_charges(now).await?;
        if cancelled > 0 {
            info!(cancelled, "Expired charges swept");
        }
        Ok(cancelled)
    }

    /// Starts the polling and sweeping tasks on their cron schedules.
    pub fn spawn(&self) -> EngineResult<Vec<JoinHandle<()>>> {
        let poll_schedule = parse_schedule(&self.config.poll_cron)?;
        let sweep_schedule = parse_schedule(&self.config.sweep_cron)?;

        let poller = self.clone();
        let poll = tokio::spawn(async move {
            info!(schedule = %poller.config.poll_cron, "Payment monitor started");
            run_on_schedule(poll_schedule, move || {
                let poller = poller.clone();
                async move {
                    if let Err(e) = poller.poll_once(Utc::now()).await {
                        error!(error = %e, "Payment monitor pass failed");
                    }
                }
            })
            .await;
        });

        let sweeper = self.clone();
        let sweep = tokio::spawn(async move {
            info!(schedule = %sweeper.config.sweep_cron, "Expiry sweeper started");
            run_on_schedule(sweep_schedule, move || {
                let sweeper = sweeper.clone();
                async move {
                    if let Err(e) = sweeper.sweep_expired(Utc::now()).await {
                        error!(error = %e, "Expiry sweep failed");
                    }
                }
            })
            .await;
        });

        Ok(vec![poll, sweep])
    }
}

fn parse_schedule(expression: &str) -> EngineResult<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| EngineError::Config(format!("invalid cron expression '{expression}': {e}")))
}

async fn run_on_schedule<F, Fut>(schedule: Schedule, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Schedule has no upcoming runs; stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        sleep(wait).await;
        job().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedules_parse() {
        let config = MonitorConfig::default();
        assert!(parse_schedule(&config.poll_cron).is_ok());
        assert!(parse_schedule(&config.sweep_cron).is_ok());
        assert!(parse_schedule("every thirty seconds").is_err());
    }

    #[test]
    fn test_poll_schedule_fires_twice_a_minute() {
        let schedule = parse_schedule(crate::config::DEFAULT_MONITOR_POLL_CRON).unwrap();
        let runs: Vec<_> = schedule.upcoming(Utc).take(3).collect();
        assert_eq!((runs[1] - runs[0]).num_seconds(), 30);
        assert_eq!((runs[2] - runs[1]).num_seconds(), 30);
    }

    #[test]
    fn test_report_records_outcomes() {
        let mut report = PollReport::default();
        report.record(Outcome::Settled);
        report.record(Outcome::Awaiting);
        report.record(Outcome::Awaiting);
        report.record(Outcome::Conflict);
        assert_eq!(report.settled, 1);
        assert_eq!(report.awaiting, 2);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.underpaid, 0);
    }
}
