pub mod ledger;
pub mod milestones;
pub mod monitor;
pub mod notify;
pub mod payments;
pub mod wallets;
pub mod withdrawals;

pub use ledger::LedgerService;
pub use milestones::{CreateMilestone, MilestoneEscrow};
pub use monitor::{PaymentMonitor, PollReport};
pub use notify::{BroadcastRelay, TracingNotifier, WebhookNotifier};
pub use payments::{ChargeQuote, PaymentService};
pub use wallets::WalletLifecycleManager;
pub use withdrawals::{WithdrawalRunReport, WithdrawalSettler};
