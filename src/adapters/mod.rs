//! Ledger store implementations.

pub mod memory_ledger;
pub mod postgres_ledger;

pub use memory_ledger::MemoryLedgerStore;
pub use postgres_ledger::PostgresLedgerStore;
