use std::sync::Arc;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::domain::Transaction;
use crate::error::EngineResult;
use crate::ports::LedgerStore;

pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Read side of the balance and transaction ledger.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> EngineResult<BigDecimal> {
        Ok(self.store.balance(user_id).await?)
    }

    /// Page numbers start at 1; `limit` is clamped to `1..=100`.
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
    ) -> EngineResult<Vec<Transaction>> {
        let (limit, offset) = page_window(page, limit);
        Ok(self
            .store
            .transactions_for_user(user_id, limit, offset)
            .await?)
    }
}

pub fn page_window(page: i64, limit: i64) -> (i64, i64) {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let page = page.max(1);
    (limit, (page - 1) * limit)
}
