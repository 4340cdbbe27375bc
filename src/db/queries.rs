use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{MilestoneRow, TransactionRow, WalletRow};
use crate::domain::{
    money, Milestone, MilestoneStatus, TempWallet, TransactionStatus, WalletStatus,
};
use crate::ports::{LedgerError, LedgerResult};

type Executor<'a, 'c> = &'a mut SqlxTransaction<'c, Postgres>;

const TERMINAL_STATUSES: [&str; 4] = ["success", "failed", "cancelled", "withdraw"];

// --- Balance Queries ---

pub async fn ensure_balance(executor: Executor<'_, '_>, user_id: Uuid) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO balances (user_id, amount) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING",
    )
        .bind(user_id)
        .execute(&mut **executor)
        .await?;
    Ok(())
}

pub async fn get_or_create_balance(pool: &PgPool, user_id: Uuid) -> sqlx::Result<BigDecimal> {
    let mut tx = pool.begin().await?;
    ensure_balance(&mut tx, user_id).await?;
    let (amount,): (BigDecimal,) = sqlx::query_as("SELECT amount FROM balances WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(amount)
}

/// Debits only when the balance covers the amount; otherwise reports what was available.
pub async fn debit_balance(
    executor: Executor<'_, '_>,
    user_id: Uuid,
    amount: &BigDecimal,
) -> LedgerResult<()> {
    ensure_balance(executor, user_id).await?;
    let updated = sqlx::query(
        r#"
        UPDATE balances SET amount = amount - $2, updated_at = NOW()
        WHERE user_id = $1 AND amount >= $2
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut **executor)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(());
    }

    let available: Option<(BigDecimal,)> =
        sqlx::query_as("SELECT amount FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut **executor)
            .await?;
    Err(LedgerError::InsufficientFunds {
        user_id,
        available: available.map(|(a,)| a).unwrap_or_else(money::zero),
        requested: amount.clone(),
    })
}

pub async fn credit_balance(
    executor: Executor<'_, '_>,
    user_id: Uuid,
    amount: &BigDecimal,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO balances (user_id, amount) VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE
        SET amount = balances.amount + EXCLUDED.amount, updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut **executor)
    .await?;
    Ok(())
}

// --- Transaction Queries ---

pub async fn insert_transaction(
    executor: Executor<'_, '_>,
    row: &TransactionRow,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, client_id, provider_id, milestone_id, temp_wallet_id, type, status, amount,
            expected_amount, platform_fee, network, deposit_address, destination_address,
            transaction_hash, description, expires_at, version, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        "#,
    )
    .bind(row.id)
    .bind(row.client_id)
    .bind(row.provider_id)
    .bind(row.milestone_id)
    .bind(row.temp_wallet_id)
    .bind(&row.tx_type)
    .bind(&row.status)
    .bind(&row.amount)
    .bind(&row.expected_amount)
    .bind(&row.platform_fee)
    .bind(&row.network)
    .bind(&row.deposit_address)
    .bind(&row.destination_address)
    .bind(&row.transaction_hash)
    .bind(&row.description)
    .bind(row.expires_at)
    .bind(row.version)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut **executor)
    .await?;
    Ok(())
}

/// Works out why a guarded transaction update touched no rows.
async fn explain_transaction_miss(
    executor: Executor<'_, '_>,
    id: Uuid,
    expected_version: i64,
) -> LedgerError {
    let current: Result<Option<(String, i64)>, sqlx::Error> =
        sqlx::query_as("SELECT status, version FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **executor)
            .await;

    match current {
        Err(e) => LedgerError::Database(e),
        Ok(None) => LedgerError::NotFound {
            entity: "transaction",
            id,
        },
        Ok(Some((_, version))) if version != expected_version => LedgerError::VersionConflict {
            entity: "transaction",
            id,
        },
        Ok(Some((status, _))) => LedgerError::Terminal {
            entity: "transaction",
            id,
            status,
        },
    }
}

pub async fn transition_transaction(
    executor: Executor<'_, '_>,
    id: Uuid,
    expected_version: i64,
    to: TransactionStatus,
    transaction_hash: Option<&str>,
    description: Option<&str>,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE transactions
        SET status = $3,
            transaction_hash = COALESCE($4, transaction_hash),
            description = COALESCE($5, description),
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1 AND version = $2 AND NOT (status = ANY($6))
        "#,
    )
    .bind(id)
    .bind(expected_version)
    .bind(to.as_str())
    .bind(transaction_hash)
    .bind(description)
    .bind(&TERMINAL_STATUSES[..])
    .execute(&mut **executor)
    .await?;

    if updated.rows_affected() == 1 {
        Ok(())
    } else {
        Err(explain_transaction_miss(executor, id, expected_version).await)
    }
}

pub async fn claim_transaction(
    executor: Executor<'_, '_>,
    id: Uuid,
    expected_version: i64,
    description: &str,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE transactions
        SET description = $3, version = version + 1, updated_at = NOW()
        WHERE id = $1 AND version = $2 AND NOT (status = ANY($4))
        "#,
    )
    .bind(id)
    .bind(expected_version)
    .bind(description)
    .bind(&TERMINAL_STATUSES[..])
    .execute(&mut **executor)
    .await?;

    if updated.rows_affected() == 1 {
        Ok(())
    } else {
        Err(explain_transaction_miss(executor, id, expected_version).await)
    }
}

pub async fn override_transaction_amount(
    executor: Executor<'_, '_>,
    id: Uuid,
    expected_version: i64,
    amount: &BigDecimal,
    to: TransactionStatus,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE transactions
        SET amount = $3, status = $4, version = version + 1, updated_at = NOW()
        WHERE id = $1 AND version = $2 AND NOT (status = ANY($5))
        "#,
    )
    .bind(id)
    .bind(expected_version)
    .bind(amount)
    .bind(to.as_str())
    .bind(&TERMINAL_STATUSES[..])
    .execute(&mut **executor)
    .await?;

    if updated.rows_affected() == 1 {
        Ok(())
    } else {
        Err(explain_transaction_miss(executor, id, expected_version).await)
    }
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_transactions_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT * FROM transactions
        WHERE client_id = $1 OR provider_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn list_pending_by_type(
    pool: &PgPool,
    tx_type: &str,
    limit: i64,
) -> sqlx::Result<Vec<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT * FROM transactions
        WHERE type = $1 AND status = 'pending'
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    )
    .bind(tx_type)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn get_milestone_payment(
    pool: &PgPool,
    milestone_id: Uuid,
) -> sqlx::Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        "SELECT * FROM transactions WHERE milestone_id = $1 AND type = 'milestone_payment'",
    )
    .bind(milestone_id)
    .fetch_optional(pool)
    .await
}

/// Cancels pending charges past their deadline and returns the wallets they used.
pub async fn cancel_expired_charges(
    executor: Executor<'_, '_>,
    now: DateTime<Utc>,
) -> sqlx::Result<Vec<Uuid>> {
    let rows: Vec<(Option<Uuid>,)> = sqlx::query_as(
        r#"
        UPDATE transactions
        SET status = 'cancelled', description = 'Charge expired',
            version = version + 1, updated_at = $1
        WHERE type = 'charge' AND status = 'pending' AND expires_at < $1
        RETURNING temp_wallet_id
        "#,
    )
    .bind(now)
    .fetch_all(&mut **executor)
    .await?;

    Ok(rows.into_iter().filter_map(|(id,)| id).collect())
}

// --- Wallet Queries ---

pub async fn insert_wallet(executor: Executor<'_, '_>, wallet: &TempWallet) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO temp_wallets (
            id, user_id, address, encrypted_private_key, encryption_key_hash, network,
            status, total_received, last_checked_at, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(wallet.id)
    .bind(wallet.user_id)
    .bind(&wallet.address)
    .bind(&wallet.encrypted_private_key)
    .bind(&wallet.encryption_key_hash)
    .bind(wallet.network.as_str())
    .bind(wallet.status.as_str())
    .bind(&wallet.total_received)
    .bind(wallet.last_checked_at)
    .bind(wallet.created_at)
    .execute(&mut **executor)
    .await?;
    Ok(())
}

pub async fn update_wallet(
    executor: Executor<'_, '_>,
    id: Uuid,
    status: Option<WalletStatus>,
    total_received: Option<&BigDecimal>,
    last_checked_at: Option<DateTime<Utc>>,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE temp_wallets
        SET status = COALESCE($2, status),
            total_received = COALESCE($3, total_received),
            last_checked_at = COALESCE($4, last_checked_at)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.map(|s| s.as_str()))
    .bind(total_received)
    .bind(last_checked_at)
    .execute(&mut **executor)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(LedgerError::NotFound {
            entity: "wallet",
            id,
        });
    }
    Ok(())
}

pub async fn deactivate_wallets(executor: Executor<'_, '_>, ids: &[Uuid]) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE temp_wallets SET status = 'inactive' WHERE id = ANY($1) AND status = 'active'",
    )
        .bind(ids)
        .execute(&mut **executor)
        .await?;
    Ok(())
}

pub async fn get_wallet(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<WalletRow>> {
    sqlx::query_as::<_, WalletRow>("SELECT * FROM temp_wallets WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

// --- Milestone Queries ---

pub async fn insert_milestone(
    executor: Executor<'_, '_>,
    milestone: &Milestone,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO milestones (
            id, client_id, provider_id, service_id, conversation_id, title, description,
            balance, status, version, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(milestone.id)
    .bind(milestone.client_id)
    .bind(milestone.provider_id)
    .bind(milestone.service_id)
    .bind(milestone.conversation_id)
    .bind(&milestone.title)
    .bind(&milestone.description)
    .bind(&milestone.balance)
    .bind(milestone.status.as_str())
    .bind(milestone.version)
    .bind(milestone.created_at)
    .bind(milestone.updated_at)
    .execute(&mut **executor)
    .await?;
    Ok(())
}

pub async fn transition_milestone(
    executor: Executor<'_, '_>,
    id: Uuid,
    expected_version: i64,
    to: MilestoneStatus,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE milestones SET status = $3, version = version + 1, updated_at = NOW()
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(id)
    .bind(expected_version)
    .bind(to.as_str())
    .execute(&mut **executor)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(());
    }

    let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM milestones WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **executor)
        .await?;
    Err(match exists {
        Some(_) => LedgerError::VersionConflict {
            entity: "milestone",
            id,
        },
        None => LedgerError::NotFound {
            entity: "milestone",
            id,
        },
    })
}

pub async fn get_milestone(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<MilestoneRow>> {
    sqlx::query_as::<_, MilestoneRow>("SELECT * FROM milestones WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_milestones_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> sqlx::Result<Vec<MilestoneRow>> {
    sqlx::query_as::<_, MilestoneRow>(
        r#"
        SELECT * FROM milestones
        WHERE client_id = $1 OR provider_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}
