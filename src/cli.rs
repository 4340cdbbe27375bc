use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{MemoryLedgerStore, PostgresLedgerStore};
use crate::config::Config;
use crate::ports::LedgerStore;
use crate::{create_app, AppState, Engine};

#[derive(Parser)]
#[command(name = "escrow-settlement")]
#[command(about = "Escrow payment and settlement engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the payment monitor (default)
    Serve {
        /// Keep the ledger in memory instead of Postgres (local runs only)
        #[arg(long)]
        in_memory: bool,
    },

    /// Payment monitor commands
    #[command(subcommand)]
    Monitor(MonitorCommands),

    /// Withdrawal settlement commands
    #[command(subcommand)]
    Withdrawals(WithdrawalCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum MonitorCommands {
    /// Run a single polling pass over pending charges
    Once,
    /// Cancel every pending charge past its expiry
    Sweep,
}

#[derive(Subcommand)]
pub enum WithdrawalCommands {
    /// Send pending withdrawals on chain
    Process {
        /// Process only this withdrawal
        #[arg(long, value_name = "TX_ID")]
        id: Option<Uuid>,

        /// Maximum number of withdrawals to process
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

async fn postgres_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let url = config.require_database_url()?;
    let pool = crate::db::create_pool(url)
        .await
        .context("failed to connect to the database")?;
    crate::db::run_migrations(&pool).await?;
    Ok(Arc::new(PostgresLedgerStore::new(pool)))
}

async fn build_engine(config: &Config, store: Arc<dyn LedgerStore>) -> anyhow::Result<Engine> {
    Engine::from_config(config, store, Engine::default_relay()).await
}

pub async fn handle_serve(config: &Config, in_memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn LedgerStore> = if in_memory {
        tracing::warn!("Running with an in-memory ledger; nothing will be persisted");
        Arc::new(MemoryLedgerStore::new())
    } else {
        postgres_store(config).await?
    };

    let engine = build_engine(config, store).await?;
    let _monitor_tasks = engine.monitor.spawn()?;

    let app = create_app(AppState {
        engine,
        admin_token: config.admin_api_token.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

pub async fn handle_monitor_once(config: &Config) -> anyhow::Result<()> {
    let engine = build_engine(config, postgres_store(config).await?).await?;
    let report = engine.poll_once().await?;

    println!("✓ Monitor pass finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn handle_monitor_sweep(config: &Config) -> anyhow::Result<()> {
    let engine = build_engine(config, postgres_store(config).await?).await?;
    let cancelled = engine.sweep_expired().await?;

    println!("✓ {} expired charge(s) cancelled", cancelled);
    Ok(())
}

pub async fn handle_withdrawals_process(
    config: &Config,
    id: Option<Uuid>,
    limit: i64,
) -> anyhow::Result<()> {
    let engine = build_engine(config, postgres_store(config).await?).await?;

    match id {
        Some(id) => {
            let tx = engine.process_withdraw(id).await?;
            println!(
                "✓ Withdrawal {} is {} ({})",
                tx.id,
                tx.status,
                tx.transaction_hash.as_deref().unwrap_or("no hash")
            );
        }
        None => {
            let report = engine.process_pending_withdrawals(limit).await?;
            println!("✓ Withdrawal run finished");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config.require_database_url()?).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("  Tron RPC: {}", config.tron.rpc_url);
    println!("  Polygon RPC: {} (chain {})", config.polygon.rpc_url, config.polygon.chain_id);
    println!("  Wallet keys: {:?}", config.wallet_keys);
    println!("  Fees: {:?}", config.fees);
    println!("  Monitor: {:?}", config.monitor);
    println!("  Master key source: {:?}", config.master_key_source);
    println!(
        "  Notifications: {}",
        config
            .notify
            .as_ref()
            .map(|n| n.webhook_url.as_str())
            .unwrap_or("log only")
    );

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
