use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{money, Network};

pub const DEFAULT_TRON_PLATFORM_FEE: &str = "1.00";
pub const DEFAULT_POLYGON_PLATFORM_FEE: &str = "0.50";
pub const DEFAULT_PROVIDER_SHARE_PERCENT: u32 = 98;
pub const DEFAULT_PAYMENT_TOLERANCE_PERCENT: u32 = 99;
pub const DEFAULT_MIN_WITHDRAWAL_AMOUNT: &str = "10.00";
pub const DEFAULT_CHARGE_TTL_MINUTES: i64 = 30;
pub const DEFAULT_MONITOR_POLL_CRON: &str = "*/30 * * * * *";
pub const DEFAULT_MONITOR_SWEEP_CRON: &str = "0 0 * * * *";
pub const DEFAULT_MONITOR_BATCH_SIZE: i64 = 50;
pub const DEFAULT_CHAIN_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_TRON_RPC_URL: &str = "https://api.trongrid.io";
pub const DEFAULT_TRON_TOKEN_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
pub const DEFAULT_POLYGON_RPC_URL: &str = "https://polygon-rpc.com";
pub const DEFAULT_POLYGON_TOKEN_CONTRACT: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
pub const DEFAULT_POLYGON_CHAIN_ID: u64 = 137;

/// Every derived money value (fees, shares, thresholds) comes from here.
#[derive(Debug, Clone, PartialEq)]
pub struct FeePolicy {
    pub tron_platform_fee: BigDecimal,
    pub polygon_platform_fee: BigDecimal,
    pub provider_share_percent: u32,
    pub payment_tolerance_percent: u32,
    pub min_withdrawal: BigDecimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            tron_platform_fee: decimal(DEFAULT_TRON_PLATFORM_FEE),
            polygon_platform_fee: decimal(DEFAULT_POLYGON_PLATFORM_FEE),
            provider_share_percent: DEFAULT_PROVIDER_SHARE_PERCENT,
            payment_tolerance_percent: DEFAULT_PAYMENT_TOLERANCE_PERCENT,
            min_withdrawal: decimal(DEFAULT_MIN_WITHDRAWAL_AMOUNT),
        }
    }
}

impl FeePolicy {
    pub fn platform_fee(&self, network: Network) -> BigDecimal {
        match network {
            Network::Tron => self.tron_platform_fee.clone(),
            Network::Polygon => self.polygon_platform_fee.clone(),
        }
    }

    pub fn expected_total(&self, amount: &BigDecimal, network: Network) -> BigDecimal {
        money::to_ledger(&(amount + self.platform_fee(network)))
    }

    /// Provider's share of an accepted milestone payment, truncated to cents.
    pub fn provider_amount(&self, amount: &BigDecimal) -> BigDecimal {
        money::to_ledger(&money::percent_of(amount, self.provider_share_percent))
    }

    /// Whatever the provider does not receive, including any sub-cent remainder.
    pub fn admin_fee(&self, amount: &BigDecimal) -> BigDecimal {
        amount - self.provider_amount(amount)
    }

    /// Smallest observed deposit that settles a charge expecting `expected`.
    pub fn settlement_threshold(&self, expected: &BigDecimal) -> BigDecimal {
        money::percent_of(expected, self.payment_tolerance_percent)
    }
}

fn decimal(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap_or_else(|_| money::zero())
}

#[derive(Debug, Clone)]
pub struct TronConfig {
    pub rpc_url: String,
    pub api_key: Option<String>,
    pub token_contract: String,
}

#[derive(Debug, Clone)]
pub struct PolygonConfig {
    pub rpc_url: String,
    pub token_contract: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub charge_ttl_minutes: i64,
    pub poll_cron: String,
    pub sweep_cron: String,
    pub batch_size: i64,
    pub chain_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            charge_ttl_minutes: DEFAULT_CHARGE_TTL_MINUTES,
            poll_cron: DEFAULT_MONITOR_POLL_CRON.to_string(),
            sweep_cron: DEFAULT_MONITOR_SWEEP_CRON.to_string(),
            batch_size: DEFAULT_MONITOR_BATCH_SIZE,
            chain_timeout: Duration::from_secs(DEFAULT_CHAIN_TIMEOUT_SECS),
        }
    }
}

/// Keys used to encrypt deposit wallet private keys.
#[derive(Clone)]
pub struct WalletKeyConfig {
    pub current: String,
    pub fallbacks: Vec<String>,
}

impl std::fmt::Debug for WalletKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKeyConfig")
            .field("current", &"****")
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKeySourceKind {
    Env,
    Vault,
}

impl FromStr for MasterKeySourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "env" => Ok(MasterKeySourceKind::Env),
            "vault" => Ok(MasterKeySourceKind::Vault),
            other => anyhow::bail!("MASTER_KEY_SOURCE must be 'env' or 'vault', got '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub tron: TronConfig,
    pub polygon: PolygonConfig,
    pub wallet_keys: WalletKeyConfig,
    pub fees: FeePolicy,
    pub monitor: MonitorConfig,
    pub platform_admin_user_id: Uuid,
    pub admin_api_token: Option<String>,
    pub notify: Option<NotifyConfig>,
    pub master_key_source: MasterKeySourceKind,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let fallbacks = env::var("WALLET_ENCRYPTION_KEY_FALLBACKS")
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();

        let notify = match env::var("NOTIFY_WEBHOOK_URL").ok().filter(|v| !v.is_empty()) {
            Some(webhook_url) => Some(NotifyConfig {
                webhook_url,
                webhook_secret: env::var("NOTIFY_WEBHOOK_SECRET")
                    .context("NOTIFY_WEBHOOK_SECRET is required when NOTIFY_WEBHOOK_URL is set")?,
            }),
            None => None,
        };

        let config = Config {
            server_port: env_or("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").ok(),
            tron: TronConfig {
                rpc_url: env_string("TRON_RPC_URL", DEFAULT_TRON_RPC_URL),
                api_key: env::var("TRON_API_KEY").ok().filter(|v| !v.is_empty()),
                token_contract: env_string("TRON_TOKEN_CONTRACT", DEFAULT_TRON_TOKEN_CONTRACT),
            },
            polygon: PolygonConfig {
                rpc_url: env_string("POLYGON_RPC_URL", DEFAULT_POLYGON_RPC_URL),
                token_contract: env_string(
                    "POLYGON_TOKEN_CONTRACT",
                    DEFAULT_POLYGON_TOKEN_CONTRACT,
                ),
                chain_id: env_or("POLYGON_CHAIN_ID", DEFAULT_POLYGON_CHAIN_ID)?,
            },
            wallet_keys: WalletKeyConfig {
                current: env::var("WALLET_ENCRYPTION_KEY")
                    .context("WALLET_ENCRYPTION_KEY is required")?,
                fallbacks,
            },
            fees: FeePolicy {
                tron_platform_fee: env_or("TRON_PLATFORM_FEE", decimal(DEFAULT_TRON_PLATFORM_FEE))?,
                polygon_platform_fee: env_or(
                    "POLYGON_PLATFORM_FEE",
                    decimal(DEFAULT_POLYGON_PLATFORM_FEE),
                )?,
                provider_share_percent: env_or(
                    "PROVIDER_SHARE_PERCENT",
                    DEFAULT_PROVIDER_SHARE_PERCENT,
                )?,
                payment_tolerance_percent: env_or(
                    "PAYMENT_TOLERANCE_PERCENT",
                    DEFAULT_PAYMENT_TOLERANCE_PERCENT,
                )?,
                min_withdrawal: env_or(
                    "MIN_WITHDRAWAL_AMOUNT",
                    decimal(DEFAULT_MIN_WITHDRAWAL_AMOUNT),
                )?,
            },
            monitor: MonitorConfig {
                charge_ttl_minutes: env_or("CHARGE_TTL_MINUTES", DEFAULT_CHARGE_TTL_MINUTES)?,
                poll_cron: env_string("MONITOR_POLL_CRON", DEFAULT_MONITOR_POLL_CRON),
                sweep_cron: env_string("MONITOR_SWEEP_CRON", DEFAULT_MONITOR_SWEEP_CRON),
                batch_size: env_or("MONITOR_BATCH_SIZE", DEFAULT_MONITOR_BATCH_SIZE)?,
                chain_timeout: Duration::from_secs(env_or(
                    "CHAIN_TIMEOUT_SECS",
                    DEFAULT_CHAIN_TIMEOUT_SECS,
                )?),
            },
            platform_admin_user_id: env::var("PLATFORM_ADMIN_USER_ID")
                .context("PLATFORM_ADMIN_USER_ID is required")?
                .parse()
                .context("PLATFORM_ADMIN_USER_ID must be a UUID")?,
            admin_api_token: env::var("ADMIN_API_TOKEN").ok().filter(|v| !v.is_empty()),
            notify,
            master_key_source: env_or("MASTER_KEY_SOURCE", MasterKeySourceKind::Env)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fees.provider_share_percent > 100 {
            anyhow::bail!("PROVIDER_SHARE_PERCENT must be between 0 and 100");
        }
        if self.fees.payment_tolerance_percent == 0 || self.fees.payment_tolerance_percent > 100 {
            anyhow::bail!("PAYMENT_TOLERANCE_PERCENT must be between 1 and 100");
        }
        if self.monitor.charge_ttl_minutes <= 0 {
            anyhow::bail!("CHARGE_TTL_MINUTES must be positive");
        }
        if self.monitor.batch_size <= 0 {
            anyhow::bail!("MONITOR_BATCH_SIZE must be positive");
        }
        if self.wallet_keys.current.is_empty() {
            anyhow::bail!("WALLET_ENCRYPTION_KEY must not be empty");
        }
        cron::Schedule::from_str(&self.monitor.poll_cron)
            .map_err(|e| anyhow::anyhow!("MONITOR_POLL_CRON is invalid: {e}"))?;
        cron::Schedule::from_str(&self.monitor.sweep_cron)
            .map_err(|e| anyhow::anyhow!("MONITOR_SWEEP_CRON is invalid: {e}"))?;
        Ok(())
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        _ => Ok(default),
    }
}

/// Comma-separated key list; blanks are dropped.
fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
