//! Master wallet key sources. Keys are fetched per call and never cached in the engine.

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use async_trait::async_trait;
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;
use zeroize::Zeroizing;

use crate::domain::Network;

#[async_trait]
pub trait MasterKeySource: Send + Sync {
    /// Private key (hex) of the wallet that funds withdrawals on `network`.
    async fn master_key(&self, network: Network) -> Result<Zeroizing<String>>;
}

fn env_var_for(network: Network) -> &'static str {
    match network {
        Network::Tron => "TRON_MASTER_WALLET_PRIVATE_KEY",
        Network::Polygon => "POLYGON_MASTER_WALLET_PRIVATE_KEY",
    }
}

/// Reads `{TRON,POLYGON}_MASTER_WALLET_PRIVATE_KEY` from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvMasterKeys;

#[async_trait]
impl MasterKeySource for EnvMasterKeys {
    async fn master_key(&self, network: Network) -> Result<Zeroizing<String>> {
        let name = env_var_for(network);
        let value = env::var(name).with_context(|| format!("{name} is not set"))?;
        if value.trim().is_empty() {
            anyhow::bail!("{name} is empty");
        }
        Ok(Zeroizing::new(value.trim().to_string()))
    }
}

/// Reads master keys from Vault KV v2 at `{kv_mount}/master-wallets`, keyed by network name.
pub struct VaultMasterKeys {
    client: VaultClient,
    kv_mount: String,
}

impl VaultMasterKeys {
    pub async fn new() -> Result<Self> {
        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self { client, kv_mount })
    }
}

#[async_trait]
impl MasterKeySource for VaultMasterKeys {
    async fn master_key(&self, network: Network) -> Result<Zeroizing<String>> {
        let secret: HashMap<String, String> =
            kv2::read(&self.client, &self.kv_mount, "master-wallets")
                .await
                .context("failed to read secret/master-wallets from Vault")?;

        secret
            .get(network.as_str())
            .map(|key| Zeroizing::new(key.clone()))
            .with_context(|| format!("{} key not found in Vault secret/master-wallets", network))
    }
}
