//! Per-network chain adapters.
//!
//! An adapter is stateless over its RPC endpoint: it derives keys locally, reads token balances
//! and signs and broadcasts token transfers. Nothing here touches the ledger.

pub mod http;
pub mod keys;
pub mod polygon;
pub mod tron;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::domain::Network;

pub use polygon::PolygonAdapter;
pub use tron::TronAdapter;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Chain call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Node replied {status}: {body}")]
    Status { status: u16, body: String },

    /// The transfer may be on chain; nothing about it can be assumed until someone checks `hash`.
    #[error("Broadcast of {hash} unconfirmed: {reason}")]
    BroadcastUnconfirmed { hash: String, reason: String },

    #[error("Invalid response from node: {0}")]
    InvalidResponse(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl ChainError {
    /// Transport-level failures that are worth retrying on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Request(_) | ChainError::Timeout(_) | ChainError::CircuitBreakerOpen(_)
        )
    }

    /// Reclassifies an error from a broadcast request for `hash`. Anything that could have reached
    /// the node without a definite rejection leaves the outcome unknown.
    pub fn after_broadcast(self, hash: &str) -> ChainError {
        let reached_node = match &self {
            ChainError::Request(e) => !e.is_connect() && !e.is_builder(),
            ChainError::Timeout(_)
            | ChainError::Status { .. }
            | ChainError::InvalidResponse(_) => true,
            _ => false,
        };
        if reached_node {
            ChainError::BroadcastUnconfirmed {
                hash: hash.to_string(),
                reason: self.to_string(),
            }
        } else {
            self
        }
    }
}

/// Freshly generated deposit key pair. The private key is hex without a `0x` prefix.
pub struct GeneratedKeypair {
    pub address: String,
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for GeneratedKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn network(&self) -> Network;

    fn generate_keypair(&self) -> Result<GeneratedKeypair, ChainError>;

    fn is_valid_address(&self, address: &str) -> bool;

    /// Address controlled by `private_key` (hex, optional `0x`).
    fn address_of(&self, private_key: &str) -> Result<String, ChainError>;

    /// Stablecoin balance of `address` in whole token units.
    async fn token_balance(&self, address: &str) -> Result<BigDecimal, ChainError>;

    /// Sends `amount` tokens from the key's address to `to`; returns the transaction hash.
    async fn transfer(
        &self,
        private_key: &str,
        to: &str,
        amount: &BigDecimal,
    ) -> Result<String, ChainError>;
}

/// Adapters keyed by network.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    adapters: HashMap<Network, Arc<dyn ChainAdapter>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapters.insert(adapter.network(), adapter);
        self
    }

    pub fn get(&self, network: Network) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(&network).cloned()
    }

    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.adapters.keys().copied().collect();
        networks.sort_by_key(|n| n.as_str());
        networks
    }
}
