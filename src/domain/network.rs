use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseEnumError;

/// Payment networks the engine settles on.
///
/// `Tron` is the low-fee account chain (TRC-20 stablecoin).
/// `Polygon` is the EVM chain (ERC-20 stablecoin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tron,
    Polygon,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Tron, Network::Polygon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tron => "tron",
            Network::Polygon => "polygon",
        }
    }

    /// Ticker of the stablecoin the engine accepts on this network.
    pub fn token_symbol(&self) -> &'static str {
        match self {
            Network::Tron => "USDT",
            Network::Polygon => "USDC",
        }
    }

    /// On-chain decimals of the stablecoin contract.
    pub fn token_decimals(&self) -> u32 {
        6
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tron" | "trc20" => Ok(Network::Tron),
            "polygon" | "matic" => Ok(Network::Polygon),
            _ => Err(ParseEnumError::new("network", s)),
        }
    }
}
