//! TRC-20 stablecoin adapter over the TronGrid HTTP API.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::http::RpcClient;
use super::keys::{self, abi_address_word, abi_uint_word};
use super::{ChainAdapter, ChainError, GeneratedKeypair};
use crate::config::TronConfig;
use crate::domain::{money, Network};

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
/// Maximum TRX (in sun) a token transfer may burn for energy.
const TRANSFER_FEE_LIMIT: u64 = 100_000_000;
/// Broadcast code for a transaction the node already holds.
const DUPLICATE_TRANSACTION: &str = "DUP_TRANSACTION_ERROR";

#[derive(Debug, Deserialize)]
struct CallResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConstantContractResponse {
    #[serde(default)]
    constant_result: Vec<String>,
    result: Option<CallResult>,
}

#[derive(Debug, Deserialize)]
struct TriggerContractResponse {
    result: Option<CallResult>,
    transaction: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Node messages arrive hex-encoded; fall back to the raw text when they are not.
fn decode_node_message(message: Option<String>) -> String {
    let Some(message) = message else {
        return "no message".to_string();
    };
    hex::decode(&message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or(message)
}

#[derive(Clone)]
pub struct TronAdapter {
    rpc: RpcClient,
    token_contract: String,
}

impl TronAdapter {
    pub fn new(config: TronConfig) -> Self {
        let mut rpc = RpcClient::new(config.rpc_url);
        if let Some(api_key) = config.api_key {
            rpc = rpc.with_api_key(API_KEY_HEADER, api_key);
        }
        Self {
            rpc,
            token_contract: config.token_contract,
        }
    }

    fn evm_part(address: &str) -> Result<[u8; 20], ChainError> {
        let raw = keys::parse_tron_address(address)
            .ok_or_else(|| ChainError::InvalidAddress(address.to_string()))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&raw[1..]);
        Ok(out)
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    fn network(&self) -> Network {
        Network::Tron
    }

    fn generate_keypair(&self) -> Result<GeneratedKeypair, ChainError> {
        let key = keys::generate_signing_key();
        Ok(GeneratedKeypair {
            address: keys::tron_base58(&keys::tron_address_bytes(key.verifying_key())),
            private_key: keys::private_key_hex(&key),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        keys::parse_tron_address(address).is_some()
    }

    fn address_of(&self, private_key: &str) -> Result<String, ChainError> {
        let key = keys::signing_key_from_hex(private_key)?;
        Ok(keys::tron_base58(&keys::tron_address_bytes(key.verifying_key())))
    }

    async fn token_balance(&self, address: &str) -> Result<BigDecimal, ChainError> {
        let holder = Self::evm_part(address)?;
        let body = json!({
            "owner_address": address,
            "contract_address": self.token_contract,
            "function_selector": "balanceOf(address)",
            "parameter": abi_address_word(&holder),
            "visible": true,
        });
        let response: ConstantContractResponse =
            self.rpc.post("/wallet/triggerconstantcontract", &body).await?;

        if let Some(result) = response.result {
            if !result.result {
                return Err(ChainError::Rpc(decode_node_message(result.message)));
            }
        }
        let word = response
            .constant_result
            .first()
            .ok_or_else(|| ChainError::InvalidResponse("empty constant_result".to_string()))?;
        let significant = word.trim_start_matches('0');
        let units = if significant.is_empty() {
            0
        } else {
            u128::from_str_radix(significant, 16)
                .map_err(|e| ChainError::InvalidResponse(format!("balanceOf word {word}: {e}")))?
        };

        money::from_base_units(units, Network::Tron.token_decimals())
            .ok_or_else(|| ChainError::InvalidResponse(format!("balance {units} out of range")))
    }

    async fn transfer(
        &self,
        private_key: &str,
        to: &str,
        amount: &BigDecimal,
    ) -> Result<String, ChainError> {
        let key = keys::signing_key_from_hex(private_key)?;
        let owner = keys::tron_base58(&keys::tron_address_bytes(key.verifying_key()));
        let recipient = Self::evm_part(to)?;
        let units = money::to_base_units(amount, Network::Tron.token_decimals())
            .ok_or_else(|| ChainError::Rpc(format!("amount {amount} is not transferable")))?;

        let body = json!({
            "owner_address": owner,
            "contract_address": self.token_contract,
            "function_selector": "transfer(address,uint256)",
            "parameter": format!("{}{}", abi_address_word(&recipient), abi_uint_word(units)),
            "fee_limit": TRANSFER_FEE_LIMIT,
            "call_value": 0,
            "visible": true,
        });
        let response: TriggerContractResponse =
            self.rpc.post("/wallet/triggersmartcontract", &body).await?;

        match response.result {
            Some(result) if result.result => {}
            Some(result) => return Err(ChainError::Rpc(decode_node_message(result.message))),
            None => return Err(ChainError::InvalidResponse("missing trigger result".to_string())),
        }
        let mut transaction = response
            .transaction
            .ok_or_else(|| ChainError::InvalidResponse("missing transaction".to_string()))?;

        let tx_id = transaction["txID"]
            .as_str()
            .ok_or_else(|| ChainError::InvalidResponse("missing txID".to_string()))?
            .to_string();
        let raw_data_hex = transaction["raw_data_hex"]
            .as_str()
            .ok_or_else(|| ChainError::InvalidResponse("missing raw_data_hex".to_string()))?;

        // The id is sha256 of the raw transaction. Recompute it and sign only our own digest.
        let raw = hex::decode(raw_data_hex)
            .map_err(|e| ChainError::InvalidResponse(format!("raw_data_hex: {e}")))?;
        let digest: [u8; 32] = Sha256::digest(&raw).into();
        if hex::encode(digest) != tx_id.to_ascii_lowercase() {
            return Err(ChainError::InvalidResponse(format!(
                "txID {tx_id} does not match raw_data"
            )));
        }

        let (rs, recovery_id) = keys::sign_digest(&key, &digest)?;
        let mut signature = rs.to_vec();
        signature.push(recovery_id);
        transaction["signature"] = json!([hex::encode(signature)]);

        let broadcast: BroadcastResponse = self
            .rpc
            .post("/wallet/broadcasttransaction", &transaction)
            .await
            .map_err(|e| e.after_broadcast(&tx_id))?;
        if !broadcast.result {
            let code = broadcast.code.unwrap_or_else(|| "UNKNOWN".to_string());
            let reason = format!(
                "broadcast rejected ({code}): {}",
                decode_node_message(broadcast.message)
            );
            if code == DUPLICATE_TRANSACTION {
                return Err(ChainError::BroadcastUnconfirmed {
                    hash: tx_id,
                    reason,
                });
            }
            return Err(ChainError::Rpc(reason));
        }

        tracing::info!(tx_id = %tx_id, to = %to, amount = %amount, "TRC-20 transfer broadcast");
        Ok(tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const HOLDER: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn adapter(url: String) -> TronAdapter {
        TronAdapter::new(TronConfig {
            rpc_url: url,
            api_key: Some("test-key".to_string()),
            token_contract: HOLDER.to_string(),
        })
    }

    #[test]
    fn test_generated_keypair_is_valid_and_consistent() {
        let adapter = adapter("http://localhost".to_string());
        let pair = adapter.generate_keypair().unwrap();

        assert!(adapter.is_valid_address(&pair.address));
        assert_eq!(adapter.address_of(&pair.private_key).unwrap(), pair.address);
        assert!(!adapter.is_valid_address("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"));
    }

    #[tokio::test]
    async fn test_token_balance_with_mock() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/wallet/triggerconstantcontract")
            .match_header("TRON-PRO-API-KEY", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"result":{{"result":true}},"constant_result":["{:064x}"]}}"#,
                101_000_000u64
            ))
            .create_async()
            .await;

        let balance = adapter(server.url()).token_balance(HOLDER).await.unwrap();
        assert_eq!(balance, BigDecimal::from_str("101").unwrap());
    }

    #[tokio::test]
    async fn test_token_balance_zero_word() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/wallet/triggerconstantcontract")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"result":{{"result":true}},"constant_result":["{}"]}}"#,
                "0".repeat(64)
            ))
            .create_async()
            .await;

        let balance = adapter(server.url()).token_balance(HOLDER).await.unwrap();
        assert_eq!(balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_token_balance_rejects_invalid_address() {
        let adapter = adapter("http://localhost".to_string());
        let result = adapter.token_balance("not-an-address").await;
        assert!(matches!(result, Err(ChainError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_transfer_signs_and_broadcasts() {
        let mut server = mockito::Server::new_async().await;
        let raw_data_hex = "0a0208e722";
        let tx_id = hex::encode(Sha256::digest(hex::decode(raw_data_hex).unwrap()));

        let _trigger = server
            .mock("POST", "/wallet/triggersmartcontract")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": {"result": true},
                    "transaction": {
                        "txID": tx_id,
                        "raw_data": {},
                        "raw_data_hex": raw_data_hex,
                        "visible": true
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _broadcast = server
            .mock("POST", "/wallet/broadcasttransaction")
            .match_body(mockito::Matcher::PartialJson(json!({"txID": tx_id})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"result": true, "txid": tx_id}).to_string())
            .create_async()
            .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let hash = adapter
            .transfer(&key.private_key, HOLDER, &BigDecimal::from(25))
            .await
            .unwrap();
        assert_eq!(hash, tx_id);
    }

    #[tokio::test]
    async fn test_transfer_surfaces_broadcast_rejection() {
        let mut server = mockito::Server::new_async().await;
        let raw_data_hex = "0a0208e722";
        let tx_id = hex::encode(Sha256::digest(hex::decode(raw_data_hex).unwrap()));

        let _trigger = server
            .mock("POST", "/wallet/triggersmartcontract")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": {"result": true},
                    "transaction": {"txID": tx_id, "raw_data_hex": raw_data_hex}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _broadcast = server
            .mock("POST", "/wallet/broadcasttransaction")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": false,
                    "code": "CONTRACT_VALIDATE_ERROR",
                    "message": hex::encode("balance is not sufficient")
                })
                .to_string(),
            )
            .create_async()
            .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let err = adapter
            .transfer(&key.private_key, HOLDER, &BigDecimal::from(25))
            .await
            .unwrap_err();

        match err {
            ChainError::Rpc(message) => {
                assert!(message.contains("CONTRACT_VALIDATE_ERROR"));
                assert!(message.contains("balance is not sufficient"));
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_server_error_leaves_outcome_unknown() {
        let mut server = mockito::Server::new_async().await;
        let raw_data_hex = "0a0208e722";
        let tx_id = hex::encode(Sha256::digest(hex::decode(raw_data_hex).unwrap()));

        let _trigger = server
            .mock("POST", "/wallet/triggersmartcontract")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": {"result": true},
                    "transaction": {"txID": tx_id, "raw_data_hex": raw_data_hex}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _broadcast = server
            .mock("POST", "/wallet/broadcasttransaction")
            .with_status(504)
            .with_body("gateway timeout")
            .create_async()
            .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let err = adapter
            .transfer(&key.private_key, HOLDER, &BigDecimal::from(25))
            .await
            .unwrap_err();

        match err {
            ChainError::BroadcastUnconfirmed { hash, reason } => {
                assert_eq!(hash, tx_id);
                assert!(reason.contains("504"));
            }
            other => panic!("expected unconfirmed broadcast, got {other:?}"),
        }
    }
}
