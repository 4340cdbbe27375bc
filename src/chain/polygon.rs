//! ERC-20 stablecoin adapter over Polygon JSON-RPC.
//!
//! Transfers are legacy (type 0) transactions with EIP-155 replay protection, signed locally.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use k256::ecdsa::SigningKey;
use primitive_types::{H160, U256};
use rlp::RlpStream;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::http::RpcClient;
use super::keys::{self, abi_address_word, abi_uint_word};
use super::{ChainAdapter, ChainError, GeneratedKeypair};
use crate::config::PolygonConfig;
use crate::domain::{money, Network};

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: &str = "70a08231";
/// `transfer(address,uint256)`
const TRANSFER_SELECTOR: &str = "a9059cbb";

#[derive(Debug, Deserialize)]
struct Receipt {
    status: Option<String>,
}

fn parse_quantity(raw: &str) -> Result<U256, ChainError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("quantity {raw}: {e:?}")))
}

/// Unsigned legacy transaction.
#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas: U256,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// keccak256(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]))
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keys::keccak256(&stream.out())
    }

    /// Raw signed transaction bytes, ready for `eth_sendRawTransaction`.
    pub fn sign(&self, key: &SigningKey, chain_id: u64) -> Result<Vec<u8>, ChainError> {
        let digest = self.signing_hash(chain_id);
        let (rs, recovery_id) = keys::sign_digest(key, &digest)?;
        let v = chain_id * 2 + 35 + u64::from(recovery_id);

        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&U256::from_big_endian(&rs[..32]));
        stream.append(&U256::from_big_endian(&rs[32..]));
        Ok(stream.out().to_vec())
    }
}

#[derive(Clone)]
pub struct PolygonAdapter {
    rpc: RpcClient,
    token_contract: String,
    chain_id: u64,
    receipt_attempts: u32,
    receipt_interval: Duration,
}

impl PolygonAdapter {
    pub fn new(config: PolygonConfig) -> Self {
        Self {
            rpc: RpcClient::new(config.rpc_url),
            token_contract: config.token_contract,
            chain_id: config.chain_id,
            receipt_attempts: 30,
            receipt_interval: Duration::from_secs(2),
        }
    }

    pub fn with_receipt_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.receipt_attempts = attempts;
        self.receipt_interval = interval;
        self
    }

    fn parse_address(address: &str) -> Result<[u8; 20], ChainError> {
        keys::parse_evm_address(address)
            .ok_or_else(|| ChainError::InvalidAddress(address.to_string()))
    }

    async fn quantity_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<U256, ChainError> {
        let raw: String = self.rpc.json_rpc(method, params).await?;
        parse_quantity(&raw)
    }

    /// Waits a bounded time for the receipt. A reverted receipt is an error. Running out of
    /// attempts is not, since the transaction is already in the mempool. Polling that ends on a
    /// failed request leaves the outcome unknown.
    async fn await_receipt(&self, hash: &str) -> Result<(), ChainError> {
        let mut last_error = None;
        for _ in 0..self.receipt_attempts {
            let receipt: Result<Option<Receipt>, ChainError> = self
                .rpc
                .json_rpc("eth_getTransactionReceipt", json!([hash]))
                .await;
            match receipt {
                Ok(Some(Receipt { status: Some(status) })) if status == "0x0" => {
                    return Err(ChainError::Rpc(format!("transaction {hash} reverted")));
                }
                Ok(Some(_)) => return Ok(()),
                Ok(None) => last_error = None,
                Err(e) => {
                    tracing::warn!(tx_hash = %hash, error = %e, "Receipt poll failed");
                    last_error = Some(e);
                }
            }
            tokio::time::sleep(self.receipt_interval).await;
        }

        if let Some(e) = last_error {
            return Err(ChainError::BroadcastUnconfirmed {
                hash: hash.to_string(),
                reason: e.to_string(),
            });
        }
        tracing::warn!(tx_hash = %hash, "No receipt yet, treating broadcast transaction as sent");
        Ok(())
    }
}

/// Nodes answer a resend of a transaction they already hold with one of these.
fn already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

#[async_trait]
impl ChainAdapter for PolygonAdapter {
    fn network(&self) -> Network {
        Network::Polygon
    }

    fn generate_keypair(&self) -> Result<GeneratedKeypair, ChainError> {
        let key = keys::generate_signing_key();
        Ok(GeneratedKeypair {
            address: keys::to_checksum_address(&keys::evm_address_bytes(key.verifying_key())),
            private_key: keys::private_key_hex(&key),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        keys::parse_evm_address(address).is_some()
    }

    fn address_of(&self, private_key: &str) -> Result<String, ChainError> {
        let key = keys::signing_key_from_hex(private_key)?;
        Ok(keys::to_checksum_address(&keys::evm_address_bytes(key.verifying_key())))
    }

    async fn token_balance(&self, address: &str) -> Result<BigDecimal, ChainError> {
        let holder = Self::parse_address(address)?;
        let data = format!("0x{BALANCE_OF_SELECTOR}{}", abi_address_word(&holder));
        let word = self
            .quantity_call(
                "eth_call",
                json!([{ "to": self.token_contract, "data": data }, "latest"]),
            )
            .await?;

        if word > U256::from(u128::MAX) {
            return Err(ChainError::InvalidResponse(format!("balance {word} out of range")));
        }
        money::from_base_units(word.as_u128(), Network::Polygon.token_decimals())
            .ok_or_else(|| ChainError::InvalidResponse(format!("balance {word} out of range")))
    }

    async fn transfer(
        &self,
        private_key: &str,
        to: &str,
        amount: &BigDecimal,
    ) -> Result<String, ChainError> {
        let key = keys::signing_key_from_hex(private_key)?;
        let from = keys::to_checksum_address(&keys::evm_address_bytes(key.verifying_key()));
        let recipient = Self::parse_address(to)?;
        let contract = Self::parse_address(&self.token_contract)?;
        let units = money::to_base_units(amount, Network::Polygon.token_decimals())
            .ok_or_else(|| ChainError::Rpc(format!("amount {amount} is not transferable")))?;

        let data_hex = format!(
            "{TRANSFER_SELECTOR}{}{}",
            abi_address_word(&recipient),
            abi_uint_word(units)
        );
        let data = hex::decode(&data_hex).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        let nonce = self
            .quantity_call("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price = self.quantity_call("eth_gasPrice", json!([])).await?;
        let estimate = self
            .quantity_call(
                "eth_estimateGas",
                json!([{
                    "from": from,
                    "to": self.token_contract,
                    "data": format!("0x{data_hex}"),
                }]),
            )
            .await?;
        let gas = estimate * U256::from(12) / U256::from(10);

        let raw = LegacyTransaction {
            nonce,
            gas_price,
            gas,
            to: H160::from(contract),
            value: U256::zero(),
            data,
        }
        .sign(&key, self.chain_id)?;

        let local_hash = format!("0x{}", hex::encode(keys::keccak256(&raw)));

        let sent: Result<String, ChainError> = self
            .rpc
            .json_rpc("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(&raw))]))
            .await;
        let hash = match sent {
            Ok(hash) => hash,
            Err(ChainError::Rpc(message)) if already_known(&message) => local_hash,
            Err(e) => return Err(e.after_broadcast(&local_hash)),
        };
        tracing::info!(
            tx_hash = %hash,
            to = %to,
            amount = %amount,
            nonce = %nonce,
            "ERC-20 transfer broadcast"
        );

        self.await_receipt(&hash).await?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use mockito::Matcher;
    use std::str::FromStr;

    fn adapter(url: String) -> PolygonAdapter {
        PolygonAdapter::new(PolygonConfig {
            rpc_url: url,
            token_contract: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".to_string(),
            chain_id: 137,
        })
        .with_receipt_polling(2, Duration::from_millis(10))
    }

    fn eip155_example() -> LegacyTransaction {
        LegacyTransaction {
            nonce: U256::from(9),
            gas_price: U256::from(20_000_000_000u64),
            gas: U256::from(21_000),
            to: H160::from([0x35u8; 20]),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_eip155_signing_hash() {
        assert_eq!(
            hex::encode(eip155_example().signing_hash(1)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_signed_transaction_recovers_sender() {
        let key = keys::signing_key_from_hex(&"46".repeat(32)).unwrap();
        let tx = eip155_example();
        let raw = tx.sign(&key, 1).unwrap();

        let decoded = rlp::Rlp::new(&raw);
        assert_eq!(decoded.item_count().unwrap(), 9);
        let v: u64 = decoded.val_at(6).unwrap();
        assert!(v == 37 || v == 38);

        let r: U256 = decoded.val_at(7).unwrap();
        let s: U256 = decoded.val_at(8).unwrap();
        let mut rs = [0u8; 64];
        r.to_big_endian(&mut rs[..32]);
        s.to_big_endian(&mut rs[32..]);

        let recovered = VerifyingKey::recover_from_prehash(
            &tx.signing_hash(1),
            &Signature::from_slice(&rs).unwrap(),
            RecoveryId::from_byte((v - 37) as u8).unwrap(),
        )
        .unwrap();
        assert_eq!(
            keys::evm_address_bytes(&recovered),
            keys::evm_address_bytes(key.verifying_key())
        );
    }

    #[test]
    fn test_address_validation() {
        let adapter = adapter("http://localhost".to_string());
        let pair = adapter.generate_keypair().unwrap();

        assert!(adapter.is_valid_address(&pair.address));
        assert_eq!(adapter.address_of(&pair.private_key).unwrap(), pair.address);
        assert!(!adapter.is_valid_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"));
    }

    #[tokio::test]
    async fn test_token_balance_with_mock() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_call"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": format!("0x{:064x}", 50_500_000u64)})
                    .to_string(),
            )
            .create_async()
            .await;

        let balance = adapter(server.url())
            .token_balance("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
            .await
            .unwrap();
        assert_eq!(balance, BigDecimal::from_str("50.5").unwrap());
    }

    async fn rpc_mock(
        server: &mut mockito::ServerGuard,
        method: &str,
        result: serde_json::Value,
    ) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_transfer_broadcasts_signed_transaction() {
        let mut server = mockito::Server::new_async().await;
        let hash = format!("0x{}", "ab".repeat(32));
        let _nonce = rpc_mock(&mut server, "eth_getTransactionCount", json!("0x3")).await;
        let _price = rpc_mock(&mut server, "eth_gasPrice", json!("0x6fc23ac00")).await;
        let _gas = rpc_mock(&mut server, "eth_estimateGas", json!("0xfde8")).await;
        let _send = rpc_mock(&mut server, "eth_sendRawTransaction", json!(hash)).await;
        let _receipt = rpc_mock(
            &mut server,
            "eth_getTransactionReceipt",
            json!({"status": "0x1", "transactionHash": hash}),
        )
        .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let sent = adapter
            .transfer(
                &key.private_key,
                "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
                &BigDecimal::from(25),
            )
            .await
            .unwrap();
        assert_eq!(sent, hash);
    }

    #[tokio::test]
    async fn test_reverted_transfer_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let hash = format!("0x{}", "cd".repeat(32));
        let _nonce = rpc_mock(&mut server, "eth_getTransactionCount", json!("0x0")).await;
        let _price = rpc_mock(&mut server, "eth_gasPrice", json!("0x1")).await;
        let _gas = rpc_mock(&mut server, "eth_estimateGas", json!("0x5208")).await;
        let _send = rpc_mock(&mut server, "eth_sendRawTransaction", json!(hash)).await;
        let _receipt = rpc_mock(
            &mut server,
            "eth_getTransactionReceipt",
            json!({"status": "0x0"}),
        )
        .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let result = adapter
            .transfer(
                &key.private_key,
                "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
                &BigDecimal::from(25),
            )
            .await;
        assert!(matches!(result, Err(ChainError::Rpc(message)) if message.contains("reverted")));
    }

    async fn mock_until_send(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
        vec![
            rpc_mock(server, "eth_getTransactionCount", json!("0x1")).await,
            rpc_mock(server, "eth_gasPrice", json!("0x1")).await,
            rpc_mock(server, "eth_estimateGas", json!("0x5208")).await,
        ]
    }

    #[tokio::test]
    async fn test_failed_receipt_poll_leaves_outcome_unknown() {
        let mut server = mockito::Server::new_async().await;
        let hash = format!("0x{}", "ef".repeat(32));
        let _setup = mock_until_send(&mut server).await;
        let _send = rpc_mock(&mut server, "eth_sendRawTransaction", json!(hash)).await;
        let _receipt = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_getTransactionReceipt"})))
            .with_status(500)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let err = adapter
            .transfer(
                &key.private_key,
                "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
                &BigDecimal::from(25),
            )
            .await
            .unwrap_err();

        match err {
            ChainError::BroadcastUnconfirmed { hash: unconfirmed, reason } => {
                assert_eq!(unconfirmed, hash);
                assert!(reason.contains("500"));
            }
            other => panic!("expected unconfirmed broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_send_reports_locally_computed_hash() {
        let mut server = mockito::Server::new_async().await;
        let _setup = mock_until_send(&mut server).await;
        let _send = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_sendRawTransaction"})))
            .with_status(502)
            .create_async()
            .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let err = adapter
            .transfer(
                &key.private_key,
                "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
                &BigDecimal::from(25),
            )
            .await
            .unwrap_err();

        match err {
            ChainError::BroadcastUnconfirmed { hash, .. } => {
                assert!(hash.starts_with("0x"));
                assert_eq!(hash.len(), 66);
            }
            other => panic!("expected unconfirmed broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_send_is_a_plain_error() {
        let mut server = mockito::Server::new_async().await;
        let _setup = mock_until_send(&mut server).await;
        let _send = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_sendRawTransaction"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": -32000, "message": "insufficient funds for gas"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let adapter = adapter(server.url());
        let key = adapter.generate_keypair().unwrap();
        let err = adapter
            .transfer(
                &key.private_key,
                "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
                &BigDecimal::from(25),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Rpc(message) if message.contains("insufficient funds")));
    }

    #[test]
    fn test_already_known_messages() {
        assert!(already_known("already known"));
        assert!(already_known("Known transaction: 0xab"));
        assert!(!already_known("nonce too low"));
    }

    #[tokio::test]
    async fn test_transfer_rejects_invalid_destination() {
        let adapter = adapter("http://localhost".to_string());
        let key = adapter.generate_keypair().unwrap();
        let result = adapter
            .transfer(&key.private_key, "0x1234", &BigDecimal::from(25))
            .await;
        assert!(matches!(result, Err(ChainError::InvalidAddress(_))));
    }
}
