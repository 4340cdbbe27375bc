//! HTTP transport shared by the chain adapters, guarded by a circuit breaker.

use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::ChainError;

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    base_url: String,
    api_key_header: Option<(&'static str, String)>,
    circuit_breaker: Breaker,
}

impl RpcClient {
    pub fn new(base_url: String) -> Self {
        Self::with_circuit_breaker(base_url, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        RpcClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_header: None,
            circuit_breaker,
        }
    }

    /// Sends `value` under `header` on every request.
    pub fn with_api_key(mut self, header: &'static str, value: String) -> Self {
        self.api_key_header = Some((header, value));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// POSTs a JSON body to `{base_url}{path}` and decodes the JSON reply.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ChainError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some((header, value)) = &self.api_key_header {
            request = request.header(*header, value.as_str());
        }

        let result = self
            .circuit_breaker
            .call_with(ChainError::is_transient, async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(ChainError::Status {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Ok(response.json::<Value>().await?)
            })
            .await;

        let value = match result {
            Ok(value) => value,
            Err(FailsafeError::Rejected) => {
                return Err(ChainError::CircuitBreakerOpen(format!(
                    "{} circuit breaker is open",
                    self.base_url
                )))
            }
            Err(FailsafeError::Inner(e)) => return Err(e),
        };

        serde_json::from_value(value).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    /// JSON-RPC 2.0 call against the base URL. A `null` result decodes into `Option<_>` targets.
    pub async fn json_rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: JsonRpcResponse = self.post("", &body).await?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc(format!(
                "{method}: {} (code {})",
                error.message, error.code
            )));
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| ChainError::InvalidResponse(format!("{method}: {e}")))
    }
}
