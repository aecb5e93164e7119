//! Shared utilities for talking to Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::{primitives::Bytes, sol_types::decode_revert_reason};
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::Error;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-RPC error code used by nodes for `execution reverted`.
const EXECUTION_REVERTED: i64 = 3;

/// JSON-RPC error codes that signal a temporary condition on the node side.
const TRANSIENT_CODES: &[i64] = &[-32005, -32603, 429];

/// Rejections meaning the node already holds the exact transaction sent.
const ALREADY_KNOWN: &[&str] = &["already known", "known transaction", "already imported", "alreadyknown"];

/// Rejections meaning the sender's nonce has been used.
const NONCE_USED: &[&str] = &["nonce too low", "nonce has already been used"];

/// Bounded exponential backoff for transient RPC failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Failure of a single JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The request never got a well-formed answer; worth retrying.
    Transport(String),
    /// The node executed the call and it reverted.
    Reverted(String),
    /// The node refused the request for a deterministic reason.
    Rejected { code: i64, message: String },
}

impl RpcError {
    fn from_response(error: &Value) -> Self {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let revert_data = error
            .get("data")
            .and_then(Value::as_str)
            .and_then(|data| data.parse::<Bytes>().ok());

        if code == EXECUTION_REVERTED || message.contains("revert") {
            let reason = revert_data
                .as_deref()
                .and_then(|data| revert_reason(data))
                .unwrap_or(message);
            return Self::Reverted(reason);
        }

        if TRANSIENT_CODES.contains(&code) {
            return Self::Transport(format!("{} (code {})", message, code));
        }

        Self::Rejected { code, message }
    }

    /// A send refused because the node already has this transaction.
    pub fn is_already_known(&self) -> bool {
        self.rejected_with(ALREADY_KNOWN)
    }

    /// A send refused because the sender's nonce was already used, possibly
    /// by the very transaction being sent.
    pub fn is_nonce_used(&self) -> bool {
        self.rejected_with(NONCE_USED)
    }

    fn rejected_with(&self, needles: &[&str]) -> bool {
        match self {
            Self::Rejected { message, .. } => {
                let message = message.to_lowercase();
                needles.iter().any(|needle| message.contains(needle))
            }
            _ => false,
        }
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Transport(message) => Error::Network(message),
            RpcError::Reverted(reason) => Error::Transaction { hash: None, reason },
            RpcError::Rejected { code, message } => Error::Transaction {
                hash: None,
                reason: format!("{} (code {})", message, code),
            },
        }
    }
}

/// Decode revert data into a human readable reason.
///
/// `Error(string)` and `Panic(uint256)` payloads are decoded, anything else is
/// returned as hex.
pub fn revert_reason(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    Some(decode_revert_reason(data).unwrap_or_else(|| format!("0x{}", hex::encode(data))))
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

/// Make a JSON-RPC call and deserialize the result.
///
/// A `null` result deserializes into `T` as-is, so callers expecting optional
/// values should ask for an `Option`.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| RpcError::Transport(format!("failed to send {} request: {}", method, e)))?;

    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(RpcError::Transport(format!(
            "{} request failed with HTTP {}",
            method, status
        )));
    }

    let result: Value = response
        .json()
        .await
        .map_err(|e| RpcError::Transport(format!("failed to parse {} response: {}", method, e)))?;

    if let Some(error) = result.get("error") {
        return Err(RpcError::from_response(error));
    }

    let result_value = result.get("result").cloned().unwrap_or(Value::Null);

    serde_json::from_value(result_value).map_err(|e| RpcError::Rejected {
        code: 0,
        message: format!("failed to deserialize {} result: {}", method, e),
    })
}

/// Call `method`, retrying transport failures with the given policy.
pub async fn json_rpc_call_with_retry<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
    policy: &RetryPolicy,
) -> Result<T, RpcError> {
    (|| json_rpc_call(client, url, method, params.clone()))
        .retry(policy.backoff())
        .when(|e| matches!(e, RpcError::Transport(_)))
        .notify(|err, delay| {
            tracing::warn!(%method, error = ?err, ?delay, "Transient RPC failure, retrying...");
        })
        .await
}

/// Poll `check_fn` until it yields a value or `timeout` elapses.
///
/// `check_fn` returning `Ok(None)` means "not yet"; errors abort the wait.
pub async fn poll_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    interval: Duration,
    check_fn: F,
) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, Error>>,
{
    let start = std::time::Instant::now();

    loop {
        if let Some(value) = check_fn().await? {
            return Ok(value);
        }

        if start.elapsed() > timeout {
            return Err(Error::Network(format!(
                "timeout after {}s waiting for {}",
                timeout.as_secs(),
                name
            )));
        }

        tracing::trace!(%name, "Not ready yet, polling again...");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::sol_types::{Revert, SolError};

    #[test]
    fn test_revert_error_is_decoded() {
        let data = Revert {
            reason: "LibDiamondCut: Can't add function that already exists".to_string(),
        }
        .abi_encode();
        let error = serde_json::json!({
            "code": 3,
            "message": "execution reverted",
            "data": format!("0x{}", hex::encode(&data)),
        });

        match RpcError::from_response(&error) {
            RpcError::Reverted(reason) => {
                assert!(reason.contains("Can't add function that already exists"))
            }
            other => panic!("expected a revert, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let error = serde_json::json!({ "code": -32005, "message": "limit exceeded" });
        assert!(matches!(RpcError::from_response(&error), RpcError::Transport(_)));
    }

    #[test]
    fn test_nonce_error_is_rejected() {
        let error = serde_json::json!({ "code": -32000, "message": "nonce too low" });
        let err: Error = RpcError::from_response(&error).into();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("nonce too low"));
    }

    #[test]
    fn test_duplicate_send_is_recognised() {
        let known = RpcError::from_response(&serde_json::json!({ "code": -32000, "message": "already known" }));
        assert!(known.is_already_known());
        assert!(!known.is_nonce_used());

        let nethermind = RpcError::from_response(&serde_json::json!({ "code": -32010, "message": "AlreadyKnown" }));
        assert!(nethermind.is_already_known());

        let nonce = RpcError::from_response(&serde_json::json!({ "code": -32000, "message": "nonce too low: next nonce 4, tx nonce 3" }));
        assert!(nonce.is_nonce_used());
        assert!(!nonce.is_already_known());

        assert!(!RpcError::Transport("already known".to_string()).is_already_known());
    }

    #[test]
    fn test_unknown_revert_data_is_hex() {
        assert_eq!(revert_reason(&[0xde, 0xad, 0xbe, 0xef]), Some("0xdeadbeef".to_string()));
        assert_eq!(revert_reason(&[]), None);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result: Result<(), Error> = poll_until(
            "nothing",
            Duration::from_millis(20),
            Duration::from_millis(5),
            || async { Ok(None) },
        )
        .await;

        assert!(matches!(result, Err(Error::Network(_))));
    }
}
