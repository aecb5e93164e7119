//! [`Network`] over a JSON-RPC HTTP endpoint.

use alloy_core::primitives::{Address, B256, Bytes, U64, U128, U256};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{CallRequest, Fees, Network, Receipt, SignedTx};
use crate::{
    error::{Error, Result},
    rpc::{self, RetryPolicy},
};

/// Priority fee used when the node does not answer `eth_maxPriorityFeePerGas`.
const FALLBACK_PRIORITY_FEE: u128 = 1_000_000_000;

/// A JSON-RPC endpoint with retries on transient failures.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    url: Url,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    status: Option<U64>,
    block_number: Option<U64>,
    gas_used: U64,
}

impl HttpNetwork {
    pub fn new(url: Url, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            url,
            retry,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        rpc::json_rpc_call_with_retry(&self.client, self.url.as_str(), method, params, &self.retry)
            .await
            .map_err(Error::from)
    }

    fn call_object(request: &CallRequest) -> Value {
        let mut object = json!({
            "to": request.to,
            "data": request.input,
        });
        if let Some(from) = request.from {
            object["from"] = json!(from);
        }
        object
    }
}

impl Network for HttpNetwork {
    async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.request("eth_chainId", vec![]).await?;
        Ok(id.to::<u64>())
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.request("eth_getCode", vec![json!(address), json!("latest")])
            .await
    }

    async fn call(&self, request: &CallRequest, block: Option<u64>) -> Result<Bytes> {
        let block = match block {
            Some(number) => json!(format!("0x{:x}", number)),
            None => json!("latest"),
        };
        self.request("eth_call", vec![Self::call_object(request), block])
            .await
    }

    async fn nonce(&self, address: Address) -> Result<u64> {
        let nonce: U64 = self
            .request(
                "eth_getTransactionCount",
                vec![json!(address), json!("pending")],
            )
            .await?;
        Ok(nonce.to::<u64>())
    }

    async fn fees(&self) -> Result<Fees> {
        let gas_price: U128 = self.request("eth_gasPrice", vec![]).await?;
        let priority = match self
            .request::<U128>("eth_maxPriorityFeePerGas", vec![])
            .await
        {
            Ok(fee) => fee.to::<u128>(),
            Err(err) => {
                tracing::debug!(error = %err, "eth_maxPriorityFeePerGas unavailable, using fallback");
                FALLBACK_PRIORITY_FEE
            }
        };

        Ok(Fees {
            max_fee_per_gas: gas_price.to::<u128>() * 2 + priority,
            max_priority_fee_per_gas: priority,
        })
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let gas: U256 = self
            .request("eth_estimateGas", vec![Self::call_object(request)])
            .await?;
        Ok(gas.saturating_to::<u64>())
    }

    async fn submit(&self, tx: &SignedTx) -> Result<B256> {
        let sent = rpc::json_rpc_call_with_retry::<B256>(
            &self.client,
            self.url.as_str(),
            "eth_sendRawTransaction",
            vec![json!(tx.raw)],
            &self.retry,
        )
        .await;

        // A retried send may be refused because its first attempt got through.
        let hash = match sent {
            Ok(hash) => hash,
            Err(err) if err.is_already_known() => {
                tracing::debug!(tx_hash = %tx.hash, error = ?err, "Node already holds the transaction");
                tx.hash
            }
            Err(err) if err.is_nonce_used() => {
                if !self.transaction_known(tx.hash).await? {
                    return Err(err.into());
                }
                tracing::debug!(tx_hash = %tx.hash, error = ?err, "Nonce used by the transaction itself");
                tx.hash
            }
            Err(err) => return Err(err.into()),
        };

        if hash != tx.hash {
            tracing::warn!(expected = %tx.hash, returned = %hash, "Node returned an unexpected transaction hash");
        }
        Ok(hash)
    }

    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", vec![json!(hash)])
            .await?;

        Ok(receipt.and_then(|r| {
            // Some nodes return a receipt skeleton before the block is sealed.
            let block_number = r.block_number?;
            Some(Receipt {
                hash: r.transaction_hash,
                success: r.status.is_some_and(|s| s == U64::from(1)),
                block_number: block_number.to::<u64>(),
                gas_used: r.gas_used.to::<u64>(),
            })
        }))
    }

    async fn transaction_known(&self, hash: B256) -> Result<bool> {
        let tx: Option<Value> = self
            .request("eth_getTransactionByHash", vec![json!(hash)])
            .await?;
        Ok(tx.is_some())
    }
}
