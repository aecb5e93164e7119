//! Signing and network capabilities.
//!
//! The pipeline never touches key material or transport details directly. It
//! talks to a [`TxSigner`] that turns an [`UnsignedTx`] into a [`SignedTx`],
//! and to a [`Network`] that reads chain state and broadcasts signed
//! transactions. [`Account`] pairs the two for one target.

mod http;
mod wallet;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

pub use http::HttpNetwork;
pub use wallet::LocalWallet;

use crate::{
    error::{Error, Result},
    rpc,
};

/// Multiplier (in percent) applied to gas estimates.
const GAS_ESTIMATE_BUFFER_PERCENT: u64 = 120;

/// An EIP-1559 call transaction before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub input: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// A signed transaction ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub hash: B256,
    pub from: Address,
    /// EIP-2718 encoded envelope.
    pub raw: Bytes,
    pub tx: UnsignedTx,
}

/// A read-only call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub input: Bytes,
}

/// Fee parameters for the next transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// The mined outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub hash: B256,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Signing capability resolved from a wallet.
pub trait TxSigner: Send + Sync {
    /// The address transactions are sent from.
    fn address(&self) -> Address;

    /// Sign a transaction.
    fn sign(&self, tx: UnsignedTx) -> Result<SignedTx>;
}

/// Chain access resolved from a network.
pub trait Network: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Runtime code at `address` (empty when none).
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    /// Execute a call against the latest state (or `block` when given).
    fn call(
        &self,
        request: &CallRequest,
        block: Option<u64>,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Next nonce for `address`, counting pending transactions.
    fn nonce(&self, address: Address) -> impl Future<Output = Result<u64>> + Send;

    fn fees(&self) -> impl Future<Output = Result<Fees>> + Send;

    fn estimate_gas(&self, request: &CallRequest) -> impl Future<Output = Result<u64>> + Send;

    /// Broadcast a signed transaction, returning its hash.
    fn submit(&self, tx: &SignedTx) -> impl Future<Output = Result<B256>> + Send;

    /// Receipt of a mined transaction, `None` while pending or unknown.
    fn receipt(&self, hash: B256) -> impl Future<Output = Result<Option<Receipt>>> + Send;

    /// Whether the node knows the transaction (mined or in its mempool).
    fn transaction_known(&self, hash: B256) -> impl Future<Output = Result<bool>> + Send;
}

/// How long to wait for a receipt and how often to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Confirmation {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A signer bound to a network: the sending identity of one target.
pub struct Account<'a, N, S> {
    pub network: &'a N,
    pub signer: &'a S,
    pub chain_id: u64,
    pub confirmation: Confirmation,
}

impl<'a, N: Network, S: TxSigner> Account<'a, N, S> {
    pub fn new(network: &'a N, signer: &'a S, chain_id: u64, confirmation: Confirmation) -> Self {
        Self {
            network,
            signer,
            chain_id,
            confirmation,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Build and sign a call to `to`. A revert during gas estimation surfaces
    /// here, before anything is broadcast.
    pub async fn prepare(&self, to: Address, input: Bytes) -> Result<SignedTx> {
        let from = self.signer.address();
        let request = CallRequest {
            from: Some(from),
            to,
            input: input.clone(),
        };

        let gas = self.network.estimate_gas(&request).await?;
        let fees = self.network.fees().await?;
        let nonce = self.network.nonce(from).await?;

        let tx = UnsignedTx {
            chain_id: self.chain_id,
            nonce,
            to,
            input,
            gas_limit: gas * GAS_ESTIMATE_BUFFER_PERCENT / 100,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        };

        self.signer.sign(tx)
    }

    /// Broadcast `tx` and wait until it is mined.
    ///
    /// A mined but failed transaction is replayed as a call at its block to
    /// recover the revert reason, and reported as [`Error::Transaction`].
    pub async fn submit_and_wait(&self, tx: &SignedTx) -> Result<Receipt> {
        let hash = self.network.submit(tx).await?;
        tracing::debug!(tx_hash = %hash, nonce = tx.tx.nonce, to = %tx.tx.to, "Transaction submitted");
        self.wait_for(hash, tx).await
    }

    /// Wait for an already broadcast transaction.
    pub async fn wait_for(&self, hash: B256, tx: &SignedTx) -> Result<Receipt> {
        let receipt = self.await_receipt(hash).await?;

        if receipt.success {
            return Ok(receipt);
        }

        let request = CallRequest {
            from: Some(tx.from),
            to: tx.tx.to,
            input: tx.tx.input.clone(),
        };
        let reason = match self.network.call(&request, Some(receipt.block_number)).await {
            Err(Error::Transaction { reason, .. }) => reason,
            _ => "execution reverted".to_string(),
        };

        Err(Error::Transaction {
            hash: Some(hash),
            reason,
        })
    }

    /// Poll for the receipt of `hash` within the confirmation timeout.
    pub async fn await_receipt(&self, hash: B256) -> Result<Receipt> {
        rpc::poll_until(
            &format!("receipt of {}", hash),
            self.confirmation.timeout,
            self.confirmation.poll_interval,
            || self.network.receipt(hash),
        )
        .await
    }
}
