//! Local key material.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_core::primitives::{Address, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};

use super::{SignedTx, TxSigner, UnsignedTx};
use crate::error::{Error, Result};

/// A signer holding its key in memory.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
}

impl LocalWallet {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_private_key(key: &str) -> Result<Self> {
        let signer = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::Config(format!("invalid private key: {}", e)))?;
        Ok(Self { signer })
    }

    /// Derive the key at `index` of the standard derivation path.
    pub fn from_mnemonic(phrase: &str, index: u32) -> Result<Self> {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(index)
            .map_err(|e| Error::Config(format!("invalid mnemonic index {}: {}", index, e)))?
            .build()
            .map_err(|e| Error::Config(format!("invalid mnemonic: {}", e)))?;
        Ok(Self { signer })
    }
}

impl TxSigner for LocalWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    fn sign(&self, tx: UnsignedTx) -> Result<SignedTx> {
        let eip1559 = TxEip1559 {
            chain_id: tx.chain_id,
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            to: TxKind::Call(tx.to),
            value: U256::ZERO,
            access_list: Default::default(),
            input: tx.input.clone(),
        };

        let signature = self
            .signer
            .sign_hash_sync(&eip1559.signature_hash())
            .map_err(|e| Error::Config(format!("failed to sign transaction: {}", e)))?;

        let envelope = TxEnvelope::from(eip1559.into_signed(signature));

        Ok(SignedTx {
            hash: *envelope.tx_hash(),
            from: self.signer.address(),
            raw: Bytes::from(envelope.encoded_2718()),
            tx,
        })
    }
}
