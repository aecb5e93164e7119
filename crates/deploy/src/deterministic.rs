//! CREATE2 deployments through a deterministic deployment factory.
//!
//! The factory takes `salt ‖ initcode` as calldata and deploys with CREATE2,
//! so the resulting address only depends on the factory, the salt and the
//! initcode. The same triple yields the same address on every network.

use alloy_core::primitives::{Address, B256, Bytes, address};

use crate::{
    chain::{Account, Network, SignedTx, TxSigner},
    error::{Error, Result},
};

/// The canonical deterministic deployment proxy.
pub const DEFAULT_FACTORY: Address = address!("4e59b44847b379578588920cA78FbF26c0B4956C");

/// Outcome of an idempotent deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Matching code was already live at the address.
    Existing { address: Address },
    /// A transaction created the contract.
    Created { address: Address, tx_hash: B256 },
}

impl Deployment {
    pub fn address(&self) -> Address {
        match self {
            Self::Existing { address } | Self::Created { address, .. } => *address,
        }
    }
}

/// What lives at a deterministic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Live(Address),
    Missing(Address),
}

/// The runtime code a deployment is expected to produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct Expectation<'a> {
    pub runtime: Option<&'a [u8]>,
    /// The runtime embeds immutables (or the artifact cannot tell), so live
    /// code is only compared by length.
    pub has_immutables: bool,
}

impl<'a> Expectation<'a> {
    pub fn runtime(runtime: &'a [u8], has_immutables: bool) -> Self {
        Self {
            runtime: (!runtime.is_empty()).then_some(runtime),
            has_immutables,
        }
    }

    fn matches(&self, code: &[u8]) -> bool {
        match self.runtime {
            Some(expected) if self.has_immutables => expected.len() == code.len(),
            Some(expected) => expected == code,
            None => true,
        }
    }
}

/// CREATE2 address derivation and idempotent deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicDeployer {
    factory: Address,
}

impl Default for DeterministicDeployer {
    fn default() -> Self {
        Self::new(DEFAULT_FACTORY)
    }
}

impl DeterministicDeployer {
    pub fn new(factory: Address) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    /// `keccak256(0xff ‖ factory ‖ salt ‖ keccak256(initcode))[12..]`
    pub fn address_for(&self, salt: B256, initcode: &[u8]) -> Address {
        self.factory.create2_from_code(salt.0, initcode)
    }

    /// Calldata sent to the factory.
    pub fn calldata(salt: B256, initcode: &[u8]) -> Bytes {
        let mut data = Vec::with_capacity(32 + initcode.len());
        data.extend_from_slice(salt.as_slice());
        data.extend_from_slice(initcode);
        data.into()
    }

    /// Inspect the deterministic address.
    ///
    /// Live code that does not match `expected` is a salt collision. When
    /// nothing is deployed yet the factory itself must exist.
    pub async fn probe<N: Network>(
        &self,
        network: &N,
        salt: B256,
        initcode: &[u8],
        expected: Expectation<'_>,
    ) -> Result<Probe> {
        let address = self.address_for(salt, initcode);
        let code = network.code_at(address).await?;

        if !code.is_empty() {
            if !expected.matches(&code) {
                return Err(Error::SaltCollision { address });
            }
            return Ok(Probe::Live(address));
        }

        if network.code_at(self.factory).await?.is_empty() {
            return Err(Error::Config(format!(
                "deterministic deployment factory {} has no code on this network",
                self.factory
            )));
        }

        Ok(Probe::Missing(address))
    }

    /// Sign the factory call deploying `initcode`.
    pub async fn prepare<N: Network, S: TxSigner>(
        &self,
        account: &Account<'_, N, S>,
        salt: B256,
        initcode: &[u8],
    ) -> Result<SignedTx> {
        account
            .prepare(self.factory, Self::calldata(salt, initcode))
            .await
    }

    /// Check that a confirmed deployment left code at `address`.
    pub async fn verify<N: Network>(
        &self,
        network: &N,
        address: Address,
        expected: Expectation<'_>,
    ) -> Result<()> {
        let code = network.code_at(address).await?;
        if code.is_empty() {
            return Err(Error::Transaction {
                hash: None,
                reason: format!("factory call succeeded but no code was deployed at {}", address),
            });
        }
        if !expected.matches(&code) {
            return Err(Error::SaltCollision { address });
        }
        Ok(())
    }

    /// Deploy `initcode` with `salt`, doing nothing when it is already live.
    pub async fn deploy<N: Network, S: TxSigner>(
        &self,
        account: &Account<'_, N, S>,
        salt: B256,
        initcode: &[u8],
        expected: Expectation<'_>,
    ) -> Result<Deployment> {
        let address = match self.probe(account.network, salt, initcode, expected).await? {
            Probe::Live(address) => {
                tracing::debug!(%address, "Contract already deployed");
                return Ok(Deployment::Existing { address });
            }
            Probe::Missing(address) => address,
        };

        let tx = self.prepare(account, salt, initcode).await?;
        let receipt = account.submit_and_wait(&tx).await?;
        self.verify(account.network, address, expected).await?;

        tracing::info!(%address, tx_hash = %receipt.hash, "Contract deployed");

        Ok(Deployment::Created {
            address,
            tx_hash: receipt.hash,
        })
    }
}
