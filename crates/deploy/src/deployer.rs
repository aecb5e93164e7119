//! Pipeline orchestrator: runs every selected target.
//!
//! Targets are independent and run concurrently. Targets that send from the
//! same address on the same chain take turns on a per-signer lane so one
//! signer never has two unconfirmed transactions on a network.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    chain::{Network, TxSigner},
    config::Config,
    error::{EXIT_EXECUTION, EXIT_PLANNING, Error, Result},
    executor::{Contracts, ExecutorOptions, Target, TargetExecutor, TargetPlan, TargetReport},
    hooks::{HookEnv, HookPoint, Hooks},
    record::{RecordStore, TargetRecord},
};

/// A ready to run deployment of one or more targets.
pub struct Deployer<N, S> {
    /// Project root; hooks run here.
    pub root: PathBuf,
    pub contracts: Contracts,
    pub targets: Vec<Target<N, S>>,
    pub options: ExecutorOptions,
    pub store: RecordStore,
    pub hooks: Hooks,
}

/// The result of one target.
#[derive(Debug)]
pub struct TargetOutcome<T> {
    pub target: String,
    pub result: Result<T>,
}

/// Results of every target, in selection order.
#[derive(Debug)]
pub struct Summary<T> {
    pub outcomes: Vec<TargetOutcome<T>>,
}

impl<T> Summary<T> {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.target.as_str(), e)))
    }

    /// 0 when every target succeeded, otherwise the code of the most severe
    /// failure: execution failures outrank planning failures.
    pub fn exit_code(&self) -> i32 {
        self.failures()
            .map(|(_, err)| err.exit_code())
            .max_by_key(|code| match *code {
                EXIT_EXECUTION => 2,
                EXIT_PLANNING => 1,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

/// Status of one target as recorded.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: String,
    pub network: String,
    pub record: Option<TargetRecord>,
}

impl<N: Network, S: TxSigner> Deployer<N, S> {
    fn executor<'a>(&'a self, target: &'a Target<N, S>) -> TargetExecutor<'a, N, S> {
        TargetExecutor::new(target, &self.contracts, &self.options, &self.store)
    }

    /// Dry-run every target.
    pub async fn plan(&self) -> Summary<TargetPlan> {
        let outcomes = join_all(self.targets.iter().map(|target| async move {
            TargetOutcome {
                target: target.name.clone(),
                result: self.executor(target).plan().await,
            }
        }))
        .await;

        Summary { outcomes }
    }

    /// Deploy or upgrade every target.
    pub async fn deploy(&self) -> Summary<TargetReport> {
        // Lanes follow the resolved chain and sender, whatever the targets'
        // network and wallet entries are called.
        let keys: Vec<Result<(u64, Address)>> = join_all(self.targets.iter().map(|target| async move {
            let sender = target.signer.address();
            target.network.chain_id().await.map(|chain_id| (chain_id, sender))
        }))
        .await;

        let lanes: BTreeMap<(u64, Address), Mutex<()>> = keys
            .iter()
            .filter_map(|key| key.as_ref().ok())
            .map(|key| (*key, Mutex::new(())))
            .collect();

        tracing::info!(targets = self.targets.len(), lanes = lanes.len(), "Starting deployment");

        let outcomes = join_all(self.targets.iter().zip(keys).map(|(target, key)| {
            let lanes = &lanes;
            async move {
                let result = match key {
                    Ok(key) => {
                        let _turn = lanes[&key].lock().await;
                        self.deploy_target(target).await
                    }
                    Err(err) => Err(err),
                };
                TargetOutcome {
                    target: target.name.clone(),
                    result,
                }
            }
        }))
        .await;

        let summary = Summary { outcomes };
        for (target, err) in summary.failures() {
            tracing::error!(%target, error = %err, "Target failed");
        }
        summary
    }

    async fn deploy_target(&self, target: &Target<N, S>) -> Result<TargetReport> {
        let mut env = HookEnv {
            target: Some(target.name.clone()),
            network: Some(target.network_name.clone()),
            ..Default::default()
        };
        self.hooks.run(HookPoint::PreDeploy, &self.root, &env).await?;

        let report = self.executor(target).run().await?;

        env.chain_id = Some(report.chain_id);
        env.proxy = Some(report.proxy);
        self.hooks.run(HookPoint::PostDeploy, &self.root, &env).await?;

        Ok(report)
    }
}

/// Recorded state of the named targets. Reads the record only.
pub fn target_statuses(config: &Config, root: &Path, targets: &[String]) -> Result<Vec<TargetStatus>> {
    let store = RecordStore::new(root.join(&config.paths.generated.deployments));
    let mut file = store.load()?;

    Ok(targets
        .iter()
        .map(|name| TargetStatus {
            target: name.clone(),
            network: config
                .targets
                .get(name)
                .map(|t| t.network.clone())
                .unwrap_or_default(),
            record: file.targets.remove(name),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::B256;

    fn summary(results: Vec<Result<()>>) -> Summary<()> {
        Summary {
            outcomes: results
                .into_iter()
                .enumerate()
                .map(|(i, result)| TargetOutcome {
                    target: format!("t{}", i),
                    result,
                })
                .collect(),
        }
    }

    #[test]
    fn test_all_success_exits_zero() {
        let summary = summary(vec![Ok(()), Ok(())]);
        assert!(summary.is_success());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_execution_failure_outranks_planning_failure() {
        let summary = summary(vec![
            Err(Error::Config("unknown wallet".into())),
            Ok(()),
            Err(Error::Transaction {
                hash: Some(B256::ZERO),
                reason: "reverted".into(),
            }),
        ]);
        assert_eq!(summary.exit_code(), EXIT_EXECUTION);
        assert_eq!(summary.failures().count(), 2);
    }

    #[test]
    fn test_planning_failure_exit_code() {
        let summary = summary(vec![Ok(()), Err(Error::RemovalNotConfirmed { count: 1 })]);
        assert_eq!(summary.exit_code(), EXIT_PLANNING);
    }
}
