//! Per-target deployment state machine.
//!
//! A target moves through `Init → FacetsDeployed → CutSubmitted →
//! Initialized → Done`, with `Failed` reachable from anywhere. Every confirmed
//! step is flushed to the record before the next one starts, and every
//! transaction sent after the proxy exists is written ahead as `pending`, so a
//! crashed run can be resumed by simply running again.

mod survey;

use std::collections::BTreeSet;

use alloy_core::primitives::{Address, B256, Bytes};
use chrono::Utc;
use serde::Serialize;

pub use survey::{ContractStatus, Layout, Survey, TargetPlan, dry_run, observe};

use crate::{
    chain::{Account, Confirmation, Network, Receipt, SignedTx, TxSigner},
    composition::Composition,
    deterministic::{Deployment, DeterministicDeployer, Expectation, Probe},
    diamond::{self, CutCall},
    error::{Error, Result},
    planner::{CutOperation, Plan, Planner},
    record::{PendingAction, PendingTx, RecordStore, Stage, TargetRecord},
    registry::{Artifact, Registry},
    selector::Selector,
};

/// One deployment destination with its network and signer resolved.
#[derive(Debug, Clone)]
pub struct Target<N, S> {
    pub name: String,
    pub network_name: String,
    pub wallet_name: String,
    pub network: N,
    pub signer: S,
    pub init_args: Vec<String>,
    pub salt: B256,
}

/// The initializer contract and the function called on first deployment.
#[derive(Debug, Clone)]
pub struct Initializer {
    pub artifact: Artifact,
    pub function: String,
}

/// Everything compiled that a deployment needs.
#[derive(Debug, Clone)]
pub struct Contracts {
    pub registry: Registry,
    pub proxy: Artifact,
    /// Registry name of the facet routed to `diamondCut` by the constructor.
    pub cut_facet: String,
    pub initializer: Option<Initializer>,
    pub deployer: DeterministicDeployer,
}

/// Switches shared by every target of a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub core_facets: BTreeSet<String>,
    pub allow_removals: bool,
    pub confirm_core_changes: bool,
    pub confirmation: Confirmation,
}

/// Outcome of a successful run for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub chain_id: u64,
    pub proxy: Address,
    /// Transactions mined during this run.
    pub transactions: usize,
    /// Contracts deployed during this run.
    pub deployed: Vec<(String, Address)>,
    /// The cut applied during this run.
    pub operations: Vec<CutOperation>,
    /// Whether the initializer ran during this run.
    pub initialized: bool,
}

impl TargetReport {
    fn new(target: &str, chain_id: u64) -> Self {
        Self {
            target: target.to_string(),
            chain_id,
            proxy: Address::ZERO,
            transactions: 0,
            deployed: Vec::new(),
            operations: Vec::new(),
            initialized: false,
        }
    }
}

/// Drives one target to convergence.
pub struct TargetExecutor<'a, N, S> {
    target: &'a Target<N, S>,
    contracts: &'a Contracts,
    options: &'a ExecutorOptions,
    store: &'a RecordStore,
}

impl<'a, N: Network, S: TxSigner> TargetExecutor<'a, N, S> {
    pub fn new(
        target: &'a Target<N, S>,
        contracts: &'a Contracts,
        options: &'a ExecutorOptions,
        store: &'a RecordStore,
    ) -> Self {
        Self {
            target,
            contracts,
            options,
            store,
        }
    }

    /// What a run would do, without sending anything.
    pub async fn plan(&self) -> Result<TargetPlan> {
        let record = self.store.get(&self.target.name)?;
        dry_run(self.target, self.contracts, self.options, record.as_ref()).await
    }

    /// Converge the target. Execution failures are recorded on the target
    /// before being returned.
    pub async fn run(&self) -> Result<TargetReport> {
        let chain_id = self.target.network.chain_id().await?;
        let account = Account::new(
            &self.target.network,
            &self.target.signer,
            chain_id,
            self.options.confirmation,
        );

        let mut record = self.store.get(&self.target.name)?;
        if let Some(existing) = &record
            && existing.chain_id != chain_id
        {
            return Err(Error::Config(format!(
                "target {} was recorded on chain {} but network {} reports chain {}",
                self.target.name, existing.chain_id, self.target.network_name, chain_id
            )));
        }

        let mut report = TargetReport::new(&self.target.name, chain_id);
        let result = self.execute(&account, &mut record, &mut report).await;

        if let Err(err) = &result
            && !err.is_planning()
            && let Some(record) = record.as_mut()
        {
            record.fail(err.to_string());
            if let Err(save_err) = self.store.put(&self.target.name, record) {
                tracing::error!(target = %self.target.name, error = %save_err, "Failed to record failure");
            }
        }

        result.map(|()| report)
    }

    async fn execute(
        &self,
        account: &Account<'_, N, S>,
        record: &mut Option<TargetRecord>,
        report: &mut TargetReport,
    ) -> Result<()> {
        if let Some(existing) = record.as_mut() {
            self.resolve_pending(account, existing).await?;
        }

        // Pre-flight: nothing is sent unless all of this succeeds.
        let layout = Layout::compute(self.target, self.contracts)?;
        let survey =
            Survey::take(&self.target.network, &layout, self.contracts, record.as_ref()).await?;
        let plan = Planner::new(self.options.core_facets.iter().cloned())
            .confirm_core_changes(self.options.confirm_core_changes)
            .plan(&layout.desired, &survey.deployed);
        plan.check(self.options.allow_removals)?;

        let needs_init = !record.as_ref().is_some_and(|r| r.initialized);
        let init_call = match (&self.contracts.initializer, layout.initializer) {
            (Some(init), Some(address)) if needs_init => Some(InitCall {
                initializer: init,
                address,
                calldata: diamond::encode_init_call(
                    &init.artifact.abi,
                    &init.function,
                    &self.target.init_args,
                )?,
            }),
            _ => None,
        };

        tracing::info!(
            target = %self.target.name,
            proxy = %survey.proxy,
            operations = plan.operations.len(),
            initialize = init_call.is_some(),
            "Executing deployment"
        );

        if record.is_none() {
            *record = Some(self.deploy_proxy(account, &layout, &survey, report).await?);
        }
        let Some(record) = record.as_mut() else {
            return Err(Error::Record(format!(
                "no record for target {} after proxy deployment",
                self.target.name
            )));
        };
        report.proxy = record.proxy;

        let has_work = !plan.is_empty() || needs_init || record.stage != Stage::Done;
        if has_work && matches!(record.stage, Stage::Done | Stage::Failed) {
            record.set_stage(Stage::Init);
        }

        self.deploy_facets(account, record, &layout, &plan, init_call.as_ref(), report)
            .await?;
        self.advance(record, Stage::FacetsDeployed)?;

        self.cut(account, record, &survey.deployed, &plan, report).await?;
        self.advance(record, Stage::CutSubmitted)?;

        self.initialize(account, record, init_call, report).await?;
        self.advance(record, Stage::Initialized)?;

        self.advance(record, Stage::Done)?;

        tracing::info!(
            target = %self.target.name,
            proxy = %record.proxy,
            transactions = report.transactions,
            "Target converged"
        );
        Ok(())
    }

    /// Deploy the cut facet and the proxy, then create the record.
    ///
    /// Both are deterministic, so a crash before the record is written only
    /// leaves contracts a re-run finds already live.
    async fn deploy_proxy(
        &self,
        account: &Account<'_, N, S>,
        layout: &Layout,
        survey: &Survey,
        report: &mut TargetReport,
    ) -> Result<TargetRecord> {
        let cut_facet = self
            .contracts
            .registry
            .facet(&self.contracts.cut_facet)
            .ok_or_else(|| {
                Error::Config(format!(
                    "cut facet {} is not part of the registry",
                    self.contracts.cut_facet
                ))
            })?;

        if !survey.proxy_live {
            let deployer = &self.contracts.deployer;
            let salt = self.target.salt;

            let deployment = deployer
                .deploy(account, salt, &cut_facet.artifact.bytecode, cut_facet.artifact.expectation())
                .await?;
            if let Deployment::Created { address, .. } = deployment {
                report.transactions += 1;
                report.deployed.push((cut_facet.name.clone(), address));
            }

            let deployment = deployer
                .deploy(account, salt, &layout.proxy_initcode, self.contracts.proxy.expectation())
                .await?;
            if let Deployment::Created { address, .. } = deployment {
                report.transactions += 1;
                report.deployed.push((self.contracts.proxy.contract.clone(), address));
            }
        }

        let mut record = TargetRecord::new(account.chain_id, layout.proxy);
        record.record_facet(cut_facet.name.clone(), layout.cut_facet, cut_facet.selectors());
        record.composition = survey.deployed.routes().clone();
        self.save(&record)?;

        tracing::info!(target = %self.target.name, proxy = %layout.proxy, "Proxy recorded");
        Ok(record)
    }

    /// Deploy every facet the cut points at, plus the initializer contract.
    async fn deploy_facets(
        &self,
        account: &Account<'_, N, S>,
        record: &mut TargetRecord,
        layout: &Layout,
        plan: &Plan,
        init_call: Option<&InitCall<'_>>,
        report: &mut TargetReport,
    ) -> Result<()> {
        for address in plan.required_facets() {
            let facet = self
                .contracts
                .registry
                .facets()
                .iter()
                .find(|f| layout.facets.get(&f.name) == Some(&address))
                .ok_or_else(|| {
                    Error::Config(format!("no facet in the registry deploys to {}", address))
                })?;

            self.deploy_contract(
                account,
                record,
                &facet.name,
                &facet.artifact.bytecode,
                facet.artifact.expectation(),
                facet.selectors(),
                report,
            )
            .await?;
        }

        if let Some(call) = init_call {
            let artifact = &call.initializer.artifact;
            self.deploy_contract(
                account,
                record,
                &artifact.contract,
                &artifact.bytecode,
                artifact.expectation(),
                Vec::new(),
                report,
            )
            .await?;
        }

        Ok(())
    }

    /// Deploy one contract deterministically, writing the transaction ahead.
    #[allow(clippy::too_many_arguments)]
    async fn deploy_contract(
        &self,
        account: &Account<'_, N, S>,
        record: &mut TargetRecord,
        contract: &str,
        initcode: &[u8],
        expected: Expectation<'_>,
        selectors: Vec<Selector>,
        report: &mut TargetReport,
    ) -> Result<Address> {
        let deployer = &self.contracts.deployer;
        let salt = self.target.salt;

        let address = match deployer.probe(account.network, salt, initcode, expected).await? {
            Probe::Live(address) => {
                if record.facets.get(contract).map(|f| f.address) != Some(address) {
                    record.record_facet(contract, address, selectors);
                    self.save(record)?;
                }
                tracing::debug!(%contract, %address, "Already deployed");
                return Ok(address);
            }
            Probe::Missing(address) => address,
        };

        let tx = deployer.prepare(account, salt, initcode).await?;
        let receipt = self
            .submit_tracked(
                account,
                record,
                &tx,
                PendingAction::Deploy {
                    contract: contract.to_string(),
                    address,
                },
            )
            .await?;
        deployer.verify(account.network, address, expected).await?;

        record.record_facet(contract, address, selectors);
        self.save(record)?;

        report.transactions += 1;
        report.deployed.push((contract.to_string(), address));
        tracing::info!(
            target = %self.target.name,
            %contract,
            %address,
            tx_hash = %receipt.hash,
            "Contract deployed"
        );
        Ok(address)
    }

    /// Submit the whole plan as one `diamondCut`.
    async fn cut(
        &self,
        account: &Account<'_, N, S>,
        record: &mut TargetRecord,
        deployed: &Composition,
        plan: &Plan,
        report: &mut TargetReport,
    ) -> Result<()> {
        if plan.is_empty() {
            if record.composition != *deployed.routes() {
                record.composition = deployed.routes().clone();
                self.save(record)?;
            }
            return Ok(());
        }

        let next = plan.apply(deployed);
        let calldata = CutCall::from_operations(&plan.operations).encode();
        let tx = account.prepare(record.proxy, calldata).await?;

        let receipt = self
            .submit_tracked(
                account,
                record,
                &tx,
                PendingAction::Cut {
                    operations: plan.operations.clone(),
                    composition: next.routes().clone(),
                },
            )
            .await?;

        record.record_cut(receipt.hash, plan.operations.clone(), next.routes().clone());
        record.set_stage(Stage::CutSubmitted);
        self.save(record)?;

        report.transactions += 1;
        report.operations = plan.operations.clone();
        tracing::info!(
            target = %self.target.name,
            tx_hash = %receipt.hash,
            operations = plan.operations.len(),
            selectors = next.len(),
            "Diamond cut applied"
        );
        Ok(())
    }

    /// Call the initializer once per proxy.
    async fn initialize(
        &self,
        account: &Account<'_, N, S>,
        record: &mut TargetRecord,
        init_call: Option<InitCall<'_>>,
        report: &mut TargetReport,
    ) -> Result<()> {
        if record.initialized {
            return Ok(());
        }

        if let Some(call) = init_call {
            let calldata = CutCall::initializer(call.address, call.calldata).encode();
            let tx = account.prepare(record.proxy, calldata).await?;
            let receipt = self
                .submit_tracked(account, record, &tx, PendingAction::Initialize)
                .await?;

            report.transactions += 1;
            report.initialized = true;
            tracing::info!(
                target = %self.target.name,
                initializer = %call.initializer.artifact.contract,
                tx_hash = %receipt.hash,
                "Diamond initialized"
            );
        }

        record.initialized = true;
        record.set_stage(Stage::Initialized);
        self.save(record)
    }

    /// Record `tx` as pending, broadcast it and wait for it.
    ///
    /// The pending entry is dropped once the outcome is known; it survives
    /// only when the transaction may still be in flight.
    async fn submit_tracked(
        &self,
        account: &Account<'_, N, S>,
        record: &mut TargetRecord,
        tx: &SignedTx,
        action: PendingAction,
    ) -> Result<Receipt> {
        record.pending = Some(PendingTx {
            hash: tx.hash,
            action,
            submitted_at: Utc::now(),
        });
        self.save(record)?;

        let result = account.submit_and_wait(tx).await;
        if !matches!(result, Err(Error::Network(_))) {
            record.pending = None;
        }
        result
    }

    /// Settle a transaction left pending by an earlier run.
    async fn resolve_pending(
        &self,
        account: &Account<'_, N, S>,
        record: &mut TargetRecord,
    ) -> Result<()> {
        let Some(pending) = record.pending.clone() else {
            return Ok(());
        };
        let network = account.network;

        let receipt = match network.receipt(pending.hash).await? {
            Some(receipt) => Some(receipt),
            None if network.transaction_known(pending.hash).await? => {
                tracing::info!(tx_hash = %pending.hash, "Waiting for transaction from a previous run");
                Some(account.await_receipt(pending.hash).await?)
            }
            None => None,
        };

        record.pending = None;
        match receipt {
            Some(receipt) if receipt.success => {
                tracing::info!(tx_hash = %pending.hash, "Adopting transaction from a previous run");
                self.adopt(record, pending.hash, pending.action);
            }
            Some(_) => {
                return Err(Error::Transaction {
                    hash: Some(pending.hash),
                    reason: "transaction from a previous run reverted".to_string(),
                });
            }
            None => {
                tracing::warn!(tx_hash = %pending.hash, "Transaction from a previous run was dropped");
            }
        }

        self.save(record)
    }

    fn adopt(&self, record: &mut TargetRecord, hash: B256, action: PendingAction) {
        match action {
            PendingAction::Deploy { contract, address } => {
                let selectors = self
                    .contracts
                    .registry
                    .facet(&contract)
                    .map(|f| f.selectors())
                    .unwrap_or_default();
                record.record_facet(contract, address, selectors);
            }
            PendingAction::Cut {
                operations,
                composition,
            } => {
                record.record_cut(hash, operations, composition);
                record.set_stage(Stage::CutSubmitted);
            }
            PendingAction::Initialize => {
                record.initialized = true;
                record.set_stage(Stage::Initialized);
            }
        }
    }

    /// Move the stage forward, never back.
    fn advance(&self, record: &mut TargetRecord, stage: Stage) -> Result<()> {
        if progress(record.stage) >= progress(stage) {
            return Ok(());
        }
        record.set_stage(stage);
        self.save(record)
    }

    fn save(&self, record: &TargetRecord) -> Result<()> {
        self.store.put(&self.target.name, record)
    }
}

/// Encoded initializer call for a first deployment.
struct InitCall<'a> {
    initializer: &'a Initializer,
    address: Address,
    calldata: Bytes,
}

fn progress(stage: Stage) -> u8 {
    match stage {
        Stage::Init | Stage::Failed => 0,
        Stage::FacetsDeployed => 1,
        Stage::CutSubmitted => 2,
        Stage::Initialized => 3,
        Stage::Done => 4,
    }
}
