//! Read-only view of a target: where everything lives and what would change.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, Bytes};
use serde::Serialize;

use crate::{
    chain::{CallRequest, Network, TxSigner},
    composition::Composition,
    diamond::{self, DIAMOND_CUT},
    error::{Error, Result},
    planner::{Plan, Planner},
    record::{Stage, TargetRecord},
};

use super::{Contracts, ExecutorOptions, Target};

/// Deterministic addresses of every contract of a target.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Facet addresses by name, including the cut facet.
    pub facets: BTreeMap<String, Address>,
    pub cut_facet: Address,
    pub proxy_initcode: Bytes,
    pub proxy: Address,
    pub initializer: Option<Address>,
    pub desired: Composition,
}

impl Layout {
    pub fn compute<N, S: TxSigner>(target: &Target<N, S>, contracts: &Contracts) -> Result<Self> {
        let deployer = contracts.deployer;

        let facets: BTreeMap<String, Address> = contracts
            .registry
            .facets()
            .iter()
            .map(|facet| {
                (
                    facet.name.clone(),
                    deployer.address_for(target.salt, &facet.artifact.bytecode),
                )
            })
            .collect();

        let cut_facet = facets.get(&contracts.cut_facet).copied().ok_or_else(|| {
            Error::Config(format!(
                "cut facet {} is not part of the registry",
                contracts.cut_facet
            ))
        })?;

        let proxy_initcode = diamond::proxy_initcode(
            &contracts.proxy.bytecode,
            target.signer.address(),
            cut_facet,
        );
        let proxy = deployer.address_for(target.salt, &proxy_initcode);

        let initializer = contracts
            .initializer
            .as_ref()
            .map(|init| deployer.address_for(target.salt, &init.artifact.bytecode));

        let desired = contracts.registry.composition(&facets)?;

        Ok(Self {
            facets,
            cut_facet,
            proxy_initcode,
            proxy,
            initializer,
            desired,
        })
    }

    /// What the proxy constructor installs: `diamondCut` routed to the cut facet.
    pub fn constructed(&self, cut_facet_name: &str) -> Composition {
        Composition::from_routes(
            BTreeMap::from([(DIAMOND_CUT, self.cut_facet)]),
            BTreeMap::from([(self.cut_facet, cut_facet_name.to_string())]),
        )
    }
}

/// Current on-chain state of a target.
#[derive(Debug, Clone)]
pub struct Survey {
    pub proxy: Address,
    pub proxy_live: bool,
    pub deployed: Composition,
}

impl Survey {
    /// Inspect the proxy and its selector table.
    ///
    /// The loupe is preferred; before a loupe facet is installed the record is
    /// used, and a proxy that does not exist yet has the constructor routes.
    pub async fn take<N: Network>(
        network: &N,
        layout: &Layout,
        contracts: &Contracts,
        record: Option<&TargetRecord>,
    ) -> Result<Self> {
        let proxy = record.map(|r| r.proxy).unwrap_or(layout.proxy);
        let proxy_live = !network.code_at(proxy).await?.is_empty();

        if record.is_some() && !proxy_live {
            return Err(Error::Record(format!(
                "recorded proxy {} has no code on this network; remove the target from the record to deploy a new one",
                proxy
            )));
        }

        let mut deployed = if !proxy_live {
            layout.constructed(&contracts.cut_facet)
        } else {
            match observe(network, proxy).await? {
                Some(observed) => observed,
                None => match record {
                    Some(record) if !record.composition.is_empty() => record.composition(),
                    _ => layout.constructed(&contracts.cut_facet),
                },
            }
        };

        if let Some(record) = record {
            deployed.adopt_names(&record.facet_names());
        }
        deployed.adopt_names(layout.desired.names());

        Ok(Self {
            proxy,
            proxy_live,
            deployed,
        })
    }
}

/// Read the selector table through the loupe. `None` when the proxy has no
/// loupe yet.
pub async fn observe<N: Network>(network: &N, proxy: Address) -> Result<Option<Composition>> {
    let request = CallRequest {
        from: None,
        to: proxy,
        input: diamond::facets_call(),
    };

    let data = match network.call(&request, None).await {
        Ok(data) => data,
        Err(Error::Transaction { reason, .. }) => {
            tracing::debug!(%proxy, %reason, "Loupe unavailable, using recorded composition");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if data.is_empty() {
        return Ok(None);
    }

    let mut routes = BTreeMap::new();
    for (address, selectors) in diamond::decode_facets(&data)? {
        for selector in selectors {
            routes.insert(selector, address);
        }
    }

    Ok(Some(Composition::from_routes(routes, BTreeMap::new())))
}

/// Deployment state of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractStatus {
    pub name: String,
    pub address: Address,
    pub live: bool,
}

/// Dry-run result for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetPlan {
    pub target: String,
    pub network: String,
    pub chain_id: u64,
    pub proxy: ContractStatus,
    /// Contracts the deployment needs, with whether they already exist.
    pub contracts: Vec<ContractStatus>,
    pub plan: Plan,
    /// Whether the initializer would be called.
    pub initialize: bool,
    pub stage: Option<Stage>,
}

impl TargetPlan {
    /// Whether running the deployment would send no transaction.
    pub fn is_converged(&self) -> bool {
        self.proxy.live
            && self.plan.is_empty()
            && !self.initialize
            && self.contracts.iter().all(|c| c.live)
    }
}

/// Compute what a deployment of `target` would do, without sending anything.
pub async fn dry_run<N: Network, S: TxSigner>(
    target: &Target<N, S>,
    contracts: &Contracts,
    options: &ExecutorOptions,
    record: Option<&TargetRecord>,
) -> Result<TargetPlan> {
    let chain_id = target.network.chain_id().await?;
    let layout = Layout::compute(target, contracts)?;
    let survey = Survey::take(&target.network, &layout, contracts, record).await?;

    let plan = Planner::new(options.core_facets.iter().cloned())
        .confirm_core_changes(options.confirm_core_changes)
        .plan(&layout.desired, &survey.deployed);

    let mut contracts_needed = Vec::new();
    if !survey.proxy_live {
        contracts_needed.push((contracts.cut_facet.clone(), layout.cut_facet));
    }
    for address in plan.required_facets() {
        let name = layout
            .desired
            .name_of(address)
            .unwrap_or(crate::planner::UNKNOWN_FACET)
            .to_string();
        if !contracts_needed.iter().any(|(_, a)| *a == address) {
            contracts_needed.push((name, address));
        }
    }

    let initialize = !record.is_some_and(|r| r.initialized);
    if initialize
        && let (Some(init), Some(address)) = (&contracts.initializer, layout.initializer)
    {
        contracts_needed.push((init.artifact.contract.clone(), address));
    }

    let mut statuses = Vec::with_capacity(contracts_needed.len());
    for (name, address) in contracts_needed {
        let live = !target.network.code_at(address).await?.is_empty();
        statuses.push(ContractStatus { name, address, live });
    }

    Ok(TargetPlan {
        target: target.name.clone(),
        network: target.network_name.clone(),
        chain_id,
        proxy: ContractStatus {
            name: contracts.proxy.contract.clone(),
            address: survey.proxy,
            live: survey.proxy_live,
        },
        contracts: statuses,
        plan,
        initialize: initialize && contracts.initializer.is_some(),
        stage: record.map(|r| r.stage),
    })
}
