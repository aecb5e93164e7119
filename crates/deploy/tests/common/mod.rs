//! Shared fixtures: an in-memory chain and a small diamond project.
//!
//! The chain understands exactly what the pipeline sends: factory deployments
//! (`salt ‖ initcode`), `diamondCut` on a proxy and the loupe's `facets()`.
//! Faults can be injected per transaction kind to simulate crashes between
//! broadcast and confirmation.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    future::{Future, ready},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes},
    sol_types::SolValue,
};
use facetsmith_deploy::{
    RecordStore, Selector, Target,
    chain::{CallRequest, Confirmation, Fees, LocalWallet, Network, Receipt, SignedTx, TxSigner},
    deterministic::{DEFAULT_FACTORY, DeterministicDeployer},
    diamond::{self, CutCall, DIAMOND_CUT, FACETS},
    error::{Error, Result},
    executor::{Contracts, ExecutorOptions, Initializer},
    planner::CutAction,
    registry::{Artifact, ArtifactFormat, FacetSpec, FunctionSpec, Registry},
};
use tempdir::TempDir;

/// First anvil development key.
pub const DEPLOYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Second anvil development key.
pub const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub const SALT: B256 = B256::repeat_byte(0x5a);

pub const CUT_FACET: &str = "DiamondCutFacet";
pub const LOUPE_FACET: &str = "DiamondLoupeFacet";
pub const OWNERSHIP_FACET: &str = "OwnershipFacet";
pub const PROXY: &str = "DiamondProxy";
pub const INITIALIZER: &str = "InitDiamond";

/// Kind of a transaction, as seen by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// A factory deployment to the given address.
    Deploy(Address),
    /// A `diamondCut` changing routes.
    Cut,
    /// A `diamondCut` that only delegates to an initializer.
    Initialize,
    Other,
}

/// What goes wrong with the next transaction of a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Mined, but the submission reports a broken connection.
    LostAfterMining,
    /// Never reaches the chain.
    Dropped,
    /// Sits in the mempool until [`MockChain::mine_stuck`].
    Stuck,
    /// Mined as reverted with this reason.
    Revert(String),
}

#[derive(Debug, Clone, Default)]
struct Diamond {
    owner: Address,
    routes: BTreeMap<Selector, Address>,
    init_calls: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct ChainState {
    chain_id: u64,
    code: HashMap<Address, Bytes>,
    /// Creation bytecode to runtime bytecode of every known contract.
    runtimes: Vec<(Bytes, Bytes)>,
    proxy_bytecode: Bytes,
    diamonds: HashMap<Address, Diamond>,
    nonces: HashMap<Address, u64>,
    block: u64,
    receipts: HashMap<B256, Receipt>,
    mempool: Vec<SignedTx>,
    reverted: Vec<(Bytes, String)>,
    faults: Vec<(TxKind, Fault)>,
    /// Time every submission spends in flight before reaching the chain.
    submit_delay: Option<Duration>,
    /// Every mined transaction with whether it succeeded.
    mined: Vec<(TxKind, bool)>,
}

/// State changes of a successful transaction.
enum Effect {
    Create {
        address: Address,
        runtime: Bytes,
        diamond: Option<Diamond>,
    },
    Cut {
        proxy: Address,
        routes: BTreeMap<Selector, Address>,
        init_call: Option<Bytes>,
    },
    None,
}

impl ChainState {
    fn classify(&self, to: Address, input: &[u8]) -> TxKind {
        if to == DEFAULT_FACTORY && input.len() >= 32 {
            let salt = B256::from_slice(&input[..32]);
            return TxKind::Deploy(DeterministicDeployer::default().address_for(salt, &input[32..]));
        }
        match CutCall::decode(input) {
            Ok(call) if call.cuts.is_empty() && call.init != Address::ZERO => TxKind::Initialize,
            Ok(_) => TxKind::Cut,
            Err(_) => TxKind::Other,
        }
    }

    fn has_code(&self, address: Address) -> bool {
        self.code.get(&address).is_some_and(|c| !c.is_empty())
    }

    /// Execute a transaction without committing it.
    fn simulate(&self, from: Address, to: Address, input: &[u8]) -> std::result::Result<Effect, String> {
        if to == DEFAULT_FACTORY {
            return self.simulate_create(input);
        }

        let Some(diamond) = self.diamonds.get(&to) else {
            return Ok(Effect::None);
        };

        if !input.starts_with(DIAMOND_CUT.as_slice()) {
            let routed = input.len() >= 4
                && diamond
                    .routes
                    .contains_key(&Selector::from_u32(u32::from_be_bytes([input[0], input[1], input[2], input[3]])));
            return if routed {
                Ok(Effect::None)
            } else {
                Err("Diamond: Function does not exist".to_string())
            };
        }

        if from != diamond.owner {
            return Err("LibDiamond: Must be contract owner".to_string());
        }

        let call = CutCall::decode(input).map_err(|e| e.to_string())?;
        let mut routes = diamond.routes.clone();

        for (facet, action, selectors) in &call.cuts {
            for selector in selectors {
                match action {
                    CutAction::Add => {
                        if !self.has_code(*facet) {
                            return Err("LibDiamondCut: New facet has no code".to_string());
                        }
                        if routes.insert(*selector, *facet).is_some() {
                            return Err("LibDiamondCut: Can't add function that already exists".to_string());
                        }
                    }
                    CutAction::Replace => {
                        if !self.has_code(*facet) {
                            return Err("LibDiamondCut: New facet has no code".to_string());
                        }
                        match routes.insert(*selector, *facet) {
                            None => return Err("LibDiamondCut: Can't replace function that doesn't exist".to_string()),
                            Some(old) if old == *facet => {
                                return Err("LibDiamondCut: Can't replace function with same function".to_string());
                            }
                            Some(_) => {}
                        }
                    }
                    CutAction::Remove => {
                        if *facet != Address::ZERO {
                            return Err("LibDiamondCut: Remove facet address must be address(0)".to_string());
                        }
                        if routes.remove(selector).is_none() {
                            return Err("LibDiamondCut: Can't remove function that doesn't exist".to_string());
                        }
                    }
                }
            }
        }

        let init_call = if call.init == Address::ZERO {
            None
        } else if !self.has_code(call.init) {
            return Err("LibDiamondCut: _init address has no code".to_string());
        } else {
            Some(call.calldata.clone())
        };

        Ok(Effect::Cut {
            proxy: to,
            routes,
            init_call,
        })
    }

    fn simulate_create(&self, input: &[u8]) -> std::result::Result<Effect, String> {
        if input.len() < 32 {
            return Err("factory: missing salt".to_string());
        }
        let salt = B256::from_slice(&input[..32]);
        let initcode = &input[32..];
        let address = DeterministicDeployer::default().address_for(salt, initcode);

        if self.has_code(address) {
            return Err("factory: create2 collision".to_string());
        }

        if !self.proxy_bytecode.is_empty()
            && initcode.len() > self.proxy_bytecode.len()
            && initcode.starts_with(&self.proxy_bytecode)
        {
            let (owner, cut_facet) =
                <(Address, Address)>::abi_decode_params(&initcode[self.proxy_bytecode.len()..])
                    .map_err(|e| format!("proxy constructor: {}", e))?;
            if !self.has_code(cut_facet) {
                return Err("LibDiamondCut: New facet has no code".to_string());
            }
            let runtime = self
                .runtime_for(&self.proxy_bytecode)
                .unwrap_or_else(|| Bytes::from_static(b"proxy"));
            return Ok(Effect::Create {
                address,
                runtime,
                diamond: Some(Diamond {
                    owner,
                    routes: BTreeMap::from([(DIAMOND_CUT, cut_facet)]),
                    init_calls: Vec::new(),
                }),
            });
        }

        let runtime = self
            .runtime_for(initcode)
            .unwrap_or_else(|| Bytes::copy_from_slice(initcode));
        Ok(Effect::Create {
            address,
            runtime,
            diamond: None,
        })
    }

    fn runtime_for(&self, creation: &[u8]) -> Option<Bytes> {
        self.runtimes
            .iter()
            .find(|(bytecode, _)| bytecode.as_ref() == creation)
            .map(|(_, runtime)| runtime.clone())
    }

    fn commit(&mut self, effect: Effect) {
        match effect {
            Effect::Create {
                address,
                runtime,
                diamond,
            } => {
                self.code.insert(address, runtime);
                if let Some(diamond) = diamond {
                    self.diamonds.insert(address, diamond);
                }
            }
            Effect::Cut {
                proxy,
                routes,
                init_call,
            } => {
                if let Some(diamond) = self.diamonds.get_mut(&proxy) {
                    diamond.routes = routes;
                    diamond.init_calls.extend(init_call);
                }
            }
            Effect::None => {}
        }
    }

    /// Mine `tx`, optionally forcing a revert.
    fn mine(&mut self, tx: &SignedTx, forced_revert: Option<String>) {
        let kind = self.classify(tx.tx.to, &tx.tx.input);
        *self.nonces.entry(tx.from).or_default() += 1;
        self.block += 1;

        let outcome = match forced_revert {
            Some(reason) => Err(reason),
            None => self.simulate(tx.from, tx.tx.to, &tx.tx.input),
        };
        let success = match outcome {
            Ok(effect) => {
                self.commit(effect);
                true
            }
            Err(reason) => {
                self.reverted.push((tx.tx.input.clone(), reason));
                false
            }
        };

        self.mined.push((kind, success));
        self.receipts.insert(
            tx.hash,
            Receipt {
                hash: tx.hash,
                success,
                block_number: self.block,
                gas_used: 21_000,
            },
        );
    }

    fn take_fault(&mut self, kind: TxKind) -> Option<Fault> {
        let index = self.faults.iter().position(|(k, _)| *k == kind)?;
        Some(self.faults.remove(index).1)
    }

    /// Next nonce of `address`, counting the mempool.
    fn next_nonce(&self, address: Address) -> u64 {
        let mined = self.nonces.get(&address).copied().unwrap_or_default();
        let pending = self.mempool.iter().filter(|tx| tx.from == address).count() as u64;
        mined + pending
    }

    /// Accept a transaction the way a node does: its nonce must be the
    /// sender's next one.
    fn broadcast(&mut self, tx: &SignedTx) -> Result<B256> {
        let expected = self.next_nonce(tx.from);
        if tx.tx.nonce != expected {
            return Err(Error::Transaction {
                hash: None,
                reason: format!("nonce too low: next nonce {}, tx nonce {}", expected, tx.tx.nonce),
            });
        }

        let kind = self.classify(tx.tx.to, &tx.tx.input);
        match self.take_fault(kind) {
            None => {
                self.mine(tx, None);
                Ok(tx.hash)
            }
            Some(Fault::LostAfterMining) => {
                self.mine(tx, None);
                Err(Error::Network("connection reset by peer".to_string()))
            }
            Some(Fault::Dropped) => Err(Error::Network("connection reset by peer".to_string())),
            Some(Fault::Stuck) => {
                self.mempool.push(tx.clone());
                Ok(tx.hash)
            }
            Some(Fault::Revert(reason)) => {
                self.mine(tx, Some(reason));
                Ok(tx.hash)
            }
        }
    }
}

/// Route pipeline logs to the test harness, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A shared handle to one in-memory chain.
#[derive(Debug, Clone)]
pub struct MockChain(Arc<Mutex<ChainState>>);

impl MockChain {
    /// A chain with the deterministic deployment factory in place.
    pub fn new(chain_id: u64) -> Self {
        init_tracing();
        let state = ChainState {
            chain_id,
            code: HashMap::from([(DEFAULT_FACTORY, Bytes::from_static(&[0x60, 0x00]))]),
            ..Default::default()
        };
        Self(Arc::new(Mutex::new(state)))
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.0.lock().unwrap()
    }

    /// Teach the chain the runtime code of every contract of `contracts`.
    pub fn install(&self, contracts: &Contracts) {
        let mut state = self.state();
        let artifacts = contracts
            .registry
            .facets()
            .iter()
            .map(|f| &f.artifact)
            .chain(contracts.initializer.as_ref().map(|i| &i.artifact))
            .chain(std::iter::once(&contracts.proxy));
        for artifact in artifacts {
            state
                .runtimes
                .push((artifact.bytecode.clone(), artifact.deployed_bytecode.clone()));
        }
        state.proxy_bytecode = contracts.proxy.bytecode.clone();
    }

    /// Hold every submission for `delay` before it reaches the chain.
    pub fn delay_submissions(&self, delay: Duration) {
        self.state().submit_delay = Some(delay);
    }

    pub fn inject(&self, kind: TxKind, fault: Fault) {
        self.state().faults.push((kind, fault));
    }

    pub fn set_code(&self, address: Address, code: &[u8]) {
        self.state().code.insert(address, Bytes::copy_from_slice(code));
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.state().has_code(address)
    }

    /// Mine every transaction stuck in the mempool.
    pub fn mine_stuck(&self) {
        let mut state = self.state();
        for tx in std::mem::take(&mut state.mempool) {
            state.mine(&tx, None);
        }
    }

    /// Number of mined transactions, successful or not.
    pub fn mined(&self) -> usize {
        self.state().mined.len()
    }

    /// Mined transactions in order.
    pub fn history(&self) -> Vec<(TxKind, bool)> {
        self.state().mined.clone()
    }

    fn count(&self, matches: impl Fn(TxKind) -> bool) -> usize {
        self.state()
            .mined
            .iter()
            .filter(|(kind, success)| *success && matches(*kind))
            .count()
    }

    /// Successful factory deployments.
    pub fn deploys(&self) -> usize {
        self.count(|k| matches!(k, TxKind::Deploy(_)))
    }

    /// Successful factory deployments to `address`.
    pub fn deploys_to(&self, address: Address) -> usize {
        self.count(|k| k == TxKind::Deploy(address))
    }

    /// Successful route changing cuts.
    pub fn cuts(&self) -> usize {
        self.count(|k| k == TxKind::Cut)
    }

    /// Successful initializer cuts.
    pub fn initializations(&self) -> usize {
        self.count(|k| k == TxKind::Initialize)
    }

    /// Current selector table of `proxy`.
    pub fn routes(&self, proxy: Address) -> BTreeMap<Selector, Address> {
        self.state()
            .diamonds
            .get(&proxy)
            .map(|d| d.routes.clone())
            .unwrap_or_default()
    }

    /// Calldata of every initializer delegate call made through `proxy`.
    pub fn init_calls(&self, proxy: Address) -> Vec<Bytes> {
        self.state()
            .diamonds
            .get(&proxy)
            .map(|d| d.init_calls.clone())
            .unwrap_or_default()
    }
}

impl Network for MockChain {
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send {
        ready(Ok(self.state().chain_id))
    }

    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send {
        ready(Ok(self.state().code.get(&address).cloned().unwrap_or_default()))
    }

    fn call(
        &self,
        request: &CallRequest,
        block: Option<u64>,
    ) -> impl Future<Output = Result<Bytes>> + Send {
        let state = self.state();

        if block.is_some()
            && let Some((_, reason)) = state.reverted.iter().rev().find(|(input, _)| *input == request.input)
        {
            return ready(Err(Error::Transaction {
                hash: None,
                reason: reason.clone(),
            }));
        }

        if request.input.as_ref() == FACETS.as_slice()
            && let Some(diamond) = state.diamonds.get(&request.to)
        {
            if !diamond.routes.contains_key(&FACETS) {
                return ready(Err(Error::Transaction {
                    hash: None,
                    reason: "Diamond: Function does not exist".to_string(),
                }));
            }
            let mut by_facet: BTreeMap<Address, Vec<Selector>> = BTreeMap::new();
            for (selector, facet) in &diamond.routes {
                by_facet.entry(*facet).or_default().push(*selector);
            }
            let facets: Vec<(Address, Vec<Selector>)> = by_facet.into_iter().collect();
            return ready(Ok(diamond::encode_facets(&facets)));
        }

        let from = request.from.unwrap_or_default();
        let result = match state.simulate(from, request.to, &request.input) {
            Ok(_) => Ok(Bytes::new()),
            Err(reason) => Err(Error::Transaction { hash: None, reason }),
        };
        ready(result)
    }

    fn nonce(&self, address: Address) -> impl Future<Output = Result<u64>> + Send {
        ready(Ok(self.state().next_nonce(address)))
    }

    fn fees(&self) -> impl Future<Output = Result<Fees>> + Send {
        ready(Ok(Fees {
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        }))
    }

    fn estimate_gas(&self, request: &CallRequest) -> impl Future<Output = Result<u64>> + Send {
        let from = request.from.unwrap_or_default();
        let result = match self.state().simulate(from, request.to, &request.input) {
            Ok(_) => Ok(100_000),
            Err(reason) => Err(Error::Transaction { hash: None, reason }),
        };
        ready(result)
    }

    fn submit(&self, tx: &SignedTx) -> impl Future<Output = Result<B256>> + Send {
        let chain = self.clone();
        let tx = tx.clone();
        async move {
            let delay = chain.state().submit_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            chain.state().broadcast(&tx)
        }
    }

    fn receipt(&self, hash: B256) -> impl Future<Output = Result<Option<Receipt>>> + Send {
        ready(Ok(self.state().receipts.get(&hash).cloned()))
    }

    fn transaction_known(&self, hash: B256) -> impl Future<Output = Result<bool>> + Send {
        let state = self.state();
        let known = state.receipts.contains_key(&hash) || state.mempool.iter().any(|tx| tx.hash == hash);
        ready(Ok(known))
    }
}

/// A compiled contract with recognisable bytecode. Changing the functions
/// changes the bytecode, as recompiling an edited facet would.
pub fn artifact(name: &str, signatures: &[&str]) -> Artifact {
    let body = format!("{}:{}", name, signatures.join(","));
    Artifact {
        contract: name.to_string(),
        path: PathBuf::from(format!("out/{0}.sol/{0}.json", name)),
        abi: JsonAbi::default(),
        bytecode: Bytes::from(format!("creation:{}", body).into_bytes()),
        deployed_bytecode: Bytes::from(format!("runtime:{}", body).into_bytes()),
        has_immutables: false,
    }
}

pub fn facet(name: &str, signatures: &[&str], core: bool) -> FacetSpec {
    FacetSpec {
        name: name.to_string(),
        source: Some(PathBuf::from(format!("src/facets/{}.sol", name))),
        core,
        functions: signatures
            .iter()
            .map(|signature| FunctionSpec {
                selector: Selector::from_signature(signature),
                signature: signature.to_string(),
                decl: None,
            })
            .collect(),
        artifact: artifact(name, signatures),
    }
}

pub fn cut_facet() -> FacetSpec {
    facet(CUT_FACET, &["diamondCut((address,uint8,bytes4[])[],address,bytes)"], true)
}

pub fn loupe_facet() -> FacetSpec {
    facet(
        LOUPE_FACET,
        &["facets()", "facetFunctionSelectors(address)", "facetAddresses()", "facetAddress(bytes4)"],
        true,
    )
}

pub fn ownership_facet() -> FacetSpec {
    facet(OWNERSHIP_FACET, &["owner()", "transferOwnership(address)"], true)
}

pub fn counter_facet() -> FacetSpec {
    facet("CounterFacet", &["increment()", "count()", "reset()"], false)
}

/// The core facets plus a counter.
pub fn standard_facets() -> Vec<FacetSpec> {
    vec![cut_facet(), loupe_facet(), ownership_facet(), counter_facet()]
}

pub fn initializer() -> Initializer {
    let mut artifact = artifact(INITIALIZER, &["init(uint256)"]);
    artifact.abi = serde_json::from_str(
        r#"[{"type":"function","name":"init","stateMutability":"nonpayable","outputs":[],
             "inputs":[{"name":"start","type":"uint256"}]}]"#,
    )
    .unwrap();
    Initializer {
        artifact,
        function: "init".to_string(),
    }
}

pub fn contracts(facets: Vec<FacetSpec>) -> Contracts {
    Contracts {
        registry: Registry::from_facets(facets, PathBuf::from("out"), ArtifactFormat::Foundry).unwrap(),
        proxy: artifact(PROXY, &[]),
        cut_facet: CUT_FACET.to_string(),
        initializer: Some(initializer()),
        deployer: DeterministicDeployer::default(),
    }
}

pub fn options() -> ExecutorOptions {
    ExecutorOptions {
        core_facets: BTreeSet::from([
            CUT_FACET.to_string(),
            LOUPE_FACET.to_string(),
            OWNERSHIP_FACET.to_string(),
        ]),
        allow_removals: false,
        confirm_core_changes: false,
        confirmation: Confirmation {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(5),
        },
    }
}

pub fn wallet(key: &str) -> LocalWallet {
    LocalWallet::from_private_key(key).unwrap()
}

pub fn target(name: &str, network_name: &str, chain: &MockChain) -> Target<MockChain, LocalWallet> {
    Target {
        name: name.to_string(),
        network_name: network_name.to_string(),
        wallet_name: "deployer".to_string(),
        network: chain.clone(),
        signer: wallet(DEPLOYER_KEY),
        init_args: vec!["42".to_string()],
        salt: SALT,
    }
}

/// Deterministic address of `facet` under the fixture salt.
pub fn address_of(facet: &FacetSpec) -> Address {
    DeterministicDeployer::default().address_for(SALT, &facet.artifact.bytecode)
}

/// Deterministic proxy address for `signer`.
pub fn proxy_address(contracts: &Contracts, signer: &impl TxSigner) -> Address {
    let cut = contracts.registry.facet(CUT_FACET).unwrap();
    let initcode = diamond::proxy_initcode(&contracts.proxy.bytecode, signer.address(), address_of(cut));
    DeterministicDeployer::default().address_for(SALT, &initcode)
}

/// A record store in a fresh temporary directory.
pub fn store() -> (TempDir, RecordStore) {
    let dir = TempDir::new("facetsmith").unwrap();
    let store = RecordStore::new(dir.path().join("facetsmith.deployments.json"));
    (dir, store)
}
