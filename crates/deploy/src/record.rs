//! Persisted deployment records.
//!
//! One JSON document holds a [`TargetRecord`] per target. Every write
//! re-reads the document under an exclusive lock, replaces the target's slice
//! and atomically swaps the file, so concurrent targets never lose each
//! other's updates and a crash never leaves a half written document.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    composition::Composition,
    error::{Error, Result},
    fs::FsHandler,
    planner::CutOperation,
    selector::Selector,
};

/// Current version of the record document.
pub const RECORD_VERSION: u32 = 1;

/// Default file name of the record document.
pub const DEFAULT_RECORD_FILE: &str = "facetsmith.deployments.json";

/// Executor stage of a target.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    #[default]
    Init,
    FacetsDeployed,
    CutSubmitted,
    Initialized,
    Done,
    Failed,
}

/// A deployed facet contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedFacet {
    pub address: Address,
    #[serde(default)]
    pub selectors: Vec<Selector>,
}

/// What a write-ahead transaction does once it is mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    /// Deterministic deployment of a facet or the initializer.
    Deploy { contract: String, address: Address },
    /// The cut batch, with the composition it produces.
    Cut {
        operations: Vec<CutOperation>,
        composition: BTreeMap<Selector, Address>,
    },
    /// The one-time initializer call.
    Initialize,
}

/// A transaction broadcast but not yet known to be mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: B256,
    #[serde(flatten)]
    pub action: PendingAction,
    pub submitted_at: DateTime<Utc>,
}

/// One applied cut batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: B256,
    pub applied_at: DateTime<Utc>,
    pub operations: Vec<CutOperation>,
}

/// Persisted state of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub chain_id: u64,
    pub proxy: Address,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub initialized: bool,
    /// Facet contracts by name.
    #[serde(default)]
    pub facets: BTreeMap<String, DeployedFacet>,
    /// Selector routing as of the last confirmed cut.
    #[serde(default)]
    pub composition: BTreeMap<Selector, Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingTx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub updated_at: DateTime<Utc>,
}

impl TargetRecord {
    pub fn new(chain_id: u64, proxy: Address) -> Self {
        Self {
            chain_id,
            proxy,
            stage: Stage::Init,
            initialized: false,
            facets: BTreeMap::new(),
            composition: BTreeMap::new(),
            pending: None,
            failure: None,
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Facet name by address.
    pub fn facet_names(&self) -> BTreeMap<Address, String> {
        self.facets
            .iter()
            .map(|(name, facet)| (facet.address, name.clone()))
            .collect()
    }

    /// The recorded composition, with facet names attached.
    pub fn composition(&self) -> Composition {
        Composition::from_routes(self.composition.clone(), self.facet_names())
    }

    /// Record a confirmed facet deployment.
    pub fn record_facet(&mut self, name: impl Into<String>, address: Address, selectors: Vec<Selector>) {
        self.facets
            .insert(name.into(), DeployedFacet { address, selectors });
    }

    /// Record a confirmed cut batch.
    pub fn record_cut(&mut self, tx_hash: B256, operations: Vec<CutOperation>, composition: BTreeMap<Selector, Address>) {
        self.composition = composition;
        self.history.push(HistoryEntry {
            tx_hash,
            applied_at: Utc::now(),
            operations,
        });
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        if stage != Stage::Failed {
            self.failure = None;
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.stage = Stage::Failed;
        self.failure = Some(reason.into());
    }
}

/// The whole record document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFile {
    pub version: u32,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetRecord>,
}

impl Default for RecordFile {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            targets: BTreeMap::new(),
        }
    }
}

impl RecordFile {
    /// Parse a document, migrating older layouts.
    pub fn parse(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::Record(format!("failed to parse record JSON: {}", e)))?;

        match value.get("version").and_then(Value::as_u64) {
            Some(version) if version > RECORD_VERSION as u64 => Err(Error::Record(format!(
                "record version {} is newer than supported version {}; upgrade facetsmith",
                version, RECORD_VERSION
            ))),
            Some(_) => serde_json::from_value(value)
                .map_err(|e| Error::Record(format!("malformed record: {}", e))),
            None => migrate_unversioned(value),
        }
    }
}

/// Unversioned documents map target names to `{ chainId, contracts: [...] }`
/// where each contract carries its name and `onChain.address`. Selectors were
/// not recorded, so the composition is left to be observed on chain.
fn migrate_unversioned(value: Value) -> Result<RecordFile> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LegacyTarget {
        chain_id: u64,
        #[serde(default)]
        contracts: Vec<LegacyContract>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LegacyContract {
        name: String,
        on_chain: LegacyOnChain,
    }

    #[derive(Deserialize)]
    struct LegacyOnChain {
        address: Address,
    }

    let legacy: BTreeMap<String, LegacyTarget> = serde_json::from_value(value)
        .map_err(|e| Error::Record(format!("unrecognised record layout: {}", e)))?;

    let mut file = RecordFile::default();
    for (name, target) in legacy {
        let Some(proxy) = target
            .contracts
            .iter()
            .find(|c| c.name == "DiamondProxy")
            .map(|c| c.on_chain.address)
        else {
            tracing::warn!(target = %name, "Legacy record has no proxy, skipping");
            continue;
        };

        let mut record = TargetRecord::new(target.chain_id, proxy);
        for contract in target.contracts.into_iter().filter(|c| c.name != "DiamondProxy") {
            record.record_facet(contract.name, contract.on_chain.address, Vec::new());
        }
        record.stage = Stage::Done;
        record.initialized = true;
        file.targets.insert(name, record);
    }

    tracing::info!(targets = file.targets.len(), "Migrated unversioned deployment record");
    Ok(file)
}

/// Reads and writes the record document.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document. A missing file is an empty document.
    pub fn load(&self) -> Result<RecordFile> {
        if !self.path.exists() {
            return Ok(RecordFile::default());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Record(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        RecordFile::parse(&content)
    }

    pub fn get(&self, target: &str) -> Result<Option<TargetRecord>> {
        Ok(self.load()?.targets.remove(target))
    }

    /// Replace the record of `target` and flush the document.
    pub fn put(&self, target: &str, record: &TargetRecord) -> Result<()> {
        let _guard = FsHandler::lock(&self.path)?;

        let mut file = self.load()?;
        file.version = RECORD_VERSION;

        let mut record = record.clone();
        record.updated_at = Utc::now();
        file.targets.insert(target.to_string(), record);

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::Record(format!("failed to serialize record: {}", e)))?;
        FsHandler::write_atomic(&self.path, json.as_bytes())?;

        tracing::trace!(%target, path = %self.path.display(), "Record saved");
        Ok(())
    }
}
