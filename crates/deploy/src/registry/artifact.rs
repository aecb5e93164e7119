//! Compiled contract artifacts (foundry and hardhat layouts).

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    deterministic::Expectation,
    error::{Error, Result},
};

/// Layout of the artifacts directory.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactFormat {
    /// `<artifacts>/<File>.sol/<Contract>.json`
    #[default]
    Foundry,
    /// `<artifacts>/<source path>/<Contract>.json`
    Hardhat,
}

impl ArtifactFormat {
    /// Where the artifact of `contract` declared in `source` lives.
    ///
    /// `source` is relative to the project root.
    pub fn path_for(&self, artifacts_dir: &Path, source: &Path, contract: &str) -> PathBuf {
        let file_name = format!("{}.json", contract);
        match self {
            Self::Foundry => artifacts_dir
                .join(source.file_name().unwrap_or(source.as_os_str()))
                .join(file_name),
            Self::Hardhat => artifacts_dir.join(source).join(file_name),
        }
    }
}

/// A compiled contract.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub contract: String,
    pub path: PathBuf,
    pub abi: JsonAbi,
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// Runtime bytecode.
    pub deployed_bytecode: Bytes,
    /// Whether the runtime code contains immutables, or the format cannot tell.
    pub has_immutables: bool,
}

impl Artifact {
    /// Load the artifact at `path`.
    pub fn load(path: &Path, contract: &str) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingArtifact {
                contract: contract.to_string(),
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Build(format!("failed to read {}: {}", path.display(), e)))?;
        let json: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Build(format!("failed to parse {}: {}", path.display(), e)))?;

        let abi: JsonAbi = json
            .get("abi")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Build(format!("invalid ABI in {}: {}", path.display(), e)))?
            .unwrap_or_default();

        // Foundry nests the code under `object`, hardhat stores a plain string.
        let (bytecode, _) = code(&json, "bytecode", path)?;
        let (deployed_bytecode, immutables) = code(&json, "deployedBytecode", path)?;

        Ok(Self {
            contract: contract.to_string(),
            path: path.to_path_buf(),
            abi,
            bytecode,
            deployed_bytecode,
            has_immutables: immutables.unwrap_or(true),
        })
    }

    /// Locate and load `contract` when its source file is unknown.
    ///
    /// Prefers the conventional `<Contract>.sol/<Contract>.json` location and
    /// otherwise searches the artifacts directory.
    pub fn find(format: ArtifactFormat, artifacts_dir: &Path, contract: &str) -> Result<Self> {
        let conventional = format.path_for(
            artifacts_dir,
            Path::new(&format!("{}.sol", contract)),
            contract,
        );
        if conventional.exists() {
            return Self::load(&conventional, contract);
        }

        let pattern = format!("{}/**/{}.json", artifacts_dir.display(), contract);
        let found = glob::glob(&pattern)
            .map_err(|e| Error::Config(format!("invalid artifact pattern {}: {}", pattern, e)))?
            .filter_map(|entry| entry.ok())
            .filter(|path| !path.components().any(|c| c.as_os_str() == "build-info"))
            .min();

        match found {
            Some(path) => Self::load(&path, contract),
            None => Err(Error::MissingArtifact {
                contract: contract.to_string(),
                path: conventional.display().to_string(),
            }),
        }
    }

    /// Fail when the artifact is older than the source it was compiled from.
    pub fn ensure_fresh(&self, source: &Path) -> Result<()> {
        let (Some(artifact_time), Some(source_time)) = (modified(&self.path), modified(source)) else {
            return Ok(());
        };
        if artifact_time < source_time {
            return Err(Error::Build(format!(
                "artifact {} is older than {}, rebuild first",
                self.path.display(),
                source.display()
            )));
        }
        Ok(())
    }

    /// The runtime code a deterministic deployment must produce.
    pub fn expectation(&self) -> Expectation<'_> {
        Expectation::runtime(&self.deployed_bytecode, self.has_immutables)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Read a code section: the bytes plus, for foundry, whether it has immutables.
fn code(json: &Value, key: &str, path: &Path) -> Result<(Bytes, Option<bool>)> {
    let (object, immutables) = match json.get(key) {
        Some(Value::String(s)) => (s.as_str(), None),
        Some(Value::Object(section)) => (
            section.get("object").and_then(Value::as_str).unwrap_or_default(),
            Some(
                section
                    .get("immutableReferences")
                    .and_then(Value::as_object)
                    .is_some_and(|refs| !refs.is_empty()),
            ),
        ),
        _ => ("", None),
    };

    if object.contains("__$") {
        return Err(Error::Build(format!(
            "{} in {} has unlinked library references",
            key,
            path.display()
        )));
    }

    let bytes = if object.is_empty() || object == "0x" {
        Bytes::new()
    } else {
        object
            .parse::<Bytes>()
            .map_err(|e| Error::Build(format!("invalid {} in {}: {}", key, path.display(), e)))?
    };

    Ok((bytes, immutables))
}
