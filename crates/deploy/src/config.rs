//! Project configuration (`facetsmith.toml`).
//!
//! The file is loaded with figment, layering `FACETSMITH_`-prefixed
//! environment variables over the TOML document (nested keys are separated
//! by `__`, e.g. `FACETSMITH_DIAMOND__ALLOW_REMOVALS=true`). Secrets and
//! endpoints may be deferred to the environment with `{ env = "NAME" }`; they
//! are evaluated once by [`Config::resolve`].

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    chain::{Confirmation, HttpNetwork, LocalWallet},
    deterministic::DEFAULT_FACTORY,
    executor::Target,
    error::{Error, Result},
    hooks::Hooks,
    interface::InterfaceOptions,
    record::DEFAULT_RECORD_FILE,
    registry::{ArtifactFormat, RegistryOptions},
    rpc::RetryPolicy,
};

/// The default name of the configuration file.
pub const CONFIG_FILENAME: &str = "facetsmith.toml";

/// Prefix of environment variables overriding configuration keys.
pub const ENV_PREFIX: &str = "FACETSMITH_";

/// A string given inline or read from the environment when resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Deferred {
    Env { env: String },
    Literal(String),
}

impl Deferred {
    pub fn env(name: impl Into<String>) -> Self {
        Self::Env { env: name.into() }
    }

    /// Evaluate the value; `what` names it in errors.
    pub fn resolve(&self, what: &str) -> Result<String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Env { env } => std::env::var(env).map_err(|_| {
                Error::Config(format!("{} reads environment variable {} which is not set", what, env))
            }),
        }
    }
}

impl From<&str> for Deferred {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

/// Header settings of generated Solidity files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolcConfig {
    /// SPDX license identifier.
    pub license: String,
    /// Minimum compiler version for the `pragma`.
    pub version: String,
}

impl Default for SolcConfig {
    fn default() -> Self {
        Self {
            license: "MIT".to_string(),
            version: "0.8.21".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Shell command compiling the contracts.
    pub build: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePaths {
    /// Glob patterns of facet sources.
    pub facets: Vec<String>,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            facets: vec!["src/facets/*Facet.sol".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedPaths {
    /// Directory of generated Solidity files.
    pub solidity: PathBuf,
    /// The deployment record file.
    pub deployments: PathBuf,
}

impl Default for GeneratedPaths {
    fn default() -> Self {
        Self {
            solidity: PathBuf::from("src/generated"),
            deployments: PathBuf::from(DEFAULT_RECORD_FILE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Compiled artifacts directory.
    pub artifacts: PathBuf,
    pub src: SourcePaths,
    pub generated: GeneratedPaths,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from("out"),
            src: SourcePaths::default(),
            generated: GeneratedPaths::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub format: ArtifactFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyInterfaceConfig {
    /// Imports added to the generated `IDiamondProxy`.
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub proxy_interface: ProxyInterfaceConfig,
}

/// The initializer run once after the first cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitConfig {
    pub contract: String,
    /// Function name, or full signature when overloaded.
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiamondConfig {
    /// Also route `public` functions, not only `external` ones.
    pub public_methods: bool,
    /// The proxy contract, constructed with `(owner, diamondCutFacet)`.
    pub proxy: String,
    pub cut_facet: String,
    pub init: Option<InitConfig>,
    /// Facets never changed by automatic reconciliation.
    pub core_facets: Vec<String>,
    /// Deterministic deployment factory.
    pub create2_factory: Address,
    /// Allow cuts that remove selectors.
    pub allow_removals: bool,
}

impl Default for DiamondConfig {
    fn default() -> Self {
        Self {
            public_methods: false,
            proxy: "DiamondProxy".to_string(),
            cut_facet: "DiamondCutFacet".to_string(),
            init: None,
            core_facets: vec![
                "OwnershipFacet".to_string(),
                "DiamondCutFacet".to_string(),
                "DiamondLoupeFacet".to_string(),
            ],
            create2_factory: DEFAULT_FACTORY,
            allow_removals: false,
        }
    }
}

/// Key material of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "kebab-case")]
pub enum WalletConfig {
    Mnemonic {
        words: Deferred,
        #[serde(default)]
        index: u32,
    },
    PrivateKey { key: Deferred },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: Deferred,
}

/// One deployment destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub network: String,
    pub wallet: String,
    /// Initializer arguments, coerced to the ABI parameter types.
    #[serde(default)]
    pub init_args: Vec<String>,
    /// 32-byte CREATE2 salt.
    pub salt: Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How long to wait for each receipt.
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_secs: 120,
            poll_interval_ms: 2_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn confirmation(&self) -> Confirmation {
        Confirmation {
            timeout: Duration::from_secs(self.receipt_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// The configuration file as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub solc: SolcConfig,
    pub commands: CommandsConfig,
    pub paths: PathsConfig,
    pub artifacts: ArtifactsConfig,
    pub generator: GeneratorConfig,
    pub diamond: DiamondConfig,
    pub hooks: Hooks,
    pub wallets: BTreeMap<String, WalletConfig>,
    pub networks: BTreeMap<String, NetworkConfig>,
    pub targets: BTreeMap<String, TargetConfig>,
    pub execution: ExecutionConfig,
}

impl Config {
    /// Load `path` (a file, or a directory holding [`CONFIG_FILENAME`]) and
    /// apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<(Self, PathBuf)> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {} (run `facetsmith init` to create one)",
                config_path.display()
            );
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to parse config file {}", config_path.display()))?;

        let root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok((config, root))
    }

    /// A starter configuration for a local node.
    pub fn starter(salt: B256) -> Self {
        Self {
            commands: CommandsConfig {
                build: Some("forge build".to_string()),
            },
            diamond: DiamondConfig {
                init: Some(InitConfig {
                    contract: "InitDiamond".to_string(),
                    function: "init".to_string(),
                }),
                ..Default::default()
            },
            wallets: BTreeMap::from([(
                "local".to_string(),
                WalletConfig::Mnemonic {
                    words: "test test test test test test test test test test test junk".into(),
                    index: 0,
                },
            )]),
            networks: BTreeMap::from([(
                "local".to_string(),
                NetworkConfig {
                    rpc_url: "http://localhost:8545".into(),
                },
            )]),
            targets: BTreeMap::from([(
                "local".to_string(),
                TargetConfig {
                    network: "local".to_string(),
                    wallet: "local".to_string(),
                    init_args: Vec::new(),
                    salt: Deferred::Literal(salt.to_string()),
                },
            )]),
            ..Default::default()
        }
    }

    /// Write the configuration as TOML.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Names of every configured target.
    pub fn target_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    /// Evaluate every deferred value used by `targets`, once.
    ///
    /// Only the wallets and networks referenced by the selected targets are
    /// resolved, so a missing secret of an unrelated target does not matter.
    pub fn resolve(&self, root: &Path, targets: &[String]) -> Result<ResolvedConfig> {
        let mut resolved_targets = Vec::with_capacity(targets.len());
        let mut seen = BTreeSet::new();

        for name in targets {
            if !seen.insert(name.clone()) {
                continue;
            }
            let target = self
                .targets
                .get(name)
                .ok_or_else(|| Error::Config(format!("unknown target {}", name)))?;
            resolved_targets.push(self.resolve_target(name, target)?);
        }

        Ok(ResolvedConfig {
            root: root.to_path_buf(),
            config: self.clone(),
            targets: resolved_targets,
        })
    }

    fn resolve_target(&self, name: &str, target: &TargetConfig) -> Result<ResolvedTarget> {
        let network = self.networks.get(&target.network).ok_or_else(|| {
            Error::Config(format!("target {} uses unknown network {}", name, target.network))
        })?;
        let wallet = self.wallets.get(&target.wallet).ok_or_else(|| {
            Error::Config(format!("target {} uses unknown wallet {}", name, target.wallet))
        })?;

        let rpc_url = network
            .rpc_url
            .resolve(&format!("network {} rpc_url", target.network))?;
        let rpc_url = Url::parse(&rpc_url).map_err(|e| {
            Error::Config(format!("invalid rpc_url for network {}: {}", target.network, e))
        })?;

        let signer = match wallet {
            WalletConfig::Mnemonic { words, index } => LocalWallet::from_mnemonic(
                &words.resolve(&format!("wallet {} words", target.wallet))?,
                *index,
            ),
            WalletConfig::PrivateKey { key } => LocalWallet::from_private_key(
                &key.resolve(&format!("wallet {} key", target.wallet))?,
            ),
        }
        .map_err(|e| Error::Config(format!("wallet {}: {}", target.wallet, e)))?;

        let salt = target.salt.resolve(&format!("target {} salt", name))?;
        let salt = salt.trim().parse::<B256>().map_err(|e| {
            Error::Config(format!("target {} salt must be 32 bytes of hex: {}", name, e))
        })?;

        Ok(ResolvedTarget {
            name: name.to_string(),
            network_name: target.network.clone(),
            wallet_name: target.wallet.clone(),
            network: HttpNetwork::new(rpc_url, self.execution.retry)?,
            signer,
            init_args: target.init_args.clone(),
            salt,
        })
    }
}

/// A target with its wallet and network resolved.
pub type ResolvedTarget = Target<HttpNetwork, LocalWallet>;

/// The configuration after every deferred value was evaluated.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Project root; relative paths are resolved against it.
    pub root: PathBuf,
    pub config: Config,
    pub targets: Vec<ResolvedTarget>,
}

impl ResolvedConfig {
    pub fn registry_options(&self) -> RegistryOptions {
        registry_options(&self.config, &self.root)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(&self.config.paths.generated.deployments)
    }
}

/// Registry inputs derived from the configuration.
pub fn registry_options(config: &Config, root: &Path) -> RegistryOptions {
    RegistryOptions {
        root: root.to_path_buf(),
        facet_patterns: config.paths.src.facets.clone(),
        artifacts_dir: config.paths.artifacts.clone(),
        format: config.artifacts.format,
        public_methods: config.diamond.public_methods,
        core_facets: config.diamond.core_facets.iter().cloned().collect(),
        cut_facet: Some(config.diamond.cut_facet.clone()),
    }
}

/// Interface generator inputs derived from the configuration.
pub fn interface_options(config: &Config) -> InterfaceOptions {
    InterfaceOptions {
        license: config.solc.license.clone(),
        solc_version: config.solc.version.clone(),
        imports: config.generator.proxy_interface.imports.clone(),
    }
}
