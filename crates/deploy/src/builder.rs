//! Builder module for creating a [`Deployer`] from a resolved configuration.
//!
//! The builder runs the build step (hooks and compile command), loads the
//! facet registry and the proxy and initializer artifacts, regenerates the
//! proxy interface and wires every resolved target.

use std::path::{Path, PathBuf};

use crate::{
    chain::{HttpNetwork, LocalWallet},
    compile,
    config::{self, Config, ResolvedConfig},
    deployer::Deployer,
    deterministic::DeterministicDeployer,
    error::{Error, Result},
    executor::{Contracts, ExecutorOptions, Initializer},
    hooks::{HookEnv, HookPoint},
    interface,
    record::RecordStore,
    registry::Registry,
};

/// Compile the project and regenerate the proxy interface.
///
/// Returns the loaded registry and the interface path.
pub async fn build_project(config: &Config, root: &Path, run_build: bool) -> Result<(Registry, PathBuf)> {
    if run_build {
        let env = HookEnv::default();
        config.hooks.run(HookPoint::PreBuild, root, &env).await?;
        compile::build(config.commands.build.as_deref(), root).await?;
        config.hooks.run(HookPoint::PostBuild, root, &env).await?;
    }

    let registry = Registry::load(&config::registry_options(config, root))?;

    let (path, written) = interface::generate(
        &registry,
        &config::interface_options(config),
        &root.join(&config.paths.generated.solidity),
    )?;
    if !written {
        tracing::debug!(path = %path.display(), "Proxy interface unchanged");
    }

    Ok((registry, path))
}

/// Builder for creating a [`Deployer`].
///
/// # Example
///
/// ```no_run
/// use facetsmith_deploy::{Config, DeployerBuilder};
///
/// # async fn example() -> anyhow::Result<()> {
/// let (config, root) = Config::load(std::path::Path::new("."))?;
/// let resolved = config.resolve(&root, &["local".to_string()])?;
/// let deployer = DeployerBuilder::new(resolved)
///     .allow_removals(true)
///     .build()
///     .await?;
/// let summary = deployer.deploy().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeployerBuilder {
    resolved: ResolvedConfig,
    /// Run the build command before loading artifacts.
    compile: bool,
    /// Allow cuts that remove selectors (also enabled by `diamond.allow_removals`).
    allow_removals: bool,
    /// Plan changes to core facets instead of refusing them.
    confirm_core_changes: bool,
}

impl DeployerBuilder {
    pub fn new(resolved: ResolvedConfig) -> Self {
        Self {
            resolved,
            compile: true,
            allow_removals: false,
            confirm_core_changes: false,
        }
    }

    /// Set whether the build command runs first.
    pub fn compile(mut self, compile: bool) -> Self {
        self.compile = compile;
        self
    }

    pub fn allow_removals(mut self, allow: bool) -> Self {
        self.allow_removals = allow;
        self
    }

    pub fn confirm_core_changes(mut self, confirm: bool) -> Self {
        self.confirm_core_changes = confirm;
        self
    }

    /// Build the [`Deployer`].
    pub async fn build(self) -> Result<Deployer<HttpNetwork, LocalWallet>> {
        let ResolvedConfig {
            root,
            config,
            targets,
        } = self.resolved;

        let (registry, _) = build_project(&config, &root, self.compile).await?;

        let diamond = &config.diamond;
        if registry.facet(&diamond.cut_facet).is_none() {
            return Err(Error::Config(format!(
                "cut facet {} not found in sources or artifacts",
                diamond.cut_facet
            )));
        }

        let proxy = registry.artifact(&diamond.proxy)?;
        let initializer = diamond
            .init
            .as_ref()
            .map(|init| {
                registry.artifact(&init.contract).map(|artifact| Initializer {
                    artifact,
                    function: init.function.clone(),
                })
            })
            .transpose()?;

        let options = ExecutorOptions {
            core_facets: diamond.core_facets.iter().cloned().collect(),
            allow_removals: self.allow_removals || diamond.allow_removals,
            confirm_core_changes: self.confirm_core_changes,
            confirmation: config.execution.confirmation(),
        };

        tracing::info!(
            facets = registry.facets().len(),
            targets = targets.len(),
            allow_removals = options.allow_removals,
            confirm_core_changes = options.confirm_core_changes,
            "Deployer configured"
        );

        Ok(Deployer {
            store: RecordStore::new(root.join(&config.paths.generated.deployments)),
            contracts: Contracts {
                registry,
                proxy,
                cut_facet: diamond.cut_facet.clone(),
                initializer,
                deployer: DeterministicDeployer::new(diamond.create2_factory),
            },
            targets,
            options,
            hooks: config.hooks.clone(),
            root,
        })
    }
}
