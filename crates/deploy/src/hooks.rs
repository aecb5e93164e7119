//! Lifecycle hooks: user shell commands run around build and deploy.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};

/// Where in the pipeline a hook runs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HookPoint {
    PreBuild,
    PostBuild,
    PreDeploy,
    PostDeploy,
}

impl HookPoint {
    /// Hooks running before their step gate it.
    pub fn is_pre(self) -> bool {
        matches!(self, Self::PreBuild | Self::PreDeploy)
    }
}

/// A hook command, either bare or with an explicit `fatal` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hook {
    Command(String),
    Detailed {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fatal: Option<bool>,
    },
}

impl Hook {
    pub fn command(&self) -> &str {
        match self {
            Self::Command(command) | Self::Detailed { command, .. } => command,
        }
    }

    /// Whether a failure aborts the pipeline, given the default of its point.
    pub fn is_fatal(&self, default: bool) -> bool {
        match self {
            Self::Command(_) => default,
            Self::Detailed { fatal, .. } => fatal.unwrap_or(default),
        }
    }
}

/// The `[hooks]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hooks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<Hook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_build: Option<Hook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_deploy: Option<Hook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_deploy: Option<Hook>,
}

impl Hooks {
    pub fn get(&self, point: HookPoint) -> Option<&Hook> {
        match point {
            HookPoint::PreBuild => self.pre_build.as_ref(),
            HookPoint::PostBuild => self.post_build.as_ref(),
            HookPoint::PreDeploy => self.pre_deploy.as_ref(),
            HookPoint::PostDeploy => self.post_deploy.as_ref(),
        }
    }

    /// Run the hook configured for `point`, if any.
    ///
    /// A failing fatal hook is an error; a non-fatal one is logged and ignored.
    pub async fn run(&self, point: HookPoint, root: &Path, env: &HookEnv) -> Result<()> {
        let Some(hook) = self.get(point) else {
            return Ok(());
        };

        let fatal = hook.is_fatal(point.is_pre());
        tracing::info!(hook = %point, command = hook.command(), "Running hook");

        match run_shell(hook.command(), root, &env.vars()).await {
            Ok(()) => Ok(()),
            Err(reason) if fatal => Err(Error::Hook { point, reason }),
            Err(reason) => {
                tracing::warn!(hook = %point, %reason, "Hook failed, continuing");
                Ok(())
            }
        }
    }
}

/// Target details exported to deploy hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookEnv {
    pub target: Option<String>,
    pub network: Option<String>,
    pub chain_id: Option<u64>,
    pub proxy: Option<Address>,
}

impl HookEnv {
    pub fn vars(&self) -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::new();
        if let Some(target) = &self.target {
            vars.insert("FACETSMITH_TARGET", target.clone());
        }
        if let Some(network) = &self.network {
            vars.insert("FACETSMITH_NETWORK", network.clone());
        }
        if let Some(chain_id) = self.chain_id {
            vars.insert("FACETSMITH_CHAIN_ID", chain_id.to_string());
        }
        if let Some(proxy) = self.proxy {
            vars.insert("FACETSMITH_PROXY", proxy.to_string());
        }
        vars
    }
}

/// Run `command` through `sh -c` in `root`. The error is a human readable reason.
pub(crate) async fn run_shell(
    command: &str,
    root: &Path,
    env: &BTreeMap<&'static str, String>,
) -> std::result::Result<(), String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .envs(env)
        .output()
        .await
        .map_err(|e| format!("failed to spawn `{}`: {}", command, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        tracing::debug!(command, "{}", line);
    }

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!(
        "`{}` exited with {}: {}",
        command,
        output.status,
        stderr.trim()
    ))
}
