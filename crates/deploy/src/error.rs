//! Error taxonomy for the deployment pipeline.
//!
//! Errors fall into two classes. Planning errors ([`Error::is_planning`]) are
//! raised before any transaction is sent and leave no on-chain side effects.
//! Execution errors happen after a target started sending transactions; the
//! record is left at the last confirmed step and re-running resumes from there.

use alloy_core::primitives::{Address, B256};

use crate::{hooks::HookPoint, selector::Selector};

/// Process exit code for planning and pre-flight failures.
pub const EXIT_PLANNING: i32 = 2;
/// Process exit code for failures during on-chain execution.
pub const EXIT_EXECUTION: i32 = 3;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A selector claimed by two facets of the desired composition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("selector {selector} is declared by both {first} and {second}")]
pub struct ConflictError {
    pub selector: Selector,
    pub first: String,
    pub second: String,
}

/// A change to a core facet that reconciliation refuses to make on its own.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoreFacetDrift {
    /// Name of the core facet currently owning the selector.
    pub facet: String,
    /// The selector that would be touched.
    pub selector: Selector,
    /// Where the desired composition wants the selector to go. `None` means removal.
    pub desired: Option<Address>,
}

impl std::fmt::Display for CoreFacetDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.desired {
            Some(address) => write!(
                f,
                "core facet {} would lose {} to {}",
                self.facet, self.selector, address
            ),
            None => write!(f, "core facet {} would lose {}", self.facet, self.selector),
        }
    }
}

/// Errors produced by the deployment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration or an unresolved target/wallet/network reference.
    #[error("configuration error: {0}")]
    Config(String),

    /// The build command failed or its artifacts are missing or stale.
    #[error("build error: {0}")]
    Build(String),

    /// A source file has no compiled artifact.
    #[error("missing artifact for {contract}: expected {path}")]
    MissingArtifact { contract: String, path: String },

    /// Two facets of the desired composition share a selector.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The plan would remove or replace selectors of core facets.
    #[error("{} core facet change(s) require explicit confirmation: {}", .0.len(), join(.0))]
    CoreFacetDrift(Vec<CoreFacetDrift>),

    /// The plan removes selectors and removals were not opted into.
    #[error("plan removes {count} selector(s); re-run with removals allowed to apply it")]
    RemovalNotConfirmed { count: usize },

    /// A transient RPC failure that survived every retry.
    #[error("network error: {0}")]
    Network(String),

    /// A transaction reverted or was otherwise rejected deterministically.
    /// `hash` is unset when the node rejected it before broadcast.
    #[error("transaction{} failed: {reason}", .hash.map(|h| format!(" {}", h)).unwrap_or_default())]
    Transaction { hash: Option<B256>, reason: String },

    /// A deterministic address already holds different code.
    #[error("salt collision at {address}: deployed code does not match the artifact, choose a new salt")]
    SaltCollision { address: Address },

    /// A fatal lifecycle hook failed.
    #[error("{point} hook failed: {reason}")]
    Hook { point: HookPoint, reason: String },

    /// The deployment record could not be read or written.
    #[error("deployment record error: {0}")]
    Record(String),
}

fn join(drift: &[CoreFacetDrift]) -> String {
    drift
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Whether this error was raised before any on-chain action.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Build(_)
                | Self::MissingArtifact { .. }
                | Self::Conflict(_)
                | Self::CoreFacetDrift(_)
                | Self::RemovalNotConfirmed { .. }
        ) || matches!(self, Self::Hook { point, .. } if point.is_pre())
    }

    /// Whether the failure may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_planning() {
            EXIT_PLANNING
        } else {
            EXIT_EXECUTION
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Record(err.to_string())
    }
}
