//! facetsmith-deploy - Deployment library for diamond proxies.
//!
//! This crate reconciles the facets compiled from a project's sources with the
//! selector table of a deployed diamond proxy, and executes the resulting cut
//! safely across any number of networks and wallets.

mod builder;
pub use builder::{DeployerBuilder, build_project};

mod deployer;
pub use deployer::{Deployer, Summary, TargetOutcome, TargetStatus, target_statuses};

pub mod chain;
pub mod compile;
pub mod composition;
pub mod config;
pub mod deterministic;
pub mod diamond;
pub mod error;
pub mod executor;
pub mod fs;
pub mod hooks;
pub mod interface;
pub mod planner;
pub mod record;
pub mod registry;
pub mod rpc;
pub mod selector;

pub use composition::{Composition, Facet};
pub use config::{CONFIG_FILENAME, Config, ResolvedConfig};
pub use error::{EXIT_EXECUTION, EXIT_PLANNING, Error, Result};
pub use executor::{Target, TargetExecutor, TargetPlan, TargetReport};
pub use planner::{CutAction, CutOperation, Plan, Planner};
pub use record::{RecordStore, Stage, TargetRecord};
pub use selector::Selector;
