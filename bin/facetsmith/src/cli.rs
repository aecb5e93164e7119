use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Deploy and upgrade diamond proxies, deterministically.")]
pub struct Cli {
    /// Verbosity level.
    #[arg(short, long, env = "FACETSMITH_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or the project directory holding `facetsmith.toml`.
    #[arg(short, long, alias = "conf", env = "FACETSMITH_CONFIG", default_value = ".")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Write a starter configuration file.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// Compile the contracts and regenerate the proxy interface.
    Build,

    /// Show what a deployment would change, without sending anything.
    Plan {
        #[command(flatten)]
        targets: TargetArgs,

        #[command(flatten)]
        safety: SafetyArgs,

        /// Compile before planning.
        #[arg(long)]
        build: bool,

        /// Output format.
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Deploy new proxies and upgrade existing ones.
    Deploy {
        #[command(flatten)]
        targets: TargetArgs,

        #[command(flatten)]
        safety: SafetyArgs,

        /// Use the existing artifacts instead of compiling first.
        #[arg(long, env = "FACETSMITH_SKIP_BUILD")]
        skip_build: bool,
    },

    /// Summarise the deployment record.
    Status {
        #[command(flatten)]
        targets: TargetArgs,

        /// Output format.
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Targets to act on. Every configured target when omitted.
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct SafetyArgs {
    /// Allow cuts that remove selectors.
    #[arg(long, env = "FACETSMITH_ALLOW_REMOVALS")]
    pub allow_removals: bool,

    /// Allow removing or replacing selectors of core facets.
    #[arg(long)]
    pub confirm_core_changes: bool,
}
