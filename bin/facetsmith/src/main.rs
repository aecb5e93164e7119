//! facetsmith deploys and upgrades diamond proxies deterministically across networks.

mod cli;
mod output;

use std::path::Path;

use alloy_core::primitives::B256;
use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, OutputFormat, SafetyArgs};
use facetsmith_deploy::{
    CONFIG_FILENAME, Config, DeployerBuilder, EXIT_PLANNING, Error, build_project, target_statuses,
};

/// Process exit code after Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let code = tokio::select! {
        code = run(cli) => code,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, confirmed steps are kept in the deployment record");
            EXIT_INTERRUPTED
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            err.downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(EXIT_PLANNING)
        }
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    let Cli {
        config: config_path,
        command,
        ..
    } = cli;

    match command {
        Command::Init { force } => init(&config_path, force),

        Command::Build => {
            let (config, root) = Config::load(&config_path)?;
            let (registry, interface) = build_project(&config, &root, true).await?;
            println!(
                "Built {} facet(s), interface at {}",
                registry.facets().len(),
                interface.display()
            );
            Ok(0)
        }

        Command::Plan {
            targets,
            safety,
            build,
            format,
        } => {
            let deployer = builder(&config_path, &targets.targets, safety)?
                .compile(build)
                .build()
                .await?;
            let summary = deployer.plan().await;

            let mut code = summary.exit_code();
            for outcome in &summary.outcomes {
                let Ok(plan) = &outcome.result else {
                    continue;
                };
                match format {
                    OutputFormat::Table => println!("{}", output::plan(plan)),
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(plan)?),
                }
                if let Err(err) = plan.plan.check(deployer.options.allow_removals) {
                    tracing::warn!(target = %plan.target, "{}", err);
                    code = code.max(err.exit_code());
                }
            }
            for (target, err) in summary.failures() {
                tracing::error!(%target, "{}", err);
            }
            Ok(code)
        }

        Command::Deploy {
            targets,
            safety,
            skip_build,
        } => {
            let deployer = builder(&config_path, &targets.targets, safety)?
                .compile(!skip_build)
                .build()
                .await?;
            let summary = deployer.deploy().await;

            for outcome in &summary.outcomes {
                if let Ok(report) = &outcome.result {
                    print!("{}", output::report(report));
                }
            }
            Ok(summary.exit_code())
        }

        Command::Status { targets, format } => {
            let (config, root) = Config::load(&config_path)?;
            let names = selected(&config, &targets.targets)?;
            let statuses = target_statuses(&config, &root, &names)?;

            match format {
                OutputFormat::Table => println!("{}", output::status(&statuses)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
            }
            Ok(0)
        }
    }
}

/// Selected target names, or every configured target.
fn selected(config: &Config, targets: &[String]) -> Result<Vec<String>> {
    if !targets.is_empty() {
        for name in targets {
            if !config.targets.contains_key(name) {
                return Err(Error::Config(format!("unknown target {}", name)).into());
            }
        }
        return Ok(targets.to_vec());
    }

    let all = config.target_names();
    if all.is_empty() {
        return Err(Error::Config("no targets configured".to_string()).into());
    }
    Ok(all)
}

fn builder(config_path: &Path, targets: &[String], safety: SafetyArgs) -> Result<DeployerBuilder> {
    let (config, root) = Config::load(config_path)?;
    let names = selected(&config, targets)?;
    let resolved = config.resolve(&root, &names)?;

    Ok(DeployerBuilder::new(resolved)
        .allow_removals(safety.allow_removals)
        .confirm_core_changes(safety.confirm_core_changes))
}

fn init(config_path: &Path, force: bool) -> Result<i32> {
    let path = if config_path.is_dir() {
        config_path.join(CONFIG_FILENAME)
    } else {
        config_path.to_path_buf()
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    let salt = B256::from(rand::random::<[u8; 32]>());
    Config::starter(salt)
        .save_to_file(&path)
        .context("Failed to write starter configuration")?;

    println!("Wrote {}", path.display());
    Ok(0)
}
