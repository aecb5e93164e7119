//! Build collaborator: runs the configured compile command.

use std::{collections::BTreeMap, path::Path, time::Instant};

use crate::{
    error::{Error, Result},
    hooks::run_shell,
};

/// Run `command` in `root`. Any non-zero exit is a build error.
pub async fn build(command: Option<&str>, root: &Path) -> Result<()> {
    let Some(command) = command.filter(|c| !c.trim().is_empty()) else {
        tracing::warn!("No build command configured, using existing artifacts");
        return Ok(());
    };

    tracing::info!(command, "Building contracts");
    let started = Instant::now();

    run_shell(command, root, &BTreeMap::new())
        .await
        .map_err(Error::Build)?;

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Build complete"
    );
    Ok(())
}
