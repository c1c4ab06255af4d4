//! Workspace assembly shared by every subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use keel_pm::config::{Config, MANIFEST_FILE};
use keel_pm::workspace::{DirectoryWorkingCopies, RootManifest};
use keel_pm::Workspace;

use crate::index;

pub struct CommandContext {
    pub config: Config,
    pub workspace: Workspace,
}

pub fn make_context(package_path: &Path, index_path: Option<PathBuf>) -> Result<CommandContext> {
    let config = Config::new(package_path);

    let manifest = RootManifest::from_dir(&config.working_dir, MANIFEST_FILE)
        .with_context(|| format!("could not load {}", config.manifest_path().display()))?;

    let mirrors = config.load_mirrors()?;

    let index_path = index_path.unwrap_or_else(|| config.working_dir.join("keel-index.json"));
    let provider = index::load_provider(&index_path)?;

    let workspace = Workspace::builder()
        .with_pins_path(config.pins_path())
        .with_tools_version(config.tools_version)
        .with_mirrors(mirrors)
        .with_provider(Arc::new(provider))
        .with_working_copies(Box::new(DirectoryWorkingCopies::new(config.checkouts_dir())))
        .with_roots(vec![manifest])
        .build()?;

    Ok(CommandContext { config, workspace })
}
