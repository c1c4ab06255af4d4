use anyhow::{bail, Result};
use clap::Args;
use console::style;

use keel_pm::identity::{PackageIdentity, Requirement};

use crate::context::CommandContext;

/// Pin a resolved dependency to a specific state
#[derive(Args, Debug)]
pub struct PinArgs {
    /// Identity of the package to pin
    pub package: String,

    /// Pin to an exact version
    #[arg(long, conflicts_with_all = ["branch", "revision"])]
    pub version: Option<String>,

    /// Pin to a branch head
    #[arg(long, conflicts_with_all = ["version", "revision"])]
    pub branch: Option<String>,

    /// Pin to an exact revision
    #[arg(long, conflicts_with_all = ["version", "branch"])]
    pub revision: Option<String>,
}

pub async fn run(args: PinArgs, mut context: CommandContext) -> Result<()> {
    let identity = PackageIdentity::plain(args.package.as_str());

    let requirement = match (args.version, args.branch, args.revision) {
        (Some(version), None, None) => Requirement::Exact(version.parse()?),
        (None, Some(branch), None) => Requirement::Branch(branch),
        (None, None, Some(revision)) => Requirement::Revision(revision),
        _ => bail!("pin requires exactly one of --version, --branch or --revision"),
    };

    context.workspace.pin(&identity, requirement).await?;
    println!("{} '{}'", style("Pinned").green().bold(), identity);
    Ok(())
}
