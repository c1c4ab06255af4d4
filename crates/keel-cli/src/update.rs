use anyhow::Result;
use clap::Args;
use console::style;

use keel_pm::PackageIdentity;

use crate::context::CommandContext;

/// Drop pins and resolve to the newest satisfying versions
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Packages to update; all pinned packages when omitted
    pub packages: Vec<String>,

    /// Compute the resolution without touching checkouts
    #[arg(long)]
    pub skip_apply: bool,
}

pub async fn run(args: UpdateArgs, mut context: CommandContext) -> Result<()> {
    let identities: Vec<PackageIdentity> = args
        .packages
        .iter()
        .map(|p| PackageIdentity::plain(p.as_str()))
        .collect();

    let resolution = context.workspace.update(&identities).await?;
    if !args.skip_apply {
        context.workspace.apply(&resolution)?;
    }

    println!("{}", style("Updated").green().bold());
    for (reference, state) in resolution.bindings() {
        println!("  {} {}", style(reference.identity()).bold(), state);
    }
    Ok(())
}
