use anyhow::Result;
use clap::Args;
use console::style;

use keel_pm::PackageIdentity;

use crate::context::CommandContext;

/// Remove the pin for a dependency
#[derive(Args, Debug)]
pub struct UnpinArgs {
    /// Identity of the package to unpin
    pub package: String,
}

pub async fn run(args: UnpinArgs, mut context: CommandContext) -> Result<()> {
    let identity = PackageIdentity::plain(args.package.as_str());
    if context.workspace.unpin(&identity)? {
        println!("{} '{}'", style("Unpinned").green().bold(), identity);
    } else {
        println!("'{}' was not pinned", identity);
    }
    Ok(())
}
