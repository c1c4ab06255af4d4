use anyhow::Result;
use clap::Args;
use console::style;

use keel_pm::PackageIdentity;

use crate::context::CommandContext;

/// Take a dependency's checkout out of edit mode
#[derive(Args, Debug)]
pub struct UneditArgs {
    /// Identity of the package to stop editing
    pub package: String,
}

pub async fn run(args: UneditArgs, mut context: CommandContext) -> Result<()> {
    let identity = PackageIdentity::plain(args.package.as_str());
    context.workspace.unedit(&identity)?;
    println!("{} '{}'", style("Stopped editing").green().bold(), identity);
    Ok(())
}
