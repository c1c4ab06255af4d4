use anyhow::Result;
use clap::Args;
use console::style;

use keel_pm::PackageIdentity;

use crate::context::CommandContext;

/// Put a dependency's checkout into edit mode
#[derive(Args, Debug)]
pub struct EditArgs {
    /// Identity of the package to edit
    pub package: String,

    /// Create this branch for the edit
    #[arg(long)]
    pub branch: Option<String>,

    /// Check out this revision for the edit
    #[arg(long)]
    pub revision: Option<String>,
}

pub async fn run(args: EditArgs, mut context: CommandContext) -> Result<()> {
    let identity = PackageIdentity::plain(args.package.as_str());
    context
        .workspace
        .edit(&identity, args.branch.as_deref(), args.revision.as_deref())?;
    println!("{} '{}'", style("Editing").green().bold(), identity);
    Ok(())
}
