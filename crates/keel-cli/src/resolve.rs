use anyhow::Result;
use clap::Args;
use console::style;

use crate::context::CommandContext;

/// Resolve dependencies, honoring the pins file
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Compute the resolution without touching checkouts
    #[arg(long)]
    pub skip_apply: bool,
}

pub async fn run(args: ResolveArgs, mut context: CommandContext) -> Result<()> {
    let resolution = context.workspace.resolve().await?;
    if !args.skip_apply {
        context.workspace.apply(&resolution)?;
    }

    let bindings = resolution.bindings();
    println!(
        "{} {} package{}",
        style("Resolved").green().bold(),
        bindings.len(),
        if bindings.len() == 1 { "" } else { "s" }
    );
    for (reference, state) in bindings {
        println!("  {} {}", style(reference.identity()).bold(), state);
    }
    Ok(())
}
