mod context;
mod edit;
mod index;
mod pin;
mod resolve;
mod unedit;
mod unpin;
mod update;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;

#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "The keel package manager", version)]
struct Cli {
    /// Directory of the root package
    #[arg(long, global = true, default_value = ".")]
    package_path: PathBuf,

    /// Path to the package index; defaults to keel-index.json in the
    /// package directory
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve dependencies, honoring the pins file
    Resolve(resolve::ResolveArgs),

    /// Drop pins and resolve to the newest satisfying versions
    Update(update::UpdateArgs),

    /// Pin a dependency to a specific state
    Pin(pin::PinArgs),

    /// Remove the pin for a dependency
    Unpin(unpin::UnpinArgs),

    /// Put a dependency's checkout into edit mode
    Edit(edit::EditArgs),

    /// Take a dependency's checkout out of edit mode
    Unedit(unedit::UneditArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let context = match context::make_context(&cli.package_path, cli.index) {
        Ok(context) => context,
        Err(e) => return fail(e),
    };

    let result = match cli.command {
        Commands::Resolve(args) => resolve::run(args, context).await,
        Commands::Update(args) => update::run(args, context).await,
        Commands::Pin(args) => pin::run(args, context).await,
        Commands::Unpin(args) => unpin::run(args, context).await,
        Commands::Edit(args) => edit::run(args, context).await,
        Commands::Unedit(args) => unedit::run(args, context).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(error: anyhow::Error) -> ExitCode {
    eprintln!("{} {:#}", style("error:").red().bold(), error);
    ExitCode::FAILURE
}
