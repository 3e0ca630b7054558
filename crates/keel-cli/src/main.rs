mod commands;
mod opts;
mod output;
mod seed;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::check::CheckArgs;
use commands::phase::PhaseArgs;
use commands::run::RunArgs;
use opts::OutputOpts;

#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Keel control plane")]
struct Cli {
    #[command(flatten)]
    opts: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control plane over an in-memory store
    Run(RunArgs),

    /// Audit a population file for identity violations
    Check(CheckArgs),

    /// Evaluate the phase machine for a set of conditions
    Phase(PhaseArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    match cli.command {
        Command::Run(args) => commands::run::cmd_run(opts, &args).await,
        Command::Check(args) => commands::check::cmd_check(opts, &args),
        Command::Phase(args) => commands::phase::cmd_phase(opts, &args),
    }
}
