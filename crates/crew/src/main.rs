use clap::Parser;
use tracing::error;

mod cli;
mod commands;

fn main() {
    let parsed = cli::Cli::parse();
    crew_core::init_logging(!parsed.verbose);

    if let Err(e) = commands::run(parsed) {
        error!(event = "cli.command_failed", error = %e);
        eprintln!("crew: {e}");
        std::process::exit(1);
    }
}
