//! chatloop CLI binary entry point.

use clap::Parser;
use chatloop::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    chatloop::cli::init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Chat(args) => chatloop::cli::run_chat(args).await,
        Commands::Config(args) => chatloop::cli::show_config(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
