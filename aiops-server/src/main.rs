mod args;
mod server;

use args::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    aiops_common::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(config) => server::run_server(config).await,
        Commands::PrintConfig(config) => {
            println!("{config:#?}");
            Ok(())
        }
    }
}
