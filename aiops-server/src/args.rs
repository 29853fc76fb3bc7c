use aiops_common::config::Config;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "aiops-server", about = "AIOps control plane for Kubernetes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane: watchloop, alert ingress, and the approval/executor pipeline.
    Serve(Config),
    /// Print the effective configuration and exit, without starting anything.
    PrintConfig(Config),
}
