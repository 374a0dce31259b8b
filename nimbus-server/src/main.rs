//! Nimbus CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nimbus_config::ConfigLoader;
use nimbus_execution::{run_worker, WorkerOptions};
use nimbus_server::{init_logging, Service};

#[derive(Parser)]
#[command(name = "nimbus", version, about = "Function-as-a-service control plane")]
struct Cli {
    /// Configuration file (YAML); falls back to NIMBUS_* env variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane: API layer, project workers, task manager
    Serve,

    /// Worker process entry point; spawned by the master, speaks the IPC
    /// protocol on stdout
    #[command(hide = true)]
    Worker {
        /// Project this worker owns
        #[arg(long)]
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load(cli.config.as_ref())?;
    init_logging(&config.logging)?;

    match cli.command {
        Command::Serve => {
            let service = Service::build(config, cli.config).await?;
            service.run_until_shutdown().await
        }
        Command::Worker { project } => {
            let options = WorkerOptions::from_config(project, &config);
            run_worker(options).await?;
            Ok(())
        }
    }
}
