//! Server CLI entry point (spec §A, "CLI"). Mirrors
//! `examples/original_source/cmd/server-cli/main.go`: load the YAML
//! config, start the `Agent`, run until `Ctrl-C`, shut down.

use std::path::PathBuf;

use clap::Parser;
use distlog::{agent::Agent, config::Config};

#[derive(Parser)]
#[command(name = "distlog-server")]
struct Args {
    /// Path to the node's YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::from_yaml_file(&args.config)?;
    let agent = Agent::start(config).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("received ctrl-c, shutting down");
    agent.shutdown().await?;
    Ok(())
}
