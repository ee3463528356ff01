//! Client CLI entry point (spec §A, "CLI"). Mirrors
//! `examples/original_source/cmd/client-cli/main.go`: resolve the
//! cluster through one seed address, then issue a single write or read.

use std::time::Duration;

use clap::{Parser, Subcommand};
use distlog::client::{Picker, Resolver};
use distlog::pb::{log_client::LogClient, ReadRequest, Record, WriteRequest};

#[derive(Parser)]
#[command(name = "distlog-client")]
struct Args {
    /// Address of any known cluster member, `host:port`.
    #[arg(short, long)]
    seed: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Write { value: String },
    Read { offset: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (_resolver, servers_rx) = Resolver::start(args.seed, Duration::from_secs(5));
    // Give the first resolution a moment to land before picking.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let picker = Picker::new(servers_rx);

    match args.command {
        Command::Write { value } => {
            let channel = picker.write_channel().await?;
            let mut client = LogClient::new(channel);
            let response = client
                .write(WriteRequest {
                    record: Some(Record {
                        value: value.into_bytes(),
                        offset: 0,
                        server: String::new(),
                    }),
                })
                .await?;
            println!("wrote at offset {}", response.into_inner().offset);
        }
        Command::Read { offset } => {
            let channel = picker.read_channel().await?;
            let mut client = LogClient::new(channel);
            let response = client.read(ReadRequest { offset }).await?;
            if let Some(record) = response.into_inner().record {
                println!("{}", String::from_utf8_lossy(&record.value));
            }
        }
    }

    Ok(())
}
