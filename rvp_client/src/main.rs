mod client;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use client::RelayClient;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Command-line peer for the rvp rendezvous relay
#[derive(Debug, Parser)]
#[command(name = "rvp-client", version)]
struct Cli {
    /// Base URL of the relay
    #[arg(long, env = "RVP_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a channel and print its name
    New {
        #[arg(long)]
        name: Option<String>,
    },
    /// Hand a payload to whoever reads the channel next
    Write {
        channel: String,
        /// Literal payload
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        /// Read the payload from a file (stdin when neither is given)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Wait for a payload on the channel
    Read {
        channel: String,
        /// Write the payload to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Close the channel
    Close { channel: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let relay = RelayClient::new(&cli.url)?;

    match cli.command {
        Command::New { name } => {
            let name = relay.new_channel(name.as_deref()).await?;
            println!("{name}");
        }
        Command::Write {
            channel,
            data,
            file,
        } => {
            let payload = match (data, file) {
                (Some(data), _) => Bytes::from(data),
                (None, Some(path)) => Bytes::from(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut buf)
                        .await
                        .context("failed to read stdin")?;
                    Bytes::from(buf)
                }
            };
            let envelope = relay.write(&channel, payload).await?;
            println!("{} (code {})", envelope.status, envelope.code);
        }
        Command::Read { channel, output } => {
            let payload = relay.read(&channel).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &payload)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&payload).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Close { channel } => {
            relay.close(&channel).await?;
        }
    }

    Ok(())
}
