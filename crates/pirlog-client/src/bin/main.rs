//! pirlog-client binary: publish to and poll a topic
//!
//! ```bash
//! pirlog-client publish --config client.json --message hello --message world
//! pirlog-client poll --config client.json --handle handle.json --rounds 2
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pirlog_client::{ClientConfig, Handle, LogClient, Topic};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pirlog-client")]
#[command(about = "Oblivious publish/subscribe log client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish messages to a fresh topic, one per round, and save its handle
    Publish {
        #[arg(long)]
        config: PathBuf,

        /// Message to publish; repeat for successive rounds
        #[arg(long, required = true)]
        message: Vec<String>,

        /// Where to write the subscriber handle
        #[arg(long, default_value = "handle.json")]
        handle_out: PathBuf,
    },
    /// Poll a saved handle for successive rounds
    Poll {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        handle: PathBuf,

        #[arg(long, default_value_t = 1)]
        rounds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pirlog_client=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Publish {
            config,
            message,
            handle_out,
        } => {
            let client = LogClient::new(ClientConfig::load(&config)?)?;
            let mut topic = Topic::new();
            let handle = topic.handle();
            for message in &message {
                let id = client.publish(&topic, message.as_bytes()).await?;
                tracing::info!(id, seqno = topic.seqno(), "Published");
                topic.advance();
            }
            std::fs::write(&handle_out, serde_json::to_string_pretty(&handle)?)?;
            println!("Wrote handle to {}", handle_out.display());
        }
        Command::Poll {
            config,
            handle,
            rounds,
        } => {
            let client = LogClient::new(ClientConfig::load(&config)?)?;
            let mut subscriber: Handle = serde_json::from_str(&std::fs::read_to_string(&handle)?)?;
            for _ in 0..rounds {
                let messages = client.poll(&mut subscriber).await?;
                for message in messages {
                    println!("{}: {}", subscriber.seqno, String::from_utf8_lossy(&message));
                }
                subscriber.advance();
            }
            std::fs::write(&handle, serde_json::to_string_pretty(&subscriber)?)?;
        }
    }

    Ok(())
}
