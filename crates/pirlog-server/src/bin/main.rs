//! pirlog-server binary: replica or layout coordinator
//!
//! ```bash
//! pirlog-server coordinator --config coordinator.json
//! pirlog-server replica --config replica.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pirlog_core::LogConfig;
use pirlog_server::metrics::init_prometheus_recorder;
use pirlog_server::{CoordinatorBuilder, CoordinatorConfig, ReplicaConfig, ServerBuilder};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pirlog-server")]
#[command(about = "Oblivious publish/subscribe log server")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve one replica group
    Replica {
        /// Replica config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Override the listen address
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Run the layout coordinator
    Coordinator {
        /// Coordinator config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Override the listen address
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Only build snapshots on POST /snapshot
        #[arg(long)]
        manual_snapshots: bool,
    },
    /// Write a default log geometry to a file
    InitLog {
        #[arg(long, default_value = "log.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pirlog_server=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Replica { config, addr } => {
            let config = ReplicaConfig::load(&config)?;
            let mut builder = ServerBuilder::new(config).metrics(init_prometheus_recorder()?);
            if let Some(addr) = addr {
                builder = builder.addr(addr);
            }
            builder.build()?.run().await?;
        }
        Command::Coordinator {
            config,
            addr,
            manual_snapshots,
        } => {
            let config = CoordinatorConfig::load(&config)?;
            let mut builder = CoordinatorBuilder::new(config).metrics(init_prometheus_recorder()?);
            if let Some(addr) = addr {
                builder = builder.addr(addr);
            }
            if manual_snapshots {
                builder = builder.manual_snapshots();
            }
            builder.build()?.run().await?;
        }
        Command::InitLog { out } => {
            LogConfig::default().save(&out)?;
            println!("Wrote default log config to {}", out.display());
        }
    }

    Ok(())
}
