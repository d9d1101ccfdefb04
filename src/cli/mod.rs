use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tracing::info;

use crate::client::Client;
use crate::transport::DEFAULT_MAX_FRAME_LEN;

mod compare;
mod get;
mod info;
mod listen;
mod ls;
pub mod serve;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print version and protocol information
    Info,
    /// Run the syncd daemon and serve a directory
    Serve(serve::ServeArgs),
    /// List every path the server offers for subscription
    Ls {
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Download a file from the server
    Get {
        #[command(flatten)]
        conn: ConnectArgs,
        /// Path relative to the server root
        path: String,
        /// Where to write the file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Subscribe to paths and print change notifications until interrupted
    Listen {
        #[command(flatten)]
        conn: ConnectArgs,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Ask the server which files differ in size from a local directory
    Compare {
        #[command(flatten)]
        conn: ConnectArgs,
        local_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:2137")]
    addr: String,
    /// Client name sent in the handshake
    #[arg(long, default_value = "syncd-cli")]
    name: String,
    /// Largest frame accepted from the server, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame: usize,
}

impl ConnectArgs {
    async fn connect(&self) -> Result<Client<TcpStream>> {
        let mut client = Client::connect(self.addr.as_str(), self.max_frame)
            .await
            .with_context(|| format!("Failed to connect to {}", self.addr))?;
        let server_name = client.hello(&self.name).await?;
        info!("Connected to {} ({})", self.addr, server_name);
        Ok(client)
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Info => info::run(),
            Commands::Serve(args) => serve::run(args).await?,
            Commands::Ls { conn } => ls::run(&conn).await?,
            Commands::Get { conn, path, output } => get::run(&conn, path, output).await?,
            Commands::Listen { conn, paths } => listen::run(&conn, paths).await?,
            Commands::Compare { conn, local_dir } => compare::run(&conn, local_dir).await?,
        }
        Ok(())
    }
}
