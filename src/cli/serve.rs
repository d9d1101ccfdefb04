use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::{error, info};

use crate::{
    fanout::Fanout,
    hash::HashAlgorithm,
    protocol::DEFAULT_PORT,
    server::{self, Server, ServerConfig},
    transport::DEFAULT_MAX_FRAME_LEN,
    watcher::FileWatcher,
};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Directory to serve and watch
    #[arg(long, env = "SYNCD_ROOT", default_value = ".")]
    root: PathBuf,
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Name reported in HelloOk
    #[arg(long, default_value_t = server::default_server_name())]
    server_name: String,
    /// Digest used to answer CompareFiles
    #[arg(long, value_enum, default_value_t = HashAlgorithm::Blake3)]
    hash: HashAlgorithm,
    /// Largest frame accepted from a client, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame: usize,
}

impl ServeArgs {
    fn into_config(self) -> Result<ServerConfig> {
        let root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("Failed to resolve root {}", self.root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Root {} is not a directory", root.display());
        }
        Ok(ServerConfig {
            root,
            host: self.host,
            port: self.port,
            server_name: self.server_name,
            hash: self.hash,
            max_frame_len: self.max_frame,
        })
    }
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = args.into_config()?;
    let fanout = Fanout::new();
    let watcher = FileWatcher::new(&config.root).context("Failed to watch root")?;
    info!("Serving {}", config.root.display());

    let server = Server::bind(config.clone(), fanout.clone())
        .await
        .with_context(|| format!("Failed to listen on {}:{}", config.host, config.port))?;
    info!("Listening on {}", server.local_addr()?);

    let shutdown = server.shutdown_signal();
    let watch_task = tokio::spawn(watcher.forward(fanout, shutdown.subscribe()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        let _ = shutdown.send(());
    });

    server.serve().await?;
    watch_task.await?;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            crate::cli::Commands::Serve(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults() {
        let args = serve_args(&["syncd", "serve"]);
        assert_eq!(args.port, 2137);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.hash, HashAlgorithm::Blake3);
        assert_eq!(args.max_frame, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "").unwrap();
        let root = dir.path().to_str().unwrap();
        let file = file.to_str().unwrap();

        let config = serve_args(&["syncd", "serve", "--root", root, "--hash", "xxh3"])
            .into_config()
            .unwrap();
        assert_eq!(config.root, dir.path().canonicalize().unwrap());
        assert_eq!(config.hash, HashAlgorithm::Xxh3);

        assert!(serve_args(&["syncd", "serve", "--root", file]).into_config().is_err());
    }
}
