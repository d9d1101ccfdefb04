//! TCP listener: one session task per accepted connection.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fanout::Fanout;
use crate::handlers::ServerContext;
use crate::hash::HashAlgorithm;
use crate::protocol::DEFAULT_PORT;
use crate::session::{Session, SessionError};
use crate::transport::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_LEN};

/// How long open sessions get to finish after shutdown before being aborted.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub hash: HashAlgorithm,
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            server_name: default_server_name(),
            hash: HashAlgorithm::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

pub fn default_server_name() -> String {
    format!("syncd server v{}", env!("CARGO_PKG_VERSION"))
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    fanout: Fanout,
    max_frame_len: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub async fn bind(config: ServerConfig, fanout: Fanout) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let ctx = ServerContext::new(config.root, config.server_name, config.hash.policy())
            .with_max_frame_len(config.max_frame_len);
        debug!(root = %ctx.root.display(), hash = ctx.hash.name(), "server context ready");

        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
            fanout,
            max_frame_len: config.max_frame_len,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sending on this stops the accept loop and every open session.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn serve(self) -> io::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    let connections = self.fanout.connection_count() + 1;
                    info!(%peer, connections, "client connected");
                    sessions.spawn(serve_connection(
                        stream,
                        peer,
                        self.ctx.clone(),
                        self.fanout.clone(),
                        self.max_frame_len,
                        self.shutdown_tx.subscribe(),
                    ));
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        drop(self.listener);
        info!(open = sessions.len(), "no longer accepting connections");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open = sessions.len(), "aborting sessions that did not close in time");
            sessions.abort_all();
        }
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    fanout: Fanout,
    max_frame_len: usize,
    shutdown: broadcast::Receiver<()>,
) {
    let (read, write) = stream.into_split();
    let session = Session::new(
        FrameReader::new(read, max_frame_len),
        FrameWriter::new(write),
        ctx,
        fanout.register(),
        peer.to_string(),
    );

    match session.run(shutdown).await {
        Ok(()) => info!(%peer, "client disconnected"),
        Err(SessionError::Transport(e)) => debug!(%peer, "connection dropped: {e}"),
        Err(e) => warn!(%peer, "closing connection: {e}"),
    }
}
