//! Per-connection engine.
//!
//! A session starts in [`SessionState::AwaitingHello`] and only accepts
//! `Hello` there. Once the handshake succeeds it serves requests strictly
//! one at a time and, between requests, forwards queued notifications
//! from its [`Mailbox`]. Both sources are awaited together with
//! `tokio::select!`, so an idle client still gets notifications promptly.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::codec::{self, DecodeError};
use crate::fanout::{EventKind, Mailbox, NotificationEvent};
use crate::handlers::ServerContext;
use crate::protocol::Message;
use crate::transport::{FrameReader, FrameWriter, TransportError};

pub const HANDSHAKE_REQUIRED: &str = "Handshake required";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("undecodable request: {0}")]
    Decode(#[from] DecodeError),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Ready,
    Closed,
}

pub struct Session<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    ctx: Arc<ServerContext>,
    mailbox: Mailbox,
    state: SessionState,
    peer: String,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        ctx: Arc<ServerContext>,
        mailbox: Mailbox,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            writer,
            ctx,
            mailbox,
            state: SessionState::AwaitingHello,
            peer: peer.into(),
        }
    }

    /// Runs until the peer disconnects, a fatal error occurs, or shutdown
    /// is signalled. The mailbox is unregistered when the session is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let result = self.serve(&mut shutdown).await;
        self.state = SessionState::Closed;
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, "socket shutdown failed: {e}");
        }
        result
    }

    async fn serve(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<()> {
        while self.state != SessionState::Closed {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(peer = %self.peer, "shutdown requested, closing session");
                    self.state = SessionState::Closed;
                }
                frame = self.reader.read_frame() => {
                    match frame? {
                        Some(frame) => self.handle_frame(&frame).await?,
                        None => {
                            debug!(peer = %self.peer, "peer closed connection");
                            self.state = SessionState::Closed;
                        }
                    }
                }
                Some(event) = self.mailbox.recv(), if self.state == SessionState::Ready => {
                    self.notify(event).await?;
                    for event in self.mailbox.try_drain() {
                        self.notify(event).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        let request = codec::decode(frame)?;
        debug!(peer = %self.peer, kind = ?request.message_type(), "request");

        let reply = match request {
            Message::Hello {
                protocol_version,
                client_name,
            } => self.handshake(&protocol_version, &client_name),
            request if self.state == SessionState::AwaitingHello => {
                self.send(&Message::HelloError {
                    reason: HANDSHAKE_REQUIRED.to_string(),
                })
                .await?;
                return Err(SessionError::Protocol(format!(
                    "{:?} before handshake",
                    request.message_type()
                )));
            }
            Message::GetSubscriptions => self.ctx.get_subscriptions().await,
            Message::Subscribe { paths } => {
                let reply = self.ctx.subscribe(&self.mailbox, paths).await;
                debug!(
                    peer = %self.peer,
                    subscriptions = self.mailbox.subscriptions().len(),
                    "subscriptions updated"
                );
                reply
            }
            Message::CompareFiles { entries } => self.ctx.compare_files(entries).await,
            Message::GetFile { path } => self.ctx.get_file(path).await,
            other => {
                return Err(SessionError::Protocol(format!(
                    "client sent server message {:?}",
                    other.message_type()
                )));
            }
        };

        self.send(&reply).await
    }

    fn handshake(&mut self, protocol_version: &str, client_name: &str) -> Message {
        let reply = self.ctx.hello(protocol_version);
        match &reply {
            Message::HelloOk { .. } => {
                if self.state == SessionState::AwaitingHello {
                    info!(peer = %self.peer, client = %client_name, "handshake complete");
                }
                self.state = SessionState::Ready;
            }
            _ => warn!(
                peer = %self.peer,
                client = %client_name,
                version = %protocol_version,
                "rejected handshake"
            ),
        }
        reply
    }

    async fn notify(&mut self, event: NotificationEvent) -> Result<()> {
        debug!(peer = %self.peer, path = %event.path, kind = ?event.kind, "notify");
        self.send(&notification_message(event)).await
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        self.writer.write_frame(&codec::encode(msg)).await?;
        Ok(())
    }
}

pub fn notification_message(event: NotificationEvent) -> Message {
    let NotificationEvent {
        kind,
        path,
        dest_path,
        is_dir,
    } = event;

    match (kind, dest_path) {
        (EventKind::Change, _) => Message::NotifyChange { path, is_dir },
        (EventKind::Create, _) => Message::NotifyCreate { path, is_dir },
        (EventKind::Delete, _) => Message::NotifyDelete { path, is_dir },
        (EventKind::Move, Some(dest_path)) => Message::NotifyMove {
            src_path: path,
            dest_path,
            is_dir,
        },
        // a move without a destination left the tree
        (EventKind::Move, None) => Message::NotifyDelete { path, is_dir },
    }
}
