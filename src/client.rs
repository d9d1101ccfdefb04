//! Client side of the protocol, used by the CLI subcommands.

use std::collections::VecDeque;

use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::{self, DecodeError};
use crate::protocol::{
    Message, MessageType, PathEntry, PathFailure, PathHash, SizedPath, PROTOCOL_VERSION,
};
use crate::transport::{FrameReader, FrameWriter, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("undecodable server message: {0}")]
    Decode(#[from] DecodeError),
    #[error("server closed the connection")]
    Closed,
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("{path}: {reason}")]
    File { path: String, reason: String },
    #[error("unexpected {0:?} from server")]
    Unexpected(MessageType),
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct Client<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    /// Notifications that arrived while waiting for a response.
    pending: VecDeque<Message>,
}

impl Client<TcpStream> {
    /// `max_frame_len` bounds what the client accepts; it should be at
    /// least the server's `--max-frame` to receive its largest files.
    pub async fn connect(addr: impl ToSocketAddrs, max_frame_len: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::from)?;
        Ok(Self::new(stream, max_frame_len))
    }
}

impl<S: AsyncRead + AsyncWrite> Client<S> {
    pub fn new(stream: S, max_frame_len: usize) -> Self {
        let (read, write) = split(stream);
        Self {
            reader: FrameReader::new(read, max_frame_len),
            writer: FrameWriter::new(write),
            pending: VecDeque::new(),
        }
    }

    /// Performs the handshake and returns the server's name.
    pub async fn hello(&mut self, client_name: &str) -> Result<String> {
        let reply = self
            .request(Message::Hello {
                protocol_version: PROTOCOL_VERSION.to_string(),
                client_name: client_name.to_string(),
            })
            .await?;
        match reply {
            Message::HelloOk { server_name, .. } => Ok(server_name),
            Message::HelloError { reason } => Err(ClientError::Rejected(reason)),
            other => Err(ClientError::Unexpected(other.message_type())),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<PathEntry>> {
        match self.request(Message::GetSubscriptions).await? {
            Message::SendSubscriptions { entries } => Ok(entries),
            other => Err(ClientError::Unexpected(other.message_type())),
        }
    }

    pub async fn subscribe(
        &mut self,
        paths: Vec<String>,
    ) -> Result<(Vec<PathEntry>, Vec<PathFailure>)> {
        match self.request(Message::Subscribe { paths }).await? {
            Message::SubscribeResponse { ok, failed } => Ok((ok, failed)),
            other => Err(ClientError::Unexpected(other.message_type())),
        }
    }

    pub async fn compare(&mut self, entries: Vec<SizedPath>) -> Result<Vec<PathHash>> {
        match self.request(Message::CompareFiles { entries }).await? {
            Message::SendHashes { entries } => Ok(entries),
            other => Err(ClientError::Unexpected(other.message_type())),
        }
    }

    pub async fn get_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let reply = self
            .request(Message::GetFile {
                path: path.to_string(),
            })
            .await?;
        match reply {
            Message::SendFile { contents, .. } => Ok(contents),
            Message::SendFileError { path, reason } => Err(ClientError::File { path, reason }),
            other => Err(ClientError::Unexpected(other.message_type())),
        }
    }

    /// Waits for the next `Notify*` message, buffered ones first.
    pub async fn next_notification(&mut self) -> Result<Message> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        let msg = self.receive().await?;
        if msg.is_notification() {
            Ok(msg)
        } else {
            Err(ClientError::Unexpected(msg.message_type()))
        }
    }

    /// Sends a request and returns the first non-notification reply.
    pub async fn request(&mut self, msg: Message) -> Result<Message> {
        self.send(&msg).await?;
        loop {
            let reply = self.receive().await?;
            if !reply.is_notification() {
                return Ok(reply);
            }
            self.pending.push_back(reply);
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.writer.write_frame(&codec::encode(msg)).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message> {
        let frame = self.reader.read_frame().await?.ok_or(ClientError::Closed)?;
        let msg = codec::decode(&frame)?;
        if !msg.message_type().is_response() {
            return Err(ClientError::Unexpected(msg.message_type()));
        }
        Ok(msg)
    }
}
