//! Binary encoding of [`Message`] values.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! +--------+---------------------------+
//! | tag    | fields in declared order  |
//! | 1 byte | variable                  |
//! +--------+---------------------------+
//! ```
//!
//! Field encodings:
//! - string / bytes: `len:u32` followed by `len` bytes
//! - bool: one byte, `1` on encode, any non-zero value decodes as true
//! - error code: `u16`
//! - size: `u32`
//! - repeated record: `count:u32` followed by `count` tuples, no per-tuple prefix
//!
//! Decoding never yields a partial message: it either returns a complete
//! [`Message`] or a [`DecodeError`]. Bytes after the last field are ignored.

use bytes::BufMut;

use crate::protocol::{
    ErrorCode, Message, MessageType, PathEntry, PathFailure, PathHash, SizedPath,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("message truncated while reading {0}")]
    TruncatedMessage(&'static str),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

const LEN_PREFIX: usize = 4;

pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.put_u8(msg.message_type().tag());

    match msg {
        Message::Hello {
            protocol_version,
            client_name,
        } => {
            put_string(&mut buf, protocol_version);
            put_string(&mut buf, client_name);
        }
        Message::GetSubscriptions => {}
        Message::Subscribe { paths } => {
            put_count(&mut buf, paths.len());
            for path in paths {
                put_string(&mut buf, path);
            }
        }
        Message::CompareFiles { entries } => {
            put_count(&mut buf, entries.len());
            for entry in entries {
                put_string(&mut buf, &entry.path);
                buf.put_u32(entry.size);
            }
        }
        Message::GetFile { path } => put_string(&mut buf, path),
        Message::HelloOk {
            protocol_version,
            server_name,
        } => {
            put_string(&mut buf, protocol_version);
            put_string(&mut buf, server_name);
        }
        Message::HelloError { reason } => put_string(&mut buf, reason),
        Message::SendSubscriptions { entries } => put_path_entries(&mut buf, entries),
        Message::SubscribeResponse { ok, failed } => {
            put_path_entries(&mut buf, ok);
            put_count(&mut buf, failed.len());
            for failure in failed {
                put_string(&mut buf, &failure.path);
                buf.put_u16(failure.error_code.0);
            }
        }
        Message::SendHashes { entries } => {
            put_count(&mut buf, entries.len());
            for entry in entries {
                put_string(&mut buf, &entry.path);
                put_bytes(&mut buf, &entry.hash);
            }
        }
        Message::SendFile { path, contents } => {
            put_string(&mut buf, path);
            put_bytes(&mut buf, contents);
        }
        Message::SendFileError { path, reason } => {
            put_string(&mut buf, path);
            put_string(&mut buf, reason);
        }
        Message::NotifyChange { path, is_dir }
        | Message::NotifyDelete { path, is_dir }
        | Message::NotifyCreate { path, is_dir } => {
            put_string(&mut buf, path);
            buf.put_u8(u8::from(*is_dir));
        }
        Message::NotifyMove {
            src_path,
            dest_path,
            is_dir,
        } => {
            put_string(&mut buf, src_path);
            put_string(&mut buf, dest_path);
            buf.put_u8(u8::from(*is_dir));
        }
    }

    buf
}

/// Encoded size of a `SendFile` for `path` carrying `contents_len` bytes,
/// computed without building the message.
pub fn send_file_len(path: &str, contents_len: u64) -> u64 {
    (1 + LEN_PREFIX + path.len() + LEN_PREFIX) as u64 + contents_len
}

pub fn decode(data: &[u8]) -> Result<Message> {
    let mut fields = Fields { buf: data };
    let tag = fields.u8("message type")?;
    let ty = MessageType::from_tag(tag).ok_or(DecodeError::UnknownMessageType(tag))?;

    let msg = match ty {
        MessageType::Hello => Message::Hello {
            protocol_version: fields.string("protocol version")?,
            client_name: fields.string("client name")?,
        },
        MessageType::GetSubscriptions => Message::GetSubscriptions,
        MessageType::Subscribe => {
            let count = fields.count("path count", LEN_PREFIX)?;
            let mut paths = Vec::with_capacity(count);
            for _ in 0..count {
                paths.push(fields.string("path")?);
            }
            Message::Subscribe { paths }
        }
        MessageType::CompareFiles => {
            let count = fields.count("entry count", LEN_PREFIX + 4)?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(SizedPath {
                    path: fields.string("path")?,
                    size: fields.u32("size")?,
                });
            }
            Message::CompareFiles { entries }
        }
        MessageType::GetFile => Message::GetFile {
            path: fields.string("path")?,
        },
        MessageType::HelloOk => Message::HelloOk {
            protocol_version: fields.string("protocol version")?,
            server_name: fields.string("server name")?,
        },
        MessageType::HelloError => Message::HelloError {
            reason: fields.string("reason")?,
        },
        MessageType::SendSubscriptions => Message::SendSubscriptions {
            entries: fields.path_entries()?,
        },
        MessageType::SubscribeResponse => {
            let ok = fields.path_entries()?;
            let count = fields.count("failure count", LEN_PREFIX + 2)?;
            let mut failed = Vec::with_capacity(count);
            for _ in 0..count {
                failed.push(PathFailure {
                    path: fields.string("path")?,
                    error_code: ErrorCode(fields.u16("error code")?),
                });
            }
            Message::SubscribeResponse { ok, failed }
        }
        MessageType::SendHashes => {
            let count = fields.count("hash count", 2 * LEN_PREFIX)?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(PathHash {
                    path: fields.string("path")?,
                    hash: fields.bytes("hash")?.to_vec(),
                });
            }
            Message::SendHashes { entries }
        }
        MessageType::SendFile => Message::SendFile {
            path: fields.string("path")?,
            contents: fields.bytes("contents")?.to_vec(),
        },
        MessageType::SendFileError => Message::SendFileError {
            path: fields.string("path")?,
            reason: fields.string("reason")?,
        },
        MessageType::NotifyChange => Message::NotifyChange {
            path: fields.string("path")?,
            is_dir: fields.bool("is_dir")?,
        },
        MessageType::NotifyDelete => Message::NotifyDelete {
            path: fields.string("path")?,
            is_dir: fields.bool("is_dir")?,
        },
        MessageType::NotifyCreate => Message::NotifyCreate {
            path: fields.string("path")?,
            is_dir: fields.bool("is_dir")?,
        },
        MessageType::NotifyMove => Message::NotifyMove {
            src_path: fields.string("source path")?,
            dest_path: fields.string("destination path")?,
            is_dir: fields.bool("is_dir")?,
        },
    };

    Ok(msg)
}

fn put_count(buf: &mut Vec<u8>, count: usize) {
    buf.put_u32(count as u32);
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn put_path_entries(buf: &mut Vec<u8>, entries: &[PathEntry]) {
    put_count(buf, entries.len());
    for entry in entries {
        put_string(buf, &entry.path);
        buf.put_u8(u8::from(entry.is_dir));
    }
}

/// Bounds-checked cursor over a message payload.
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(DecodeError::TruncatedMessage(field));
        }
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.array::<1>(field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16> {
        self.array(field).map(u16::from_be_bytes)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        self.array(field).map(u32::from_be_bytes)
    }

    fn bool(&mut self, field: &'static str) -> Result<bool> {
        Ok(self.u8(field)? != 0)
    }

    fn bytes(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let len = self.u32(field)? as usize;
        self.take(len, field)
    }

    fn string(&mut self, field: &'static str) -> Result<String> {
        Ok(String::from_utf8_lossy(self.bytes(field)?).into_owned())
    }

    /// Reads a record count, rejecting counts the remaining payload cannot
    /// possibly hold so a hostile count never drives a large allocation.
    fn count(&mut self, field: &'static str, min_record_len: usize) -> Result<usize> {
        let count = self.u32(field)? as usize;
        if count.saturating_mul(min_record_len) > self.buf.len() {
            return Err(DecodeError::TruncatedMessage(field));
        }
        Ok(count)
    }

    fn path_entries(&mut self) -> Result<Vec<PathEntry>> {
        let count = self.count("entry count", LEN_PREFIX + 1)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(PathEntry {
                path: self.string("path")?,
                is_dir: self.bool("is_dir")?,
            });
        }
        Ok(entries)
    }
}
