//! Message catalogue for the syncd wire protocol.
//!
//! Requests use tags below `0x80`, responses and unsolicited
//! notifications use tags from `0x80` up. The byte layout of each
//! message lives in [`crate::codec`].

use std::fmt;

/// Version string exchanged in `Hello` / `HelloOk`.
pub const PROTOCOL_VERSION: &str = "v1";

pub const DEFAULT_PORT: u16 = 2137;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 0x00,
    GetSubscriptions = 0x01,
    Subscribe = 0x02,
    CompareFiles = 0x03,
    GetFile = 0x04,

    HelloOk = 0x80,
    HelloError = 0x81,
    SendSubscriptions = 0x82,
    SubscribeResponse = 0x83,
    SendHashes = 0x84,
    SendFile = 0x85,
    SendFileError = 0x86,
    NotifyChange = 0x87,
    NotifyDelete = 0x88,
    NotifyCreate = 0x89,
    NotifyMove = 0x8A,
}

impl MessageType {
    pub const ALL: [MessageType; 16] = [
        MessageType::Hello,
        MessageType::GetSubscriptions,
        MessageType::Subscribe,
        MessageType::CompareFiles,
        MessageType::GetFile,
        MessageType::HelloOk,
        MessageType::HelloError,
        MessageType::SendSubscriptions,
        MessageType::SubscribeResponse,
        MessageType::SendHashes,
        MessageType::SendFile,
        MessageType::SendFileError,
        MessageType::NotifyChange,
        MessageType::NotifyDelete,
        MessageType::NotifyCreate,
        MessageType::NotifyMove,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.tag() == tag)
    }

    /// True for everything the server sends (responses and notifications).
    pub fn is_response(self) -> bool {
        self.tag() & 0x80 != 0
    }
}

/// Failure reason attached to a path in `SubscribeResponse`.
///
/// Stored as the raw wire value so codes this build does not know survive a
/// decode/encode cycle unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const NOT_FOUND: Self = Self(1);
    pub const INVALID_PATH: Self = Self(2);
    pub const IO: Self = Self(3);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NOT_FOUND => f.write_str("not found"),
            Self::INVALID_PATH => f.write_str("invalid path"),
            Self::IO => f.write_str("I/O error"),
            Self(raw) => write!(f, "error code {raw}"),
        }
    }
}

/// `{path, isDir}` record used by listings and subscribe successes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub path: String,
    pub is_dir: bool,
}

impl PathEntry {
    pub fn new(path: impl Into<String>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            is_dir,
        }
    }
}

/// `{path, size}` record a client sends in `CompareFiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedPath {
    pub path: String,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    pub path: String,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHash {
    pub path: String,
    pub hash: Vec<u8>,
}

/// One protocol message. Record counts are implied by vector lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello {
        protocol_version: String,
        client_name: String,
    },
    GetSubscriptions,
    Subscribe {
        paths: Vec<String>,
    },
    CompareFiles {
        entries: Vec<SizedPath>,
    },
    GetFile {
        path: String,
    },
    HelloOk {
        protocol_version: String,
        server_name: String,
    },
    HelloError {
        reason: String,
    },
    SendSubscriptions {
        entries: Vec<PathEntry>,
    },
    SubscribeResponse {
        ok: Vec<PathEntry>,
        failed: Vec<PathFailure>,
    },
    SendHashes {
        entries: Vec<PathHash>,
    },
    SendFile {
        path: String,
        contents: Vec<u8>,
    },
    SendFileError {
        path: String,
        reason: String,
    },
    NotifyChange {
        path: String,
        is_dir: bool,
    },
    NotifyDelete {
        path: String,
        is_dir: bool,
    },
    NotifyCreate {
        path: String,
        is_dir: bool,
    },
    NotifyMove {
        src_path: String,
        dest_path: String,
        is_dir: bool,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello { .. } => MessageType::Hello,
            Message::GetSubscriptions => MessageType::GetSubscriptions,
            Message::Subscribe { .. } => MessageType::Subscribe,
            Message::CompareFiles { .. } => MessageType::CompareFiles,
            Message::GetFile { .. } => MessageType::GetFile,
            Message::HelloOk { .. } => MessageType::HelloOk,
            Message::HelloError { .. } => MessageType::HelloError,
            Message::SendSubscriptions { .. } => MessageType::SendSubscriptions,
            Message::SubscribeResponse { .. } => MessageType::SubscribeResponse,
            Message::SendHashes { .. } => MessageType::SendHashes,
            Message::SendFile { .. } => MessageType::SendFile,
            Message::SendFileError { .. } => MessageType::SendFileError,
            Message::NotifyChange { .. } => MessageType::NotifyChange,
            Message::NotifyDelete { .. } => MessageType::NotifyDelete,
            Message::NotifyCreate { .. } => MessageType::NotifyCreate,
            Message::NotifyMove { .. } => MessageType::NotifyMove,
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Message::NotifyChange { .. }
                | Message::NotifyDelete { .. }
                | Message::NotifyCreate { .. }
                | Message::NotifyMove { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(MessageType::Hello.tag(), 0x00);
        assert_eq!(MessageType::GetFile.tag(), 0x04);
        assert_eq!(MessageType::HelloOk.tag(), 0x80);
        assert_eq!(MessageType::NotifyMove.tag(), 0x8A);
        for ty in MessageType::ALL {
            assert_eq!(MessageType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(MessageType::from_tag(0x05), None);
        assert_eq!(MessageType::from_tag(0xFF), None);
    }

    #[test]
    fn request_and_response_ranges() {
        assert!(!MessageType::Subscribe.is_response());
        assert!(MessageType::SendFile.is_response());
        assert!(MessageType::NotifyCreate.is_response());
    }

    #[test]
    fn error_code_keeps_unknown_values() {
        assert_eq!(ErrorCode(1), ErrorCode::NOT_FOUND);
        assert_eq!(ErrorCode::INVALID_PATH.0, 2);
        assert_eq!(ErrorCode::IO.to_string(), "I/O error");
        assert_eq!(ErrorCode(77).to_string(), "error code 77");
    }
}
