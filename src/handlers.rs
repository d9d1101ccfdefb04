//! Request handlers. Each turns one request into exactly one response;
//! application failures are reported inside the response.

use std::fs::Metadata;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::codec;
use crate::fanout::Mailbox;
use crate::hash::HashPolicy;
use crate::protocol::{Message, PathEntry, PathFailure, PathHash, SizedPath, PROTOCOL_VERSION};
use crate::transport::DEFAULT_MAX_FRAME_LEN;
use crate::tree::{self, PathError};

pub const REASON_IS_DIRECTORY: &str = "Path is a directory";
pub const REASON_NOT_FOUND: &str = "File doesn't exist";
pub const REASON_INVALID_PATH: &str = "Invalid path";
pub const REASON_UNREADABLE: &str = "Could not read file";
pub const REASON_TOO_LARGE: &str = "File too large";

/// Read-only state shared by every connection.
pub struct ServerContext {
    pub root: PathBuf,
    pub server_name: String,
    pub hash: Box<dyn HashPolicy>,
    /// Largest frame a response may occupy.
    max_frame_len: u64,
}

impl ServerContext {
    pub fn new(root: PathBuf, server_name: impl Into<String>, hash: Box<dyn HashPolicy>) -> Self {
        Self {
            root,
            server_name: server_name.into(),
            hash,
            max_frame_len: DEFAULT_MAX_FRAME_LEN as u64,
        }
    }

    /// Frames never exceed `u32::MAX` whatever limit is configured.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = (max_frame_len as u64).min(u64::from(u32::MAX));
        self
    }

    pub fn hello(&self, protocol_version: &str) -> Message {
        if protocol_version == PROTOCOL_VERSION {
            Message::HelloOk {
                protocol_version: PROTOCOL_VERSION.to_string(),
                server_name: self.server_name.clone(),
            }
        } else {
            Message::HelloError {
                reason: format!(
                    "Unsupported protocol version {protocol_version:?}, server speaks {PROTOCOL_VERSION:?}"
                ),
            }
        }
    }

    pub async fn get_subscriptions(&self) -> Message {
        let root = self.root.clone();
        let entries = match tokio::task::spawn_blocking(move || tree::list_entries(&root)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("directory listing task failed: {e}");
                vec![PathEntry::new(tree::ROOT_PATH, true)]
            }
        };
        Message::SendSubscriptions { entries }
    }

    /// Partial success is normal: each path succeeds or fails on its own.
    pub async fn subscribe(&self, mailbox: &Mailbox, paths: Vec<String>) -> Message {
        let mut ok = Vec::new();
        let mut failed = Vec::new();

        for path in paths {
            match self.locate(&path).await {
                Ok((_, meta)) => {
                    mailbox.subscribe(tree::normalize(&path));
                    ok.push(PathEntry {
                        path,
                        is_dir: meta.is_dir(),
                    });
                }
                Err(e) => {
                    debug!(%path, "subscribe failed: {e}");
                    failed.push(PathFailure {
                        error_code: e.code(),
                        path,
                    });
                }
            }
        }

        Message::SubscribeResponse { ok, failed }
    }

    /// Hashes every regular file whose size differs from the client's.
    pub async fn compare_files(&self, entries: Vec<SizedPath>) -> Message {
        let mut hashes = Vec::new();

        for entry in entries {
            let Ok((path, meta)) = self.locate(&entry.path).await else {
                continue;
            };
            if !meta.is_file() || meta.len() == u64::from(entry.size) {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(contents) => hashes.push(PathHash {
                    hash: self.hash.digest(&contents),
                    path: entry.path,
                }),
                Err(e) => debug!(path = %entry.path, "could not hash file: {e}"),
            }
        }

        Message::SendHashes { entries: hashes }
    }

    pub async fn get_file(&self, path: String) -> Message {
        let reason = match self.locate(&path).await {
            Err(PathError::Invalid(_)) => REASON_INVALID_PATH,
            Err(PathError::NotFound(_) | PathError::Io(..)) => REASON_NOT_FOUND,
            Ok((_, meta)) if meta.is_dir() => REASON_IS_DIRECTORY,
            Ok((_, meta)) if !self.fits_in_frame(&path, meta.len()) => REASON_TOO_LARGE,
            Ok((resolved, _)) => match tokio::fs::read(&resolved).await {
                // the file may have grown since it was stat'ed
                Ok(contents) if !self.fits_in_frame(&path, contents.len() as u64) => {
                    REASON_TOO_LARGE
                }
                Ok(contents) => return Message::SendFile { path, contents },
                Err(e) => {
                    warn!(%path, "failed to read file: {e}");
                    REASON_UNREADABLE
                }
            },
        };

        Message::SendFileError {
            path,
            reason: reason.to_string(),
        }
    }

    fn fits_in_frame(&self, path: &str, contents_len: u64) -> bool {
        codec::send_file_len(path, contents_len) <= self.max_frame_len
    }

    async fn locate(&self, wire_path: &str) -> Result<(PathBuf, Metadata), PathError> {
        let root = self.root.clone();
        let owned = wire_path.to_string();
        tokio::task::spawn_blocking(move || tree::locate(&root, &owned))
            .await
            .unwrap_or_else(|e| Err(PathError::Io(wire_path.to_string(), e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::Fanout;
    use crate::hash::Blake3;
    use crate::protocol::ErrorCode;

    fn context(root: &std::path::Path) -> ServerContext {
        ServerContext::new(root.to_path_buf(), "test server", Box::new(Blake3))
    }

    #[test]
    fn hello_checks_version() {
        let ctx = context(std::path::Path::new("."));
        assert_eq!(
            ctx.hello(PROTOCOL_VERSION),
            Message::HelloOk {
                protocol_version: PROTOCOL_VERSION.into(),
                server_name: "test server".into(),
            }
        );
        assert!(matches!(ctx.hello("v0"), Message::HelloError { reason } if !reason.is_empty()));
    }

    #[tokio::test]
    async fn subscribe_partitions_existing_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let ctx = context(dir.path());
        let fanout = Fanout::new();
        let mailbox = fanout.register();

        let reply = ctx
            .subscribe(&mailbox, vec!["a.txt".into(), "missing.txt".into()])
            .await;
        assert_eq!(
            reply,
            Message::SubscribeResponse {
                ok: vec![PathEntry::new("a.txt", false)],
                failed: vec![PathFailure {
                    path: "missing.txt".into(),
                    error_code: ErrorCode::NOT_FOUND,
                }],
            }
        );
        let subs = mailbox.subscriptions();
        assert!(subs.contains("a.txt"));
        assert!(!subs.contains("missing.txt"));
    }

    #[tokio::test]
    async fn subscribe_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let fanout = Fanout::new();
        let mailbox = fanout.register();

        let reply = ctx
            .subscribe(&mailbox, vec!["../outside".into(), "./".into()])
            .await;
        assert_eq!(
            reply,
            Message::SubscribeResponse {
                ok: vec![PathEntry::new("./", true)],
                failed: vec![PathFailure {
                    path: "../outside".into(),
                    error_code: ErrorCode::INVALID_PATH,
                }],
            }
        );
        assert!(mailbox.subscriptions().contains("."));
    }

    #[tokio::test]
    async fn get_file_returns_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let ctx = context(dir.path());

        assert_eq!(
            ctx.get_file("a.txt".into()).await,
            Message::SendFile {
                path: "a.txt".into(),
                contents: b"hi".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn get_file_errors_are_typed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = context(dir.path());

        let cases = [
            ("nodir", REASON_NOT_FOUND),
            ("sub", REASON_IS_DIRECTORY),
            ("../etc/passwd", REASON_INVALID_PATH),
        ];
        for (path, expected) in cases {
            assert_eq!(
                ctx.get_file(path.into()).await,
                Message::SendFileError {
                    path: path.into(),
                    reason: expected.into(),
                }
            );
        }
    }

    #[tokio::test]
    async fn get_file_refuses_files_larger_than_a_frame() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0u8; 4096]).unwrap();
        std::fs::write(dir.path().join("small.txt"), "hi").unwrap();
        let ctx = context(dir.path()).with_max_frame_len(1024);

        assert_eq!(
            ctx.get_file("big.bin".into()).await,
            Message::SendFileError {
                path: "big.bin".into(),
                reason: REASON_TOO_LARGE.into(),
            }
        );
        assert!(matches!(
            ctx.get_file("small.txt".into()).await,
            Message::SendFile { .. }
        ));
    }

    #[test]
    fn frame_limit_is_capped_at_u32() {
        let ctx = context(std::path::Path::new(".")).with_max_frame_len(usize::MAX);
        assert!(!ctx.fits_in_frame("huge", u64::from(u32::MAX)));
        assert!(ctx.fits_in_frame("huge", 1024));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn get_file_does_not_follow_symlinks_out_of_root() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();
        let ctx = context(dir.path());

        assert_eq!(
            ctx.get_file("link".into()).await,
            Message::SendFileError {
                path: "link".into(),
                reason: REASON_INVALID_PATH.into(),
            }
        );
    }

    #[tokio::test]
    async fn get_subscriptions_lists_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let ctx = context(dir.path());

        assert_eq!(
            ctx.get_subscriptions().await,
            Message::SendSubscriptions {
                entries: vec![PathEntry::new(".", true), PathEntry::new("a.txt", false)],
            }
        );
    }

    #[tokio::test]
    async fn compare_files_hashes_only_differing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("same.txt"), "four").unwrap();
        std::fs::write(dir.path().join("grown.txt"), "longer now").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = context(dir.path());

        let request = ["same.txt", "grown.txt", "sub", "missing"]
            .into_iter()
            .map(|path| SizedPath {
                path: path.into(),
                size: 4,
            })
            .collect();

        assert_eq!(
            ctx.compare_files(request).await,
            Message::SendHashes {
                entries: vec![PathHash {
                    path: "grown.txt".into(),
                    hash: Blake3.digest(b"longer now"),
                }],
            }
        );
    }
}
