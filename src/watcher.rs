use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind as FsEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace};

use crate::fanout::{EventKind, Fanout, NotificationEvent};
use crate::tree;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// Recursive watcher over the served root. Dropping it stops watching.
pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1024);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // receiver gone means the daemon is shutting down
                let _ = tx.blocking_send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
            rx,
        })
    }

    pub async fn next_event(&mut self) -> Option<notify::Result<Event>> {
        self.rx.recv().await
    }

    /// Publishes every change to `fanout` until shutdown is signalled.
    /// The underlying watcher is dropped, and so stopped, on return.
    pub async fn forward(mut self, fanout: Fanout, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                res = self.next_event() => match res {
                    Some(Ok(event)) => {
                        for notification in to_notifications(&self.root, &event) {
                            let delivered = fanout.publish(&notification);
                            trace!(
                                path = %notification.path,
                                kind = ?notification.kind,
                                delivered,
                                "published change"
                            );
                        }
                    }
                    Some(Err(e)) => error!("Watch error: {}", e),
                    None => break,
                },
            }
        }
        debug!("watcher stopped");
    }
}

/// Maps one raw filesystem event to zero or more notifications. Paths
/// outside `root` are dropped.
pub fn to_notifications(root: &Path, event: &Event) -> Vec<NotificationEvent> {
    let wire = |path: &PathBuf| tree::to_wire_path(root, path);

    match event.kind {
        FsEventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let is_dir = event.paths[1].is_dir();
            match (wire(&event.paths[0]), wire(&event.paths[1])) {
                (Some(src), Some(dest)) => vec![NotificationEvent::moved(src, dest, is_dir)],
                (Some(src), None) => vec![NotificationEvent::new(EventKind::Delete, src, is_dir)],
                (None, Some(dest)) => vec![NotificationEvent::new(EventKind::Create, dest, is_dir)],
                (None, None) => Vec::new(),
            }
        }
        FsEventKind::Create(kind) => {
            simple(event, EventKind::Create, wire, |path| match kind {
                CreateKind::Folder => true,
                CreateKind::File => false,
                _ => path.is_dir(),
            })
        }
        FsEventKind::Remove(kind) => simple(event, EventKind::Delete, wire, |_| {
            matches!(kind, RemoveKind::Folder)
        }),
        FsEventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            simple(event, EventKind::Delete, wire, |_| false)
        }
        FsEventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            simple(event, EventKind::Create, wire, Path::is_dir)
        }
        FsEventKind::Modify(ModifyKind::Name(_)) => {
            let mut out = Vec::new();
            for path in &event.paths {
                if let Some(wire_path) = wire(path) {
                    let kind = if path.exists() {
                        EventKind::Create
                    } else {
                        EventKind::Delete
                    };
                    out.push(NotificationEvent::new(kind, wire_path, path.is_dir()));
                }
            }
            out
        }
        FsEventKind::Modify(_) => simple(event, EventKind::Change, wire, Path::is_dir),
        FsEventKind::Access(_) | FsEventKind::Any | FsEventKind::Other => Vec::new(),
    }
}

fn simple(
    event: &Event,
    kind: EventKind,
    wire: impl Fn(&PathBuf) -> Option<String>,
    is_dir: impl Fn(&Path) -> bool,
) -> Vec<NotificationEvent> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let wire_path = wire(path)?;
            Some(NotificationEvent::new(kind, wire_path, is_dir(path)))
        })
        .collect()
}
