use anyhow::Result;
use tracing::{info, warn};

use super::ConnectArgs;
use crate::protocol::Message;

pub async fn run(conn: &ConnectArgs, paths: Vec<String>) -> Result<()> {
    let mut client = conn.connect().await?;

    let (ok, failed) = client.subscribe(paths).await?;
    for entry in &ok {
        info!("Subscribed to {}", entry.path);
    }
    for failure in &failed {
        warn!("Could not subscribe to {}: {}", failure.path, failure.error_code);
    }
    if ok.is_empty() {
        anyhow::bail!("None of the requested paths could be subscribed");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            msg = client.next_notification() => match msg? {
                Message::NotifyChange { path, is_dir } => print_event("changed", &path, is_dir),
                Message::NotifyCreate { path, is_dir } => print_event("created", &path, is_dir),
                Message::NotifyDelete { path, is_dir } => print_event("deleted", &path, is_dir),
                Message::NotifyMove { src_path, dest_path, is_dir } => {
                    print_event("moved", &format!("{src_path} -> {dest_path}"), is_dir)
                }
                other => warn!("Ignoring {:?}", other.message_type()),
            },
        }
    }
    Ok(())
}

fn print_event(action: &str, path: &str, is_dir: bool) {
    let kind = if is_dir { "dir" } else { "file" };
    println!("{action:>8} {kind:<4} {path}");
}
