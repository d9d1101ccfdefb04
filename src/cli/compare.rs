use anyhow::{Context, Result};
use std::path::PathBuf;
use walkdir::WalkDir;

use super::ConnectArgs;
use crate::protocol::{PathHash, SizedPath};
use crate::tree;

pub async fn run(conn: &ConnectArgs, local_dir: PathBuf) -> Result<()> {
    let local_dir = std::fs::canonicalize(&local_dir).context("Failed to resolve path")?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(&local_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = tree::to_wire_path(&local_dir, entry.path()) else {
            continue;
        };
        let size = u32::try_from(entry.metadata()?.len()).unwrap_or(u32::MAX);
        entries.push(SizedPath { path, size });
    }

    let mut client = conn.connect().await?;
    let hashes = client.compare(entries).await?;
    if hashes.is_empty() {
        println!("No size differences.");
    }
    for entry in &hashes {
        println!("{}", hash_line(entry));
    }
    Ok(())
}

fn hash_line(entry: &PathHash) -> String {
    format!("{} {}", hex::encode(&entry.hash), entry.path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_line_is_hex_then_path() {
        let entry = PathHash {
            path: "docs/a.txt".into(),
            hash: vec![0x00, 0xab, 0x10, 0xff],
        };
        assert_eq!(hash_line(&entry), "00ab10ff docs/a.txt");
    }
}
