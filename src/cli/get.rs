use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use super::ConnectArgs;

pub async fn run(conn: &ConnectArgs, path: String, output: Option<PathBuf>) -> Result<()> {
    let mut client = conn.connect().await?;

    info!("Requesting {}", path);
    let contents = client.get_file(&path).await?;
    info!("Received file data ({} bytes)", contents.len());

    match output {
        Some(target) => {
            tokio::fs::write(&target, contents)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            info!("File saved to {}", target.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&contents)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
