use anyhow::Result;

use super::ConnectArgs;

pub async fn run(conn: &ConnectArgs) -> Result<()> {
    let mut client = conn.connect().await?;
    for entry in client.list().await? {
        if entry.is_dir {
            println!("{}/", entry.path);
        } else {
            println!("{}", entry.path);
        }
    }
    Ok(())
}
