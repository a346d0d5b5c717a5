use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Permission bits for every file the pipelines write
pub const OUTPUT_MODE: u32 = 0o644;

/// Create or truncate `path` and write `data` to it.
/// New files get [`OUTPUT_MODE`] on unix; existing files keep their mode.
pub async fn write_output(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(OUTPUT_MODE);

    let mut file = opts.open(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}
