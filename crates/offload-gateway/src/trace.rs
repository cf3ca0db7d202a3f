use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use offload_common::protocol::error::Result;

use crate::pool::SessionId;

/// Append-only log with one `<elapsed ms>\t<session>` line per completed
/// computation.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    path: PathBuf,
}

impl ExecutionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one trace line. Each line is written with a single call on an
    /// append-mode handle, so concurrent sessions don't interleave.
    pub async fn record(&self, elapsed: Duration, session: SessionId) -> Result<()> {
        let line = format!("{}\t{}\n", elapsed.as_millis(), session);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
