//! Destinations for wiretap lines.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

/// Receives one serialized event per call, without the trailing newline.
#[async_trait]
pub trait WireSink: Send {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;

    async fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Appends lines to a file, creating it (and its directory) if needed.
pub struct FileSink {
    file: tokio::fs::File,
}

impl FileSink {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file })
    }
}

#[async_trait]
impl WireSink for FileSink {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.file.write_all(&buf).await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

/// Keeps lines in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl WireSink for MemorySink {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.lines
            .lock()
            .map_err(|_| std::io::Error::other("memory sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}
