//! Graph object sinks

use super::graph::GraphObject;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Output file of the transform stage
pub const OBJECTS_FILENAME: &str = "objects.ndjson";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination for graph objects.
///
/// Called strictly one object at a time; a failed write must be dealt with
/// before the next call.
#[async_trait]
pub trait GraphSink: Send {
    async fn write_object(&mut self, object: &GraphObject) -> Result<(), SinkError>;

    /// Flush anything buffered
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct NdjsonSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl NdjsonSink {
    /// Create (or truncate) the output file
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Objects written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl GraphSink for NdjsonSink {
    async fn write_object(&mut self, object: &GraphObject) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(object)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::LogEntry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ndjson_sink_truncates_and_appends_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(OBJECTS_FILENAME);
        std::fs::write(&path, "stale\n").unwrap();

        let mut sink = NdjsonSink::create(&path).await.unwrap();
        sink.write_object(&GraphObject::Log(LogEntry::new("a", "first"))).await.unwrap();
        sink.write_object(&GraphObject::Log(LogEntry::new("b", "second"))).await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.written(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"first\""));
        assert!(lines[1].contains("\"second\""));
    }
}
