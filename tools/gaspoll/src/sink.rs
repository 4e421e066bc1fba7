//! Reading sinks

use crate::config::OutputConfig;
use crate::poller::DecodedReading;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Destination for completed polling rounds
#[async_trait]
pub trait ReadingSink: Send {
    async fn deliver(&mut self, reading: &DecodedReading) -> Result<()>;
}

/// Emits each reading as one structured log line
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl ReadingSink for TracingSink {
    async fn deliver(&mut self, reading: &DecodedReading) -> Result<()> {
        info!(
            o2 = ?reading.o2,
            co = ?reading.co,
            ch4 = ?reading.ch4,
            co2 = ?reading.co2,
            elapsed_ms = reading.elapsed_ms,
            "Reading"
        );
        Ok(())
    }
}

/// Appends one JSON object per reading to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: File,
}

impl JsonLinesSink {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;

        info!("Readings -> {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

#[async_trait]
impl ReadingSink for JsonLinesSink {
    async fn deliver(&mut self, reading: &DecodedReading) -> Result<()> {
        let mut line = serde_json::to_vec(reading)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Build the sink selected in the configuration
pub async fn from_config(output: &OutputConfig) -> Result<Box<dyn ReadingSink>> {
    Ok(match output {
        OutputConfig::Log => Box::new(TracingSink),
        OutputConfig::JsonLines { path } => Box::new(JsonLinesSink::open(path).await?),
    })
}

/// Keeps readings in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub readings: Vec<DecodedReading>,
}

#[cfg(test)]
#[async_trait]
impl ReadingSink for MemorySink {
    async fn deliver(&mut self, reading: &DecodedReading) -> Result<()> {
        self.readings.push(reading.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(o2: f32) -> DecodedReading {
        DecodedReading {
            timestamp: Utc::now(),
            elapsed_ms: 600,
            o2: Some(o2),
            co: None,
            ch4: Some(0.5),
            co2: Some(415.0),
        }
    }

    #[tokio::test]
    async fn test_json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("readings.jsonl");

        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        sink.deliver(&reading(20.5)).await.unwrap();
        sink.deliver(&reading(20.75)).await.unwrap();
        drop(sink);

        // Reopening appends instead of truncating
        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        sink.deliver(&reading(21.0)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<DecodedReading> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].o2, Some(20.5));
        assert_eq!(lines[1].o2, Some(20.75));
        assert_eq!(lines[2].o2, Some(21.0));
        assert_eq!(lines[0].co, None);
    }

    #[tokio::test]
    async fn test_json_lines_keeps_nan_distinct_from_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let mut nan = reading(20.9);
        nan.ch4 = Some(f32::NAN);

        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        sink.deliver(&nan).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(r#""ch4":"NaN""#), "{}", content);
        let stored: DecodedReading = serde_json::from_str(content.trim_end()).unwrap();
        assert!(stored.ch4.unwrap().is_nan());
        assert_eq!(stored.co, None);
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = from_config(&OutputConfig::JsonLines {
            path: dir.path().join("r.jsonl"),
        })
        .await
        .unwrap();
        sink.deliver(&reading(20.0)).await.unwrap();
        assert!(dir.path().join("r.jsonl").exists());

        let mut sink = from_config(&OutputConfig::Log).await.unwrap();
        sink.deliver(&reading(20.0)).await.unwrap();
    }
}
