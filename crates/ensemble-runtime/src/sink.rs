//! Record sinks: where judgements and ensemble results go.
//!
//! The orchestrator writes each record as soon as it exists and awaits the
//! write, so a slow sink slows the run down instead of growing a buffer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use ensemble_core::{EnsembleResult, Judgement};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Receives records one at a time. Failures are surfaced, never retried.
#[async_trait]
pub trait RecordSink: Send {
    async fn write_judgement(&mut self, judgement: &Judgement) -> Result<(), WriteError>;

    async fn write_ensemble(&mut self, result: &EnsembleResult) -> Result<(), WriteError>;

    async fn flush(&mut self) -> Result<(), WriteError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryRecords {
    judgements: Vec<Judgement>,
    ensembles: Vec<EnsembleResult>,
}

/// Keeps records in memory. Clones share the same storage, so a caller can
/// hand one clone to the orchestrator and read results from another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<MemoryRecords>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn judgements(&self) -> Vec<Judgement> {
        self.records.lock().judgements.clone()
    }

    pub fn ensembles(&self) -> Vec<EnsembleResult> {
        self.records.lock().ensembles.clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_judgement(&mut self, judgement: &Judgement) -> Result<(), WriteError> {
        self.records.lock().judgements.push(judgement.clone());
        Ok(())
    }

    async fn write_ensemble(&mut self, result: &EnsembleResult) -> Result<(), WriteError> {
        self.records.lock().ensembles.push(result.clone());
        Ok(())
    }
}

/// Writes `judgements.ndjson` and `ensemble.ndjson` into a directory.
pub struct NdjsonSink {
    dir: PathBuf,
    judgements: BufWriter<File>,
    ensembles: BufWriter<File>,
}

impl NdjsonSink {
    pub const JUDGEMENTS_FILE: &'static str = "judgements.ndjson";
    pub const ENSEMBLE_FILE: &'static str = "ensemble.ndjson";

    /// Create (or truncate) both files, creating `dir` if needed.
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self, WriteError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let judgements = File::create(dir.join(Self::JUDGEMENTS_FILE)).await?;
        let ensembles = File::create(dir.join(Self::ENSEMBLE_FILE)).await?;

        Ok(Self {
            dir,
            judgements: BufWriter::new(judgements),
            ensembles: BufWriter::new(ensembles),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

async fn write_line<T: Serialize>(out: &mut BufWriter<File>, record: &T) -> Result<(), WriteError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    Ok(())
}

#[async_trait]
impl RecordSink for NdjsonSink {
    async fn write_judgement(&mut self, judgement: &Judgement) -> Result<(), WriteError> {
        write_line(&mut self.judgements, judgement).await
    }

    async fn write_ensemble(&mut self, result: &EnsembleResult) -> Result<(), WriteError> {
        write_line(&mut self.ensembles, result).await
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        self.judgements.flush().await?;
        self.ensembles.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for NdjsonSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSink").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{Example, GenerationParams};

    fn judgement(query_id: &str) -> Judgement {
        let mut j = Judgement::abstention(
            &Example::new(query_id, "d1"),
            &GenerationParams::new("m1", "stub"),
            vec!["parse:no_label".to_string()],
        );
        j.raw_text = "nothing useful".to_string();
        j
    }

    #[tokio::test]
    async fn test_memory_sink_clones_share_records() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_judgement(&judgement("q1")).await.unwrap();
        writer.write_judgement(&judgement("q2")).await.unwrap();

        let stored = sink.judgements();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].query_id, "q2");
        assert!(sink.ensembles().is_empty());
    }

    #[tokio::test]
    async fn test_ndjson_sink_writes_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");

        let mut sink = NdjsonSink::create(&out).await.unwrap();
        sink.write_judgement(&judgement("q1")).await.unwrap();
        sink.write_judgement(&judgement("q2")).await.unwrap();
        sink.flush().await.unwrap();

        let text = std::fs::read_to_string(out.join(NdjsonSink::JUDGEMENTS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let back: Judgement = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back, judgement("q1"));

        let ensembles = std::fs::read_to_string(out.join(NdjsonSink::ENSEMBLE_FILE)).unwrap();
        assert!(ensembles.is_empty());
    }
}
