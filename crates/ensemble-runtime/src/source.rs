//! Example sources: lazy, finite, restartable sequences of [`Example`]s.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ensemble_core::Example;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read examples: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid example on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub type ExampleIter = Box<dyn Iterator<Item = Result<Example, SourceError>> + Send>;

/// Something the orchestrator can read examples from.
///
/// `open` starts from the beginning every time it is called. The returned
/// iterator may block; the orchestrator drives it off the async runtime.
pub trait ExampleSource: Send + Sync {
    fn open(&self) -> Result<ExampleIter, SourceError>;
}

/// In-memory examples.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    examples: Arc<Vec<Example>>,
}

impl VecSource {
    pub fn new(examples: Vec<Example>) -> Self {
        Self {
            examples: Arc::new(examples),
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

impl ExampleSource for VecSource {
    fn open(&self) -> Result<ExampleIter, SourceError> {
        let examples = self.examples.clone();
        Ok(Box::new(
            (0..examples.len()).map(move |i| Ok(examples[i].clone())),
        ))
    }
}

impl From<Vec<Example>> for VecSource {
    fn from(examples: Vec<Example>) -> Self {
        Self::new(examples)
    }
}

/// One JSON object per line. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExampleSource for NdjsonSource {
    fn open(&self) -> Result<ExampleIter, SourceError> {
        let reader = BufReader::new(File::open(&self.path)?);

        Ok(Box::new(reader.lines().enumerate().filter_map(
            |(idx, line)| match line {
                Err(e) => Some(Err(SourceError::Io(e))),
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(
                    serde_json::from_str::<Example>(&line)
                        .map_err(|source| SourceError::Parse { line: idx + 1, source }),
                ),
            },
        )))
    }
}
