use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A configured source directory after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePathEntry {
    /// The path exactly as the user entered it
    pub input: String,
    /// Canonical absolute path; only set when the directory existed at resolution time
    pub resolved: Option<String>,
    /// Whether the input resolved to an existing directory
    pub exists: bool,
}

/// A file read from disk, waiting to be written to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDocument {
    /// Canonical absolute path, also the document key in the engine
    pub path: String,
    pub filename: String,
    pub content: String,
}

/// Full stored document as returned by a fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub filename: String,
    pub content: String,
}

impl From<CandidateDocument> for Document {
    fn from(doc: CandidateDocument) -> Self {
        Self {
            path: doc.path,
            filename: doc.filename,
            content: doc.content,
        }
    }
}

/// A single failed document within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexError {
    pub path: String,
    pub message: String,
}

impl IndexError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// An item produced by the walker: either a readable document or a file that could not be read
pub type WalkItem = Result<CandidateDocument, IndexError>;

/// Summary of one completed indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResult {
    pub indexed_count: u64,
    /// Exact number of failed items, even when `errors` was truncated
    pub error_count: u64,
    pub errors: Vec<IndexError>,
    /// True when more errors occurred than are listed in `errors`
    #[serde(default)]
    pub errors_truncated: bool,
    /// Files that matched the extension filter
    #[serde(default)]
    pub scanned_count: u64,
    /// Files left out because they exceeded the size limit
    #[serde(default)]
    pub skipped_count: u64,
    pub duration_ms: u64,
    /// Run-level failure that stopped the pipeline before or during the walk
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub started_at: u64,
    #[serde(default)]
    pub finished_at: u64,
}

impl IndexResult {
    /// Result for a run that could not get past its setup
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.failure.is_none()
    }
}

/// Whether an indexing run is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    #[default]
    Idle,
    Running,
}

/// Finer-grained progress of the active run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    #[default]
    Idle,
    /// Accepted, waiting for in-flight reads to drain
    Waiting,
    Resetting,
    Collecting,
    Writing,
}

/// Snapshot of the process-wide indexing status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub state: IndexState,
    pub phase: IndexPhase,
    /// Result of the most recent completed run
    pub last_result: Option<Arc<IndexResult>>,
    /// Number of runs accepted since process start
    pub generation: u64,
}

impl IndexingStatus {
    pub fn is_running(&self) -> bool {
        self.state == IndexState::Running
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub filename: String,
    /// HTML-safe snippet, may contain `<em>` highlight markers
    pub snippet: String,
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub hits: Vec<SearchHit>,
    /// Exact number of matching documents
    pub total: u64,
    pub offset: usize,
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
