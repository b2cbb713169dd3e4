//! Search engine collaborator.
//!
//! The service treats the engine as an opaque document store keyed by
//! absolute file path. Two implementations exist:
//!
//! - [`memory::MemoryEngine`] - in-process inverted index, used for tests and offline runs
//! - `opensearch::OpenSearchEngine` - HTTP client for an OpenSearch node (feature `opensearch`)

pub mod highlight;
pub mod memory;
#[cfg(feature = "opensearch")]
pub mod opensearch;

use crate::error::EngineError;
use crate::index::types::{CandidateDocument, Document};
use crate::utils::app_data::{AppConfig, EngineBackend};
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryEngine;

/// Outcome for a single document of a bulk write; `Err` carries the engine's message
pub type ItemOutcome = Result<(), String>;

/// A query as sent to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineQuery {
    /// Engine-native query text, passed through unmodified
    pub query: String,
    pub from: usize,
    pub size: usize,
    pub highlight: bool,
}

/// One matching document as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHit {
    pub path: String,
    pub filename: String,
    pub content: String,
    /// Pre-escaped HTML fragments with `<em>` markers; empty when not highlighted
    pub fragments: Vec<String>,
}

/// One page of engine results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineHits {
    /// Exact number of matching documents
    pub total: u64,
    pub hits: Vec<EngineHit>,
}

/// Bulk-write, query and get-by-key access to a search index
pub trait SearchEngine: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Drop and recreate the index
    fn reset(&self, timeout: Duration) -> Result<(), EngineError>;

    /// Write a batch of documents keyed by path; one outcome per document, in order
    fn bulk_write(
        &self,
        docs: &[CandidateDocument],
        timeout: Duration,
    ) -> Result<Vec<ItemOutcome>, EngineError>;

    /// Run a query with exact total counting
    fn query(&self, query: &EngineQuery, timeout: Duration) -> Result<EngineHits, EngineError>;

    /// Fetch a stored document by its key
    fn get(&self, key: &str, timeout: Duration) -> Result<Option<Document>, EngineError>;

    /// Number of stored documents
    fn doc_count(&self, timeout: Duration) -> Result<u64, EngineError>;
}

/// Build the engine selected by the configuration
pub fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn SearchEngine>> {
    match config.engine.backend {
        EngineBackend::Memory => Ok(Arc::new(MemoryEngine::new())),
        #[cfg(feature = "opensearch")]
        EngineBackend::OpenSearch => {
            let engine = opensearch::OpenSearchEngine::new(&config.engine.url, &config.engine.index)?;
            Ok(Arc::new(engine))
        }
        #[cfg(not(feature = "opensearch"))]
        EngineBackend::OpenSearch => {
            log::warn!("built without the `opensearch` feature, using the in-process engine");
            Ok(Arc::new(MemoryEngine::new()))
        }
    }
}
