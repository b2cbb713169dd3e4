//! Chunked bulk writes with per-document accounting.

use crate::engine::{ItemOutcome, SearchEngine};
use crate::error::EngineError;
use crate::index::types::{CandidateDocument, IndexError, IndexResult, WalkItem, unix_millis};
use crate::utils::app_data::AppConfig;
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Pushes walk output to the engine in fixed-size chunks
pub struct BulkIndexer<'a> {
    engine: &'a dyn SearchEngine,
    chunk_size: usize,
    timeout: Duration,
    /// Chunks uploaded concurrently; 1 means sequential
    parallel_chunks: usize,
    max_reported_errors: usize,
}

impl<'a> BulkIndexer<'a> {
    pub fn new(engine: &'a dyn SearchEngine, chunk_size: usize) -> Self {
        let defaults = AppConfig::default();
        Self {
            engine,
            chunk_size: chunk_size.max(1),
            timeout: defaults.bulk_timeout(),
            parallel_chunks: 1,
            max_reported_errors: defaults.max_reported_errors,
        }
    }

    pub fn from_config(engine: &'a dyn SearchEngine, config: &AppConfig) -> Self {
        Self::new(engine, config.effective_chunk_size())
            .with_timeout(config.bulk_timeout())
            .with_parallel_chunks(config.effective_parallel_chunk_count())
            .with_max_reported_errors(config.max_reported_errors)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallel_chunks(mut self, count: usize) -> Self {
        self.parallel_chunks = count.max(1);
        self
    }

    pub fn with_max_reported_errors(mut self, max: usize) -> Self {
        self.max_reported_errors = max;
        self
    }

    /// Write every document; failures are recorded and never stop the run
    pub fn index<I>(&self, items: I) -> IndexResult
    where
        I: IntoIterator<Item = WalkItem>,
    {
        let started_at = unix_millis();
        let start = Instant::now();
        let mut tally = Tally::new(self.max_reported_errors);
        let mut pending: Vec<Vec<CandidateDocument>> = Vec::with_capacity(self.parallel_chunks);
        let mut chunk: Vec<CandidateDocument> = Vec::with_capacity(self.chunk_size);
        let mut chunk_no = 0usize;

        for item in items {
            match item {
                Ok(doc) => chunk.push(doc),
                Err(err) => tally.error(err),
            }

            if chunk.len() == self.chunk_size {
                pending.push(std::mem::replace(&mut chunk, Vec::with_capacity(self.chunk_size)));
                if pending.len() == self.parallel_chunks {
                    self.flush(&mut pending, &mut chunk_no, &mut tally);
                }
            }
        }

        if !chunk.is_empty() {
            pending.push(chunk);
        }
        self.flush(&mut pending, &mut chunk_no, &mut tally);

        IndexResult {
            indexed_count: tally.indexed,
            error_count: tally.error_count,
            errors: tally.errors,
            errors_truncated: tally.truncated,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
            finished_at: unix_millis(),
            ..IndexResult::default()
        }
    }

    /// Upload buffered chunks and fold their outcomes in chunk order
    fn flush(&self, pending: &mut Vec<Vec<CandidateDocument>>, chunk_no: &mut usize, tally: &mut Tally) {
        if pending.is_empty() {
            return;
        }

        let outcomes: Vec<Result<Vec<ItemOutcome>, EngineError>> = if pending.len() > 1 {
            pending.par_iter().map(|c| self.write_chunk(c)).collect()
        } else {
            pending.iter().map(|c| self.write_chunk(c)).collect()
        };

        for (docs, outcome) in pending.drain(..).zip(outcomes) {
            *chunk_no += 1;
            tally.apply(*chunk_no, &docs, outcome);
        }
    }

    fn write_chunk(&self, docs: &[CandidateDocument]) -> Result<Vec<ItemOutcome>, EngineError> {
        self.engine.bulk_write(docs, self.timeout)
    }
}

/// Running counts for one index call
struct Tally {
    indexed: u64,
    error_count: u64,
    errors: Vec<IndexError>,
    truncated: bool,
    max_errors: usize,
}

impl Tally {
    fn new(max_errors: usize) -> Self {
        Self {
            indexed: 0,
            error_count: 0,
            errors: Vec::new(),
            truncated: false,
            max_errors,
        }
    }

    fn error(&mut self, err: IndexError) {
        self.error_count += 1;
        if self.errors.len() < self.max_errors {
            self.errors.push(err);
        } else {
            self.truncated = true;
        }
    }

    fn apply(
        &mut self,
        chunk_no: usize,
        docs: &[CandidateDocument],
        outcome: Result<Vec<ItemOutcome>, EngineError>,
    ) {
        match outcome {
            Ok(outcomes) => {
                let before = self.error_count;
                for (i, doc) in docs.iter().enumerate() {
                    match outcomes.get(i) {
                        Some(Ok(())) => self.indexed += 1,
                        Some(Err(message)) => self.error(IndexError::new(&doc.path, message.as_str())),
                        None => self.error(IndexError::new(&doc.path, "no outcome reported by engine")),
                    }
                }
                log::debug!(
                    "chunk {}: {} documents, {} failed",
                    chunk_no,
                    docs.len(),
                    self.error_count - before
                );
            }
            Err(e) => {
                log::warn!("chunk {} ({} documents) failed: {}", chunk_no, docs.len(), e);
                let message = format!("bulk request failed: {}", e);
                for doc in docs {
                    self.error(IndexError::new(&doc.path, message.as_str()));
                }
            }
        }
    }
}
