use crate::engine::highlight::plain_snippet;
use crate::engine::{EngineHit, EngineQuery, SearchEngine};
use crate::error::{ServiceError, ServiceResult};
use crate::index::job::{ReadGate, ReadPermit};
use crate::index::types::{Document, SearchHit, SearchResultSet};
use std::sync::Arc;
use std::time::Duration;

/// Characters of plain content used when no highlight is available
const PLAIN_SNIPPET_CHARS: usize = 200;

/// Joins highlight fragments of one hit
const FRAGMENT_SEPARATOR: &str = "...";

/// Read side of the service: search and document fetch
pub struct QueryExecutor {
    engine: Arc<dyn SearchEngine>,
    page_size: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(engine: Arc<dyn SearchEngine>, page_size: usize, timeout: Duration) -> Self {
        Self {
            engine,
            page_size: page_size.max(1),
            timeout,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Run `query` and return the page starting at `offset`.
    ///
    /// The query text goes to the engine untouched; syntax errors come back
    /// as [`ServiceError::Query`] with the engine's message.
    pub fn search(
        &self,
        gate: &dyn ReadGate,
        query: &str,
        offset: usize,
        highlight: bool,
    ) -> ServiceResult<SearchResultSet> {
        validate_query(query)?;

        let _permit = ReadPermit::acquire(gate)?;
        let request = EngineQuery {
            query: query.to_string(),
            from: offset,
            size: self.page_size,
            highlight,
        };
        let found = self.engine.query(&request, self.timeout)?;

        Ok(SearchResultSet {
            hits: found.hits.into_iter().map(|hit| to_search_hit(hit, highlight)).collect(),
            total: found.total,
            offset,
        })
    }

    /// Full stored document for an exact path
    pub fn fetch(&self, gate: &dyn ReadGate, path: &str) -> ServiceResult<Document> {
        if path.is_empty() {
            return Err(ServiceError::Validation("path must not be empty".to_string()));
        }

        let _permit = ReadPermit::acquire(gate)?;
        self.engine
            .get(path, self.timeout)?
            .ok_or_else(|| ServiceError::NotFound(path.to_string()))
    }
}

/// Empty or whitespace-only queries are invalid, never "match all"
pub fn validate_query(query: &str) -> ServiceResult<()> {
    if query.trim().is_empty() {
        return Err(ServiceError::Validation("query must not be empty".to_string()));
    }
    Ok(())
}

fn to_search_hit(hit: EngineHit, highlight: bool) -> SearchHit {
    let snippet = if highlight && !hit.fragments.is_empty() {
        hit.fragments.join(FRAGMENT_SEPARATOR)
    } else {
        plain_snippet(&hit.content, PLAIN_SNIPPET_CHARS)
    };

    SearchHit {
        path: hit.path,
        filename: hit.filename,
        snippet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineHits, ItemOutcome, MemoryEngine};
    use crate::error::EngineError;
    use crate::index::job::JobManager;
    use crate::index::types::CandidateDocument;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Engine whose reads always time out
    #[derive(Default)]
    struct SlowEngine {
        queries: AtomicUsize,
        gets: AtomicUsize,
    }

    impl SearchEngine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }
        fn reset(&self, _: Duration) -> Result<(), EngineError> {
            Ok(())
        }
        fn bulk_write(&self, docs: &[CandidateDocument], _: Duration) -> Result<Vec<ItemOutcome>, EngineError> {
            Ok(docs.iter().map(|_| Ok(())).collect())
        }
        fn query(&self, _: &EngineQuery, timeout: Duration) -> Result<EngineHits, EngineError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Timeout(format!("{:?}", timeout)))
        }
        fn get(&self, _: &str, timeout: Duration) -> Result<Option<Document>, EngineError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Timeout(format!("{:?}", timeout)))
        }
        fn doc_count(&self, _: Duration) -> Result<u64, EngineError> {
            Ok(0)
        }
    }

    const T: Duration = Duration::from_secs(1);

    fn executor() -> QueryExecutor {
        let engine = MemoryEngine::new();
        let docs: Vec<CandidateDocument> = (0..15)
            .map(|i| CandidateDocument {
                path: format!("/db/{:02}.sql", i),
                filename: format!("{:02}.sql", i),
                content: format!("SELECT * FROM orders WHERE id > {} AND note <> '<b>'", i),
            })
            .collect();
        engine.bulk_write(&docs, T).unwrap();
        QueryExecutor::new(Arc::new(engine), 10, T)
    }

    #[test]
    fn test_empty_query_is_validation_error() {
        let jobs = JobManager::new();
        let exec = executor();
        for q in ["", "   ", "\t\n"] {
            let err = exec.search(&jobs, q, 0, true).unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }
    }

    #[test]
    fn test_pages_with_exact_total() {
        let jobs = JobManager::new();
        let exec = executor();

        let first = exec.search(&jobs, "orders", 0, true).unwrap();
        assert_eq!(first.total, 15);
        assert_eq!(first.hits.len(), 10);
        assert_eq!(first.offset, 0);

        let second = exec.search(&jobs, "orders", 10, true).unwrap();
        assert_eq!(second.total, 15);
        assert_eq!(second.hits.len(), 5);
        assert_eq!(second.hits[0].path, "/db/10.sql");
    }

    #[test]
    fn test_repeated_search_is_identical() {
        let jobs = JobManager::new();
        let exec = executor();
        let a = exec.search(&jobs, "orders AND id", 5, true).unwrap();
        let b = exec.search(&jobs, "orders AND id", 5, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_snippets_highlighted_and_escaped() {
        let jobs = JobManager::new();
        let exec = executor();

        let hit = &exec.search(&jobs, "orders", 0, true).unwrap().hits[0];
        assert!(hit.snippet.contains("<em>orders</em>"));
        assert!(hit.snippet.contains("&lt;b&gt;"));

        let plain = &exec.search(&jobs, "orders", 0, false).unwrap().hits[0];
        assert!(!plain.snippet.contains("<em>"));
        assert!(plain.snippet.starts_with("SELECT * FROM orders"));
        assert!(plain.snippet.contains("&lt;&gt;"));
    }

    #[test]
    fn test_malformed_query_surfaces_engine_message() {
        let jobs = JobManager::new();
        let err = executor().search(&jobs, "orders AND (", 0, true).unwrap_err();
        match err {
            ServiceError::Query(msg) => assert!(msg.contains("position")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fetch() {
        let jobs = JobManager::new();
        let exec = executor();

        let doc = exec.fetch(&jobs, "/db/03.sql").unwrap();
        assert_eq!(doc.filename, "03.sql");
        assert!(doc.content.contains("id > 3"));

        let err = exec.fetch(&jobs, "/nonexistent/path.sql").unwrap_err();
        assert_eq!(err, ServiceError::NotFound("/nonexistent/path.sql".to_string()));
    }

    #[test]
    fn test_read_timeouts_surface_as_transient_without_retry() {
        let jobs = JobManager::new();
        let engine = Arc::new(SlowEngine::default());
        let exec = QueryExecutor::new(engine.clone(), 10, T);

        let err = exec.search(&jobs, "orders", 0, true).unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.queries.load(Ordering::SeqCst), 1);

        let err = exec.fetch(&jobs, "/db/03.sql").unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.gets.load(Ordering::SeqCst), 1);

        // The permit is released after a failed read
        assert!(jobs.start(|_| Default::default()).is_ok());
        assert!(jobs.wait_for_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_reads_locked_during_run() {
        let jobs = JobManager::new();
        let exec = executor();
        let (tx, rx) = mpsc::channel::<()>();
        jobs.start(move |_| {
            let _ = rx.recv();
            Default::default()
        })
        .unwrap();

        assert_eq!(exec.search(&jobs, "orders", 0, true).unwrap_err(), ServiceError::Locked);
        assert_eq!(exec.fetch(&jobs, "/db/03.sql").unwrap_err(), ServiceError::Locked);

        tx.send(()).unwrap();
        assert!(jobs.wait_for_idle(Duration::from_secs(5)));
        assert!(exec.search(&jobs, "orders", 0, true).is_ok());
    }
}
