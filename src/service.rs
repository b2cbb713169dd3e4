//! Service facade tying configuration, the job manager and the query
//! executor to one search engine.

use crate::engine::{self, SearchEngine};
use crate::error::{ServiceError, ServiceResult};
use crate::index::build::build_index;
use crate::index::job::{JobManager, ReadPermit};
use crate::index::paths::{PathResolver, validate_inputs};
use crate::index::types::{Document, IndexingStatus, SearchResultSet, SourcePathEntry};
use crate::query::QueryExecutor;
use crate::utils::app_data::{AppConfig, get_config_path};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Configuration view with live index facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverview {
    /// File the configuration is persisted to, if any
    pub config_file: Option<String>,
    pub sql_source_paths: Vec<SourcePathEntry>,
    pub include_extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub max_file_size_mb: u64,
    pub bulk_chunk_size: usize,
    pub page_size: usize,
    pub engine: String,
    pub indexing: bool,
    /// Documents currently in the index; `None` when the engine could not be asked
    pub doc_count: Option<u64>,
}

/// The configuration in effect plus its resolved source entries
struct Snapshot {
    config: Arc<AppConfig>,
    entries: Arc<Vec<SourcePathEntry>>,
}

fn read_snapshot(snapshot: &RwLock<Snapshot>) -> (Arc<AppConfig>, Arc<Vec<SourcePathEntry>>) {
    let snapshot = snapshot.read().unwrap_or_else(|e| e.into_inner());
    (Arc::clone(&snapshot.config), Arc::clone(&snapshot.entries))
}

/// Index/search orchestration over one engine
pub struct SearchService {
    snapshot: Arc<RwLock<Snapshot>>,
    config_path: Option<PathBuf>,
    resolver: PathResolver,
    engine: Arc<dyn SearchEngine>,
    jobs: JobManager,
    executor: QueryExecutor,
}

impl SearchService {
    /// Service that keeps configuration changes in memory only
    pub fn new(config: AppConfig, engine: Arc<dyn SearchEngine>, resolver: PathResolver) -> Self {
        let entries = resolver.resolve(&config.sql_source_paths);
        let executor = QueryExecutor::new(Arc::clone(&engine), config.page_size, config.query_timeout());
        Self {
            snapshot: Arc::new(RwLock::new(Snapshot {
                config: Arc::new(config),
                entries: Arc::new(entries),
            })),
            config_path: None,
            resolver,
            engine,
            jobs: JobManager::new(),
            executor,
        }
    }

    /// Persist saved configuration to `path`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Load the user configuration and connect to the configured engine;
    /// relative source paths resolve against the working directory
    pub fn open() -> Result<Self> {
        Self::open_in(PathResolver::from_current_dir())
    }

    pub fn open_in(resolver: PathResolver) -> Result<Self> {
        let config = AppConfig::load()?;
        let config_path = get_config_path()?;
        let engine = engine::from_config(&config)?;
        log::info!(
            "using {} engine, config at {}",
            engine.name(),
            config_path.display()
        );
        Ok(Self::new(config, engine, resolver).with_config_path(config_path))
    }

    fn snapshot(&self) -> (Arc<AppConfig>, Arc<Vec<SourcePathEntry>>) {
        read_snapshot(&self.snapshot)
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.snapshot().0
    }

    /// Accept a full rebuild from the configured directories; returns the
    /// run's generation
    pub fn start_indexing(&self) -> ServiceResult<u64> {
        self.start_indexing_with(None)
    }

    /// Accept a full rebuild, walking `roots` instead of the configured
    /// directories when given. The stored configuration is left untouched.
    pub fn start_indexing_with(&self, roots: Option<Vec<String>>) -> ServiceResult<u64> {
        let roots = match roots {
            Some(roots) => Some(validate_inputs(&roots)?).filter(|r| !r.is_empty()),
            None => None,
        };
        if let Some(roots) = &roots {
            log::info!("indexing run requested for {} roots", roots.len());
        }

        let snapshot = Arc::clone(&self.snapshot);
        let engine = Arc::clone(&self.engine);
        let resolver = self.resolver.clone();
        self.jobs.start(move |on_phase| {
            // Read once admitted readers have drained, so a save that
            // finished before acceptance is always seen
            let (config, _) = read_snapshot(&snapshot);
            let config = match roots {
                Some(roots) => Arc::new(AppConfig {
                    sql_source_paths: roots,
                    ..config.as_ref().clone()
                }),
                None => config,
            };
            build_index(engine.as_ref(), &config, &resolver, on_phase)
        })
    }

    pub fn status(&self) -> IndexingStatus {
        self.jobs.status()
    }

    pub fn is_indexing(&self) -> bool {
        self.jobs.is_running()
    }

    pub fn search(&self, query: &str, offset: usize, highlight: bool) -> ServiceResult<SearchResultSet> {
        self.executor.search(&self.jobs, query, offset, highlight)
    }

    /// Hold off indexing runs while the caller reads; `Locked` during a run
    pub fn read_permit(&self) -> ServiceResult<ReadPermit<'_>> {
        self.jobs.guard()
    }

    pub fn fetch_document(&self, path: &str) -> ServiceResult<Document> {
        self.executor.fetch(&self.jobs, path)
    }

    /// Source entries as resolved when the configuration was last loaded or saved
    pub fn get_config(&self) -> Vec<SourcePathEntry> {
        self.snapshot().1.as_ref().clone()
    }

    /// Replace the source directories, persist, and return the resolved entries.
    ///
    /// Rejected with `Locked` while a run is active.
    pub fn save_config<S: AsRef<str>>(&self, paths: &[S]) -> ServiceResult<Vec<SourcePathEntry>> {
        let cleaned = validate_inputs(paths)?;
        // Holding a read permit keeps a run from starting mid-save
        let _permit = self.jobs.guard()?;

        if let Some(path) = &self.config_path {
            // Rewrite the file as stored, so environment overrides stay out of it
            let mut on_disk = AppConfig::load_from(path)
                .map_err(|e| ServiceError::Config(format!("{:#}", e)))?;
            on_disk.sql_source_paths = cleaned.clone();
            on_disk
                .save_to(path)
                .map_err(|e| ServiceError::Config(format!("{:#}", e)))?;
        }

        let mut config = self.config().as_ref().clone();
        config.sql_source_paths = cleaned;

        let entries = self.store(config);
        log::info!("saved {} source paths", entries.len());
        Ok(entries)
    }

    /// Swap in a new configuration and return its resolved entries
    fn store(&self, config: AppConfig) -> Vec<SourcePathEntry> {
        let entries = self.resolver.resolve(&config.sql_source_paths);
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *snapshot = Snapshot {
            config: Arc::new(config),
            entries: Arc::new(entries.clone()),
        };
        entries
    }

    pub fn config_overview(&self) -> ConfigOverview {
        let (config, entries) = self.snapshot();
        let doc_count = match self.engine.doc_count(config.query_timeout()) {
            Ok(count) => Some(count),
            Err(e) => {
                log::debug!("doc count unavailable: {}", e);
                None
            }
        };

        ConfigOverview {
            config_file: self
                .config_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            sql_source_paths: entries.as_ref().clone(),
            include_extensions: config.normalized_extensions(),
            exclude_dirs: config.exclude_dirs.clone(),
            max_file_size_mb: config.max_file_size_mb,
            bulk_chunk_size: config.effective_chunk_size(),
            page_size: self.executor.page_size(),
            engine: self.engine.name().to_string(),
            indexing: self.is_indexing(),
            doc_count,
        }
    }

    /// Block until the active run (if any) completes
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.jobs.wait_for_idle(timeout)
    }
}
