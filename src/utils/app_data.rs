use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "seekql";
const CONFIG_FILE: &str = "config.json";

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "SEEKQL_CONFIG";

/// Which search engine backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// In-process index, lost when the process exits
    Memory,
    /// External OpenSearch/Elasticsearch node
    #[default]
    OpenSearch,
}

impl EngineBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "mem" => Some(EngineBackend::Memory),
            "opensearch" | "elasticsearch" | "os" => Some(EngineBackend::OpenSearch),
            _ => None,
        }
    }
}

/// Search engine connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: EngineBackend,
    #[serde(default = "default_engine_url")]
    pub url: String,
    #[serde(default = "default_engine_index")]
    pub index: String,
}

fn default_engine_url() -> String {
    "http://127.0.0.1:9200".to_string()
}

fn default_engine_index() -> String {
    "sql_files".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            url: default_engine_url(),
            index: default_engine_index(),
        }
    }
}

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Folders to scan recursively
    #[serde(default)]
    pub sql_source_paths: Vec<String>,

    /// File extensions to index
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,

    /// Directory names (or glob patterns) to skip, case-insensitive
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Files larger than this are not indexed
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Documents per bulk request
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,

    /// Upload several bulk chunks concurrently
    #[serde(default = "default_parallel_chunk_indexing")]
    pub parallel_chunk_indexing: bool,

    /// Maximum number of chunks in flight when parallel uploads are enabled
    /// If 0, uses the number of CPU cores
    #[serde(default = "default_parallel_chunk_count")]
    pub parallel_chunk_count: usize,

    /// Hits per search page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Cap on the error entries kept in a run result
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,

    /// Timeout for each bulk request and index reset
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,

    /// Timeout for each query and document fetch
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_include_extensions() -> Vec<String> {
    vec![".sql".to_string()]
}

fn default_exclude_dirs() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        ".git".to_string(),
        "__pycache__".to_string(),
    ]
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_bulk_chunk_size() -> usize {
    500
}

fn default_parallel_chunk_indexing() -> bool {
    false
}

fn default_parallel_chunk_count() -> usize {
    0 // 0 means use CPU count
}

fn default_page_size() -> usize {
    10
}

fn default_max_reported_errors() -> usize {
    500
}

fn default_bulk_timeout_secs() -> u64 {
    120
}

fn default_query_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sql_source_paths: Vec::new(),
            include_extensions: default_include_extensions(),
            exclude_dirs: default_exclude_dirs(),
            max_file_size_mb: default_max_file_size_mb(),
            bulk_chunk_size: default_bulk_chunk_size(),
            parallel_chunk_indexing: default_parallel_chunk_indexing(),
            parallel_chunk_count: default_parallel_chunk_count(),
            page_size: default_page_size(),
            max_reported_errors: default_max_reported_errors(),
            bulk_timeout_secs: default_bulk_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config with priority: environment variables > config file > defaults
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific file, or return default if not found
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let config: AppConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a specific file, creating parent directories
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file {}", config_path.display()))?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("SEEKQL_ENGINE").and_then(|v| EngineBackend::parse(&v)) {
            self.engine.backend = backend;
        }
        if let Some(url) = lookup("SEEKQL_OS_URL") {
            self.engine.url = url;
        }
        if let Some(index) = lookup("SEEKQL_OS_INDEX") {
            self.engine.index = index;
        }
        if let Some(n) = lookup("SEEKQL_BULK_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.bulk_chunk_size = n;
        }
        if let Some(secs) = lookup("SEEKQL_BULK_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.bulk_timeout_secs = secs;
        }
        if let Some(secs) = lookup("SEEKQL_QUERY_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.query_timeout_secs = secs;
        }
        if let Some(mb) = lookup("SEEKQL_MAX_FILE_SIZE_MB").and_then(|v| v.parse().ok()) {
            self.max_file_size_mb = mb;
        }
    }

    /// Extensions lowercased with a leading dot (`SQL` -> `.sql`)
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.include_extensions
            .iter()
            .map(|ext| ext.trim())
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                let ext = ext.to_lowercase();
                if ext.starts_with('.') { ext } else { format!(".{}", ext) }
            })
            .collect()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Bulk chunk size, never zero
    pub fn effective_chunk_size(&self) -> usize {
        self.bulk_chunk_size.max(1)
    }

    /// Get the effective parallel chunk count (resolves 0 to CPU count)
    pub fn effective_parallel_chunk_count(&self) -> usize {
        if !self.parallel_chunk_indexing {
            1
        } else if self.parallel_chunk_count == 0 {
            num_cpus()
        } else {
            self.parallel_chunk_count
        }
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

/// Get the number of CPUs available
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Get the path to the config file (`SEEKQL_CONFIG` wins over the app data dir)
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var(CONFIG_ENV)
        && !custom.trim().is_empty()
    {
        return Ok(expand_home(custom.trim()));
    }
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Expand a leading `~` to the home directory
pub fn expand_home(input: &str) -> PathBuf {
    if input == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = input.strip_prefix("~/").or_else(|| input.strip_prefix("~\\"))
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert!(config.sql_source_paths.is_empty());
        assert_eq!(config.include_extensions, vec![".sql"]);
        assert_eq!(config.bulk_chunk_size, 500);
        assert_eq!(config.page_size, 10);
        assert!(!config.parallel_chunk_indexing);
        assert_eq!(config.engine.index, "sql_files");
    }

    #[test]
    fn test_app_config_effective_parallel_count() {
        let mut config = AppConfig::default();

        // Disabled means one chunk at a time
        assert_eq!(config.effective_parallel_chunk_count(), 1);

        // 0 should resolve to CPU count
        config.parallel_chunk_indexing = true;
        assert!(config.effective_parallel_chunk_count() >= 1);

        // Explicit value should be used as-is
        config.parallel_chunk_count = 4;
        assert_eq!(config.effective_parallel_chunk_count(), 4);
    }

    #[test]
    fn test_app_config_partial_json() {
        // Should use defaults for missing fields
        let json = r#"{"sql_source_paths": ["./sql"], "engine": {"backend": "memory"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.sql_source_paths, vec!["./sql"]);
        assert_eq!(config.engine.backend, EngineBackend::Memory);
        assert_eq!(config.engine.url, "http://127.0.0.1:9200");
        assert_eq!(config.max_file_size_mb, 10);
    }

    #[test]
    fn test_app_config_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_normalized_extensions() {
        let config = AppConfig {
            include_extensions: vec!["SQL".into(), ".Ddl".into(), "  ".into()],
            ..AppConfig::default()
        };
        assert_eq!(config.normalized_extensions(), vec![".sql", ".ddl"]);
    }

    #[test]
    fn test_overrides_take_priority() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SEEKQL_ENGINE", "memory"),
            ("SEEKQL_BULK_CHUNK_SIZE", "250"),
            ("SEEKQL_QUERY_TIMEOUT", "not-a-number"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.engine.backend, EngineBackend::Memory);
        assert_eq!(config.bulk_chunk_size, 250);
        // Unparseable values are ignored
        assert_eq!(config.query_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            sql_source_paths: vec!["C:/data/sql".into(), "./reports".into()],
            bulk_chunk_size: 100,
            ..AppConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let config = AppConfig {
            bulk_chunk_size: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.effective_chunk_size(), 1);
    }
}
