//! Unix index server daemon
//!
//! Owns a [`SearchService`] and serves requests over a Unix socket.

use crate::index::paths::PathResolver;
use crate::index::types::SearchResultSet;
use crate::query::validate_query;
use crate::server::protocol::{
    Request, Response, SearchResponse, ServerInfo, read_message, write_message,
};
use crate::server::{get_pid_path, get_socket_path};
use crate::service::SearchService;
use crate::utils::app_data::get_app_data_dir;
use anyhow::{Context, Result};
use lru::LruCache;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::num::NonZeroUsize;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// LRU cache size for search results
const CACHE_SIZE: NonZeroUsize = NonZeroUsize::new(128).unwrap();

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    offset: usize,
    highlight: bool,
}

/// A cached page and the index generation it was computed against
struct CachedPage {
    generation: u64,
    results: SearchResultSet,
}

/// Statistics for the server
struct ServerStats {
    start_time: Instant,
    queries_served: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_served: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

/// The index server daemon
pub struct IndexServer {
    service: SearchService,
    cache: Mutex<LruCache<CacheKey, CachedPage>>,
    /// Server statistics
    stats: ServerStats,
    /// Shutdown flag
    shutdown: AtomicBool,
    socket_path: PathBuf,
    pid_path: PathBuf,
}

impl IndexServer {
    /// Create a new index server wrapped in Arc
    pub fn new(service: SearchService) -> Arc<Self> {
        Self::with_paths(service, get_socket_path(), get_pid_path())
    }

    pub fn with_paths(service: SearchService, socket_path: PathBuf, pid_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            service,
            cache: Mutex::new(LruCache::new(CACHE_SIZE)),
            stats: ServerStats::new(),
            shutdown: AtomicBool::new(false),
            socket_path,
            pid_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start the server (blocking)
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    /// Bind the socket and write the PID file
    pub fn bind(&self) -> Result<UnixListener> {
        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove stale socket file
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        // Write PID file
        fs::write(&self.pid_path, format!("{}", std::process::id()))?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {}", self.socket_path.display()))?;

        // Set socket permissions (user only)
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        }

        log::info!("listening on {}", self.socket_path.display());
        Ok(listener)
    }

    /// Accept connections until a shutdown request arrives
    pub fn serve(self: &Arc<Self>, listener: UnixListener) -> Result<()> {
        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    // Handle in new thread
                    let server = Arc::clone(self);
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            log::warn!("connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::warn!("accept error: {}", e);
                }
            }
        }

        log::info!("shutting down");
        if self.service.is_indexing() {
            log::warn!("indexing run still active at shutdown; it will be abandoned");
        }

        // Cleanup
        let _ = fs::remove_file(&self.socket_path);
        let _ = fs::remove_file(&self.pid_path);

        Ok(())
    }

    /// Handle a single client connection
    fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        loop {
            let request: Request = match read_message(&mut reader) {
                Ok(req) => req,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Client disconnected
                    break;
                }
                Err(e) => {
                    let resp = Response::Error {
                        status: 400,
                        kind: "validation".to_string(),
                        message: format!("Invalid request: {}", e),
                    };
                    write_message(&mut writer, &resp)?;
                    // The stream position is unknown after a bad frame
                    break;
                }
            };

            let response = self.handle_request(request);
            write_message(&mut writer, &response)?;

            if matches!(response, Response::ShuttingDown) {
                // Wake the accept loop so it sees the flag
                let _ = UnixStream::connect(&self.socket_path);
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request
    pub fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::StartIndexing { roots } => match self.service.start_indexing_with(roots) {
                Ok(generation) => Response::Started { generation },
                Err(e) => Response::error(&e),
            },

            Request::Status => Response::Status(self.service.status()),

            Request::Search {
                query,
                offset,
                highlight,
            } => self.handle_search(query, offset, highlight),

            Request::Fetch { path } => match self.service.fetch_document(&path) {
                Ok(doc) => Response::Document(doc),
                Err(e) => Response::error(&e),
            },

            Request::GetConfig => Response::Config(self.service.config_overview()),

            Request::SaveConfig { paths } => match self.service.save_config(&paths) {
                Ok(entries) => Response::ConfigSaved { entries },
                Err(e) => Response::error(&e),
            },

            Request::ServerInfo => self.handle_server_info(),

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::ShuttingDown
            }

            Request::Ping => Response::Pong,
        }
    }

    /// Handle a search request
    fn handle_search(&self, query: String, offset: usize, highlight: bool) -> Response {
        let start = Instant::now();
        self.stats.queries_served.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = validate_query(&query) {
            return Response::error(&e);
        }

        // Holding a permit keeps a run from starting while a cached page is served
        let _permit = match self.service.read_permit() {
            Ok(permit) => permit,
            Err(e) => return Response::error(&e),
        };
        let generation = self.service.status().generation;
        let key = CacheKey {
            query,
            offset,
            highlight,
        };

        if let Ok(mut cache) = self.cache.lock()
            && let Some(page) = cache.get(&key)
            && page.generation == generation
        {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Response::Search(SearchResponse {
                results: page.results.clone(),
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                cached: true,
            });
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let results = match self.service.search(&key.query, offset, highlight) {
            Ok(results) => results,
            Err(e) => return Response::error(&e),
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CachedPage {
                    generation,
                    results: results.clone(),
                },
            );
        }

        Response::Search(SearchResponse {
            results,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            cached: false,
        })
    }

    fn handle_server_info(&self) -> Response {
        let cached_queries = self.cache.lock().map(|c| c.len()).unwrap_or(0);
        Response::ServerInfo(ServerInfo {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            queries_served: self.stats.queries_served.load(Ordering::Relaxed),
            cache_hit_rate: self.stats.cache_hit_rate(),
            cached_queries,
            engine: self.service.config_overview().engine,
            pid: std::process::id(),
        })
    }
}

/// Daemonize the current process
pub fn daemonize() -> Result<()> {
    // Relative source paths keep resolving against the caller's directory
    let resolver = PathResolver::from_current_dir();

    // Fork using double-fork technique for proper daemonization
    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("First fork failed"),
        0 => {
            // Child process
            // Create new session
            if unsafe { libc::setsid() } == -1 {
                anyhow::bail!("setsid failed");
            }

            // Second fork to prevent acquiring a controlling terminal
            match unsafe { libc::fork() } {
                -1 => anyhow::bail!("Second fork failed"),
                0 => {
                    // Grandchild - this becomes the daemon
                    unsafe {
                        libc::close(0);
                        libc::close(1);
                        libc::close(2);

                        // Redirect to /dev/null
                        let null = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
                        if null != -1 {
                            libc::dup2(null, 0);
                            libc::dup2(null, 1);
                            libc::dup2(null, 2);
                            if null > 2 {
                                libc::close(null);
                            }
                        }
                    }

                    // Change to root directory to avoid holding mounts
                    let _ = std::env::set_current_dir("/");

                    // The HTTP client starts threads, so the service is built after forking
                    let outcome = SearchService::open_in(resolver).and_then(|service| IndexServer::new(service).run());
                    if let Err(e) = outcome {
                        // Can't really report this since stderr is closed
                        if let Ok(dir) = get_app_data_dir() {
                            let _ = fs::write(dir.join("daemon-error.log"), format!("{:#}", e));
                        }
                    }
                    std::process::exit(0);
                }
                _ => {
                    // First child exits immediately
                    std::process::exit(0);
                }
            }
        }
        _ => {
            // Parent process - wait for first child then exit
            unsafe {
                let mut status: libc::c_int = 0;
                libc::wait(&mut status);
            }
            Ok(())
        }
    }
}

/// Start the daemon in foreground (for debugging)
pub fn run_foreground() -> Result<()> {
    let service = SearchService::open()?;
    IndexServer::new(service).run()
}

/// Stop the running daemon
pub fn stop_daemon() -> Result<bool> {
    let pid_path = get_pid_path();

    if !pid_path.exists() {
        return Ok(false);
    }

    // Ask politely first
    if let Some(mut client) = crate::server::IndexClient::connect()
        && client.shutdown().is_ok()
    {
        thread::sleep(Duration::from_millis(200));
    }

    let pid_str = fs::read_to_string(&pid_path).unwrap_or_default();
    if let Ok(pid) = pid_str.trim().parse::<i32>() {
        // Send SIGTERM
        unsafe {
            if libc::kill(pid, 0) == 0 && libc::kill(pid, libc::SIGTERM) == 0 {
                // Wait a bit for graceful shutdown
                thread::sleep(Duration::from_millis(500));

                // Check if still running, send SIGKILL if needed
                if libc::kill(pid, 0) == 0 {
                    thread::sleep(Duration::from_secs(1));
                    if libc::kill(pid, 0) == 0 {
                        libc::kill(pid, libc::SIGKILL);
                    }
                }
            }
        }
    }

    // Clean up socket and pid files
    let _ = fs::remove_file(get_socket_path());
    let _ = fs::remove_file(&pid_path);

    Ok(true)
}
