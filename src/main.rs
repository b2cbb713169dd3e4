use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seekql::index::types::{IndexingStatus, SearchResultSet};
use seekql::output;
use seekql::service::SearchService;
use seekql::utils::progress::spinner;
use std::thread;
use std::time::Duration;

#[cfg(all(unix, feature = "daemon"))]
use seekql::index::paths::PathResolver;
#[cfg(all(unix, feature = "daemon"))]
use seekql::server::{self, IndexClient};

/// Status poll interval while waiting for a run
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "seekql")]
#[command(about = "Index folders of SQL files and search them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from the configured source directories
    Index {
        /// Index this directory instead of the configured ones (repeatable)
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<String>,

        /// Return as soon as the run is accepted (daemon only)
        #[arg(long)]
        no_wait: bool,
    },
    /// Show indexing status
    Status,
    /// Search indexed SQL files
    Search {
        /// Query text (Lucene syntax: AND/OR/NOT, "phrases", wild*, fuzzy~, field:value)
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,

        /// Skip this many hits
        #[arg(short, long, default_value_t = 0)]
        offset: usize,

        /// Use plain snippets instead of highlighted fragments
        #[arg(long)]
        no_highlight: bool,
    },
    /// Print a whole indexed file
    Show {
        /// Absolute path as shown in search results
        path: String,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the background server
    #[cfg(all(unix, feature = "daemon"))]
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration, resolved source directories and document count
    Show,
    /// Replace the source directories
    Set {
        /// Directories to index; relative paths resolve against the current directory
        paths: Vec<String>,
    },
}

#[cfg(all(unix, feature = "daemon"))]
#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Run daemon in foreground (for debugging)
    Foreground,
}

/// Where commands are executed
enum Backend {
    #[cfg(all(unix, feature = "daemon"))]
    Daemon(IndexClient),
    Local(SearchService),
}

impl Backend {
    /// Prefer a running daemon, otherwise work in-process
    fn connect() -> Result<Self> {
        #[cfg(all(unix, feature = "daemon"))]
        {
            if let Some(client) = IndexClient::connect() {
                log::debug!("using daemon at {}", server::get_socket_path().display());
                return Ok(Backend::Daemon(client));
            }
        }

        let service = SearchService::open().context("Failed to open search service")?;
        Ok(Backend::Local(service))
    }

    fn status(&mut self) -> Result<IndexingStatus> {
        match self {
            #[cfg(all(unix, feature = "daemon"))]
            Backend::Daemon(client) => Ok(client.status()?),
            Backend::Local(service) => Ok(service.status()),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    #[cfg(all(unix, feature = "daemon"))]
    let default_level = match &cli.command {
        Commands::Daemon { .. } => "info",
        _ => "warn",
    };
    #[cfg(not(all(unix, feature = "daemon")))]
    let default_level = "warn";
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let color = !cli.no_color;

    match cli.command {
        Commands::Index { roots, no_wait } => run_index(roots, no_wait, color)?,
        Commands::Status => {
            let status = Backend::connect()?.status()?;
            output::print_status(&status, color)?;
        }
        Commands::Search {
            query,
            offset,
            no_highlight,
        } => run_search(&query.join(" "), offset, !no_highlight, color)?,
        Commands::Show { path } => {
            let doc = match Backend::connect()? {
                #[cfg(all(unix, feature = "daemon"))]
                Backend::Daemon(mut client) => client.fetch(&path)?,
                Backend::Local(service) => service.fetch_document(&path)?,
            };
            output::print_document(&doc, color)?;
        }
        Commands::Config { action } => run_config(action, color)?,
        #[cfg(all(unix, feature = "daemon"))]
        Commands::Daemon { action } => handle_daemon_command(action)?,
    }

    Ok(())
}

fn run_index(roots: Vec<String>, no_wait: bool, color: bool) -> Result<()> {
    let mut backend = Backend::connect()?;
    let roots: Vec<String> = roots.into_iter().filter(|r| !r.trim().is_empty()).collect();
    let roots = if roots.is_empty() { None } else { Some(roots) };

    let generation = match &mut backend {
        #[cfg(all(unix, feature = "daemon"))]
        Backend::Daemon(client) => {
            // The daemon resolves relative paths against its own directory
            let resolver = PathResolver::from_current_dir();
            let roots = roots.map(|roots| roots.iter().map(|r| resolver.anchor(r)).collect());
            let generation = client.start_indexing_with(roots)?;
            if no_wait {
                println!("Indexing run {} started", generation);
                return Ok(());
            }
            generation
        }
        Backend::Local(service) => {
            if no_wait {
                log::warn!("--no-wait needs a running daemon; waiting for the run");
            }
            service.start_indexing_with(roots)?
        }
    };

    let progress = spinner("Indexing...");
    let status = loop {
        let status = backend.status()?;
        if !status.is_running() && status.generation >= generation {
            break status;
        }
        progress.set_message(format!("Indexing: {}", output::phase_label(status.phase)));
        thread::sleep(POLL_INTERVAL);
    };
    progress.finish_and_clear();

    match &status.last_result {
        Some(result) => output::print_index_result(result, color)?,
        None => println!("Indexing run finished without a result"),
    }
    Ok(())
}

fn run_search(query: &str, offset: usize, highlight: bool, color: bool) -> Result<()> {
    let results: SearchResultSet = match Backend::connect()? {
        #[cfg(all(unix, feature = "daemon"))]
        Backend::Daemon(mut client) => {
            let response = client.search(query, offset, highlight)?;
            log::debug!(
                "search took {:.2}ms (cached: {})",
                response.duration_ms,
                response.cached
            );
            response.results
        }
        Backend::Local(service) => service.search(query, offset, highlight)?,
    };
    output::print_hits(&results, color)?;
    Ok(())
}

fn run_config(action: ConfigAction, color: bool) -> Result<()> {
    let backend = Backend::connect()?;

    match action {
        ConfigAction::Show => {
            let overview = match backend {
                #[cfg(all(unix, feature = "daemon"))]
                Backend::Daemon(mut client) => client.get_config()?,
                Backend::Local(service) => service.config_overview(),
            };
            output::print_config(&overview, color)?;
        }
        ConfigAction::Set { paths } => {
            let entries = match backend {
                #[cfg(all(unix, feature = "daemon"))]
                Backend::Daemon(mut client) => client.save_config(paths)?,
                Backend::Local(service) => service.save_config(&paths)?,
            };
            println!("Saved {} source directories:", entries.len());
            output::print_entries(&entries, color)?;
        }
    }
    Ok(())
}

#[cfg(all(unix, feature = "daemon"))]
fn handle_daemon_command(action: DaemonAction) -> Result<()> {
    use seekql::server::{get_socket_path, is_daemon_running};
    use seekql::utils::app_data::get_app_data_dir;

    match action {
        DaemonAction::Start => {
            if is_daemon_running() {
                println!("Daemon is already running");
                return Ok(());
            }

            println!("Starting seekql daemon...");
            server::daemon::daemonize()?;

            // Wait a moment for daemon to start
            thread::sleep(Duration::from_millis(500));

            if is_daemon_running() {
                println!("Daemon started (socket: {})", get_socket_path().display());
            } else {
                let log_path = get_app_data_dir()?.join("daemon-error.log");
                println!("Daemon may have failed to start. Check {}", log_path.display());
            }
        }

        DaemonAction::Stop => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");
            server::daemon::stop_daemon()?;
            println!("Daemon stopped");
        }

        DaemonAction::Status => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            match IndexClient::connect() {
                Some(mut client) => match client.server_info() {
                    Ok(info) => {
                        println!("seekql daemon status:");
                        println!("  PID: {}", info.pid);
                        println!("  Engine: {}", info.engine);
                        println!("  Uptime: {}s", info.uptime_secs);
                        println!("  Queries served: {}", info.queries_served);
                        println!("  Cached queries: {}", info.cached_queries);
                        println!("  Cache hit rate: {:.1}%", info.cache_hit_rate * 100.0);
                    }
                    Err(e) => {
                        println!("Failed to get status: {}", e);
                    }
                },
                None => {
                    println!("Daemon is running but not responding");
                }
            }
        }

        DaemonAction::Foreground => {
            if is_daemon_running() {
                println!("Daemon is already running in background. Stop it first with 'seekql daemon stop'");
                return Ok(());
            }

            println!("Running daemon in foreground (Ctrl+C to stop)...");
            server::daemon::run_foreground()?;
        }
    }

    Ok(())
}
