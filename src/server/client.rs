//! Client for connecting to the index server daemon

use crate::error::ServiceError;
use crate::index::types::{Document, IndexingStatus, SourcePathEntry};
use crate::server::get_socket_path;
use crate::server::protocol::{
    Request, Response, SearchResponse, ServerInfo, read_message, write_message,
};
use crate::service::ConfigOverview;
use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("index server is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon answered with a service error
    #[error(transparent)]
    Service(ServiceError),

    #[error("invalid response from server")]
    InvalidResponse,
}

/// Client for the index server
pub struct IndexClient {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
}

impl IndexClient {
    /// Try to connect to the running daemon
    /// Returns None if daemon is not running (allowing fallback to direct mode)
    pub fn connect() -> Option<Self> {
        Self::connect_to(&get_socket_path())
    }

    pub fn connect_to(socket_path: &Path) -> Option<Self> {
        // Quick check if socket exists
        if !socket_path.exists() {
            return None;
        }

        let stream = UnixStream::connect(socket_path).ok()?;

        // Set timeouts
        let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
        let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

        let reader = BufReader::new(stream.try_clone().ok()?);
        let writer = BufWriter::new(stream);

        Some(Self { reader, writer })
    }

    /// Connect or return an error (for when daemon is required)
    pub fn connect_required() -> ClientResult<Self> {
        Self::connect().ok_or(ClientError::NotRunning)
    }

    /// Send one request and read its response; wire errors become [`ClientError::Service`]
    fn call(&mut self, request: &Request) -> ClientResult<Response> {
        write_message(&mut self.writer, request)?;

        match read_message(&mut self.reader)? {
            Response::Error { kind, message, .. } => {
                Err(ClientError::Service(ServiceError::from_wire(&kind, message)))
            }
            response => Ok(response),
        }
    }

    /// Ask the daemon to start a rebuild; returns the run's generation
    pub fn start_indexing(&mut self) -> ClientResult<u64> {
        self.start_indexing_with(None)
    }

    /// Rebuild from `roots` instead of the configured directories.
    ///
    /// Relative roots resolve against the daemon's working directory.
    pub fn start_indexing_with(&mut self, roots: Option<Vec<String>>) -> ClientResult<u64> {
        match self.call(&Request::StartIndexing { roots })? {
            Response::Started { generation } => Ok(generation),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Get indexing status
    pub fn status(&mut self) -> ClientResult<IndexingStatus> {
        match self.call(&Request::Status)? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Execute a search query
    pub fn search(&mut self, query: &str, offset: usize, highlight: bool) -> ClientResult<SearchResponse> {
        let request = Request::Search {
            query: query.to_string(),
            offset,
            highlight,
        };

        match self.call(&request)? {
            Response::Search(sr) => Ok(sr),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn fetch(&mut self, path: &str) -> ClientResult<Document> {
        let request = Request::Fetch {
            path: path.to_string(),
        };

        match self.call(&request)? {
            Response::Document(doc) => Ok(doc),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn get_config(&mut self) -> ClientResult<ConfigOverview> {
        match self.call(&Request::GetConfig)? {
            Response::Config(overview) => Ok(overview),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Replace the daemon's source directories
    pub fn save_config(&mut self, paths: Vec<String>) -> ClientResult<Vec<SourcePathEntry>> {
        match self.call(&Request::SaveConfig { paths })? {
            Response::ConfigSaved { entries } => Ok(entries),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn server_info(&mut self) -> ClientResult<ServerInfo> {
        match self.call(&Request::ServerInfo)? {
            Response::ServerInfo(info) => Ok(info),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Request graceful shutdown
    pub fn shutdown(&mut self) -> ClientResult<()> {
        match self.call(&Request::Shutdown)? {
            Response::ShuttingDown => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Ping the server
    pub fn ping(&mut self) -> ClientResult<()> {
        match self.call(&Request::Ping)? {
            Response::Pong => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }
}
