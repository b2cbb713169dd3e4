//! Protocol messages for client-server communication
//!
//! Uses a simple length-prefixed JSON protocol:
//! - 4 bytes (little-endian u32): message length
//! - N bytes: JSON-encoded message

use crate::error::ServiceError;
use crate::index::types::{Document, IndexingStatus, SearchResultSet, SourcePathEntry};
use crate::service::ConfigOverview;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Request from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Begin a full index rebuild; `roots` replaces the configured
    /// directories for this run only
    StartIndexing {
        #[serde(default)]
        roots: Option<Vec<String>>,
    },

    /// Current indexing status
    Status,

    /// Execute a search query
    Search {
        query: String,
        #[serde(default)]
        offset: usize,
        #[serde(default = "default_highlight")]
        highlight: bool,
    },

    /// Fetch a whole document by path
    Fetch { path: String },

    /// Configuration overview
    GetConfig,

    /// Replace the configured source directories
    SaveConfig { paths: Vec<String> },

    /// Daemon statistics
    ServerInfo,

    /// Graceful shutdown request
    Shutdown,

    /// Ping for connection testing
    Ping,
}

fn default_highlight() -> bool {
    true
}

/// Response from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Run accepted with this generation
    Started { generation: u64 },

    Status(IndexingStatus),

    Search(SearchResponse),

    Document(Document),

    Config(ConfigOverview),

    ConfigSaved { entries: Vec<SourcePathEntry> },

    ServerInfo(ServerInfo),

    /// Shutdown acknowledged
    ShuttingDown,

    /// Pong response
    Pong,

    /// Error response; `status` uses HTTP-style codes
    Error {
        status: u16,
        kind: String,
        message: String,
    },
}

impl Response {
    pub fn error(err: &ServiceError) -> Self {
        Response::Error {
            status: err.status_code(),
            kind: err.kind().to_string(),
            message: err.detail(),
        }
    }
}

/// Search results response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: SearchResultSet,
    /// Time taken in milliseconds
    pub duration_ms: f64,
    /// Whether results came from cache
    pub cached: bool,
}

/// Daemon statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server uptime in seconds
    pub uptime_secs: u64,
    /// Total queries served
    pub queries_served: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub cache_hit_rate: f32,
    /// Entries in the search cache
    pub cached_queries: usize,
    pub engine: String,
    pub pid: u32,
}

/// Write a message to a stream with length prefix
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })?;

    if json.len() > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;

    Ok(())
}

/// Read a message from a stream with length prefix
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check: don't allocate more than 100MB
    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    serde_json::from_slice(&buf).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })
}
