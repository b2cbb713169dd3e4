//! # SeekQL - SQL source search
//!
//! SeekQL indexes folders of SQL files into a search engine and lets you
//! run full-text queries over them with highlighted matches.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`engine`] - Search engine seam: OpenSearch over HTTP or an in-process index
//! - [`index`] - Path resolution, file walking, bulk writes and the single-flight job
//! - [`query`] - Search and document fetch against the engine
//! - [`service`] - Facade combining configuration, indexing and queries
//! - `server` - Persistent daemon and its client (Unix, feature `daemon`)
//! - [`output`] - Terminal rendering
//! - [`utils`] - Configuration, tokenization, progress spinner
//!
//! ## Quick Start
//!
//! ```ignore
//! use seekql::service::SearchService;
//! use std::time::Duration;
//!
//! let service = SearchService::open()?;
//! service.save_config(&["./sql"])?;
//! service.start_indexing()?;
//! service.wait_for_idle(Duration::from_secs(60));
//!
//! let page = service.search("status:active AND orders", 0, true)?;
//! for hit in page.hits {
//!     println!("{}: {}", hit.path, hit.snippet);
//! }
//! ```
//!
//! ## Consistency
//!
//! An indexing run is a full rebuild. While it is active, searches,
//! fetches and configuration saves are refused with
//! [`error::ServiceError::Locked`] instead of observing a half-built index.

pub mod engine;
pub mod error;
pub mod index;
pub mod output;
pub mod query;
#[cfg(all(unix, feature = "daemon"))]
pub mod server;
pub mod service;
pub mod utils;
