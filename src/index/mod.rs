pub mod build;
pub mod bulk;
pub mod job;
pub mod paths;
pub mod types;
pub mod walker;

pub use bulk::BulkIndexer;
pub use job::{JobManager, ReadGate, ReadPermit};
pub use paths::PathResolver;
pub use types::*;
