//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`app_data`] - Application config and data directory management
//! - [`tokenizer`] - Word tokenization for SQL text
//! - [`progress`] - Terminal spinner (no-op without the `progress` feature)

pub mod app_data;
pub mod progress;
pub mod tokenizer;

pub use app_data::*;
pub use tokenizer::*;
