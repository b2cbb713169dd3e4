pub mod executor;

pub use executor::{QueryExecutor, validate_query};
