//! Shared domain types and error taxonomy.

pub mod errors;

pub use errors::{GraphError, PmuError, RunError};
