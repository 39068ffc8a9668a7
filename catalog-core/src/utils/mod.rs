//! Utility modules for the catalog engine.

pub mod errors;
pub mod logger;
pub mod retry;

pub use errors::{CatalogError, Result};
