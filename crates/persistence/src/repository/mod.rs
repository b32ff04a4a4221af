//! Repository implementations for database operations
//!
//! Each repository wraps a pool for standalone calls. The same queries are
//! exposed as executor-generic functions so [`crate::UnitOfWork`] can run
//! them inside a transaction.

pub mod alerts;
pub mod deals;
pub mod items;
pub mod snapshots;

pub use alerts::*;
pub use deals::*;
pub use items::*;
pub use snapshots::*;
