//! Table Store - the storage boundary of the relationship engine
//!
//! Connection handling, transactions and statement execution live behind
//! this trait. The engine only issues the statements in [`crate::sql`].

pub mod logging;
pub mod memory;

pub use logging::LoggingStore;
pub use memory::{LoggedStatement, MemoryStore};

use std::fmt;

use crate::error::RelationResult;
use crate::sql::{DeleteStatement, InsertStatement, JoinQuery, Row, SelectQuery, UpdateStatement};

/// Synchronous row access used by the relationship loaders.
///
/// Calls block the calling thread for the duration of the I/O. Errors are
/// reported as [`RelationError::Storage`](crate::error::RelationError::Storage)
/// and propagated unchanged by the engine.
pub trait TableStore: Send + Sync + fmt::Debug {
    /// Rows of one table matching the filter, projected to the selected columns
    fn select(&self, query: &SelectQuery) -> RelationResult<Vec<Row>>;

    /// Rows of the driving table reached through a relation table
    fn select_join(&self, query: &JoinQuery) -> RelationResult<Vec<Row>>;

    fn insert(&self, statement: &InsertStatement) -> RelationResult<()>;

    /// Returns the number of updated rows
    fn update(&self, statement: &UpdateStatement) -> RelationResult<usize>;

    /// Returns the number of deleted rows
    fn delete(&self, statement: &DeleteStatement) -> RelationResult<usize>;
}
