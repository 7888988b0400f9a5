//! Narrow traits the engine drives a database through.
//!
//! The bundled `SQLite` backend implements them in [`crate::sqlite`]; any other synchronous driver
//! can be plugged in by implementing the three traits below.

use std::fmt;

use crate::config::IsolationLevel;
use crate::error::SqlMapperError;
use crate::parsing::PlaceholderStyle;
use crate::types::SqlValue;

/// Driver-assigned handle for a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(u64);

impl StatementId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt-{}", self.0)
    }
}

/// Whether (and how) a statement should report generated keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyRetrieval {
    #[default]
    None,
    /// Ask for whatever keys the driver generates.
    All,
    /// Ask for the named key columns.
    Columns(Vec<String>),
}

impl KeyRetrieval {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, KeyRetrieval::None)
    }
}

/// Name (and declared type, when the driver knows it) of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub declared_type: Option<String>,
}

impl ColumnMeta {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            declared_type: None,
        }
    }
}

/// Result of a single update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub rows_affected: usize,
    /// Empty unless key retrieval was requested when preparing.
    pub generated_keys: Vec<SqlValue>,
}

/// Result of running the accumulated batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Per-entry update counts in the order the entries were added.
    pub counts: Vec<usize>,
    pub generated_keys: Vec<SqlValue>,
}

/// Hands out connections. Implementations must be shareable across threads.
pub trait ConnectionSource: Send + Sync {
    /// Acquire a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if no connection can be produced.
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlMapperError>;

    /// Placeholder syntax the driver understands.
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }
}

impl<F> ConnectionSource for F
where
    F: Fn() -> Result<Box<dyn DriverConnection>, SqlMapperError> + Send + Sync,
{
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlMapperError> {
        self()
    }
}

/// A live driver connection. Owned by exactly one scope at a time.
///
/// Parameter indexes are 1-based. Bindings are consumed by the next `execute_*` or `add_batch`
/// call on the same statement.
pub trait DriverConnection: Send {
    /// # Errors
    /// Returns `SqlMapperError` if the driver rejects the SQL.
    fn prepare(&mut self, sql: &str, keys: &KeyRetrieval) -> Result<StatementId, SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the statement is unknown.
    fn bind(
        &mut self,
        statement: StatementId,
        index: usize,
        value: SqlValue,
    ) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the statement is unknown.
    fn clear_bindings(&mut self, statement: StatementId) -> Result<(), SqlMapperError>;

    /// Snapshot the current bindings as one batch entry.
    ///
    /// # Errors
    /// Returns `SqlMapperError` if the statement is unknown.
    fn add_batch(&mut self, statement: StatementId) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` on any driver failure.
    fn execute_update(&mut self, statement: StatementId) -> Result<UpdateOutcome, SqlMapperError>;

    /// Run and clear the accumulated batch.
    ///
    /// # Errors
    /// Returns `SqlMapperError` on any driver failure.
    fn execute_batch(&mut self, statement: StatementId) -> Result<BatchOutcome, SqlMapperError>;

    /// Open a forward-only cursor over the statement's result.
    ///
    /// # Errors
    /// Returns `SqlMapperError` on any driver failure.
    fn execute_query(
        &mut self,
        statement: StatementId,
    ) -> Result<Box<dyn DriverCursor>, SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the driver fails to release the statement.
    fn close_statement(&mut self, statement: StatementId) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the connection is unusable.
    fn auto_commit(&mut self) -> Result<bool, SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the mode cannot be changed.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the level is not supported.
    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the commit fails.
    fn commit(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns `SqlMapperError` if the rollback fails.
    fn rollback(&mut self) -> Result<(), SqlMapperError>;

    /// Release the connection. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns `SqlMapperError` if the driver reports a failure while closing.
    fn close(&mut self) -> Result<(), SqlMapperError>;

    fn is_closed(&self) -> bool;
}

/// Forward-only cursor over a query result.
pub trait DriverCursor: Send {
    fn columns(&self) -> &[ColumnMeta];

    /// Next row, or `None` once exhausted.
    ///
    /// # Errors
    /// Returns `SqlMapperError` on any driver failure.
    fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, SqlMapperError>;

    /// Release the cursor. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns `SqlMapperError` if the driver fails to release the cursor.
    fn close(&mut self) -> Result<(), SqlMapperError>;
}
