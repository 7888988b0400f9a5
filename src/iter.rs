//! Row-at-a-time iteration over an open cursor.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::driver::DriverCursor;
use crate::error::SqlMapperError;
use crate::scope::ConnectionScope;
use crate::table::{ColumnSet, Row, RowView};
use crate::types::SqlValue;

pub(crate) type RowProducer<'q, T> =
    Box<dyn FnMut(&RowView<'_>) -> Result<T, SqlMapperError> + 'q>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    /// Cursor live, next row not fetched yet.
    Open,
    /// Next row fetched and held until `next` consumes it.
    Positioned,
    /// Cursor drained and released; `close` has not been called yet.
    Exhausted,
    /// Cursor (and possibly the connection) released.
    Closed,
}

/// Lazily mapped query result.
///
/// Rows are pulled from the driver one at a time. The cursor is released when the iterator is
/// exhausted, when a row fails, on [`close`](Self::close), or on drop, whichever comes first.
/// An exhausted iterator reports [`is_exhausted`](Self::is_exhausted) until it is closed.
/// With [`set_auto_close_connection`](Self::set_auto_close_connection) the owning scope is
/// closed at the same moment.
pub struct ResultIter<'q, T> {
    scope: &'q mut ConnectionScope,
    cursor: Option<Box<dyn DriverCursor>>,
    columns: Arc<ColumnSet>,
    case_sensitive: bool,
    producer: RowProducer<'q, T>,
    state: IterState,
    peeked: Option<Vec<SqlValue>>,
    auto_close_connection: bool,
    sql: String,
    name: Option<String>,
    started: Instant,
    rows: usize,
    released: bool,
}

/// Lazily fetched generic rows.
pub type LazyTable<'q> = ResultIter<'q, Row>;

impl<'q, T> ResultIter<'q, T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scope: &'q mut ConnectionScope,
        cursor: Box<dyn DriverCursor>,
        columns: Arc<ColumnSet>,
        case_sensitive: bool,
        producer: RowProducer<'q, T>,
        sql: String,
        name: Option<String>,
        started: Instant,
    ) -> Self {
        Self {
            scope,
            cursor: Some(cursor),
            columns,
            case_sensitive,
            producer,
            state: IterState::Open,
            peeked: None,
            auto_close_connection: false,
            sql,
            name,
            started,
            rows: 0,
            released: false,
        }
    }

    /// Column metadata of the result.
    #[must_use]
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub(crate) fn column_set(&self) -> Arc<ColumnSet> {
        Arc::clone(&self.columns)
    }

    /// Close the owning scope as well when this iterator closes.
    pub fn set_auto_close_connection(&mut self, auto_close: bool) -> &mut Self {
        self.auto_close_connection = auto_close;
        self
    }

    #[must_use]
    pub fn is_auto_close_connection(&self) -> bool {
        self.auto_close_connection
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == IterState::Closed
    }

    /// Every row has been read; the cursor is already released.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state == IterState::Exhausted
    }

    /// Whether another row is available. Fetches at most one row per row consumed, so repeated
    /// calls without `next` give the same answer.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` if the driver fails to fetch; the iterator is closed.
    pub fn has_next(&mut self) -> Result<bool, SqlMapperError> {
        match self.state {
            IterState::Positioned => Ok(true),
            IterState::Exhausted | IterState::Closed => Ok(false),
            IterState::Open => {
                let fetched = match self.cursor.as_mut() {
                    Some(cursor) => cursor.next_row(),
                    None => Ok(None),
                };
                match fetched {
                    Ok(Some(values)) => {
                        self.peeked = Some(values);
                        self.state = IterState::Positioned;
                        Ok(true)
                    }
                    Ok(None) => {
                        self.state = IterState::Exhausted;
                        self.release()?;
                        Ok(false)
                    }
                    Err(err) => {
                        self.scope.on_exception();
                        self.close_quietly();
                        Err(SqlMapperError::execution("fetch", self.sql.clone(), err))
                    }
                }
            }
        }
    }

    /// Release the cursor, and the scope if requested. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns the first failure from closing the cursor or the connection.
    pub fn close(&mut self) -> Result<(), SqlMapperError> {
        self.state = IterState::Closed;
        self.release()
    }

    fn release(&mut self) -> Result<(), SqlMapperError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.peeked = None;

        let cursor_closed = match self.cursor.take() {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        };
        let scope_closed = if self.auto_close_connection {
            self.scope.close()
        } else {
            self.scope.close_if_auto()
        };

        debug!(
            total_ms = self.started.elapsed().as_millis(),
            rows = self.rows,
            name = self.name.as_deref().unwrap_or("No name"),
            "lazy fetch closed"
        );
        cursor_closed.and(scope_closed)
    }

    fn close_quietly(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to release result cursor");
        }
    }
}

impl<T> Iterator for ResultIter<'_, T> {
    type Item = Result<T, SqlMapperError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => return Some(Err(err)),
        }
        let values = self.peeked.take()?;
        self.state = IterState::Open;
        self.rows += 1;

        let view = RowView::new(&self.columns, &values, self.case_sensitive);
        match (self.producer)(&view) {
            Ok(item) => Some(Ok(item)),
            Err(err) => {
                self.close_quietly();
                Some(Err(err))
            }
        }
    }
}

impl<T> Drop for ResultIter<'_, T> {
    fn drop(&mut self) {
        self.close_quietly();
    }
}

impl<T> fmt::Debug for ResultIter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultIter")
            .field("state", &self.state)
            .field("columns", &self.columns.len())
            .field("rows", &self.rows)
            .field("auto_close_connection", &self.auto_close_connection)
            .finish_non_exhaustive()
    }
}
