//! In-memory driver that records every call, for unit tests of the engine layers.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::IsolationLevel;
use crate::driver::{
    BatchOutcome, ColumnMeta, ConnectionSource, DriverConnection, DriverCursor, KeyRetrieval,
    StatementId, UpdateOutcome,
};
use crate::error::SqlMapperError;
use crate::types::SqlValue;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Prepare(String),
    Bind(StatementId, usize, SqlValue),
    AddBatch(StatementId),
    ExecuteUpdate(StatementId),
    ExecuteBatch(StatementId),
    ExecuteQuery(StatementId),
    FetchRow,
    CloseCursor,
    CloseStatement(StatementId),
    SetAutoCommit(bool),
    SetIsolation(IsolationLevel),
    Commit,
    Rollback,
    Close,
}

#[derive(Debug, Default)]
struct Shared {
    events: Mutex<Vec<Event>>,
    columns: Mutex<Vec<ColumnMeta>>,
    rows: Mutex<Vec<Vec<SqlValue>>>,
    next_statement: AtomicU64,
    fail_execution: AtomicBool,
    fail_cursor: AtomicBool,
    fail_batch: AtomicBool,
}

impl Shared {
    fn push(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn check(&self) -> Result<(), SqlMapperError> {
        if self.fail_execution.load(Ordering::SeqCst) {
            Err(SqlMapperError::Other("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

/// Hands out recording connections that share one event log and one scripted result.
#[derive(Debug, Default)]
pub(crate) struct RecordingSource {
    shared: Arc<Shared>,
    acquired: AtomicUsize,
}

impl RecordingSource {
    pub(crate) fn with_result(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        let source = Self::default();
        *source
            .shared
            .columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = columns
            .iter()
            .map(|name| ColumnMeta::new((*name).to_string()))
            .collect();
        *source
            .shared
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = rows;
        source
    }

    pub(crate) fn fail_execution(&self, fail: bool) {
        self.shared.fail_execution.store(fail, Ordering::SeqCst);
    }

    /// Make batch execution fail after the pending entries are dropped.
    pub(crate) fn fail_batch(&self, fail: bool) {
        self.shared.fail_batch.store(fail, Ordering::SeqCst);
    }

    /// Make every cursor fail both its row reads and its close.
    pub(crate) fn fail_cursor(&self, fail: bool) {
        self.shared.fail_cursor.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl ConnectionSource for RecordingSource {
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlMapperError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection {
            shared: Arc::clone(&self.shared),
            auto_commit: true,
            pending_batch: 0,
            closed: false,
        }))
    }
}

struct RecordingConnection {
    shared: Arc<Shared>,
    auto_commit: bool,
    pending_batch: usize,
    closed: bool,
}

impl DriverConnection for RecordingConnection {
    fn prepare(&mut self, sql: &str, _keys: &KeyRetrieval) -> Result<StatementId, SqlMapperError> {
        self.shared.push(Event::Prepare(sql.to_owned()));
        let id = self.shared.next_statement.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StatementId::new(id))
    }

    fn bind(
        &mut self,
        statement: StatementId,
        index: usize,
        value: SqlValue,
    ) -> Result<(), SqlMapperError> {
        self.shared.push(Event::Bind(statement, index, value));
        Ok(())
    }

    fn clear_bindings(&mut self, _statement: StatementId) -> Result<(), SqlMapperError> {
        Ok(())
    }

    fn add_batch(&mut self, statement: StatementId) -> Result<(), SqlMapperError> {
        self.shared.check()?;
        self.shared.push(Event::AddBatch(statement));
        self.pending_batch += 1;
        Ok(())
    }

    fn execute_update(&mut self, statement: StatementId) -> Result<UpdateOutcome, SqlMapperError> {
        self.shared.check()?;
        self.shared.push(Event::ExecuteUpdate(statement));
        Ok(UpdateOutcome {
            rows_affected: 1,
            generated_keys: vec![SqlValue::Int(i64::try_from(statement.get()).unwrap())],
        })
    }

    fn execute_batch(&mut self, statement: StatementId) -> Result<BatchOutcome, SqlMapperError> {
        let entries = std::mem::take(&mut self.pending_batch);
        self.shared.check()?;
        if self.shared.fail_batch.load(Ordering::SeqCst) {
            return Err(SqlMapperError::Other("scripted batch failure".into()));
        }
        self.shared.push(Event::ExecuteBatch(statement));
        Ok(BatchOutcome {
            counts: vec![1; entries],
            generated_keys: (1..=entries)
                .map(|n| SqlValue::Int(i64::try_from(n).unwrap()))
                .collect(),
        })
    }

    fn execute_query(
        &mut self,
        statement: StatementId,
    ) -> Result<Box<dyn DriverCursor>, SqlMapperError> {
        self.shared.check()?;
        self.shared.push(Event::ExecuteQuery(statement));
        let columns = self
            .shared
            .columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let rows = self
            .shared
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(Box::new(RecordingCursor {
            shared: Arc::clone(&self.shared),
            columns,
            rows: rows.into_iter(),
            closed: false,
        }))
    }

    fn close_statement(&mut self, statement: StatementId) -> Result<(), SqlMapperError> {
        self.shared.push(Event::CloseStatement(statement));
        Ok(())
    }

    fn auto_commit(&mut self) -> Result<bool, SqlMapperError> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlMapperError> {
        self.shared.push(Event::SetAutoCommit(enabled));
        self.auto_commit = enabled;
        Ok(())
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), SqlMapperError> {
        self.shared.push(Event::SetIsolation(level));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlMapperError> {
        self.shared.push(Event::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlMapperError> {
        self.shared.push(Event::Rollback);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        if !self.closed {
            self.closed = true;
            self.shared.push(Event::Close);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct RecordingCursor {
    shared: Arc<Shared>,
    columns: Vec<ColumnMeta>,
    rows: std::vec::IntoIter<Vec<SqlValue>>,
    closed: bool,
}

impl DriverCursor for RecordingCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, SqlMapperError> {
        self.shared.push(Event::FetchRow);
        if self.shared.fail_cursor.load(Ordering::SeqCst) {
            return Err(SqlMapperError::Other("scripted fetch failure".into()));
        }
        Ok(self.rows.next())
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        if !self.closed {
            self.closed = true;
            self.shared.push(Event::CloseCursor);
            if self.shared.fail_cursor.load(Ordering::SeqCst) {
                return Err(SqlMapperError::Other("scripted close failure".into()));
            }
        }
        Ok(())
    }
}
