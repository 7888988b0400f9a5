use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::IsolationLevel;
use crate::driver::{
    BatchOutcome, ColumnMeta, DriverConnection, DriverCursor, KeyRetrieval, StatementId,
    UpdateOutcome,
};
use crate::error::SqlMapperError;
use crate::types::SqlValue;

use super::params::to_sqlite_value;
use super::worker::{Command, request, run_sqlite_worker};

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

/// `SQLite` connection owned by a dedicated worker thread.
///
/// Every driver call is sent to the worker as a command and answered over a reply channel, so
/// the handle itself is `Send` even though `rusqlite` statements are not.
pub struct SqliteConnection {
    id: u64,
    sender: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl SqliteConnection {
    /// Move `conn` onto a new worker thread.
    ///
    /// # Errors
    /// Returns `SqlMapperError::ConnectionError` if the thread cannot be spawned.
    pub fn spawn(conn: Connection) -> Result<Self, SqlMapperError> {
        let id = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel::<Command>();
        let worker = thread::Builder::new()
            .name(format!("sqlite-worker-{id}"))
            .spawn(move || run_sqlite_worker(conn, &receiver))
            .map_err(|err| {
                SqlMapperError::ConnectionError(format!(
                    "failed to spawn SQLite worker thread: {err}"
                ))
            })?;
        debug!(worker = id, "SQLite connection opened");
        Ok(Self {
            id,
            sender,
            worker: Some(worker),
        })
    }
}

impl DriverConnection for SqliteConnection {
    fn prepare(&mut self, sql: &str, keys: &KeyRetrieval) -> Result<StatementId, SqlMapperError> {
        let sql = sql.to_owned();
        let keys = keys.is_enabled();
        request(&self.sender, "preparing statement", |respond_to| {
            Command::Prepare {
                sql,
                keys,
                respond_to,
            }
        })
    }

    fn bind(
        &mut self,
        statement: StatementId,
        index: usize,
        value: SqlValue,
    ) -> Result<(), SqlMapperError> {
        let value = to_sqlite_value(value);
        request(&self.sender, "binding parameter", |respond_to| Command::Bind {
            statement,
            index,
            value,
            respond_to,
        })
    }

    fn clear_bindings(&mut self, statement: StatementId) -> Result<(), SqlMapperError> {
        request(&self.sender, "clearing bindings", |respond_to| {
            Command::ClearBindings {
                statement,
                respond_to,
            }
        })
    }

    fn add_batch(&mut self, statement: StatementId) -> Result<(), SqlMapperError> {
        request(&self.sender, "adding batch entry", |respond_to| {
            Command::AddBatch {
                statement,
                respond_to,
            }
        })
    }

    fn execute_update(&mut self, statement: StatementId) -> Result<UpdateOutcome, SqlMapperError> {
        request(&self.sender, "executing update", |respond_to| {
            Command::ExecuteUpdate {
                statement,
                respond_to,
            }
        })
    }

    fn execute_batch(&mut self, statement: StatementId) -> Result<BatchOutcome, SqlMapperError> {
        request(&self.sender, "executing batch", |respond_to| {
            Command::ExecuteBatch {
                statement,
                respond_to,
            }
        })
    }

    fn execute_query(
        &mut self,
        statement: StatementId,
    ) -> Result<Box<dyn DriverCursor>, SqlMapperError> {
        let columns = request(&self.sender, "opening cursor", |respond_to| {
            Command::OpenCursor {
                statement,
                respond_to,
            }
        })?;
        Ok(Box::new(SqliteCursor {
            sender: self.sender.clone(),
            columns,
            closed: false,
        }))
    }

    fn close_statement(&mut self, statement: StatementId) -> Result<(), SqlMapperError> {
        request(&self.sender, "closing statement", |respond_to| {
            Command::CloseStatement {
                statement,
                respond_to,
            }
        })
    }

    fn auto_commit(&mut self) -> Result<bool, SqlMapperError> {
        request(&self.sender, "reading auto-commit", |respond_to| {
            Command::AutoCommit { respond_to }
        })
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlMapperError> {
        request(&self.sender, "changing auto-commit", |respond_to| {
            Command::SetAutoCommit {
                enabled,
                respond_to,
            }
        })
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), SqlMapperError> {
        request(&self.sender, "setting isolation", |respond_to| {
            Command::SetIsolation { level, respond_to }
        })
    }

    fn commit(&mut self) -> Result<(), SqlMapperError> {
        request(&self.sender, "committing", |respond_to| Command::Commit {
            respond_to,
        })
    }

    fn rollback(&mut self) -> Result<(), SqlMapperError> {
        request(&self.sender, "rolling back", |respond_to| Command::Rollback {
            respond_to,
        })
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.sender.send(Command::Shutdown);
        worker.join().map_err(|_| {
            SqlMapperError::ConnectionError(format!("SQLite worker {} panicked", self.id))
        })?;
        debug!(worker = self.id, "SQLite connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.worker.is_none()
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close SQLite connection on drop");
        }
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("worker", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cursor served row by row by the connection's worker.
struct SqliteCursor {
    sender: Sender<Command>,
    columns: Vec<ColumnMeta>,
    closed: bool,
}

impl DriverCursor for SqliteCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, SqlMapperError> {
        if self.closed {
            return Ok(None);
        }
        request(&self.sender, "fetching row", |respond_to| Command::FetchRow {
            respond_to,
        })
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        request(&self.sender, "closing cursor", |respond_to| {
            Command::CloseCursor { respond_to }
        })
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close SQLite cursor on drop");
        }
    }
}
