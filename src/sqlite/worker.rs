use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};

use rusqlite::types::Value;
use rusqlite::{CachedStatement, Connection, Rows};
use tracing::{debug, warn};

use crate::config::IsolationLevel;
use crate::driver::{BatchOutcome, ColumnMeta, StatementId, UpdateOutcome};
use crate::error::SqlMapperError;
use crate::types::SqlValue;

use super::params::from_value_ref;

pub(super) type Reply<T> = Sender<Result<T, SqlMapperError>>;

pub(super) enum Command {
    Prepare {
        sql: String,
        keys: bool,
        respond_to: Reply<StatementId>,
    },
    Bind {
        statement: StatementId,
        index: usize,
        value: Value,
        respond_to: Reply<()>,
    },
    ClearBindings {
        statement: StatementId,
        respond_to: Reply<()>,
    },
    AddBatch {
        statement: StatementId,
        respond_to: Reply<()>,
    },
    ExecuteUpdate {
        statement: StatementId,
        respond_to: Reply<UpdateOutcome>,
    },
    ExecuteBatch {
        statement: StatementId,
        respond_to: Reply<BatchOutcome>,
    },
    OpenCursor {
        statement: StatementId,
        respond_to: Reply<Vec<ColumnMeta>>,
    },
    FetchRow {
        respond_to: Reply<Option<Vec<SqlValue>>>,
    },
    CloseCursor {
        respond_to: Reply<()>,
    },
    CloseStatement {
        statement: StatementId,
        respond_to: Reply<()>,
    },
    AutoCommit {
        respond_to: Reply<bool>,
    },
    SetAutoCommit {
        enabled: bool,
        respond_to: Reply<()>,
    },
    SetIsolation {
        level: IsolationLevel,
        respond_to: Reply<()>,
    },
    Commit {
        respond_to: Reply<()>,
    },
    Rollback {
        respond_to: Reply<()>,
    },
    Shutdown,
}

impl Command {
    /// Answer the command with a state error instead of running it.
    fn reject(self, reason: &str) {
        let err = || SqlMapperError::StateError(reason.to_owned());
        match self {
            Command::Prepare { respond_to, .. } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::Bind { respond_to, .. }
            | Command::ClearBindings { respond_to, .. }
            | Command::AddBatch { respond_to, .. }
            | Command::CloseCursor { respond_to }
            | Command::CloseStatement { respond_to, .. }
            | Command::SetAutoCommit { respond_to, .. }
            | Command::SetIsolation { respond_to, .. }
            | Command::Commit { respond_to }
            | Command::Rollback { respond_to } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::ExecuteUpdate { respond_to, .. } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::ExecuteBatch { respond_to, .. } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::OpenCursor { respond_to, .. } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::FetchRow { respond_to } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::AutoCommit { respond_to } => {
                let _ = respond_to.send(Err(err()));
            }
            Command::Shutdown => {}
        }
    }
}

/// Send `command` to the worker and wait for its answer.
pub(super) fn request<T>(
    sender: &Sender<Command>,
    what: &str,
    command: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, SqlMapperError> {
    let (tx, rx) = mpsc::channel();
    sender
        .send(command(tx))
        .map_err(|_| SqlMapperError::ConnectionError("SQLite worker closed".into()))?;
    rx.recv().map_err(|_| {
        SqlMapperError::ConnectionError(format!("SQLite worker dropped while {what}"))
    })?
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

type Bindings = BTreeMap<usize, Value>;

struct StatementState {
    sql: String,
    keys: bool,
    bindings: Bindings,
    batch: Vec<Bindings>,
}

struct Worker {
    conn: Connection,
    statements: HashMap<StatementId, StatementState>,
    next_statement: u64,
    manual_commit: bool,
}

pub(super) fn run_sqlite_worker(conn: Connection, receiver: &Receiver<Command>) {
    let mut worker = Worker {
        conn,
        statements: HashMap::new(),
        next_statement: 1,
        manual_commit: false,
    };

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Shutdown => break,
            Command::OpenCursor {
                statement,
                respond_to,
            } => {
                if worker.stream(statement, respond_to, receiver) == Flow::Shutdown {
                    break;
                }
            }
            // No cursor is open, so there is nothing left to read.
            Command::FetchRow { respond_to } => {
                let _ = respond_to.send(Ok(None));
            }
            Command::CloseCursor { respond_to } => {
                let _ = respond_to.send(Ok(()));
            }
            other => worker.handle(other),
        }
    }
    debug!(
        open_statements = worker.statements.len(),
        "SQLite worker shutting down"
    );
}

impl Worker {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Prepare {
                sql,
                keys,
                respond_to,
            } => {
                let _ = respond_to.send(self.prepare(sql, keys));
            }
            Command::Bind {
                statement,
                index,
                value,
                respond_to,
            } => {
                let outcome = self.state(statement).map(|state| {
                    state.bindings.insert(index, value);
                });
                let _ = respond_to.send(outcome);
            }
            Command::ClearBindings {
                statement,
                respond_to,
            } => {
                let outcome = self.state(statement).map(|state| state.bindings.clear());
                let _ = respond_to.send(outcome);
            }
            Command::AddBatch {
                statement,
                respond_to,
            } => {
                let outcome = self.state(statement).map(|state| {
                    let entry = std::mem::take(&mut state.bindings);
                    state.batch.push(entry);
                });
                let _ = respond_to.send(outcome);
            }
            Command::ExecuteUpdate {
                statement,
                respond_to,
            } => {
                let _ = respond_to.send(self.execute_update(statement));
            }
            Command::ExecuteBatch {
                statement,
                respond_to,
            } => {
                let _ = respond_to.send(self.execute_batch(statement));
            }
            Command::CloseStatement {
                statement,
                respond_to,
            } => {
                self.statements.remove(&statement);
                let _ = respond_to.send(Ok(()));
            }
            Command::AutoCommit { respond_to } => {
                let _ = respond_to.send(Ok(!self.manual_commit));
            }
            Command::SetAutoCommit {
                enabled,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_auto_commit(enabled));
            }
            Command::SetIsolation { level, respond_to } => {
                let _ = respond_to.send(self.set_isolation(level));
            }
            Command::Commit { respond_to } => {
                let _ = respond_to.send(self.finish_transaction("COMMIT"));
            }
            Command::Rollback { respond_to } => {
                let _ = respond_to.send(self.finish_transaction("ROLLBACK"));
            }
            Command::OpenCursor { .. }
            | Command::FetchRow { .. }
            | Command::CloseCursor { .. }
            | Command::Shutdown => {
                command.reject("cursor commands are handled by the worker loop");
            }
        }
    }

    fn state(&mut self, statement: StatementId) -> Result<&mut StatementState, SqlMapperError> {
        self.statements
            .get_mut(&statement)
            .ok_or_else(|| SqlMapperError::StateError(format!("unknown statement {statement}")))
    }

    fn prepare(&mut self, sql: String, keys: bool) -> Result<StatementId, SqlMapperError> {
        // Compile once up front so syntax errors surface at prepare time.
        self.conn.prepare_cached(&sql)?;
        let statement = StatementId::new(self.next_statement);
        self.next_statement += 1;
        self.statements.insert(
            statement,
            StatementState {
                sql,
                keys,
                bindings: Bindings::new(),
                batch: Vec::new(),
            },
        );
        Ok(statement)
    }

    fn execute_update(&mut self, statement: StatementId) -> Result<UpdateOutcome, SqlMapperError> {
        let state = self
            .statements
            .get_mut(&statement)
            .ok_or_else(|| SqlMapperError::StateError(format!("unknown statement {statement}")))?;
        let bindings = std::mem::take(&mut state.bindings);
        let rows_affected = run_update(&self.conn, &state.sql, &bindings)?;
        let generated_keys = generated_key(&self.conn, state, rows_affected)
            .into_iter()
            .collect();
        Ok(UpdateOutcome {
            rows_affected,
            generated_keys,
        })
    }

    fn execute_batch(&mut self, statement: StatementId) -> Result<BatchOutcome, SqlMapperError> {
        let state = self
            .statements
            .get_mut(&statement)
            .ok_or_else(|| SqlMapperError::StateError(format!("unknown statement {statement}")))?;
        let entries = std::mem::take(&mut state.batch);
        let mut outcome = BatchOutcome {
            counts: Vec::with_capacity(entries.len()),
            generated_keys: Vec::new(),
        };
        for bindings in &entries {
            let rows_affected = run_update(&self.conn, &state.sql, bindings)?;
            outcome.counts.push(rows_affected);
            outcome
                .generated_keys
                .extend(generated_key(&self.conn, state, rows_affected));
        }
        Ok(outcome)
    }

    /// Open a cursor and serve row requests until it is closed. Anything else that arrives
    /// meanwhile is rejected, since the statement holds the connection.
    fn stream(
        &mut self,
        statement: StatementId,
        respond_to: Reply<Vec<ColumnMeta>>,
        receiver: &Receiver<Command>,
    ) -> Flow {
        let Some(state) = self.statements.get_mut(&statement) else {
            let _ = respond_to.send(Err(SqlMapperError::StateError(format!(
                "unknown statement {statement}"
            ))));
            return Flow::Continue;
        };
        let bindings = std::mem::take(&mut state.bindings);
        let mut stmt = match prepare_bound(&self.conn, &state.sql, &bindings) {
            Ok(stmt) => stmt,
            Err(err) => {
                let _ = respond_to.send(Err(err));
                return Flow::Continue;
            }
        };

        let columns: Vec<ColumnMeta> = stmt
            .column_names()
            .into_iter()
            .map(|name| ColumnMeta::new(name.to_owned()))
            .collect();
        let width = columns.len();
        let mut rows = stmt.raw_query();
        let _ = respond_to.send(Ok(columns));

        while let Ok(command) = receiver.recv() {
            match command {
                Command::FetchRow { respond_to } => {
                    let _ = respond_to.send(next_row(&mut rows, width));
                }
                Command::CloseCursor { respond_to } => {
                    let _ = respond_to.send(Ok(()));
                    return Flow::Continue;
                }
                Command::Shutdown => {
                    warn!(%statement, "SQLite worker shut down with a cursor still open");
                    return Flow::Shutdown;
                }
                other => other.reject("a result cursor is still open on this connection"),
            }
        }
        Flow::Shutdown
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlMapperError> {
        if enabled != self.manual_commit {
            return Ok(());
        }
        if enabled {
            if !self.conn.is_autocommit() {
                self.conn.execute_batch("COMMIT")?;
            }
            self.manual_commit = false;
        } else {
            self.conn.execute_batch("BEGIN")?;
            self.manual_commit = true;
        }
        Ok(())
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), SqlMapperError> {
        let read_uncommitted = u8::from(level == IsolationLevel::ReadUncommitted);
        self.conn
            .execute_batch(&format!("PRAGMA read_uncommitted = {read_uncommitted};"))?;
        Ok(())
    }

    /// End the open transaction (if any) and, in manual-commit mode, start the next one.
    fn finish_transaction(&mut self, verb: &str) -> Result<(), SqlMapperError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch(verb)?;
        }
        if self.manual_commit {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

fn prepare_bound<'c>(
    conn: &'c Connection,
    sql: &str,
    bindings: &Bindings,
) -> Result<CachedStatement<'c>, SqlMapperError> {
    let mut stmt = conn.prepare_cached(sql)?;
    for (index, value) in bindings {
        stmt.raw_bind_parameter(*index, value)?;
    }
    Ok(stmt)
}

fn run_update(conn: &Connection, sql: &str, bindings: &Bindings) -> Result<usize, SqlMapperError> {
    let mut stmt = prepare_bound(conn, sql, bindings)?;
    Ok(stmt.raw_execute()?)
}

/// Rowid of the row the statement just inserted, when keys were requested.
fn generated_key(conn: &Connection, state: &StatementState, rows_affected: usize) -> Option<SqlValue> {
    (state.keys && rows_affected > 0 && inserts_rows(&state.sql))
        .then(|| SqlValue::Int(conn.last_insert_rowid()))
}

fn inserts_rows(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .chars()
        .take(7)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("insert") || head.starts_with("replace")
}

fn next_row(rows: &mut Rows<'_>, width: usize) -> Result<Option<Vec<SqlValue>>, SqlMapperError> {
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut values = Vec::with_capacity(width);
    for idx in 0..width {
        values.push(from_value_ref(row.get_ref(idx)?));
    }
    Ok(Some(values))
}
