//! A borrowed connection plus everything recorded while queries ran through it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{IsolationLevel, SessionConfig};
use crate::driver::{
    BatchOutcome, ConnectionSource, DriverConnection, KeyRetrieval, StatementId, UpdateOutcome,
};
use crate::error::SqlMapperError;
use crate::parsing::PlaceholderStyle;
use crate::query::{Query, ScopeHandle};
use crate::types::{SqlType, SqlValue, TypeHandlerRegistry};

/// An open connection (and optionally a transaction) obtained from a [`Session`](crate::Session).
///
/// Every statement prepared through the scope is tracked and closed when the scope closes.
/// Closing rolls back an open transaction when `rollback_on_close` is set, restores the
/// connection's original auto-commit mode and releases it. Dropping the scope closes it.
pub struct ConnectionScope {
    source: Arc<dyn ConnectionSource>,
    connection: Option<Box<dyn DriverConnection>>,
    registry: Arc<TypeHandlerRegistry>,
    config: Arc<SessionConfig>,
    style: PlaceholderStyle,
    statements: BTreeSet<StatementId>,
    // bumped on every reacquire; statement ids are only meaningful within one connection
    generation: u64,
    result: Option<usize>,
    batch_result: Option<Vec<usize>>,
    keys: Option<Vec<SqlValue>>,
    can_get_keys: bool,
    auto_close: bool,
    original_auto_commit: bool,
    rollback_on_close: bool,
    rollback_on_exception: bool,
}

impl ConnectionScope {
    pub(crate) fn open(
        source: Arc<dyn ConnectionSource>,
        registry: Arc<TypeHandlerRegistry>,
        config: Arc<SessionConfig>,
        style: PlaceholderStyle,
        auto_close: bool,
    ) -> Result<Self, SqlMapperError> {
        let mut connection = source.acquire()?;
        let original_auto_commit = connection.auto_commit()?;
        Ok(Self {
            source,
            connection: Some(connection),
            rollback_on_close: config.rollback_on_close,
            rollback_on_exception: config.rollback_on_exception,
            registry,
            config,
            style,
            statements: BTreeSet::new(),
            generation: 0,
            result: None,
            batch_result: None,
            keys: None,
            can_get_keys: false,
            auto_close,
            original_auto_commit,
        })
    }

    /// Parse `sql` into a query bound to this scope.
    ///
    /// Generated keys are requested when the session's `generated_keys` setting is on.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the scope was closed and a new connection cannot be acquired.
    pub fn create_query(&mut self, sql: &str) -> Result<Query<'_>, SqlMapperError> {
        let keys = if self.config.generated_keys {
            KeyRetrieval::All
        } else {
            KeyRetrieval::None
        };
        self.create_query_with_keys(sql, keys)
    }

    /// Parse `sql` into a query that prepares its statement with the given key retrieval mode.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the scope was closed and a new connection cannot be acquired.
    pub fn create_query_with_keys(
        &mut self,
        sql: &str,
        keys: KeyRetrieval,
    ) -> Result<Query<'_>, SqlMapperError> {
        self.reopen_if_closed()?;
        Ok(Query::new(ScopeHandle::Borrowed(self), sql, keys))
    }

    /// Parse `sql` and bind `values` to `:p1`, `:p2`, ... in order.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare one of the
    /// positional names, or any error from [`create_query`](Self::create_query).
    pub fn create_query_with_params(
        &mut self,
        sql: &str,
        values: impl IntoIterator<Item = SqlValue>,
    ) -> Result<Query<'_>, SqlMapperError> {
        let mut query = self.create_query(sql)?;
        query.with_params(values)?;
        Ok(query)
    }

    fn reopen_if_closed(&mut self) -> Result<(), SqlMapperError> {
        if !self.is_closed() {
            return Ok(());
        }
        let mut connection = self.source.acquire()?;
        self.original_auto_commit = connection.auto_commit()?;
        self.connection = Some(connection);
        self.generation += 1;
        debug!(generation = self.generation, "scope reacquired a connection");
        Ok(())
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeHandlerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    #[must_use]
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.as_ref().is_none_or(|conn| conn.is_closed())
    }

    /// True when the scope closes itself after a single eager call.
    #[must_use]
    pub fn is_auto_close(&self) -> bool {
        self.auto_close
    }

    #[must_use]
    pub fn rollback_on_close(&self) -> bool {
        self.rollback_on_close
    }

    pub fn set_rollback_on_close(&mut self, rollback: bool) -> &mut Self {
        self.rollback_on_close = rollback;
        self
    }

    #[must_use]
    pub fn rollback_on_exception(&self) -> bool {
        self.rollback_on_exception
    }

    pub fn set_rollback_on_exception(&mut self, rollback: bool) -> &mut Self {
        self.rollback_on_exception = rollback;
        self
    }

    /// Number of statements currently open through this scope.
    #[must_use]
    pub fn open_statements(&self) -> usize {
        self.statements.len()
    }

    /// Rows affected by the last `execute_update`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::StateError` if no update has run on this scope.
    pub fn result(&self) -> Result<usize, SqlMapperError> {
        self.result.ok_or_else(|| {
            SqlMapperError::StateError(
                "no update result available; call execute_update first".into(),
            )
        })
    }

    /// Per-entry update counts of the last executed batch.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::StateError` if no batch has run on this scope.
    pub fn batch_result(&self) -> Result<&[usize], SqlMapperError> {
        self.batch_result.as_deref().ok_or_else(|| {
            SqlMapperError::StateError(
                "no batch result available; call execute_batch first".into(),
            )
        })
    }

    /// Keys generated by the last update or batch, in the order the driver reported them.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::StateError` if nothing has been executed yet, or
    /// `SqlMapperError::ConfigError` if the last statement was not prepared with key retrieval.
    pub fn keys(&self) -> Result<&[SqlValue], SqlMapperError> {
        if self.result.is_none() && self.batch_result.is_none() {
            return Err(SqlMapperError::StateError(
                "no generated keys available; execute an update or batch first".into(),
            ));
        }
        if !self.can_get_keys {
            return Err(SqlMapperError::ConfigError(
                "generated keys were not requested; create the query with key retrieval enabled"
                    .into(),
            ));
        }
        Ok(self.keys.as_deref().unwrap_or_default())
    }

    /// First generated key, if any.
    ///
    /// # Errors
    ///
    /// Same as [`keys`](Self::keys).
    pub fn key(&self) -> Result<Option<SqlValue>, SqlMapperError> {
        Ok(self.keys()?.first().cloned())
    }

    /// First generated key converted with the registered handler for `T`.
    ///
    /// # Errors
    ///
    /// Same as [`keys`](Self::keys), plus conversion failures.
    pub fn key_as<T: SqlType>(&self) -> Result<Option<T>, SqlMapperError> {
        match self.keys()?.first() {
            Some(value) => self.registry.handler::<T>()?.from_sql(value),
            None => Ok(None),
        }
    }

    /// All generated keys converted with the registered handler for `T`; NULL keys are skipped.
    ///
    /// # Errors
    ///
    /// Same as [`keys`](Self::keys), plus conversion failures.
    pub fn keys_as<T: SqlType>(&self) -> Result<Vec<T>, SqlMapperError> {
        let handler = self.registry.handler::<T>()?;
        let mut out = Vec::new();
        for value in self.keys()? {
            if let Some(key) = handler.from_sql(value)? {
                out.push(key);
            }
        }
        Ok(out)
    }

    /// Commit and close.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the scope is closed or the driver fails to commit.
    pub fn commit(&mut self) -> Result<(), SqlMapperError> {
        self.commit_keep_open()?;
        self.release(false)
    }

    /// Commit and keep the connection (and transaction mode) for further work.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the scope is closed or the driver fails to commit.
    pub fn commit_keep_open(&mut self) -> Result<(), SqlMapperError> {
        self.connection_mut()?.commit()?;
        debug!("transaction committed");
        Ok(())
    }

    /// Roll back and close.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the scope is closed or the driver fails to roll back.
    pub fn rollback(&mut self) -> Result<(), SqlMapperError> {
        self.rollback_keep_open()?;
        self.release(false)
    }

    /// Roll back and keep the connection for further work.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the scope is closed or the driver fails to roll back.
    pub fn rollback_keep_open(&mut self) -> Result<(), SqlMapperError> {
        self.connection_mut()?.rollback()?;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Close every tracked statement, roll back an open transaction if configured to, restore
    /// the original auto-commit mode and release the connection. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the driver fails to release the connection. Failures while
    /// closing statements, rolling back or restoring auto-commit are logged.
    pub fn close(&mut self) -> Result<(), SqlMapperError> {
        self.release(self.rollback_on_close)
    }

    fn release(&mut self, rollback_open: bool) -> Result<(), SqlMapperError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        if connection.is_closed() {
            self.statements.clear();
            return Ok(());
        }

        for statement in std::mem::take(&mut self.statements) {
            if let Err(err) = connection.close_statement(statement) {
                warn!(%statement, error = %err, "failed to close statement while closing scope");
            }
        }

        match connection.auto_commit() {
            Ok(false) => {
                if rollback_open {
                    if let Err(err) = connection.rollback() {
                        warn!(error = %err, "rollback on close failed");
                    } else {
                        debug!("open transaction rolled back on close");
                    }
                }
                if self.original_auto_commit
                    && let Err(err) = connection.set_auto_commit(true)
                {
                    warn!(error = %err, "failed to restore auto-commit");
                }
            }
            Ok(true) => {
                if !self.original_auto_commit
                    && let Err(err) = connection.set_auto_commit(false)
                {
                    warn!(error = %err, "failed to restore auto-commit");
                }
            }
            Err(err) => warn!(error = %err, "could not read auto-commit mode while closing"),
        }

        connection.close()
    }

    /// Close only if this scope was opened for a single call.
    pub(crate) fn close_if_auto(&mut self) -> Result<(), SqlMapperError> {
        if self.auto_close {
            self.close()
        } else {
            Ok(())
        }
    }

    /// Failure hook run before a driver error propagates out of a query.
    pub(crate) fn on_exception(&mut self) {
        if !self.rollback_on_exception {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        match connection.auto_commit() {
            Ok(false) => {
                if let Err(err) = connection.rollback() {
                    warn!(error = %err, "rollback after failed statement did not succeed");
                } else {
                    debug!("transaction rolled back after failed statement");
                }
            }
            Ok(true) => {}
            Err(err) => warn!(error = %err, "could not read auto-commit mode after failure"),
        }
    }

    pub(crate) fn begin(&mut self, isolation: IsolationLevel) -> Result<(), SqlMapperError> {
        let connection = self.connection_mut()?;
        connection.set_isolation(isolation)?;
        connection.set_auto_commit(false)?;
        debug!(?isolation, "transaction started");
        Ok(())
    }

    pub(crate) fn connection_mut(
        &mut self,
    ) -> Result<&mut Box<dyn DriverConnection>, SqlMapperError> {
        self.connection
            .as_mut()
            .filter(|conn| !conn.is_closed())
            .ok_or_else(|| SqlMapperError::StateError("connection scope is closed".into()))
    }

    pub(crate) fn prepare(
        &mut self,
        sql: &str,
        keys: &KeyRetrieval,
    ) -> Result<StatementId, SqlMapperError> {
        self.reopen_if_closed()?;
        let statement = self.connection_mut()?.prepare(sql, keys)?;
        self.statements.insert(statement);
        debug!(%statement, sql, "statement prepared");
        Ok(statement)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_tracked(&self, statement: StatementId, generation: u64) -> bool {
        generation == self.generation && self.statements.contains(&statement)
    }

    /// Close and stop tracking `statement`; unknown ids are ignored.
    pub(crate) fn close_statement(&mut self, statement: StatementId) -> Result<(), SqlMapperError> {
        if !self.statements.remove(&statement) {
            return Ok(());
        }
        debug!(%statement, "statement closed");
        self.connection_mut()?.close_statement(statement)
    }

    pub(crate) fn record_update(&mut self, outcome: UpdateOutcome, keys_enabled: bool) {
        self.result = Some(outcome.rows_affected);
        self.record_keys(outcome.generated_keys, keys_enabled);
    }

    pub(crate) fn record_batch(&mut self, outcome: BatchOutcome, keys_enabled: bool) {
        self.batch_result = Some(outcome.counts);
        self.record_keys(outcome.generated_keys, keys_enabled);
    }

    fn record_keys(&mut self, keys: Vec<SqlValue>, enabled: bool) {
        self.can_get_keys = enabled;
        self.keys = enabled.then_some(keys);
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close connection scope on drop");
        }
    }
}

impl fmt::Debug for ConnectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionScope")
            .field("closed", &self.is_closed())
            .field("statements", &self.statements)
            .field("auto_close", &self.auto_close)
            .field("rollback_on_close", &self.rollback_on_close)
            .field("rollback_on_exception", &self.rollback_on_exception)
            .finish_non_exhaustive()
    }
}
