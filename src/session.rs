use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{IsolationLevel, SessionConfig};
use crate::driver::{ConnectionSource, KeyRetrieval};
use crate::error::SqlMapperError;
use crate::parsing::PlaceholderStyle;
use crate::query::{Query, ScopeHandle};
use crate::scope::ConnectionScope;
use crate::types::TypeHandlerRegistry;

/// Entry point: a connection source plus the configuration and type registry every scope
/// opened from it shares.
///
/// Cheap to clone; clones share the source, configuration and registry.
///
/// # Examples
/// ```rust,no_run
/// # #[cfg(feature = "sqlite")]
/// # fn demo() -> Result<(), sql_mapper::SqlMapperError> {
/// use sql_mapper::prelude::*;
///
/// let session = Session::new(SqliteOptionsBuilder::new("app.db".into()).build())
///     .with_config(SessionConfig::default().with_auto_derive_column_names(true));
///
/// let total = session.with_connection(|scope| {
///     scope.create_query("select count(*) from users")?.execute_scalar_as::<i64>()
/// })?;
/// # let _ = total;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    source: Arc<dyn ConnectionSource>,
    registry: Arc<TypeHandlerRegistry>,
    config: Arc<SessionConfig>,
}

impl Session {
    /// Session over `source` with default configuration and the built-in type handlers.
    #[must_use]
    pub fn new(source: impl ConnectionSource + 'static) -> Self {
        Self::from_source(Arc::new(source))
    }

    #[must_use]
    pub fn from_source(source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            source,
            registry: Arc::new(TypeHandlerRegistry::new()),
            config: Arc::new(SessionConfig::default()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Share `registry` instead of the session's own.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TypeHandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registry used for parameter and column conversions; register custom handlers here.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeHandlerRegistry> {
        &self.registry
    }

    /// Configured placeholder style, else the one the connection source asks for.
    #[must_use]
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.config
            .placeholder_style
            .unwrap_or_else(|| self.source.placeholder_style())
    }

    fn scope(&self, auto_close: bool) -> Result<ConnectionScope, SqlMapperError> {
        ConnectionScope::open(
            Arc::clone(&self.source),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            self.placeholder_style(),
            auto_close,
        )
    }

    /// Acquire a connection in auto-commit mode.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the source cannot produce a connection.
    pub fn open(&self) -> Result<ConnectionScope, SqlMapperError> {
        self.scope(false)
    }

    /// A query on its own connection, released after the first eager call (or when a lazy
    /// result is closed).
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the source cannot produce a connection.
    pub fn create_query(&self, sql: &str) -> Result<Query<'static>, SqlMapperError> {
        let keys = if self.config.generated_keys {
            KeyRetrieval::All
        } else {
            KeyRetrieval::None
        };
        let scope = self.scope(true)?;
        Ok(Query::new(ScopeHandle::Owned(Box::new(scope)), sql, keys))
    }

    /// Begin a transaction at the configured default isolation level.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if no connection can be acquired or the transaction cannot start.
    pub fn begin_transaction(&self) -> Result<ConnectionScope, SqlMapperError> {
        self.begin_transaction_with(self.config.default_isolation)
    }

    /// Begin a transaction at `isolation`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if no connection can be acquired or the transaction cannot start.
    pub fn begin_transaction_with(
        &self,
        isolation: IsolationLevel,
    ) -> Result<ConnectionScope, SqlMapperError> {
        let mut scope = self.scope(false)?;
        scope.begin(isolation)?;
        Ok(scope)
    }

    /// Run `f` on a fresh connection that is closed afterwards whatever `f` returns.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or the close failure when `f` succeeded.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut ConnectionScope) -> Result<R, SqlMapperError>,
    ) -> Result<R, SqlMapperError> {
        let mut scope = self.open()?;
        match f(&mut scope) {
            Ok(value) => {
                scope.close()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(close_err) = scope.close() {
                    warn!(error = %close_err, "failed to close connection after error");
                }
                Err(err)
            }
        }
    }

    /// Run `f` in a transaction at the default isolation level: commit when it returns `Ok`,
    /// roll back when it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::TransactionRolledBack` carrying the callback's error, or the
    /// error from starting or committing the transaction.
    pub fn run_in_transaction<A, R, E>(
        &self,
        f: impl FnOnce(&mut ConnectionScope, A) -> Result<R, E>,
        argument: A,
    ) -> Result<R, SqlMapperError>
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.run_in_transaction_with(self.config.default_isolation, f, argument)
    }

    /// [`run_in_transaction`](Self::run_in_transaction) at an explicit isolation level.
    ///
    /// # Errors
    ///
    /// Same as `run_in_transaction`.
    pub fn run_in_transaction_with<A, R, E>(
        &self,
        isolation: IsolationLevel,
        f: impl FnOnce(&mut ConnectionScope, A) -> Result<R, E>,
        argument: A,
    ) -> Result<R, SqlMapperError>
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let mut scope = self.begin_transaction_with(isolation)?;
        match f(&mut scope, argument) {
            Ok(value) => {
                if !scope.is_closed() {
                    scope.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if !scope.is_closed()
                    && let Err(rollback_err) = scope.rollback()
                {
                    warn!(error = %rollback_err, "rollback after failed transaction callback failed");
                }
                debug!("transaction callback failed, changes rolled back");
                Err(SqlMapperError::TransactionRolledBack { source: err.into() })
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("placeholder_style", &self.placeholder_style())
            .finish_non_exhaustive()
    }
}
