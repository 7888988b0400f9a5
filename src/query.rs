//! Named-parameter statements bound to a connection scope.

use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::warn;

use crate::binder::{ParameterBinder, PendingParameter, ToParams};
use crate::driver::{KeyRetrieval, StatementId};
use crate::error::SqlMapperError;
use crate::mapping::{ColumnMappings, MappingOptions};
use crate::parsing::{ParsedStatement, parse_named};
use crate::scope::ConnectionScope;
use crate::types::{SqlType, SqlValue, TypeHandler, TypeHandlerRegistry, convert_parameter};

mod batch;
mod execute;

/// The scope a query runs on: borrowed from the caller, or owned for a single call.
pub(crate) enum ScopeHandle<'s> {
    Borrowed(&'s mut ConnectionScope),
    Owned(Box<ConnectionScope>),
}

impl Deref for ScopeHandle<'_> {
    type Target = ConnectionScope;

    fn deref(&self) -> &ConnectionScope {
        match self {
            ScopeHandle::Borrowed(scope) => scope,
            ScopeHandle::Owned(scope) => scope,
        }
    }
}

impl DerefMut for ScopeHandle<'_> {
    fn deref_mut(&mut self) -> &mut ConnectionScope {
        match self {
            ScopeHandle::Borrowed(scope) => scope,
            ScopeHandle::Owned(scope) => scope,
        }
    }
}

#[derive(Debug)]
struct PreparedSql {
    id: StatementId,
    sql: String,
    generation: u64,
}

/// One SQL statement with `:name` parameters.
///
/// The SQL is parsed once when the query is created. The driver statement is prepared on first
/// execution and reused until array expansion changes the SQL text. Pending parameter values are
/// cleared after every execution, so each batch entry or re-execution starts clean.
///
/// ```rust,no_run
/// # #[cfg(feature = "sqlite")]
/// # fn demo() -> Result<(), sql_mapper::SqlMapperError> {
/// use sql_mapper::prelude::*;
///
/// let session = Session::new(SqliteOptionsBuilder::new("app.db".into()).build());
/// let mut scope = session.open()?;
/// let mut query = scope.create_query("insert into users (name) values (:name)")?;
/// query.add_parameter("name", "Ada".to_string())?;
/// let inserted = query.execute_update()?.result()?;
/// assert_eq!(inserted, 1);
/// # Ok(())
/// # }
/// ```
pub struct Query<'s> {
    scope: ScopeHandle<'s>,
    binder: ParameterBinder,
    registry: Arc<TypeHandlerRegistry>,
    keys: KeyRetrieval,
    statement: Option<PreparedSql>,
    name: Option<String>,
    case_sensitive: bool,
    auto_derive_column_names: bool,
    throw_on_mapping_failure: bool,
    column_mappings: ColumnMappings,
    max_batch_records: usize,
    current_batch_records: usize,
}

impl<'s> Query<'s> {
    pub(crate) fn new(scope: ScopeHandle<'s>, sql: &str, keys: KeyRetrieval) -> Self {
        let config = Arc::clone(scope.config());
        let registry = Arc::clone(scope.registry());
        let parsed = parse_named(sql, scope.placeholder_style());
        let mut column_mappings = ColumnMappings::new();
        column_mappings.extend(&config.default_column_mappings);
        Self {
            scope,
            binder: ParameterBinder::new(parsed),
            registry,
            keys,
            statement: None,
            name: None,
            case_sensitive: config.default_case_sensitive,
            auto_derive_column_names: config.auto_derive_column_names,
            throw_on_mapping_failure: config.throw_on_mapping_failure,
            column_mappings,
            max_batch_records: 0,
            current_batch_records: 0,
        }
    }

    /// Bind `value` to every occurrence of `:name`, converted by the registered handler for `T`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare `name`,
    /// `SqlMapperError::MappingError` if no handler exists for `T`, or the handler's conversion
    /// error.
    pub fn add_parameter<T: SqlType>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, SqlMapperError> {
        let handler = self.registry.handler::<T>()?;
        self.add_parameter_with(name, handler.as_ref(), Some(&value))
    }

    /// Bind `value`, or NULL when it is `None`.
    ///
    /// # Errors
    ///
    /// Same as [`add_parameter`](Self::add_parameter).
    pub fn add_optional_parameter<T: SqlType>(
        &mut self,
        name: &str,
        value: Option<T>,
    ) -> Result<&mut Self, SqlMapperError> {
        match value {
            Some(value) => self.add_parameter(name, value),
            None => self.add_null_parameter(name),
        }
    }

    /// Bind `value` converted by an explicitly chosen handler.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare `name`, or the
    /// handler's conversion error.
    pub fn add_parameter_with<T>(
        &mut self,
        name: &str,
        handler: &dyn TypeHandler<T>,
        value: Option<&T>,
    ) -> Result<&mut Self, SqlMapperError> {
        let pending = match value {
            Some(_) => PendingParameter::Value(convert_parameter(handler, value)?),
            None => PendingParameter::Null,
        };
        self.binder.set(name, pending)?;
        Ok(self)
    }

    /// Bind an explicit NULL.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare `name`.
    pub fn add_null_parameter(&mut self, name: &str) -> Result<&mut Self, SqlMapperError> {
        self.binder.set(name, PendingParameter::Null)?;
        Ok(self)
    }

    /// Bind a list; each occurrence of `:name` expands to one placeholder per element.
    /// An empty list binds a single NULL.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare `name` or a batch
    /// is being built, or a conversion error for any element.
    pub fn add_named_array_parameter<T: SqlType>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = T>,
    ) -> Result<&mut Self, SqlMapperError> {
        if self.current_batch_records > 0 {
            return Err(SqlMapperError::ConfigError(
                "Array parameters are not allowed in batch mode".into(),
            ));
        }
        let handler = self.registry.handler::<T>()?;
        let converted = values
            .into_iter()
            .map(|value| convert_parameter(handler.as_ref(), Some(&value)))
            .collect::<Result<Vec<_>, _>>()?;
        self.binder.set(name, PendingParameter::Multi(converted))?;
        Ok(self)
    }

    /// Bind the full contents of `reader` as a blob; the reader is drained at execution time.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare `name`.
    pub fn add_stream_parameter(
        &mut self,
        name: &str,
        reader: impl Read + Send + 'static,
    ) -> Result<&mut Self, SqlMapperError> {
        self.binder
            .set(name, PendingParameter::Stream(Box::new(reader)))?;
        Ok(self)
    }

    /// Bind `values` to `:p1`, `:p2`, ... in order.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement lacks one of the positional names.
    pub fn with_params(
        &mut self,
        values: impl IntoIterator<Item = SqlValue>,
    ) -> Result<&mut Self, SqlMapperError> {
        for (idx, value) in values.into_iter().enumerate() {
            let name = format!("p{}", idx + 1);
            self.binder.set(&name, pending_value(value))?;
        }
        Ok(self)
    }

    /// Bind every name `source` exposes that the statement declares; the rest are ignored.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for parity with the other binding calls.
    pub fn bind(&mut self, source: &impl ToParams) -> Result<&mut Self, SqlMapperError> {
        for (name, value) in source.to_params() {
            if self.binder.parsed().contains(&name) {
                self.binder.set(&name, pending_value(value))?;
            }
        }
        Ok(self)
    }

    /// Label used in logs and error context.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) -> &mut Self {
        self.case_sensitive = case_sensitive;
        self
    }

    #[must_use]
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn set_auto_derive_column_names(&mut self, auto_derive: bool) -> &mut Self {
        self.auto_derive_column_names = auto_derive;
        self
    }

    /// Fail on result columns that match no member (`true`) or skip them (`false`).
    pub fn throw_on_mapping_failure(&mut self, throw: bool) -> &mut Self {
        self.throw_on_mapping_failure = throw;
        self
    }

    /// Map `column` onto the member path `property`, overriding any session default.
    pub fn add_column_mapping(&mut self, column: &str, property: &str) -> &mut Self {
        self.column_mappings.insert(column, property);
        self
    }

    #[must_use]
    pub fn column_mappings(&self) -> &ColumnMappings {
        &self.column_mappings
    }

    #[must_use]
    pub fn parsed(&self) -> &ParsedStatement {
        self.binder.parsed()
    }

    /// SQL as written by the caller.
    #[must_use]
    pub fn sql(&self) -> &str {
        self.binder.parsed().original()
    }

    #[must_use]
    pub fn key_retrieval(&self) -> &KeyRetrieval {
        &self.keys
    }

    #[must_use]
    pub fn scope(&self) -> &ConnectionScope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ConnectionScope {
        &mut self.scope
    }

    fn mapping_options(&self) -> MappingOptions {
        MappingOptions {
            case_sensitive: self.case_sensitive,
            auto_derive_column_names: self.auto_derive_column_names,
            throw_on_mapping_failure: self.throw_on_mapping_failure,
            column_mappings: self.column_mappings.clone(),
        }
    }

    fn log_name(&self) -> &str {
        self.name.as_deref().unwrap_or("No name")
    }

    /// Build pending values, make sure the matching statement is prepared, and bind every slot.
    fn prepare_bound(&mut self, allow_multi: bool) -> Result<StatementId, SqlMapperError> {
        let bound = self.binder.build(allow_multi)?;
        let statement = self.ensure_prepared(&bound.sql)?;
        let connection = self.scope.connection_mut()?;
        connection.clear_bindings(statement)?;
        for index in 1..=bound.values.len() {
            let value = bound.values.get(index).cloned().unwrap_or(SqlValue::Null);
            connection.bind(statement, index, value)?;
        }
        Ok(statement)
    }

    fn ensure_prepared(&mut self, sql: &str) -> Result<StatementId, SqlMapperError> {
        if let Some(prepared) = &self.statement
            && prepared.sql == sql
            && self.scope.is_tracked(prepared.id, prepared.generation)
        {
            return Ok(prepared.id);
        }
        self.release_statement();
        let id = self.scope.prepare(sql, &self.keys)?;
        self.statement = Some(PreparedSql {
            id,
            sql: sql.to_owned(),
            generation: self.scope.generation(),
        });
        Ok(id)
    }

    /// The prepared statement, if it still belongs to the scope's live connection.
    fn live_statement(&self) -> Option<StatementId> {
        self.statement
            .as_ref()
            .filter(|prepared| self.scope.is_tracked(prepared.id, prepared.generation))
            .map(|prepared| prepared.id)
    }

    fn release_statement(&mut self) {
        let Some(prepared) = self.statement.take() else {
            return;
        };
        if !self.scope.is_tracked(prepared.id, prepared.generation) {
            return;
        }
        if let Err(err) = self.scope.close_statement(prepared.id) {
            warn!(statement = %prepared.id, error = %err, "failed to close statement");
        }
    }

    /// Run `op`; driver failures trigger the scope's exception hook and gain the SQL as context.
    fn guarded<R>(
        &mut self,
        context: &str,
        op: impl FnOnce(&mut Self) -> Result<R, SqlMapperError>,
    ) -> Result<R, SqlMapperError> {
        op(self).map_err(|err| self.fail(context, err))
    }

    fn fail(&mut self, context: &str, err: SqlMapperError) -> SqlMapperError {
        if !err.is_driver_error() {
            return err;
        }
        self.scope.on_exception();
        let context = match &self.name {
            Some(name) => format!("{context} ({name})"),
            None => context.to_owned(),
        };
        SqlMapperError::execution(context, self.sql(), err)
    }

    /// Close a single-call scope after an eager operation; a close failure never hides an
    /// earlier error.
    fn finish<R>(&mut self, result: Result<R, SqlMapperError>) -> Result<R, SqlMapperError> {
        match result {
            Ok(value) => {
                self.scope.close_if_auto()?;
                Ok(value)
            }
            Err(err) => Err(self.finish_err(err)),
        }
    }

    fn finish_err(&mut self, err: SqlMapperError) -> SqlMapperError {
        if let Err(close_err) = self.scope.close_if_auto() {
            warn!(error = %close_err, "failed to close connection after error");
        }
        err
    }
}

fn pending_value(value: SqlValue) -> PendingParameter {
    if value.is_null() {
        PendingParameter::Null
    } else {
        PendingParameter::Value(value)
    }
}

impl Drop for Query<'_> {
    fn drop(&mut self) {
        self.release_statement();
    }
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql())
            .field("name", &self.name)
            .field("keys", &self.keys)
            .field("statement", &self.statement)
            .field("max_batch_records", &self.max_batch_records)
            .field("current_batch_records", &self.current_batch_records)
            .finish_non_exhaustive()
    }
}
