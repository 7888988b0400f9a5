use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::Query;
use crate::driver::DriverCursor;
use crate::error::SqlMapperError;
use crate::iter::{LazyTable, ResultIter, RowProducer};
use crate::mapping::{MappingPlan, RowMapped};
use crate::scope::ConnectionScope;
use crate::table::{ColumnSet, Row, RowView, Table};
use crate::types::{SqlType, SqlValue};

impl<'s> Query<'s> {
    /// Run the statement once and record the affected row count (and generated keys, when
    /// requested) on the scope.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` wrapping any driver failure, after the scope's
    /// exception hook has run. Configuration errors are returned unwrapped.
    pub fn execute_update(&mut self) -> Result<&mut ConnectionScope, SqlMapperError> {
        let started = Instant::now();
        let keys_enabled = self.keys.is_enabled();
        let result = self.guarded("executeUpdate", |query| {
            let statement = query.prepare_bound(true)?;
            let execution = Instant::now();
            let outcome = query.scope.connection_mut()?.execute_update(statement)?;
            let execution_ms = execution.elapsed().as_millis();
            query.scope.record_update(outcome, keys_enabled);
            Ok(execution_ms)
        });
        let execution_ms = self.finish(result)?;
        debug!(
            total_ms = started.elapsed().as_millis(),
            execution_ms,
            name = self.log_name(),
            "executeUpdate finished"
        );
        Ok(&mut self.scope)
    }

    /// First column of the first row; `None` when there is no row or the value is NULL.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` wrapping any driver failure.
    pub fn execute_scalar(&mut self) -> Result<Option<SqlValue>, SqlMapperError> {
        let started = Instant::now();
        let result = self.guarded("executeScalar", |query| {
            let statement = query.prepare_bound(true)?;
            let mut cursor = query.scope.connection_mut()?.execute_query(statement)?;
            let row = cursor.next_row();
            let closed = cursor.close();
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    if let Err(close_err) = closed {
                        warn!(error = %close_err, "closing scalar cursor failed");
                    }
                    return Err(err);
                }
            };
            closed?;
            Ok(row
                .and_then(|values| values.into_iter().next())
                .filter(|value| !value.is_null()))
        });
        let value = self.finish(result)?;
        debug!(
            total_ms = started.elapsed().as_millis(),
            name = self.log_name(),
            "executeScalar finished"
        );
        Ok(value)
    }

    /// [`execute_scalar`](Self::execute_scalar) converted by the registered handler for `T`.
    ///
    /// # Errors
    ///
    /// Same as `execute_scalar`, plus `SqlMapperError::MappingError` on conversion failure.
    pub fn execute_scalar_as<T: SqlType>(&mut self) -> Result<Option<T>, SqlMapperError> {
        let handler = self.registry.handler::<T>()?;
        match self.execute_scalar()? {
            Some(value) => handler.from_sql(&value),
            None => Ok(None),
        }
    }

    /// First column of every row, converted by the registered handler for `T`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` on driver failure or a mapping error on conversion
    /// failure.
    pub fn execute_scalar_list<T: SqlType>(&mut self) -> Result<Vec<Option<T>>, SqlMapperError> {
        let handler = self.registry.handler::<T>()?;
        self.fetch_with(move |row| handler.get_by_index(row, 1))
    }

    /// Map every row to `T`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` on driver failure, or `SqlMapperError::MappingError`
    /// when the columns do not fit `T` (strict mode) or a value cannot be converted.
    pub fn fetch<T: RowMapped>(&mut self) -> Result<Vec<T>, SqlMapperError> {
        let rows = self.fetch_lazy::<T>()?;
        drain(rows)
    }

    /// The first row mapped to `T`, if any. Remaining rows are not read.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub fn fetch_first<T: RowMapped>(&mut self) -> Result<Option<T>, SqlMapperError> {
        let mut rows = self.fetch_lazy::<T>()?;
        let first = rows.next().transpose()?;
        rows.close()?;
        Ok(first)
    }

    /// Map rows to `T` one at a time as the iterator is advanced.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` if the query cannot be run, or a mapping error if the
    /// result columns do not fit `T`. The cursor is released before the error is returned.
    pub fn fetch_lazy<T: RowMapped>(&mut self) -> Result<ResultIter<'_, T>, SqlMapperError> {
        let options = self.mapping_options();
        let registry = Arc::clone(&self.registry);
        self.open_cursor(move |columns| {
            let plan = MappingPlan::<T>::build(columns, &registry, &options)?;
            let producer: RowProducer<'_, T> = Box::new(move |row: &RowView<'_>| plan.apply(row));
            Ok(producer)
        })
    }

    /// Map every row with `handler`, which always takes precedence over type-driven mapping.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` on driver failure, or the first error `handler`
    /// returns.
    pub fn fetch_with<T, F>(&mut self, handler: F) -> Result<Vec<T>, SqlMapperError>
    where
        F: FnMut(&RowView<'_>) -> Result<T, SqlMapperError>,
    {
        let rows = self.fetch_lazy_with(handler)?;
        drain(rows)
    }

    /// Lazy form of [`fetch_with`](Self::fetch_with).
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` if the query cannot be run.
    pub fn fetch_lazy_with<'q, T, F>(
        &'q mut self,
        handler: F,
    ) -> Result<ResultIter<'q, T>, SqlMapperError>
    where
        F: FnMut(&RowView<'_>) -> Result<T, SqlMapperError> + 'q,
    {
        self.open_cursor(move |_| {
            let producer: RowProducer<'q, T> = Box::new(handler);
            Ok(producer)
        })
    }

    /// The whole result as a generic table named after the query.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` on driver failure.
    pub fn fetch_table(&mut self) -> Result<Table, SqlMapperError> {
        let name = self.name.clone();
        let rows = self.fetch_table_lazy()?;
        let columns = rows.column_set();
        Ok(Table::new(name, columns, drain(rows)?))
    }

    /// Generic rows fetched as the iterator is advanced.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` if the query cannot be run.
    pub fn fetch_table_lazy(&mut self) -> Result<LazyTable<'_>, SqlMapperError> {
        let registry = Arc::clone(&self.registry);
        let case_sensitive = self.case_sensitive;
        self.open_cursor(move |columns| {
            let columns = Arc::clone(columns);
            let producer: RowProducer<'_, Row> = Box::new(move |row: &RowView<'_>| {
                Ok(Row::new(
                    Arc::clone(&columns),
                    row.values().to_vec(),
                    case_sensitive,
                    Arc::clone(&registry),
                ))
            });
            Ok(producer)
        })
    }

    /// Execute, then build the row producer from the result's columns. On any failure the
    /// cursor is closed and a single-call scope released before the error is returned.
    fn open_cursor<'q, T>(
        &'q mut self,
        make: impl FnOnce(&Arc<ColumnSet>) -> Result<RowProducer<'q, T>, SqlMapperError>,
    ) -> Result<ResultIter<'q, T>, SqlMapperError> {
        let started = Instant::now();
        let opened = self.guarded("fetch", |query| {
            let statement = query.prepare_bound(true)?;
            let cursor = query.scope.connection_mut()?.execute_query(statement)?;
            debug!(
                execution_ms = started.elapsed().as_millis(),
                name = query.log_name(),
                "query executed"
            );
            Ok(cursor)
        });
        let mut cursor: Box<dyn DriverCursor> = match opened {
            Ok(cursor) => cursor,
            Err(err) => return Err(self.finish_err(err)),
        };

        let columns = Arc::new(ColumnSet::new(cursor.columns().to_vec()));
        let producer = match make(&columns) {
            Ok(producer) => producer,
            Err(err) => {
                if let Err(close_err) = cursor.close() {
                    warn!(error = %close_err, "failed to close cursor after mapping error");
                }
                return Err(self.finish_err(err));
            }
        };

        let sql = self.sql().to_owned();
        let name = self.name.clone();
        let case_sensitive = self.case_sensitive;
        Ok(ResultIter::new(
            &mut self.scope,
            cursor,
            columns,
            case_sensitive,
            producer,
            sql,
            name,
            started,
        ))
    }
}

fn drain<T>(mut rows: ResultIter<'_, T>) -> Result<Vec<T>, SqlMapperError> {
    let mut out = Vec::new();
    for row in rows.by_ref() {
        out.push(row?);
    }
    rows.close()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::SessionConfig;
    use crate::driver::{ConnectionSource, StatementId};
    use crate::error::SqlMapperError;
    use crate::parsing::PlaceholderStyle;
    use crate::row_mapped;
    use crate::scope::ConnectionScope;
    use crate::test_utils::{Event, RecordingSource};
    use crate::types::{SqlValue, TypeHandlerRegistry};

    #[derive(Debug, Default, PartialEq)]
    struct Pair {
        id: i64,
        name: String,
    }

    row_mapped!(Pair {
        field "id" => id,
        field "name" => name,
    });

    fn open(source: &Arc<RecordingSource>, auto_close: bool) -> ConnectionScope {
        ConnectionScope::open(
            Arc::clone(source) as Arc<dyn ConnectionSource>,
            Arc::new(TypeHandlerRegistry::new()),
            Arc::new(SessionConfig::default()),
            PlaceholderStyle::Positional,
            auto_close,
        )
        .unwrap()
    }

    #[test]
    fn statement_is_prepared_once_for_repeated_updates() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source, false);
        {
            let mut query = scope.create_query("insert into t values (:v)").unwrap();
            query.add_parameter("v", 1_i64).unwrap();
            query.execute_update().unwrap();
            query.add_parameter("v", 2_i64).unwrap();
            query.execute_update().unwrap();
        }
        let events = source.events();
        let prepares = events
            .iter()
            .filter(|e| matches!(e, Event::Prepare(_)))
            .count();
        assert_eq!(prepares, 1);
        assert!(events.contains(&Event::CloseStatement(StatementId::new(1))));
        assert_eq!(scope.open_statements(), 0);
    }

    #[test]
    fn array_expansion_reprepares_only_when_sql_changes() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source, false);
        let mut query = scope.create_query("delete from t where id in (:ids)").unwrap();
        query.add_named_array_parameter("ids", [1_i64, 2]).unwrap();
        query.execute_update().unwrap();
        query.add_named_array_parameter("ids", [3_i64, 4]).unwrap();
        query.execute_update().unwrap();
        query.add_named_array_parameter("ids", [5_i64, 6, 7]).unwrap();
        query.execute_update().unwrap();
        drop(query);

        let prepared: Vec<String> = source
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Prepare(sql) => Some(sql),
                _ => None,
            })
            .collect();
        assert_eq!(
            prepared,
            vec![
                "delete from t where id in (?, ?)".to_string(),
                "delete from t where id in (?, ?, ?)".to_string(),
            ]
        );
    }

    #[test]
    fn unbound_slots_bind_null() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source, false);
        let mut query = scope.create_query("insert into t values (:a, :b)").unwrap();
        query.add_parameter("a", 5_i64).unwrap();
        query.execute_update().unwrap();
        drop(query);
        let events = source.events();
        assert!(events.contains(&Event::Bind(StatementId::new(1), 1, SqlValue::Int(5))));
        assert!(events.contains(&Event::Bind(StatementId::new(1), 2, SqlValue::Null)));
    }

    #[test]
    fn driver_failure_is_wrapped_and_rolls_back() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source, false);
        scope.begin(crate::config::IsolationLevel::ReadCommitted).unwrap();
        source.fail_execution(true);
        let mut query = scope.create_query("update t set a = 1").unwrap();
        query.set_name("touch");
        let err = query.execute_update().unwrap_err();
        match &err {
            SqlMapperError::Execution { context, sql, .. } => {
                assert_eq!(context, "executeUpdate (touch)");
                assert_eq!(sql, "update t set a = 1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root_cause(), SqlMapperError::Other(_)));
        drop(query);
        assert!(source.events().contains(&Event::Rollback));
    }

    #[test]
    fn config_errors_are_not_wrapped() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source, false);
        let mut query = scope.create_query("select :a").unwrap();
        let err = query.add_parameter("b", 1_i64).unwrap_err();
        assert!(matches!(err, SqlMapperError::ConfigError(_)));
    }

    #[test]
    fn scalar_reads_first_column_and_closes_cursor() {
        let source = Arc::new(RecordingSource::with_result(
            &["count"],
            vec![vec![SqlValue::Int(42)], vec![SqlValue::Int(7)]],
        ));
        let mut scope = open(&source, false);
        let mut query = scope.create_query("select count(*) from t").unwrap();
        assert_eq!(query.execute_scalar_as::<i64>().unwrap(), Some(42));
        drop(query);
        assert!(source.events().contains(&Event::CloseCursor));
    }

    #[test]
    fn scalar_read_failure_wins_over_close_failure() {
        let source = Arc::new(RecordingSource::with_result(
            &["count"],
            vec![vec![SqlValue::Int(1)]],
        ));
        let mut scope = open(&source, false);
        source.fail_cursor(true);
        let mut query = scope.create_query("select count(*) from t").unwrap();
        let err = query.execute_scalar().unwrap_err();
        assert!(
            matches!(err.root_cause(), SqlMapperError::Other(msg) if msg == "scripted fetch failure")
        );
        drop(query);
        assert!(source.events().contains(&Event::CloseCursor));
    }

    #[test]
    fn fetch_maps_objects_and_auto_closes_scope() {
        let source = Arc::new(RecordingSource::with_result(
            &["ID", "NAME"],
            vec![
                vec![SqlValue::Int(1), SqlValue::Text("a".into())],
                vec![SqlValue::Int(2), SqlValue::Text("b".into())],
            ],
        ));
        let mut scope = open(&source, true);
        let mut query = scope.create_query("select * from t").unwrap();
        let rows: Vec<Pair> = query.fetch().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "b");
        assert!(query.scope().is_closed());
        drop(query);
        let closes = source
            .events()
            .iter()
            .filter(|e| **e == Event::Close)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn mapping_failure_releases_cursor() {
        let source = Arc::new(RecordingSource::with_result(
            &["id", "unknown"],
            vec![vec![SqlValue::Int(1), SqlValue::Int(2)]],
        ));
        let mut scope = open(&source, false);
        let mut query = scope.create_query("select * from t").unwrap();
        let err = query.fetch::<Pair>().unwrap_err();
        assert!(matches!(err, SqlMapperError::MappingError(_)));
        drop(query);
        assert!(source.events().contains(&Event::CloseCursor));
    }

    #[test]
    fn table_rows_convert_through_registry() {
        let source = Arc::new(RecordingSource::with_result(
            &["id", "name"],
            vec![vec![SqlValue::Int(3), SqlValue::Text("c".into())]],
        ));
        let mut scope = open(&source, false);
        let mut query = scope.create_query("select * from t").unwrap();
        query.set_name("people");
        let table = query.fetch_table().unwrap();
        assert_eq!(table.name(), Some("people"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].get::<String>("NAME").unwrap().as_deref(), Some("c"));
    }
}
