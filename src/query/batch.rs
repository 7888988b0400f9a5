use std::time::Instant;

use tracing::debug;

use super::Query;
use crate::driver::BatchOutcome;
use crate::error::SqlMapperError;
use crate::scope::ConnectionScope;
use crate::types::SqlType;

impl<'s> Query<'s> {
    /// Flush automatically after every `max` entries added with `add_to_batch`; 0 disables
    /// automatic flushing.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` for a negative `max`.
    pub fn set_max_batch_records(&mut self, max: i64) -> Result<&mut Self, SqlMapperError> {
        self.max_batch_records = usize::try_from(max).map_err(|_| {
            SqlMapperError::ConfigError(format!(
                "max batch records must be zero or positive, got {max}"
            ))
        })?;
        Ok(self)
    }

    #[must_use]
    pub fn max_batch_records(&self) -> usize {
        self.max_batch_records
    }

    /// Entries added since the last flush.
    #[must_use]
    pub fn current_batch_records(&self) -> usize {
        self.current_batch_records
    }

    /// Whether entries are waiting that only an explicit `execute_batch` will run.
    #[must_use]
    pub fn is_explicit_execute_batch_required(&self) -> bool {
        (self.max_batch_records > 0 && self.current_batch_records > 0)
            || self.max_batch_records == 0
    }

    /// Record the current parameter values as one batch entry and clear them.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if a list parameter is pending, or
    /// `SqlMapperError::Execution` wrapping a driver failure (including one from an implicit
    /// flush).
    pub fn add_to_batch(&mut self) -> Result<&mut Self, SqlMapperError> {
        self.add_batch_entry()?;
        Ok(self)
    }

    /// Like [`add_to_batch`](Self::add_to_batch), returning the keys generated when the entry
    /// triggered an implicit flush, or an empty list otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the query was created without key retrieval,
    /// plus any error `add_to_batch` reports.
    pub fn add_to_batch_get_keys<T: SqlType>(&mut self) -> Result<Vec<T>, SqlMapperError> {
        if !self.keys.is_enabled() {
            return Err(SqlMapperError::ConfigError(
                "generated keys were not requested; create the query with key retrieval enabled"
                    .into(),
            ));
        }
        if self.add_batch_entry()? {
            self.scope.keys_as::<T>()
        } else {
            Ok(Vec::new())
        }
    }

    /// Run every pending entry, record per-entry counts (and keys) on the scope and reset the
    /// entry counter.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::Execution` wrapping a driver failure.
    pub fn execute_batch(&mut self) -> Result<&mut ConnectionScope, SqlMapperError> {
        let started = Instant::now();
        let entries = self.current_batch_records;
        let result = self.guarded("executeBatch", Query::flush_batch);
        self.finish(result)?;
        debug!(
            total_ms = started.elapsed().as_millis(),
            entries,
            name = self.log_name(),
            "executeBatch finished"
        );
        Ok(&mut self.scope)
    }

    /// Returns true when the entry caused an implicit flush.
    fn add_batch_entry(&mut self) -> Result<bool, SqlMapperError> {
        self.guarded("addToBatch", |query| {
            let statement = query.prepare_bound(false)?;
            query.scope.connection_mut()?.add_batch(statement)?;
            query.current_batch_records += 1;
            if query.max_batch_records > 0
                && query.current_batch_records % query.max_batch_records == 0
            {
                query.flush_batch()?;
                return Ok(true);
            }
            Ok(false)
        })
    }

    fn flush_batch(&mut self) -> Result<(), SqlMapperError> {
        // The driver drops its pending entries whether or not they run.
        self.current_batch_records = 0;
        let outcome = match self.live_statement() {
            Some(statement) => self.scope.connection_mut()?.execute_batch(statement)?,
            None => BatchOutcome::default(),
        };
        debug!(
            entries = outcome.counts.len(),
            name = self.log_name(),
            "batch flushed"
        );
        let keys_enabled = self.keys.is_enabled();
        self.scope.record_batch(outcome, keys_enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::SessionConfig;
    use crate::driver::{ConnectionSource, KeyRetrieval};
    use crate::error::SqlMapperError;
    use crate::parsing::PlaceholderStyle;
    use crate::scope::ConnectionScope;
    use crate::test_utils::{Event, RecordingSource};
    use crate::types::TypeHandlerRegistry;

    fn open(source: &Arc<RecordingSource>) -> ConnectionScope {
        ConnectionScope::open(
            Arc::clone(source) as Arc<dyn ConnectionSource>,
            Arc::new(TypeHandlerRegistry::new()),
            Arc::new(SessionConfig::default()),
            PlaceholderStyle::Positional,
            false,
        )
        .unwrap()
    }

    fn flushes(source: &RecordingSource) -> usize {
        source
            .events()
            .iter()
            .filter(|e| matches!(e, Event::ExecuteBatch(_)))
            .count()
    }

    #[test]
    fn flushes_after_every_nth_entry() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        query.set_max_batch_records(3).unwrap();
        for value in 0..7_i64 {
            query.add_parameter("v", value).unwrap();
            query.add_to_batch().unwrap();
        }
        assert_eq!(flushes(&source), 2);
        assert_eq!(query.current_batch_records(), 1);
        assert!(query.is_explicit_execute_batch_required());

        let scope = query.execute_batch().unwrap();
        assert_eq!(scope.batch_result().unwrap(), &[1]);
        assert_eq!(flushes(&source), 3);
    }

    #[test]
    fn failed_implicit_flush_resets_entry_count() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        query.set_max_batch_records(2).unwrap();
        query.add_parameter("v", 1_i64).unwrap();
        query.add_to_batch().unwrap();

        source.fail_batch(true);
        query.add_parameter("v", 2_i64).unwrap();
        let err = query.add_to_batch().unwrap_err();
        assert!(matches!(err, SqlMapperError::Execution { .. }));
        assert_eq!(query.current_batch_records(), 0);
        assert!(!query.is_explicit_execute_batch_required());

        source.fail_batch(false);
        for value in 3..5_i64 {
            query.add_parameter("v", value).unwrap();
            query.add_to_batch().unwrap();
        }
        assert_eq!(query.current_batch_records(), 0);
        assert_eq!(query.scope().batch_result().unwrap(), &[1, 1]);
    }

    #[test]
    fn zero_max_never_flushes_implicitly() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        for value in 0..5_i64 {
            query.add_parameter("v", value).unwrap();
            query.add_to_batch().unwrap();
        }
        assert_eq!(flushes(&source), 0);
        query.execute_batch().unwrap();
        assert_eq!(query.scope().batch_result().unwrap().len(), 5);
        assert_eq!(query.current_batch_records(), 0);
    }

    #[test]
    fn negative_max_is_rejected() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        assert!(matches!(
            query.set_max_batch_records(-1),
            Err(SqlMapperError::ConfigError(_))
        ));
    }

    #[test]
    fn arrays_are_rejected_while_batching() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        query.add_named_array_parameter("v", [1_i64, 2]).unwrap();
        assert!(matches!(
            query.add_to_batch(),
            Err(SqlMapperError::ConfigError(_))
        ));
        drop(query);

        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        query.add_parameter("v", 1_i64).unwrap();
        query.add_to_batch().unwrap();
        assert!(matches!(
            query.add_named_array_parameter("v", [1_i64]),
            Err(SqlMapperError::ConfigError(_))
        ));
    }

    #[test]
    fn batch_keys_require_key_retrieval() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope
            .create_query_with_keys("insert into t values (:v)", KeyRetrieval::None)
            .unwrap();
        query.add_parameter("v", 1_i64).unwrap();
        assert!(matches!(
            query.add_to_batch_get_keys::<i64>(),
            Err(SqlMapperError::ConfigError(_))
        ));
    }

    #[test]
    fn batch_keys_returned_on_implicit_flush() {
        let source = Arc::new(RecordingSource::default());
        let mut scope = open(&source);
        let mut query = scope.create_query("insert into t values (:v)").unwrap();
        query.set_max_batch_records(2).unwrap();
        query.add_parameter("v", 1_i64).unwrap();
        assert!(query.add_to_batch_get_keys::<i64>().unwrap().is_empty());
        query.add_parameter("v", 2_i64).unwrap();
        assert_eq!(query.add_to_batch_get_keys::<i64>().unwrap(), vec![1, 2]);
    }
}
