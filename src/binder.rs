use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use crate::error::SqlMapperError;
use crate::parsing::{ExpandedStatement, ParsedStatement};
use crate::types::{ParameterSink, SqlValue};

/// A value waiting to be bound at the next statement build.
pub enum PendingParameter {
    Value(SqlValue),
    Null,
    /// Expands to one slot per element; an empty list binds a single NULL.
    Multi(Vec<SqlValue>),
    /// Read to the end when the statement is built.
    Stream(Box<dyn Read + Send>),
}

impl PendingParameter {
    fn width(&self) -> usize {
        match self {
            PendingParameter::Multi(values) => values.len().max(1),
            _ => 1,
        }
    }

    fn is_multi(&self) -> bool {
        matches!(self, PendingParameter::Multi(_))
    }
}

impl fmt::Debug for PendingParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingParameter::Value(value) => f.debug_tuple("Value").field(value).finish(),
            PendingParameter::Null => f.write_str("Null"),
            PendingParameter::Multi(values) => f.debug_tuple("Multi").field(values).finish(),
            PendingParameter::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Objects that can supply named parameters in one call (see `Query::bind`).
pub trait ToParams {
    /// Name/value pairs; names the statement does not declare are ignored.
    fn to_params(&self) -> Vec<(String, SqlValue)>;
}

/// Positional values produced by one build; slots never bound stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParameters {
    slots: Vec<Option<SqlValue>>,
}

impl BoundParameters {
    fn with_slots(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Value at the 1-based `index`, if bound.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        index
            .checked_sub(1)
            .and_then(|idx| self.slots.get(idx))
            .and_then(Option::as_ref)
    }

    /// Bound slots as `(1-based index, value)` pairs.
    pub fn into_bound(self) -> impl Iterator<Item = (usize, SqlValue)> {
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(|(idx, value)| value.map(|v| (idx + 1, v)))
    }
}

impl ParameterSink for BoundParameters {
    fn bind_value(&mut self, index: usize, value: SqlValue) -> Result<(), SqlMapperError> {
        let slot_count = self.slots.len();
        let slot = index
            .checked_sub(1)
            .and_then(|idx| self.slots.get_mut(idx))
            .ok_or_else(|| {
                SqlMapperError::ParameterError(format!(
                    "parameter index {index} out of range (statement has {slot_count} slots)"
                ))
            })?;
        *slot = Some(value);
        Ok(())
    }
}

/// Result of [`ParameterBinder::build`]: the SQL to prepare and the values to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: BoundParameters,
}

/// Pending named values for one parsed statement.
#[derive(Debug)]
pub struct ParameterBinder {
    parsed: ParsedStatement,
    pending: HashMap<String, PendingParameter>,
}

impl ParameterBinder {
    #[must_use]
    pub fn new(parsed: ParsedStatement) -> Self {
        Self {
            parsed,
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn parsed(&self) -> &ParsedStatement {
        &self.parsed
    }

    /// Record `value` for `name`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if the statement does not declare `name`.
    pub fn set(&mut self, name: &str, value: PendingParameter) -> Result<(), SqlMapperError> {
        if !self.parsed.contains(name) {
            return Err(SqlMapperError::ConfigError(format!(
                "Failed to add parameter with name '{name}'. No parameter with that name is declared in the sql."
            )));
        }
        self.pending.insert(name.to_owned(), value);
        Ok(())
    }

    #[must_use]
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn has_multi(&self) -> bool {
        self.pending.values().any(PendingParameter::is_multi)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Expand, bind and clear.
    ///
    /// Every pending value is written to every slot its name occupies. Pending values are cleared
    /// afterwards whether or not binding succeeded, so each build starts from a blank slate.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ConfigError` if a list value is pending and `allow_multi` is
    /// false (nothing is cleared in that case), or `SqlMapperError::ParameterError` if a stream
    /// cannot be read.
    pub fn build(&mut self, allow_multi: bool) -> Result<BoundStatement, SqlMapperError> {
        if !allow_multi && self.has_multi() {
            return Err(SqlMapperError::ConfigError(
                "Array parameters are not allowed in batch mode".into(),
            ));
        }

        let widths: HashMap<String, usize> = self
            .pending
            .iter()
            .filter(|(_, param)| param.is_multi())
            .map(|(name, param)| (name.clone(), param.width()))
            .collect();
        let ExpandedStatement {
            sql,
            positions,
            slot_count,
        } = self.parsed.expand(&widths);

        let mut values = BoundParameters::with_slots(slot_count);
        let pending = std::mem::take(&mut self.pending);
        for (name, param) in pending {
            let Some(starts) = positions.get(&name) else {
                continue;
            };
            bind_pending(&mut values, starts, param)?;
        }

        Ok(BoundStatement { sql, values })
    }
}

fn bind_pending(
    sink: &mut dyn ParameterSink,
    starts: &[usize],
    param: PendingParameter,
) -> Result<(), SqlMapperError> {
    match param {
        PendingParameter::Value(value) => {
            for &start in starts {
                sink.bind_value(start, value.clone())?;
            }
        }
        PendingParameter::Null => {
            for &start in starts {
                sink.bind_value(start, SqlValue::Null)?;
            }
        }
        PendingParameter::Multi(items) if items.is_empty() => {
            for &start in starts {
                sink.bind_value(start, SqlValue::Null)?;
            }
        }
        PendingParameter::Multi(items) => {
            for &start in starts {
                for (offset, item) in items.iter().enumerate() {
                    sink.bind_value(start + offset, item.clone())?;
                }
            }
        }
        PendingParameter::Stream(mut reader) => {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).map_err(|err| {
                SqlMapperError::ParameterError(format!("failed to read stream parameter: {err}"))
            })?;
            for &start in starts {
                sink.bind_value(start, SqlValue::Blob(bytes.clone()))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::parsing::{PlaceholderStyle, parse_named};

    fn binder(sql: &str) -> ParameterBinder {
        ParameterBinder::new(parse_named(sql, PlaceholderStyle::Positional))
    }

    #[test]
    fn undeclared_name_fails_immediately() {
        let mut b = binder("select * from t where id = :id");
        let err = b.set("nope", PendingParameter::Value(SqlValue::Int(1)));
        assert!(matches!(err, Err(SqlMapperError::ConfigError(msg)) if msg.contains("'nope'")));
        assert_eq!(b.pending_len(), 0);
    }

    #[test]
    fn repeated_name_binds_every_position() {
        let mut b = binder("select * from t where a = :x or b = :x");
        b.set("x", PendingParameter::Value(SqlValue::Int(5))).unwrap();
        let bound = b.build(true).unwrap();
        assert_eq!(bound.values.get(1), Some(&SqlValue::Int(5)));
        assert_eq!(bound.values.get(2), Some(&SqlValue::Int(5)));
    }

    #[test]
    fn list_expands_and_shifts_later_slots() {
        let mut b = binder("select * from t where id in (:ids) and kind = :kind");
        b.set(
            "ids",
            PendingParameter::Multi(vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]),
        )
        .unwrap();
        b.set("kind", PendingParameter::Value(SqlValue::Text("k".into())))
            .unwrap();
        let bound = b.build(true).unwrap();
        assert_eq!(bound.sql, "select * from t where id in (?, ?, ?) and kind = ?");
        let pairs: Vec<_> = bound.values.into_bound().collect();
        assert_eq!(
            pairs,
            vec![
                (1, SqlValue::Int(1)),
                (2, SqlValue::Int(2)),
                (3, SqlValue::Int(3)),
                (4, SqlValue::Text("k".into())),
            ]
        );
    }

    #[test]
    fn repeated_list_expands_at_each_occurrence() {
        let mut b = binder(
            "select id from t where (id in (:ids) and k = :k) or (id in (:ids) and id > :min)",
        );
        b.set(
            "ids",
            PendingParameter::Multi(vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]),
        )
        .unwrap();
        b.set("k", PendingParameter::Value(SqlValue::Text("a".into())))
            .unwrap();
        b.set("min", PendingParameter::Value(SqlValue::Int(0))).unwrap();
        let bound = b.build(true).unwrap();
        assert_eq!(
            bound.sql,
            "select id from t where (id in (?, ?, ?) and k = ?) or (id in (?, ?, ?) and id > ?)"
        );
        let pairs: Vec<_> = bound.values.into_bound().collect();
        assert_eq!(
            pairs,
            vec![
                (1, SqlValue::Int(1)),
                (2, SqlValue::Int(2)),
                (3, SqlValue::Int(3)),
                (4, SqlValue::Text("a".into())),
                (5, SqlValue::Int(1)),
                (6, SqlValue::Int(2)),
                (7, SqlValue::Int(3)),
                (8, SqlValue::Int(0)),
            ]
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut bound = BoundParameters::with_slots(2);
        bound.bind_value(2, SqlValue::Int(7)).unwrap();
        for index in [0, 3] {
            let err = bound.bind_value(index, SqlValue::Int(1)).unwrap_err();
            assert!(matches!(err, SqlMapperError::ParameterError(msg) if msg.contains("2 slots")));
        }
    }

    #[test]
    fn empty_list_binds_single_null() {
        let mut b = binder("select * from t where id in (:ids)");
        b.set("ids", PendingParameter::Multi(Vec::new())).unwrap();
        let bound = b.build(true).unwrap();
        assert_eq!(bound.sql, "select * from t where id in (?)");
        assert_eq!(bound.values.get(1), Some(&SqlValue::Null));
    }

    #[test]
    fn list_rejected_in_batch_mode() {
        let mut b = binder("insert into t values (:v)");
        b.set("v", PendingParameter::Multi(vec![SqlValue::Int(1)]))
            .unwrap();
        assert!(matches!(b.build(false), Err(SqlMapperError::ConfigError(_))));
        assert!(b.has_multi());
    }

    #[test]
    fn pending_values_are_cleared_after_build() {
        let mut b = binder("insert into t values (:a, :b)");
        b.set("a", PendingParameter::Value(SqlValue::Int(1))).unwrap();
        b.set("b", PendingParameter::Null).unwrap();
        let first = b.build(true).unwrap();
        assert_eq!(first.values.get(2), Some(&SqlValue::Null));
        assert_eq!(b.pending_len(), 0);

        let second = b.build(true).unwrap();
        assert_eq!(second.values.get(1), None);
    }

    #[test]
    fn stream_is_read_at_build_time() {
        let mut b = binder("insert into files values (:data)");
        b.set(
            "data",
            PendingParameter::Stream(Box::new(Cursor::new(vec![9_u8, 8, 7]))),
        )
        .unwrap();
        let bound = b.build(true).unwrap();
        assert_eq!(bound.values.get(1), Some(&SqlValue::Blob(vec![9, 8, 7])));
    }
}
