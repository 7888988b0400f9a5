use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::driver::ColumnMeta;
use crate::error::SqlMapperError;
use crate::types::{SqlType, SqlValue, TypeHandlerRegistry};

/// Column metadata for one result set, shared by every row read from it.
#[derive(Debug, Clone)]
pub struct ColumnSet {
    columns: Vec<ColumnMeta>,
    // name -> index lookups, exact and lowercased (first occurrence wins)
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl ColumnSet {
    #[must_use]
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        let mut exact = HashMap::with_capacity(columns.len());
        let mut folded = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            exact.entry(column.name.clone()).or_insert(idx);
            folded.entry(column.name.to_lowercase()).or_insert(idx);
        }
        Self {
            columns,
            exact,
            folded,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column name at the 0-based `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// 0-based index of the column called `name`.
    #[must_use]
    pub fn index_of(&self, name: &str, case_sensitive: bool) -> Option<usize> {
        if case_sensitive {
            self.exact.get(name).copied()
        } else {
            self.exact
                .get(name)
                .or_else(|| self.folded.get(&name.to_lowercase()))
                .copied()
        }
    }
}

/// Borrowed view of the current row handed to row handlers and type handlers.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a ColumnSet,
    values: &'a [SqlValue],
    case_sensitive: bool,
}

impl<'a> RowView<'a> {
    #[must_use]
    pub fn new(columns: &'a ColumnSet, values: &'a [SqlValue], case_sensitive: bool) -> Self {
        Self {
            columns,
            values,
            case_sensitive,
        }
    }

    /// Value at the 1-based `index`.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&'a SqlValue> {
        index.checked_sub(1).and_then(|idx| self.values.get(idx))
    }

    /// Value of the column called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a SqlValue> {
        self.columns
            .index_of(name, self.case_sensitive)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> &'a ColumnSet {
        self.columns
    }

    #[must_use]
    pub fn values(&self) -> &'a [SqlValue] {
        self.values
    }
}

/// A row of a generic [`Table`], with typed access through the session's registry.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnSet>,
    values: Vec<SqlValue>,
    case_sensitive: bool,
    registry: Arc<TypeHandlerRegistry>,
}

impl Row {
    pub(crate) fn new(
        columns: Arc<ColumnSet>,
        values: Vec<SqlValue>,
        case_sensitive: bool,
        registry: Arc<TypeHandlerRegistry>,
    ) -> Self {
        Self {
            columns,
            values,
            case_sensitive,
            registry,
        }
    }

    #[must_use]
    pub fn view(&self) -> RowView<'_> {
        RowView::new(&self.columns, &self.values, self.case_sensitive)
    }

    /// Raw value of the column called `name`.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .index_of(name, self.case_sensitive)
            .and_then(|idx| self.values.get(idx))
    }

    /// Raw value at the 1-based `index`.
    #[must_use]
    pub fn get_value_at(&self, index: usize) -> Option<&SqlValue> {
        index.checked_sub(1).and_then(|idx| self.values.get(idx))
    }

    /// Convert the column called `name` with the registered handler for `T`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::MappingError` if the column is missing, no handler exists for `T`,
    /// or conversion fails.
    pub fn get<T: SqlType>(&self, name: &str) -> Result<Option<T>, SqlMapperError> {
        self.registry.handler::<T>()?.get_by_name(&self.view(), name)
    }

    /// Convert the column at the 1-based `index`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::MappingError` if the index is out of range, no handler exists for
    /// `T`, or conversion fails.
    pub fn get_at<T: SqlType>(&self, index: usize) -> Result<Option<T>, SqlMapperError> {
        self.registry.handler::<T>()?.get_by_index(&self.view(), index)
    }

    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    #[must_use]
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    /// Column name to JSON value, in column order.
    #[must_use]
    pub fn as_map(&self) -> JsonMap<String, JsonValue> {
        self.columns
            .names()
            .zip(&self.values)
            .map(|(name, value)| (name.to_owned(), value.to_json()))
            .collect()
    }
}

/// Fully materialized result set in generic row/column form.
#[derive(Debug, Clone)]
pub struct Table {
    name: Option<String>,
    columns: Arc<ColumnSet>,
    rows: Vec<Row>,
}

impl Table {
    pub(crate) fn new(name: Option<String>, columns: Arc<ColumnSet>, rows: Vec<Row>) -> Self {
        Self {
            name,
            columns,
            rows,
        }
    }

    /// Name of the query that produced the table, if it had one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row as a column-name keyed map.
    #[must_use]
    pub fn as_list(&self) -> Vec<JsonMap<String, JsonValue>> {
        self.rows.iter().map(Row::as_map).collect()
    }
}
