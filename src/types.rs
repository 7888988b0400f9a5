use std::sync::Arc;

use crate::error::SqlMapperError;
use crate::table::RowView;

mod enums;
mod handlers;
mod registry;
mod value;

pub use enums::{EnumTypeHandler, SqlEnum};
pub use handlers::{
    BlobStream, BlobStreamTypeHandler, BoolTypeHandler, ByteArrayTypeHandler, CharTypeHandler,
    DateTimeUtcTypeHandler, DateTypeHandler, FixedOffsetTypeHandler, FloatTypeHandler,
    IntegerTypeHandler, JsonTypeHandler, StringTypeHandler, TimeTypeHandler, TimestampTypeHandler,
    UnknownTypeHandler, UuidTypeHandler,
};
pub use registry::TypeHandlerRegistry;
pub use value::SqlValue;

/// Destination for a converted parameter value at a 1-based positional slot.
pub trait ParameterSink {
    /// Store `value` at `index`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError` if the slot does not exist or the value is rejected.
    fn bind_value(&mut self, index: usize, value: SqlValue) -> Result<(), SqlMapperError>;
}

/// Bidirectional converter between an application type and driver values.
///
/// Handlers are stateless and shared across threads. `from_sql` is only asked about non-null
/// values through the provided accessors; a NULL column always reads as `None`.
pub trait TypeHandler<T>: Send + Sync {
    /// Serialize a value into its driver representation.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::ParameterError` if the value cannot be represented.
    fn to_sql(&self, value: &T) -> Result<SqlValue, SqlMapperError>;

    /// Deserialize a driver value. `SqlValue::Null` yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::MappingError` if the value cannot be converted.
    fn from_sql(&self, value: &SqlValue) -> Result<Option<T>, SqlMapperError>;

    /// Bind `value` (or NULL) at the 1-based `index`.
    ///
    /// # Errors
    ///
    /// Propagates conversion failures and sink errors.
    fn set_parameter(
        &self,
        sink: &mut dyn ParameterSink,
        index: usize,
        value: Option<&T>,
    ) -> Result<(), SqlMapperError> {
        let converted = match value {
            Some(value) => self.to_sql(value)?,
            None => SqlValue::Null,
        };
        sink.bind_value(index, converted)
    }

    /// Read the column at the 1-based `index`.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::MappingError` if the index is out of range or conversion fails.
    fn get_by_index(&self, row: &RowView<'_>, index: usize) -> Result<Option<T>, SqlMapperError> {
        let value = row.get_by_index(index).ok_or_else(|| {
            SqlMapperError::MappingError(format!(
                "column index {index} out of range (row has {} columns)",
                row.len()
            ))
        })?;
        if value.is_null() {
            return Ok(None);
        }
        self.from_sql(value)
    }

    /// Read the column called `name`, honoring the row's case sensitivity.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::MappingError` if no such column exists or conversion fails.
    fn get_by_name(&self, row: &RowView<'_>, name: &str) -> Result<Option<T>, SqlMapperError> {
        let value = row
            .get(name)
            .ok_or_else(|| SqlMapperError::MappingError(format!("no column named `{name}`")))?;
        if value.is_null() {
            return Ok(None);
        }
        self.from_sql(value)
    }
}

/// Types the registry can resolve a handler for.
///
/// Built-in types are registered when a registry is created. Enumeration-like types override
/// `auto_handler` so the registry can build their handler on first use.
pub trait SqlType: Sized + Send + Sync + 'static {
    #[must_use]
    fn auto_handler() -> Option<Arc<dyn TypeHandler<Self>>> {
        None
    }
}

/// Sink that keeps the last bound value; used to route a single conversion through
/// `TypeHandler::set_parameter`.
#[derive(Debug, Default)]
pub(crate) struct CapturedValue(pub(crate) Option<SqlValue>);

impl ParameterSink for CapturedValue {
    fn bind_value(&mut self, _index: usize, value: SqlValue) -> Result<(), SqlMapperError> {
        self.0 = Some(value);
        Ok(())
    }
}

/// Convert `value` with `handler`, going through its `set_parameter` hook.
pub(crate) fn convert_parameter<T>(
    handler: &dyn TypeHandler<T>,
    value: Option<&T>,
) -> Result<SqlValue, SqlMapperError> {
    let mut captured = CapturedValue::default();
    handler.set_parameter(&mut captured, 1, value)?;
    Ok(captured.0.unwrap_or(SqlValue::Null))
}
