//! Result-row to value mapping.
//!
//! A target type describes its shape through [`RowMapped`]: either a scalar read from the only
//! column, or an object whose members are listed in a [`RowDescriptor`]. For each executed
//! result set a plan is built once from the column names (explicit mappings, then name matching,
//! then optional collapsed-name matching) and applied to every row.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::SqlMapperError;
use crate::types::{BlobStream, SqlType, SqlValue, TypeHandlerRegistry};

mod descriptor;
mod naming;
mod plan;

pub use descriptor::{RowDescriptor, RowDescriptorBuilder};
pub use naming::collapse;
pub use plan::{ColumnMappings, MappingOptions};

pub(crate) use plan::MappingPlan;

pub(crate) type ScalarReader<T> =
    Box<dyn Fn(&SqlValue) -> Result<T, SqlMapperError> + Send + Sync>;

/// Types a result row can be mapped to.
///
/// Implemented for the built-in scalar types and `Option` of them; structs get it through
/// [`row_mapped!`](crate::row_mapped), fieldless enums through [`sql_enum!`](crate::sql_enum).
pub trait RowMapped: Sized + Send + 'static {
    fn row_shape() -> RowShape<Self>;
}

/// How rows become a `T`.
pub enum RowShape<T> {
    /// Read the single column through the registry's handler.
    Scalar(ScalarShape<T>),
    /// Assign columns to members.
    Object(Arc<RowDescriptor<T>>),
}

/// Deferred scalar reader; resolved against a registry when a plan is built.
pub struct ScalarShape<T> {
    resolve: fn(&TypeHandlerRegistry) -> Result<ScalarReader<T>, SqlMapperError>,
}

impl<T> ScalarShape<T> {
    fn reader(&self, registry: &TypeHandlerRegistry) -> Result<ScalarReader<T>, SqlMapperError> {
        (self.resolve)(registry)
    }
}

fn scalar_reader<T: SqlType + Default>(
    registry: &TypeHandlerRegistry,
) -> Result<ScalarReader<T>, SqlMapperError> {
    let handler = registry.handler::<T>()?;
    Ok(Box::new(move |value: &SqlValue| {
        Ok(handler.from_sql(value)?.unwrap_or_default())
    }))
}

fn optional_scalar_reader<U: SqlType>(
    registry: &TypeHandlerRegistry,
) -> Result<ScalarReader<Option<U>>, SqlMapperError> {
    let handler = registry.handler::<U>()?;
    Ok(Box::new(move |value: &SqlValue| handler.from_sql(value)))
}

impl<T: SqlType + Default> RowShape<T> {
    /// NULL reads as `T::default()`.
    #[must_use]
    pub fn scalar() -> Self {
        RowShape::Scalar(ScalarShape {
            resolve: scalar_reader::<T>,
        })
    }
}

impl<U: SqlType> RowShape<Option<U>> {
    #[must_use]
    pub fn optional_scalar() -> Self {
        RowShape::Scalar(ScalarShape {
            resolve: optional_scalar_reader::<U>,
        })
    }
}

impl<T> RowShape<T> {
    #[must_use]
    pub fn object(descriptor: Arc<RowDescriptor<T>>) -> Self {
        RowShape::Object(descriptor)
    }
}

macro_rules! scalar_row_mapped {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl RowMapped for $ty {
                fn row_shape() -> RowShape<Self> {
                    RowShape::scalar()
                }
            }
        )+
    };
}

scalar_row_mapped!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    char,
    Vec<u8>,
    BlobStream,
    NaiveDateTime,
    NaiveDate,
    NaiveTime,
    DateTime<Utc>,
    DateTime<FixedOffset>,
    Uuid,
    JsonValue,
    SqlValue,
);

impl<U: SqlType> RowMapped for Option<U> {
    fn row_shape() -> RowShape<Self> {
        RowShape::optional_scalar()
    }
}

/// Implement [`RowMapped`] for a struct by listing its members.
///
/// Each entry is `kind "name" => field` where `kind` is one of `field`, `optional_field`,
/// `nested` or `optional_nested`. The descriptor is built once and cached.
///
/// ```rust
/// use sql_mapper::prelude::*;
/// use sql_mapper::row_mapped;
///
/// #[derive(Debug, Default)]
/// struct Address {
///     city: String,
/// }
/// row_mapped!(Address { field "city" => city });
///
/// #[derive(Debug, Default)]
/// struct User {
///     id: i64,
///     name: String,
///     email: Option<String>,
///     address: Address,
/// }
/// row_mapped!(User {
///     field "id" => id,
///     field "name" => name,
///     optional_field "email" => email,
///     nested "address" => address,
/// });
/// ```
#[macro_export]
macro_rules! row_mapped {
    ($ty:ty { $($kind:ident $name:literal => $field:ident),+ $(,)? }) => {
        impl $crate::mapping::RowMapped for $ty {
            fn row_shape() -> $crate::mapping::RowShape<Self> {
                static DESCRIPTOR: ::std::sync::OnceLock<
                    ::std::sync::Arc<$crate::mapping::RowDescriptor<$ty>>,
                > = ::std::sync::OnceLock::new();
                let descriptor = DESCRIPTOR.get_or_init(|| {
                    ::std::sync::Arc::new(
                        $crate::mapping::RowDescriptor::<$ty>::builder()
                            $(.$kind($name, |target: &mut $ty| &mut target.$field))+
                            .build(),
                    )
                });
                $crate::mapping::RowShape::object(::std::sync::Arc::clone(descriptor))
            }
        }
    };
}
