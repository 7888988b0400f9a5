use std::any::type_name;
use std::marker::PhantomData;

use super::{SqlValue, TypeHandler};
use crate::error::SqlMapperError;

/// Enumeration-like types whose handler the registry can build on first use.
///
/// Normally implemented through [`sql_enum!`](crate::sql_enum).
pub trait SqlEnum: Copy + Send + Sync + 'static {
    /// All variants in declaration order; the position is the ordinal.
    fn variants() -> &'static [Self];

    fn variant_name(&self) -> &'static str;

    #[must_use]
    fn from_name(name: &str) -> Option<Self> {
        let variants = Self::variants();
        variants
            .iter()
            .find(|v| v.variant_name() == name)
            .or_else(|| {
                variants
                    .iter()
                    .find(|v| v.variant_name().eq_ignore_ascii_case(name))
            })
            .copied()
    }

    #[must_use]
    fn from_ordinal(ordinal: i64) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|idx| Self::variants().get(idx))
            .copied()
    }
}

/// Writes the variant name; reads a name (exact, then case-insensitive) or an ordinal.
pub struct EnumTypeHandler<E>(PhantomData<fn() -> E>);

impl<E> EnumTypeHandler<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for EnumTypeHandler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SqlEnum> TypeHandler<E> for EnumTypeHandler<E> {
    fn to_sql(&self, value: &E) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Text(value.variant_name().to_owned()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<E>, SqlMapperError> {
        let found = match value {
            SqlValue::Null => return Ok(None),
            SqlValue::Text(name) => E::from_name(name.trim()),
            SqlValue::Int(ordinal) => E::from_ordinal(*ordinal),
            other => {
                return Err(SqlMapperError::MappingError(format!(
                    "cannot convert {} value into enum `{}`",
                    other.kind(),
                    type_name::<E>()
                )));
            }
        };
        found.map(Some).ok_or_else(|| {
            SqlMapperError::MappingError(format!(
                "{value:?} is not a variant of `{}`",
                type_name::<E>()
            ))
        })
    }
}

/// Declare a fieldless enum that maps to and from SQL by variant name.
///
/// The first variant is the `Default`, used when a non-optional field reads NULL.
///
/// ```rust
/// use sql_mapper::prelude::*;
/// use sql_mapper::sql_enum;
///
/// sql_enum! {
///     pub enum Status { Active, Suspended }
/// }
///
/// let registry = TypeHandlerRegistry::new();
/// let handler = registry.handler::<Status>()?;
/// assert_eq!(handler.to_sql(&Status::Suspended)?, SqlValue::Text("Suspended".into()));
/// # Ok::<(), SqlMapperError>(())
/// ```
#[macro_export]
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $first:ident $(, $rest:ident)* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $first,
            $($rest,)*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                $name::$first
            }
        }

        impl $crate::types::SqlEnum for $name {
            fn variants() -> &'static [Self] {
                &[$name::$first, $($name::$rest,)*]
            }

            fn variant_name(&self) -> &'static str {
                match self {
                    $name::$first => stringify!($first),
                    $($name::$rest => stringify!($rest),)*
                }
            }
        }

        impl $crate::types::SqlType for $name {
            fn auto_handler() -> ::std::option::Option<
                ::std::sync::Arc<dyn $crate::types::TypeHandler<Self>>,
            > {
                ::std::option::Option::Some(::std::sync::Arc::new(
                    $crate::types::EnumTypeHandler::<Self>::new(),
                ))
            }
        }

        impl $crate::mapping::RowMapped for $name {
            fn row_shape() -> $crate::mapping::RowShape<Self> {
                $crate::mapping::RowShape::scalar()
            }
        }
    };
}
