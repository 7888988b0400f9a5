//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::binder::{PendingParameter, ToParams};
pub use crate::config::{IsolationLevel, SessionConfig};
pub use crate::driver::{ConnectionSource, KeyRetrieval};
pub use crate::error::SqlMapperError;
pub use crate::iter::{LazyTable, ResultIter};
pub use crate::mapping::{ColumnMappings, RowDescriptor, RowMapped};
pub use crate::parsing::{ParsedStatement, PlaceholderStyle, parse_named};
pub use crate::query::Query;
pub use crate::scope::ConnectionScope;
pub use crate::session::Session;
pub use crate::table::{Row, RowView, Table};
pub use crate::types::{
    BlobStream, EnumTypeHandler, SqlEnum, SqlType, SqlValue, TypeHandler, TypeHandlerRegistry,
};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnectionSource, SqliteOptions, SqliteOptionsBuilder};
