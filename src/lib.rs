//! Named-parameter SQL execution and row mapping over a pluggable synchronous driver.
//!
//! A [`Session`] hands out [`ConnectionScope`]s. A scope creates [`Query`]s from SQL written
//! with `:name` parameters, binds values through the [`TypeHandlerRegistry`], runs updates,
//! batches and queries, and maps result rows to structs, scalars or generic [`Table`]s.
//! Results can be read eagerly or lazily through a [`ResultIter`] that keeps the cursor open.
//!
//! The bundled `sqlite` feature provides a `rusqlite` backend; other databases plug in through
//! the traits in [`driver`].

pub mod binder;
pub mod config;
pub mod driver;
pub mod error;
pub mod iter;
pub mod mapping;
pub mod parsing;
pub mod prelude;
pub mod query;
pub mod scope;
pub mod session;
pub mod table;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod test_utils;

pub use binder::{PendingParameter, ToParams};
pub use config::{IsolationLevel, SessionConfig};
pub use driver::{ConnectionSource, DriverConnection, DriverCursor, KeyRetrieval};
pub use error::SqlMapperError;
pub use iter::{LazyTable, ResultIter};
pub use mapping::{RowDescriptor, RowMapped};
pub use parsing::{ParsedStatement, PlaceholderStyle, parse_named};
pub use query::Query;
pub use scope::ConnectionScope;
pub use session::Session;
pub use table::{Row, RowView, Table};
pub use types::{SqlType, SqlValue, TypeHandler, TypeHandlerRegistry};
