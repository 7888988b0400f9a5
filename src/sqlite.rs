//! Bundled `rusqlite` backend.
//!
//! Each acquired connection lives on a dedicated worker thread; the engine talks to it through
//! the [`DriverConnection`](crate::driver::DriverConnection) trait.

mod config;
mod connection;
mod params;
mod worker;

pub use config::{SqliteConnectionSource, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
