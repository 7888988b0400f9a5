use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::driver::{ConnectionSource, DriverConnection};
use crate::error::SqlMapperError;
use crate::parsing::PlaceholderStyle;

use super::connection::SqliteConnection;

/// Options for opening `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub busy_timeout: Duration,
    /// Switch the database to write-ahead logging on every acquire.
    pub wal: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Connection source for a [`Session`](crate::Session). Nothing is opened until the first
    /// acquire.
    #[must_use]
    pub fn build(self) -> SqliteConnectionSource {
        SqliteConnectionSource::new(self.finish())
    }
}

/// Opens a new `SQLite` connection, on its own worker thread, per acquire.
///
/// Every acquire of `":memory:"` yields a separate empty database; use a file path to share
/// data between scopes.
#[derive(Debug, Clone)]
pub struct SqliteConnectionSource {
    options: SqliteOptions,
}

impl SqliteConnectionSource {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

impl ConnectionSource for SqliteConnectionSource {
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlMapperError> {
        let conn = Connection::open(&self.options.db_path).map_err(|err| {
            SqlMapperError::ConnectionError(format!(
                "failed to open SQLite database {}: {err}",
                self.options.db_path
            ))
        })?;
        conn.busy_timeout(self.options.busy_timeout)?;
        if self.options.wal {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
            ",
            )?;
        }
        debug!(db_path = %self.options.db_path, "SQLite connection acquired");
        Ok(Box::new(SqliteConnection::spawn(conn)?))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }
}
