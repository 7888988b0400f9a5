use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlMapperError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("Mapping error: {0}")]
    MappingError(String),

    #[error("Invalid state: {0}")]
    StateError(String),

    /// A driver failure raised while running a statement, tagged with the operation and SQL.
    #[error("Error in {context}, query: {sql}: {source}")]
    Execution {
        context: String,
        sql: String,
        #[source]
        source: Box<SqlMapperError>,
    },

    /// A transactional callback failed; the transaction was rolled back.
    #[error("Transaction rolled back: {source}")]
    TransactionRolledBack {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlMapperError {
    pub(crate) fn execution(
        context: impl Into<String>,
        sql: impl Into<String>,
        source: SqlMapperError,
    ) -> Self {
        SqlMapperError::Execution {
            context: context.into(),
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    /// True for failures reported by the database driver (as opposed to misuse of the API).
    #[must_use]
    pub fn is_driver_error(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            SqlMapperError::SqliteError(_) => true,
            SqlMapperError::ConnectionError(_)
            | SqlMapperError::Execution { .. }
            | SqlMapperError::Other(_) => true,
            _ => false,
        }
    }

    /// Walks through `Execution` wrappers to the error that started the chain.
    #[must_use]
    pub fn root_cause(&self) -> &SqlMapperError {
        let mut current = self;
        while let SqlMapperError::Execution { source, .. } = current {
            current = source;
        }
        current
    }
}
