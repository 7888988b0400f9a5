use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::parsing::PlaceholderStyle;

/// Transaction isolation requested when beginning a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Session-wide defaults. Every query starts from these; most can be overridden per query.
///
/// # Examples
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let config = SessionConfig::default()
///     .with_case_sensitive(true)
///     .with_column_mapping("user_name", "name")
///     .with_throw_on_mapping_failure(false);
/// assert!(config.generated_keys);
/// # let _ = config;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_case_sensitive: bool,
    /// Column name to member path; applied before name matching.
    pub default_column_mappings: HashMap<String, String>,
    /// Whether plain `create_query` asks the driver for generated keys.
    pub generated_keys: bool,
    /// Overrides the connection source's placeholder style when set.
    pub placeholder_style: Option<PlaceholderStyle>,
    pub throw_on_mapping_failure: bool,
    pub auto_derive_column_names: bool,
    pub rollback_on_close: bool,
    pub rollback_on_exception: bool,
    pub default_isolation: IsolationLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_case_sensitive: false,
            default_column_mappings: HashMap::new(),
            generated_keys: true,
            placeholder_style: None,
            throw_on_mapping_failure: true,
            auto_derive_column_names: false,
            rollback_on_close: true,
            rollback_on_exception: true,
            default_isolation: IsolationLevel::default(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.default_case_sensitive = case_sensitive;
        self
    }

    #[must_use]
    pub fn with_column_mapping(mut self, column: &str, property: &str) -> Self {
        self.default_column_mappings
            .insert(column.to_owned(), property.to_owned());
        self
    }

    #[must_use]
    pub fn with_generated_keys(mut self, generated_keys: bool) -> Self {
        self.generated_keys = generated_keys;
        self
    }

    #[must_use]
    pub fn with_placeholder_style(mut self, style: PlaceholderStyle) -> Self {
        self.placeholder_style = Some(style);
        self
    }

    #[must_use]
    pub fn with_throw_on_mapping_failure(mut self, throw: bool) -> Self {
        self.throw_on_mapping_failure = throw;
        self
    }

    #[must_use]
    pub fn with_auto_derive_column_names(mut self, auto_derive: bool) -> Self {
        self.auto_derive_column_names = auto_derive;
        self
    }

    #[must_use]
    pub fn with_rollback_on_close(mut self, rollback: bool) -> Self {
        self.rollback_on_close = rollback;
        self
    }

    #[must_use]
    pub fn with_rollback_on_exception(mut self, rollback: bool) -> Self {
        self.rollback_on_exception = rollback;
        self
    }

    #[must_use]
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }
}
