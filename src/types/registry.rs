use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::handlers::{UnknownTypeHandler, register_defaults};
use super::{SqlType, SqlValue, TypeHandler};
use crate::error::SqlMapperError;

// Each entry holds an `Arc<dyn TypeHandler<T>>` for the `T` its key names.
type ErasedHandler = Box<dyn Any + Send + Sync>;

/// Registry of type handlers keyed by Rust type.
///
/// Shared through `Arc` by a session and every scope and query it creates. Lookups take a read
/// lock; registration and first-use enum handler construction take the write lock, and the
/// latter inserts only if no other thread got there first so every caller sees the same handler.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let registry = TypeHandlerRegistry::new();
/// assert!(registry.has_handler::<i64>());
/// let handler = registry.handler::<String>()?;
/// assert_eq!(handler.to_sql(&"x".to_string())?, SqlValue::Text("x".into()));
/// # Ok::<(), SqlMapperError>(())
/// ```
pub struct TypeHandlerRegistry {
    handlers: RwLock<HashMap<TypeId, ErasedHandler>>,
    unknown: Arc<UnknownTypeHandler>,
}

impl TypeHandlerRegistry {
    /// Registry preloaded with the built-in handlers.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        register_defaults(&registry);
        registry
    }

    /// Registry with no handlers at all; enum handlers are still built on demand.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            unknown: Arc::new(UnknownTypeHandler),
        }
    }

    /// Register (or replace) the handler for `T`.
    pub fn register<T, H>(&self, handler: H)
    where
        T: SqlType,
        H: TypeHandler<T> + 'static,
    {
        self.register_arc::<T>(Arc::new(handler));
    }

    /// Register (or replace) a shared handler for `T`.
    pub fn register_arc<T: SqlType>(&self, handler: Arc<dyn TypeHandler<T>>) {
        self.write()
            .insert(TypeId::of::<T>(), Box::new(handler) as ErasedHandler);
    }

    /// Resolve the handler for `T`.
    ///
    /// Order: registered handler, then a handler derived from `T::auto_handler` (cached on first
    /// use), then the identity [`unknown_handler`](Self::unknown_handler) when `T` is
    /// [`SqlValue`] itself.
    ///
    /// The generic fallback only covers `SqlValue` targets. Any other concrete Rust type has no
    /// conversion the registry could infer, so it must be registered (or be enum-like) and an
    /// unresolvable type is reported as an error instead of being read as an untyped value.
    ///
    /// # Errors
    ///
    /// Returns `SqlMapperError::MappingError` naming `T` if no handler is registered, none can be
    /// derived and `T` is not `SqlValue`.
    pub fn handler<T: SqlType>(&self) -> Result<Arc<dyn TypeHandler<T>>, SqlMapperError> {
        if let Some(found) = self.lookup::<T>() {
            return Ok(found);
        }

        let Some(candidate) = T::auto_handler() else {
            return self.untyped_fallback::<T>().ok_or_else(|| {
                SqlMapperError::MappingError(format!(
                    "no type handler registered for `{}`",
                    type_name::<T>()
                ))
            });
        };

        let mut handlers = self.write();
        let entry = handlers.entry(TypeId::of::<T>()).or_insert_with(|| {
            debug!(target_type = type_name::<T>(), "registering derived type handler");
            Box::new(candidate) as ErasedHandler
        });
        downcast::<T>(entry)
    }

    /// True when `T` is registered, can be derived, or is `SqlValue`.
    #[must_use]
    pub fn has_handler<T: SqlType>(&self) -> bool {
        self.is_registered::<T>()
            || T::auto_handler().is_some()
            || TypeId::of::<T>() == TypeId::of::<SqlValue>()
    }

    /// True when a handler for `T` is already stored (registered or previously derived).
    #[must_use]
    pub fn is_registered<T: SqlType>(&self) -> bool {
        self.read().contains_key(&TypeId::of::<T>())
    }

    /// Identity handler used for dynamically typed values.
    #[must_use]
    pub fn unknown_handler(&self) -> Arc<UnknownTypeHandler> {
        Arc::clone(&self.unknown)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn untyped_fallback<T: SqlType>(&self) -> Option<Arc<dyn TypeHandler<T>>> {
        let unknown: Box<dyn Any> =
            Box::new(Arc::clone(&self.unknown) as Arc<dyn TypeHandler<SqlValue>>);
        unknown
            .downcast::<Arc<dyn TypeHandler<T>>>()
            .ok()
            .map(|found| *found)
    }

    fn lookup<T: SqlType>(&self) -> Option<Arc<dyn TypeHandler<T>>> {
        self.read()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn TypeHandler<T>>>())
            .cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TypeId, ErasedHandler>> {
        // Handlers are inserted whole, so a poisoned map is still consistent.
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, ErasedHandler>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn downcast<T: SqlType>(entry: &ErasedHandler) -> Result<Arc<dyn TypeHandler<T>>, SqlMapperError> {
    entry
        .downcast_ref::<Arc<dyn TypeHandler<T>>>()
        .cloned()
        .ok_or_else(|| {
            SqlMapperError::Other(format!(
                "type handler entry for `{}` has the wrong type",
                type_name::<T>()
            ))
        })
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlValue;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Cents(i64);

    impl SqlType for Cents {}

    struct CentsHandler;

    impl TypeHandler<Cents> for CentsHandler {
        fn to_sql(&self, value: &Cents) -> Result<SqlValue, SqlMapperError> {
            Ok(SqlValue::Int(value.0))
        }

        fn from_sql(&self, value: &SqlValue) -> Result<Option<Cents>, SqlMapperError> {
            Ok(value.as_int().map(|c| Cents(*c)))
        }
    }

    #[test]
    fn unregistered_type_is_a_mapping_error() {
        let registry = TypeHandlerRegistry::new();
        assert!(!registry.has_handler::<Cents>());
        let err = registry.handler::<Cents>().err().unwrap();
        assert!(matches!(err, SqlMapperError::MappingError(msg) if msg.contains("Cents")));
    }

    #[test]
    fn registered_handler_is_returned() {
        let registry = TypeHandlerRegistry::new();
        registry.register::<Cents, _>(CentsHandler);
        let handler = registry.handler::<Cents>().unwrap();
        assert_eq!(handler.to_sql(&Cents(250)).unwrap(), SqlValue::Int(250));
    }

    #[test]
    fn empty_registry_has_no_builtins() {
        let registry = TypeHandlerRegistry::empty();
        assert!(registry.is_empty());
        assert!(registry.handler::<i64>().is_err());
        assert!(TypeHandlerRegistry::new().has_handler::<i64>());
    }

    #[test]
    fn untyped_values_fall_back_to_identity_handler() {
        let registry = TypeHandlerRegistry::empty();
        assert!(registry.has_handler::<SqlValue>());
        let handler = registry.handler::<SqlValue>().unwrap();
        assert_eq!(
            handler.from_sql(&SqlValue::Text("raw".into())).unwrap(),
            Some(SqlValue::Text("raw".into()))
        );
        assert_eq!(handler.from_sql(&SqlValue::Null).unwrap(), None);
        assert!(registry.is_empty());
    }
}
