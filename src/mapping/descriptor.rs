use std::any::type_name;
use std::fmt;

use super::naming::NameMatch;
use super::{RowMapped, RowShape};
use crate::error::SqlMapperError;
use crate::types::{SqlType, SqlValue, TypeHandlerRegistry};

/// Writes one converted column value into a target object.
pub(crate) type Setter<T> =
    Box<dyn Fn(&mut T, &SqlValue) -> Result<(), SqlMapperError> + Send + Sync>;

trait Member<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve the path segments after this member's name. An empty `rest` addresses the member
    /// itself.
    fn resolve(
        &self,
        rest: &[&str],
        mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError>;
}

fn member_error(member: &str, err: SqlMapperError) -> SqlMapperError {
    SqlMapperError::MappingError(format!("error setting member `{member}`: {err}"))
}

fn object_descriptor<C: RowMapped>(
    member: &str,
) -> Result<std::sync::Arc<RowDescriptor<C>>, SqlMapperError> {
    match C::row_shape() {
        RowShape::Object(descriptor) => Ok(descriptor),
        RowShape::Scalar(_) => Err(SqlMapperError::MappingError(format!(
            "member `{member}` of type `{}` has no row descriptor",
            type_name::<C>()
        ))),
    }
}

struct ValueMember<T, F> {
    name: String,
    access: fn(&mut T) -> &mut F,
}

impl<T: 'static, F: SqlType + Default> Member<T> for ValueMember<T, F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        rest: &[&str],
        _mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError> {
        if !rest.is_empty() {
            return Ok(None);
        }
        let handler = registry.handler::<F>()?;
        let access = self.access;
        let name = self.name.clone();
        Ok(Some(Box::new(move |target: &mut T, value: &SqlValue| {
            let converted = handler
                .from_sql(value)
                .map_err(|err| member_error(&name, err))?;
            *access(target) = converted.unwrap_or_default();
            Ok(())
        })))
    }
}

struct OptionalMember<T, F> {
    name: String,
    access: fn(&mut T) -> &mut Option<F>,
}

impl<T: 'static, F: SqlType> Member<T> for OptionalMember<T, F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        rest: &[&str],
        _mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError> {
        if !rest.is_empty() {
            return Ok(None);
        }
        let handler = registry.handler::<F>()?;
        let access = self.access;
        let name = self.name.clone();
        Ok(Some(Box::new(move |target: &mut T, value: &SqlValue| {
            *access(target) = handler
                .from_sql(value)
                .map_err(|err| member_error(&name, err))?;
            Ok(())
        })))
    }
}

struct NestedMember<T, C> {
    name: String,
    access: fn(&mut T) -> &mut C,
}

impl<T: 'static, C: RowMapped + Default> Member<T> for NestedMember<T, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        rest: &[&str],
        mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError> {
        if rest.is_empty() {
            return Ok(None);
        }
        let descriptor = object_descriptor::<C>(&self.name)?;
        let Some(child) = descriptor.resolve_segments(rest, mode, registry)? else {
            return Ok(None);
        };
        let access = self.access;
        Ok(Some(Box::new(move |target: &mut T, value: &SqlValue| {
            child(access(target), value)
        })))
    }
}

struct OptionalNestedMember<T, C> {
    name: String,
    access: fn(&mut T) -> &mut Option<C>,
}

impl<T: 'static, C: RowMapped + Default> Member<T> for OptionalNestedMember<T, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        rest: &[&str],
        mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError> {
        if rest.is_empty() {
            return Ok(None);
        }
        let descriptor = object_descriptor::<C>(&self.name)?;
        let Some(child) = descriptor.resolve_segments(rest, mode, registry)? else {
            return Ok(None);
        };
        let access = self.access;
        Ok(Some(Box::new(move |target: &mut T, value: &SqlValue| {
            let slot = access(target);
            // a NULL alone does not bring the nested object into existence
            if value.is_null() && slot.is_none() {
                return Ok(());
            }
            child(slot.get_or_insert_with(C::default), value)
        })))
    }
}

/// Member table for a mapped struct: how each named member is reached and converted.
///
/// Build one with [`RowDescriptor::builder`] or the [`row_mapped!`](crate::row_mapped) macro.
pub struct RowDescriptor<T> {
    type_name: &'static str,
    construct: fn() -> T,
    members: Vec<Box<dyn Member<T>>>,
}

impl<T: Default + 'static> RowDescriptor<T> {
    #[must_use]
    pub fn builder() -> RowDescriptorBuilder<T> {
        RowDescriptorBuilder {
            members: Vec::new(),
        }
    }
}

impl<T: 'static> RowDescriptor<T> {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name())
    }

    pub(crate) fn construct(&self) -> fn() -> T {
        self.construct
    }

    /// Resolve a possibly dotted member path.
    pub(crate) fn resolve(
        &self,
        path: &str,
        mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError> {
        let segments: Vec<&str> = path.split('.').collect();
        self.resolve_segments(&segments, mode, registry)
    }

    fn resolve_segments(
        &self,
        segments: &[&str],
        mode: NameMatch,
        registry: &TypeHandlerRegistry,
    ) -> Result<Option<Setter<T>>, SqlMapperError> {
        let Some((head, rest)) = segments.split_first() else {
            return Ok(None);
        };
        for member in &self.members {
            if mode.matches(member.name(), head)
                && let Some(setter) = member.resolve(rest, mode, registry)?
            {
                return Ok(Some(setter));
            }
        }
        Ok(None)
    }
}

impl<T> fmt::Debug for RowDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowDescriptor")
            .field("type_name", &self.type_name)
            .field(
                "members",
                &self.members.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Fluent builder for [`RowDescriptor`].
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// #[derive(Default)]
/// struct Account {
///     id: i64,
///     email: Option<String>,
/// }
///
/// let descriptor = RowDescriptor::<Account>::builder()
///     .field("id", |a: &mut Account| &mut a.id)
///     .optional_field("email", |a: &mut Account| &mut a.email)
///     .build();
/// assert_eq!(descriptor.member_names().collect::<Vec<_>>(), ["id", "email"]);
/// ```
pub struct RowDescriptorBuilder<T> {
    members: Vec<Box<dyn Member<T>>>,
}

impl<T: Default + 'static> RowDescriptorBuilder<T> {
    /// Non-optional member; NULL writes `F::default()`.
    #[must_use]
    pub fn field<F: SqlType + Default>(mut self, name: &str, access: fn(&mut T) -> &mut F) -> Self {
        self.members.push(Box::new(ValueMember {
            name: name.to_owned(),
            access,
        }));
        self
    }

    /// Optional member; NULL writes `None`.
    #[must_use]
    pub fn optional_field<F: SqlType>(
        mut self,
        name: &str,
        access: fn(&mut T) -> &mut Option<F>,
    ) -> Self {
        self.members.push(Box::new(OptionalMember {
            name: name.to_owned(),
            access,
        }));
        self
    }

    /// Nested object addressed by dotted column names such as `name.city`.
    #[must_use]
    pub fn nested<C: RowMapped + Default>(mut self, name: &str, access: fn(&mut T) -> &mut C) -> Self {
        self.members.push(Box::new(NestedMember {
            name: name.to_owned(),
            access,
        }));
        self
    }

    /// Optional nested object, created on the first non-NULL value written into it.
    #[must_use]
    pub fn optional_nested<C: RowMapped + Default>(
        mut self,
        name: &str,
        access: fn(&mut T) -> &mut Option<C>,
    ) -> Self {
        self.members.push(Box::new(OptionalNestedMember {
            name: name.to_owned(),
            access,
        }));
        self
    }

    #[must_use]
    pub fn build(self) -> RowDescriptor<T> {
        RowDescriptor {
            type_name: type_name::<T>(),
            construct: T::default,
            members: self.members,
        }
    }
}
