use std::any::type_name;
use std::collections::HashMap;

use tracing::debug;

use super::descriptor::{RowDescriptor, Setter};
use super::naming::NameMatch;
use super::{RowMapped, RowShape, ScalarReader};
use crate::error::SqlMapperError;
use crate::table::{ColumnSet, RowView};
use crate::types::{SqlValue, TypeHandlerRegistry};

/// Explicit column name to member path overrides.
///
/// Kept twice: as given, and lowercased for case-insensitive lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMappings {
    exact: HashMap<String, String>,
    folded: HashMap<String, String>,
}

impl ColumnMappings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: &str, property: &str) {
        self.exact.insert(column.to_owned(), property.to_owned());
        self.folded
            .insert(column.to_lowercase(), property.to_lowercase());
    }

    pub fn extend<'a>(&mut self, mappings: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (column, property) in mappings {
            self.insert(column, property);
        }
    }

    #[must_use]
    pub fn lookup(&self, column: &str, case_sensitive: bool) -> Option<&str> {
        if case_sensitive {
            self.exact.get(column).map(String::as_str)
        } else {
            self.folded.get(&column.to_lowercase()).map(String::as_str)
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Mapping settings in effect for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOptions {
    pub case_sensitive: bool,
    pub auto_derive_column_names: bool,
    pub throw_on_mapping_failure: bool,
    pub column_mappings: ColumnMappings,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            auto_derive_column_names: false,
            throw_on_mapping_failure: true,
            column_mappings: ColumnMappings::default(),
        }
    }
}

/// Column-to-member decisions for one result set, made once and applied to every row.
pub(crate) enum MappingPlan<T> {
    Scalar(ScalarReader<T>),
    Object {
        construct: fn() -> T,
        // one entry per column; `None` for columns skipped in lenient mode
        setters: Vec<Option<Setter<T>>>,
    },
}

impl<T: RowMapped> MappingPlan<T> {
    pub(crate) fn build(
        columns: &ColumnSet,
        registry: &TypeHandlerRegistry,
        options: &MappingOptions,
    ) -> Result<Self, SqlMapperError> {
        match T::row_shape() {
            RowShape::Scalar(shape) => {
                if columns.len() != 1 {
                    return Err(SqlMapperError::MappingError(format!(
                        "cannot map {} columns to scalar type `{}`; select exactly one column",
                        columns.len(),
                        type_name::<T>()
                    )));
                }
                Ok(MappingPlan::Scalar(shape.reader(registry)?))
            }
            RowShape::Object(descriptor) => {
                let mut setters = Vec::with_capacity(columns.len());
                for column in columns.names() {
                    let setter = resolve_column(&descriptor, column, registry, options)?;
                    if setter.is_none() {
                        if options.throw_on_mapping_failure {
                            return Err(SqlMapperError::MappingError(format!(
                                "Could not map column `{column}` to any member of `{}`",
                                descriptor.type_name()
                            )));
                        }
                        debug!(
                            column,
                            target = descriptor.type_name(),
                            "column has no matching member, skipping"
                        );
                    }
                    setters.push(setter);
                }
                Ok(MappingPlan::Object {
                    construct: descriptor.construct(),
                    setters,
                })
            }
        }
    }
}

impl<T> MappingPlan<T> {
    pub(crate) fn apply(&self, row: &RowView<'_>) -> Result<T, SqlMapperError> {
        match self {
            MappingPlan::Scalar(reader) => reader(row.get_by_index(1).unwrap_or(&SqlValue::Null)),
            MappingPlan::Object { construct, setters } => {
                let mut target = construct();
                for (value, setter) in row.values().iter().zip(setters) {
                    if let Some(set) = setter {
                        set(&mut target, value)?;
                    }
                }
                Ok(target)
            }
        }
    }
}

// explicit mapping, then the column name itself, then the collapsed form
fn resolve_column<T: 'static>(
    descriptor: &RowDescriptor<T>,
    column: &str,
    registry: &TypeHandlerRegistry,
    options: &MappingOptions,
) -> Result<Option<Setter<T>>, SqlMapperError> {
    let mode = if options.case_sensitive {
        NameMatch::Exact
    } else {
        NameMatch::IgnoreCase
    };

    if let Some(path) = options
        .column_mappings
        .lookup(column, options.case_sensitive)
        && let Some(setter) = descriptor.resolve(path, mode, registry)?
    {
        return Ok(Some(setter));
    }

    if let Some(setter) = descriptor.resolve(column, mode, registry)? {
        return Ok(Some(setter));
    }

    if options.auto_derive_column_names {
        return descriptor.resolve(column, NameMatch::Collapsed, registry);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ColumnMeta;
    use crate::row_mapped;

    #[derive(Debug, Default, PartialEq)]
    struct Address {
        city: String,
        zip: Option<String>,
    }

    row_mapped!(Address {
        field "city" => city,
        optional_field "zip" => zip,
    });

    #[derive(Debug, Default, PartialEq)]
    struct Person {
        id: i64,
        first_name: String,
        nickname: Option<String>,
        address: Address,
        billing: Option<Address>,
    }

    row_mapped!(Person {
        field "id" => id,
        field "firstName" => first_name,
        optional_field "nickname" => nickname,
        nested "address" => address,
        optional_nested "billing" => billing,
    });

    fn columns(names: &[&str]) -> ColumnSet {
        ColumnSet::new(
            names
                .iter()
                .map(|n| ColumnMeta::new((*n).to_string()))
                .collect(),
        )
    }

    fn map_one<T: RowMapped>(
        names: &[&str],
        values: Vec<SqlValue>,
        options: &MappingOptions,
    ) -> Result<T, SqlMapperError> {
        let cols = columns(names);
        let registry = TypeHandlerRegistry::new();
        let plan = MappingPlan::<T>::build(&cols, &registry, options)?;
        plan.apply(&RowView::new(&cols, &values, options.case_sensitive))
    }

    #[test]
    fn maps_case_insensitively_by_default() {
        let person: Person = map_one(
            &["ID", "FIRSTNAME"],
            vec![SqlValue::Int(3), SqlValue::Text("Ada".into())],
            &MappingOptions::default(),
        )
        .unwrap();
        assert_eq!(person.id, 3);
        assert_eq!(person.first_name, "Ada");
    }

    #[test]
    fn case_sensitive_mode_rejects_other_casing() {
        let options = MappingOptions {
            case_sensitive: true,
            ..MappingOptions::default()
        };
        let err = map_one::<Person>(&["ID"], vec![SqlValue::Int(3)], &options).unwrap_err();
        assert!(matches!(err, SqlMapperError::MappingError(msg) if msg.contains("`ID`")));
    }

    #[test]
    fn dotted_columns_fill_nested_objects() {
        let person: Person = map_one(
            &["id", "address.city", "address.zip", "billing.city"],
            vec![
                SqlValue::Int(1),
                SqlValue::Text("Oslo".into()),
                SqlValue::Null,
                SqlValue::Text("Bergen".into()),
            ],
            &MappingOptions::default(),
        )
        .unwrap();
        assert_eq!(person.address.city, "Oslo");
        assert_eq!(person.address.zip, None);
        assert_eq!(person.billing.unwrap().city, "Bergen");
    }

    #[test]
    fn null_into_absent_optional_nested_keeps_none() {
        let person: Person = map_one(
            &["id", "billing.city"],
            vec![SqlValue::Int(1), SqlValue::Null],
            &MappingOptions::default(),
        )
        .unwrap();
        assert_eq!(person.billing, None);
    }

    #[test]
    fn explicit_mapping_wins_over_name_match() {
        let mut column_mappings = ColumnMappings::new();
        column_mappings.insert("given", "firstName");
        let options = MappingOptions {
            column_mappings,
            ..MappingOptions::default()
        };
        let person: Person = map_one(
            &["GIVEN"],
            vec![SqlValue::Text("Grace".into())],
            &options,
        )
        .unwrap();
        assert_eq!(person.first_name, "Grace");
    }

    #[test]
    fn auto_derive_collapses_word_boundaries() {
        let strict = map_one::<Person>(
            &["first_name"],
            vec![SqlValue::Text("Linus".into())],
            &MappingOptions::default(),
        );
        assert!(strict.is_err());

        let options = MappingOptions {
            auto_derive_column_names: true,
            ..MappingOptions::default()
        };
        let person: Person =
            map_one(&["first_name"], vec![SqlValue::Text("Linus".into())], &options).unwrap();
        assert_eq!(person.first_name, "Linus");
    }

    #[test]
    fn lenient_mode_skips_unknown_columns() {
        let options = MappingOptions {
            throw_on_mapping_failure: false,
            ..MappingOptions::default()
        };
        let person: Person = map_one(
            &["id", "shoe_size"],
            vec![SqlValue::Int(9), SqlValue::Int(44)],
            &options,
        )
        .unwrap();
        assert_eq!(person.id, 9);
    }

    #[test]
    fn null_writes_default_or_none() {
        let person: Person = map_one(
            &["id", "nickname"],
            vec![SqlValue::Null, SqlValue::Null],
            &MappingOptions::default(),
        )
        .unwrap();
        assert_eq!(person.id, 0);
        assert_eq!(person.nickname, None);
    }

    #[test]
    fn single_column_object_is_not_treated_as_scalar() {
        let person: Person = map_one(
            &["firstname"],
            vec![SqlValue::Text("Barbara".into())],
            &MappingOptions::default(),
        )
        .unwrap();
        assert_eq!(person.first_name, "Barbara");
        assert_eq!(person.id, 0);
    }

    #[test]
    fn scalar_needs_exactly_one_column() {
        let value: i64 = map_one(&["n"], vec![SqlValue::Int(5)], &MappingOptions::default()).unwrap();
        assert_eq!(value, 5);
        let err = map_one::<i64>(
            &["a", "b"],
            vec![SqlValue::Int(1), SqlValue::Int(2)],
            &MappingOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SqlMapperError::MappingError(_)));
    }

    #[test]
    fn optional_scalar_reads_null() {
        let value: Option<String> =
            map_one(&["n"], vec![SqlValue::Null], &MappingOptions::default()).unwrap();
        assert_eq!(value, None);
    }
}
