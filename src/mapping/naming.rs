/// How a column name (or one dotted segment of it) is compared with a member name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameMatch {
    Exact,
    IgnoreCase,
    /// Case-insensitive with `_`, `-` and spaces removed, so `first_name` matches `firstName`.
    Collapsed,
}

impl NameMatch {
    pub(crate) fn matches(self, member: &str, column: &str) -> bool {
        match self {
            NameMatch::Exact => member == column,
            NameMatch::IgnoreCase => member.eq_ignore_ascii_case(column),
            NameMatch::Collapsed => collapse(member) == collapse(column),
        }
    }
}

/// Lowercase `name` and drop word separators.
#[must_use]
pub fn collapse(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_ignores_separators_and_case() {
        assert_eq!(collapse("First_Name"), "firstname");
        assert!(NameMatch::Collapsed.matches("firstName", "FIRST_NAME"));
        assert!(!NameMatch::IgnoreCase.matches("firstName", "first_name"));
        assert!(NameMatch::IgnoreCase.matches("firstName", "FIRSTNAME"));
        assert!(!NameMatch::Exact.matches("firstName", "firstname"));
    }
}
