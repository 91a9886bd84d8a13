//! Naming conventions for generated identifiers

use heck::{ToKebabCase, ToLowerCamelCase, ToPascalCase, ToSnakeCase, ToTitleCase};

use crate::schema::singularize;

/// How generated names are derived from database names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    /// Class names use the singular table name (`invoices` -> `Invoice`)
    pub singular_classes: bool,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            singular_classes: true,
        }
    }
}

impl NamingConvention {
    pub fn new(singular_classes: bool) -> Self {
        Self { singular_classes }
    }

    /// Generated class name for a table; schema qualifiers are dropped
    pub fn class_name(&self, table: &str) -> String {
        let base = unqualified(table);
        if self.singular_classes {
            singularize(base).to_pascal_case()
        } else {
            base.to_pascal_case()
        }
    }

    /// File name stem for a table's artifacts
    pub fn file_stem(&self, table: &str) -> String {
        table.replace('.', "_").to_kebab_case()
    }

    /// Human-readable label for a column, e.g. `customer_id` -> `Customer Id`
    pub fn label(&self, name: &str) -> String {
        unqualified(name).to_title_case()
    }

    /// Apply one named filter, `None` if the filter does not exist
    pub fn apply(&self, value: &str, filter: &str) -> Option<String> {
        let applied = match filter {
            "pascal" => value.to_pascal_case(),
            "camel" => value.to_lower_camel_case(),
            "kebab" => value.to_kebab_case(),
            "snake" => value.to_snake_case(),
            "upper" => value.to_uppercase(),
            "lower" => value.to_lowercase(),
            "singular" => singularize(value),
            "class" => self.class_name(value),
            "label" => self.label(value),
            _ => return None,
        };
        Some(applied)
    }

    /// Apply filters left to right; the error is the first unknown filter
    pub fn apply_filters(&self, value: &str, filters: &[String]) -> Result<String, String> {
        filters.iter().try_fold(value.to_string(), |current, filter| {
            self.apply(&current, filter).ok_or_else(|| filter.clone())
        })
    }
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_simple() {
        let naming = NamingConvention::default();
        assert_eq!(naming.class_name("users"), "User");
        assert_eq!(naming.class_name("categories"), "Category");
        assert_eq!(naming.class_name("staff"), "Staff");
    }

    #[test]
    fn test_class_name_snake_case() {
        let naming = NamingConvention::default();
        assert_eq!(naming.class_name("order_line_items"), "OrderLineItem");
        assert_eq!(naming.class_name("dbo.user_accounts"), "UserAccount");
    }

    #[test]
    fn test_class_name_plural_convention() {
        let naming = NamingConvention::new(false);
        assert_eq!(naming.class_name("user_accounts"), "UserAccounts");
    }

    #[test]
    fn test_file_stem_and_label() {
        let naming = NamingConvention::default();
        assert_eq!(naming.file_stem("order_lines"), "order-lines");
        assert_eq!(naming.file_stem("dbo.users"), "dbo-users");
        assert_eq!(naming.label("customer_id"), "Customer Id");
    }

    #[test]
    fn test_filters_chain() {
        let naming = NamingConvention::default();
        let filters = vec!["singular".to_string(), "camel".to_string()];
        assert_eq!(naming.apply_filters("line_items", &filters).unwrap(), "lineItem");
        assert_eq!(
            naming.apply_filters("x", &["nope".to_string()]).unwrap_err(),
            "nope"
        );
    }
}
