//! Parameter schema: the cardinality each known configuration name carries.

/// How repeated assignments to one parameter combine across sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// Later assignment overrides.
    Scalar,
    /// Every assignment appends, in load order.
    List,
    /// Appends within a source; the first assignment in a new top-level
    /// source discards values from earlier sources.
    ReplaceList,
    /// `name key = value`; keys accumulate, a repeated key overrides.
    Map,
}

impl Cardinality {
    pub fn label(self) -> &'static str {
        match self {
            Cardinality::Scalar => "scalar",
            Cardinality::List | Cardinality::ReplaceList => "list",
            Cardinality::Map => "map",
        }
    }
}

/// Directive that pulls another file in at the point it appears.
pub const INCLUDE_FILE: &str = "include_file";
/// Directive that loads a named package from the package directory.
pub const USE_PACKAGE: &str = "use_package";

const LISTS: &[&str] = &[
    "class",
    "template_dir",
    "template_subdir",
    "permitted_view",
    "restricted_view",
    "restricted_op",
    "admin_user",
    USE_PACKAGE,
];

const REPLACE_LISTS: &[&str] = &["task"];

const MAPS: &[&str] = &["operation", "db_option", "view_status", "credential"];

/// Cardinality for a parameter name. Names outside the schema are scalars.
pub fn cardinality(name: &str) -> Cardinality {
    if LISTS.contains(&name) {
        Cardinality::List
    } else if REPLACE_LISTS.contains(&name) {
        Cardinality::ReplaceList
    } else if MAPS.contains(&name) {
        Cardinality::Map
    } else {
        Cardinality::Scalar
    }
}

/// Parameters never copied into the output bundle handed to templates.
pub const PRIVATE_PARAMETERS: &[&str] = &["db_password", "db_dsn", "db_user", "db_option", "credential"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_have_declared_cardinality() {
        assert_eq!(cardinality("class"), Cardinality::List);
        assert_eq!(cardinality("task"), Cardinality::ReplaceList);
        assert_eq!(cardinality("operation"), Cardinality::Map);
        assert_eq!(cardinality("credential"), Cardinality::Map);
        assert_eq!(cardinality("db_name"), Cardinality::Scalar);
    }

    #[test]
    fn unknown_names_are_scalars() {
        assert_eq!(cardinality("favourite_colour"), Cardinality::Scalar);
    }
}
