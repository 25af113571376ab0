//! Validated identifier types
//!
//! Database and table names are parsed once at the boundary and then carried
//! as newtypes, so every dump argument, SQL identifier and backup directory
//! built from them has already passed [`IdValidator`]. Job and schedule ids
//! are plain integer keys assigned by the record store.
//!
//! ```rust
//! use dumpvault_core::identifiers::{DatabaseName, TableName};
//!
//! let db = DatabaseName::parse("shopdb").unwrap();
//! let table: TableName = "orders".parse().unwrap();
//! assert_eq!(db.as_str(), "shopdb");
//! assert_eq!(table.quoted(), "`orders`");
//!
//! assert!(DatabaseName::parse("shop db").is_err());
//! ```

mod validation;

pub use validation::{IdValidationError, IdValidator, MAX_IDENTIFIER_LENGTH};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

macro_rules! schema_identifier {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate a name.
            pub fn parse(id: impl AsRef<str>) -> Result<Self, ValidationError> {
                let id = id.as_ref();
                IdValidator::validate(id)
                    .map(|s| Self(s.to_string()))
                    .map_err(|e| ValidationError::InvalidIdentifier {
                        kind: $label,
                        value: id.to_string(),
                        reason: e.to_string(),
                    })
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Backquoted form for use inside SQL text.
            pub fn quoted(&self) -> String {
                format!("`{}`", self.0)
            }

            /// Create a name without validation (for testing only)
            #[doc(hidden)]
            pub fn new_unchecked(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

schema_identifier!(
    /// Name of a MySQL database (schema) on the target server.
    DatabaseName,
    "database name"
);

schema_identifier!(
    /// Name of a table inside a database.
    TableName,
    "table name"
);

impl DatabaseName {
    /// Like [`DatabaseName::parse`] but reports a blank input as the
    /// dedicated "database name is required" error.
    pub fn required(id: impl AsRef<str>) -> Result<Self, ValidationError> {
        if id.as_ref().trim().is_empty() {
            return Err(ValidationError::MissingDatabase);
        }
        Self::parse(id)
    }
}

/// Parse a list of table names, failing on the first invalid one.
pub fn parse_tables<I, S>(names: I) -> Result<Vec<TableName>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().map(TableName::parse).collect()
}

macro_rules! numeric_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_identifier!(
    /// Primary key of a persisted backup job.
    JobId
);

numeric_identifier!(
    /// Primary key of a persisted schedule definition.
    ScheduleId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_name_roundtrips_through_serde() {
        let db = DatabaseName::parse("shopdb").unwrap();
        let json = serde_json::to_string(&db).unwrap();
        assert_eq!(json, "\"shopdb\"");
        let back: DatabaseName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, db);
    }

    #[test]
    fn test_invalid_name_rejected_by_serde() {
        let result: Result<TableName, _> = serde_json::from_str("\"bad name\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_required_reports_missing_database() {
        assert_eq!(
            DatabaseName::required("   "),
            Err(ValidationError::MissingDatabase)
        );
        assert!(matches!(
            DatabaseName::required("a/b"),
            Err(ValidationError::InvalidIdentifier { kind: "database name", .. })
        ));
    }

    #[test]
    fn test_parse_tables_fails_on_first_invalid() {
        let ok = parse_tables(["orders", "customers"]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(parse_tables(["orders", "bad`name"]).is_err());
    }

    #[test]
    fn test_job_id_parses_and_displays() {
        let id: JobId = " 42 ".parse().unwrap();
        assert_eq!(id, JobId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("x".parse::<JobId>().is_err());
    }
}
