//! Identifier validation rules for MySQL schema object names

use std::fmt;

/// MySQL caps database and table identifiers at 64 characters.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Error type for identifier validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdValidationError {
    Empty,
    LeadingTrailingWhitespace,
    LeadingDash,
    InvalidCharacters,
    TooLong { length: usize, max: usize },
}

impl fmt::Display for IdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier cannot be empty"),
            Self::LeadingTrailingWhitespace => {
                write!(f, "identifier cannot have leading or trailing whitespace")
            }
            Self::LeadingDash => write!(f, "identifier cannot start with '-'"),
            Self::InvalidCharacters => write!(
                f,
                "identifier can only contain alphanumeric characters, '_', '$' and '-'"
            ),
            Self::TooLong { length, max } => {
                write!(f, "identifier too long ({} chars, max {})", length, max)
            }
        }
    }
}

impl std::error::Error for IdValidationError {}

/// Validator for database and table names.
///
/// Names end up as discrete process arguments, inside backquoted SQL
/// identifiers and as path components of the backup tree, so the accepted
/// alphabet excludes backquotes, quotes, path separators and dots.
pub struct IdValidator;

impl IdValidator {
    /// Validate an identifier string.
    ///
    /// ```rust
    /// use dumpvault_core::identifiers::IdValidator;
    ///
    /// assert!(IdValidator::validate("shopdb").is_ok());
    /// assert!(IdValidator::validate("order_items").is_ok());
    /// assert!(IdValidator::validate("").is_err());
    /// assert!(IdValidator::validate("../etc").is_err());
    /// assert!(IdValidator::validate("a`b").is_err());
    /// ```
    pub fn validate(id: &str) -> Result<&str, IdValidationError> {
        if id.is_empty() {
            return Err(IdValidationError::Empty);
        }

        if id != id.trim() {
            return Err(IdValidationError::LeadingTrailingWhitespace);
        }

        let length = id.chars().count();
        if length > MAX_IDENTIFIER_LENGTH {
            return Err(IdValidationError::TooLong {
                length,
                max: MAX_IDENTIFIER_LENGTH,
            });
        }

        // Would be read as an option by the dump and client programs.
        if id.starts_with('-') {
            return Err(IdValidationError::LeadingDash);
        }

        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '-')
        {
            return Err(IdValidationError::InvalidCharacters);
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("shopdb")]
    #[case("order_items")]
    #[case("legacy-db")]
    #[case("t$1")]
    #[case("café")]
    fn accepts_valid(#[case] id: &str) {
        assert_eq!(IdValidator::validate(id), Ok(id));
    }

    #[rstest]
    #[case("", IdValidationError::Empty)]
    #[case(" shop", IdValidationError::LeadingTrailingWhitespace)]
    #[case("shop db", IdValidationError::InvalidCharacters)]
    #[case("a`b", IdValidationError::InvalidCharacters)]
    #[case("a.b", IdValidationError::InvalidCharacters)]
    #[case("../etc", IdValidationError::InvalidCharacters)]
    #[case("x;DROP", IdValidationError::InvalidCharacters)]
    #[case("--all-databases", IdValidationError::LeadingDash)]
    fn rejects_invalid(#[case] id: &str, #[case] expected: IdValidationError) {
        assert_eq!(IdValidator::validate(id), Err(expected));
    }

    #[test]
    fn rejects_too_long() {
        let id = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(matches!(
            IdValidator::validate(&id),
            Err(IdValidationError::TooLong { length: 65, max: 64 })
        ));
    }
}
