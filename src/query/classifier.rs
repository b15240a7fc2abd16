//! # Backend Error Classification
//!
//! One lookup table per backend maps native error codes to [`ErrorClass`].
//! Codes missing from a table, and failures that are not database errors at
//! all (pool timeouts, broken connections, decode failures), are Internal.

use std::collections::HashMap;

use super::backend::{BackendError, BackendErrorKind, BackendKind};
use super::errors::ErrorClass;

/// Maps a backend's native errors onto the portable taxonomy
pub trait ErrorClassifier: Send + Sync {
    /// Classify a native error code
    fn classify_code(&self, code: &str) -> ErrorClass;

    /// Classify a backend failure
    fn classify(&self, err: &BackendError) -> ErrorClass {
        match (err.kind, err.code.as_deref()) {
            (BackendErrorKind::Database, Some(code)) => self.classify_code(code),
            _ => ErrorClass::Internal,
        }
    }
}

/// Select the classifier for a backend
pub fn classifier_for(kind: BackendKind) -> Box<dyn ErrorClassifier> {
    match kind {
        BackendKind::Postgres => Box::new(PostgresErrorClassifier::new()),
        BackendKind::Sqlite => Box::new(SqliteErrorClassifier::new()),
    }
}

/// SQLSTATE-keyed classifier
pub struct PostgresErrorClassifier {
    table: HashMap<&'static str, ErrorClass>,
}

impl PostgresErrorClassifier {
    pub fn new() -> Self {
        let table = HashMap::from([
            // Missing objects
            ("42P01", ErrorClass::NotFound), // undefined_table
            ("42704", ErrorClass::NotFound), // undefined_object
            ("3F000", ErrorClass::NotFound), // invalid_schema_name
            ("3D000", ErrorClass::NotFound), // invalid_catalog_name
            ("42883", ErrorClass::NotFound), // undefined_function
            // Privileges
            ("42501", ErrorClass::Forbidden), // insufficient_privilege
            ("28000", ErrorClass::Unauthorized), // invalid_authorization_specification
            ("28P01", ErrorClass::Unauthorized), // invalid_password
            // Malformed requests
            ("42601", ErrorClass::BadRequest), // syntax_error
            ("42703", ErrorClass::BadRequest), // undefined_column
            ("42710", ErrorClass::BadRequest), // duplicate_object
            ("42P07", ErrorClass::BadRequest), // duplicate_table
            ("42804", ErrorClass::BadRequest), // datatype_mismatch
            ("22P02", ErrorClass::BadRequest), // invalid_text_representation
            ("22001", ErrorClass::BadRequest), // string_data_right_truncation
            ("22003", ErrorClass::BadRequest), // numeric_value_out_of_range
            ("23502", ErrorClass::BadRequest), // not_null_violation
            ("23503", ErrorClass::BadRequest), // foreign_key_violation
            ("23505", ErrorClass::BadRequest), // unique_violation
            ("23514", ErrorClass::BadRequest), // check_violation
        ]);
        Self { table }
    }
}

impl Default for PostgresErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for PostgresErrorClassifier {
    fn classify_code(&self, code: &str) -> ErrorClass {
        self.table.get(code).copied().unwrap_or(ErrorClass::Internal)
    }
}

/// SQLite result-code classifier
///
/// The driver reports extended result codes; an extended code missing from
/// the table falls back to its primary code (the low byte).
pub struct SqliteErrorClassifier {
    table: HashMap<i32, ErrorClass>,
}

impl SqliteErrorClassifier {
    pub fn new() -> Self {
        let table = HashMap::from([
            (1, ErrorClass::BadRequest),   // SQLITE_ERROR: syntax, missing table/column
            (3, ErrorClass::Forbidden),    // SQLITE_PERM
            (8, ErrorClass::Forbidden),    // SQLITE_READONLY
            (12, ErrorClass::NotFound),    // SQLITE_NOTFOUND
            (19, ErrorClass::BadRequest),  // SQLITE_CONSTRAINT
            (20, ErrorClass::BadRequest),  // SQLITE_MISMATCH
            (23, ErrorClass::Unauthorized), // SQLITE_AUTH
            (25, ErrorClass::BadRequest),  // SQLITE_RANGE
        ]);
        Self { table }
    }
}

impl Default for SqliteErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for SqliteErrorClassifier {
    fn classify_code(&self, code: &str) -> ErrorClass {
        let Ok(code) = code.trim().parse::<i32>() else {
            return ErrorClass::Internal;
        };
        self.table
            .get(&code)
            .or_else(|| self.table.get(&(code & 0xff)))
            .copied()
            .unwrap_or(ErrorClass::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_codes() {
        let classifier = PostgresErrorClassifier::new();
        assert_eq!(classifier.classify_code("42P01"), ErrorClass::NotFound);
        assert_eq!(classifier.classify_code("42704"), ErrorClass::NotFound);
        assert_eq!(classifier.classify_code("42501"), ErrorClass::Forbidden);
        assert_eq!(classifier.classify_code("28P01"), ErrorClass::Unauthorized);
        assert_eq!(classifier.classify_code("42710"), ErrorClass::BadRequest);
        assert_eq!(classifier.classify_code("42804"), ErrorClass::BadRequest);
        assert_eq!(classifier.classify_code("22P02"), ErrorClass::BadRequest);
    }

    #[test]
    fn test_unknown_code_is_internal() {
        let classifier = PostgresErrorClassifier::new();
        assert_eq!(classifier.classify_code("XX000"), ErrorClass::Internal);
        assert_eq!(classifier.classify_code(""), ErrorClass::Internal);
    }

    #[test]
    fn test_sqlite_extended_codes_fall_back_to_primary() {
        let classifier = SqliteErrorClassifier::new();
        // SQLITE_CONSTRAINT_UNIQUE
        assert_eq!(classifier.classify_code("2067"), ErrorClass::BadRequest);
        // SQLITE_READONLY_DBMOVED
        assert_eq!(classifier.classify_code("1032"), ErrorClass::Forbidden);
        assert_eq!(classifier.classify_code("1"), ErrorClass::BadRequest);
        // SQLITE_BUSY is transient, not the caller's fault
        assert_eq!(classifier.classify_code("5"), ErrorClass::Internal);
        assert_eq!(classifier.classify_code("not-a-number"), ErrorClass::Internal);
    }

    #[test]
    fn test_non_database_errors_are_internal() {
        let classifier = PostgresErrorClassifier::new();
        let timeout = BackendError::other(BackendErrorKind::PoolTimedOut, "timed out");
        assert_eq!(classifier.classify(&timeout), ErrorClass::Internal);

        let decode = BackendError {
            kind: BackendErrorKind::Decode,
            code: Some("42P01".to_string()),
            message: "bad column".to_string(),
        };
        assert_eq!(classifier.classify(&decode), ErrorClass::Internal);
    }

    #[test]
    fn test_classifier_selection() {
        let pg = classifier_for(BackendKind::Postgres);
        assert_eq!(
            pg.classify(&BackendError::database("42501", "permission denied")),
            ErrorClass::Forbidden
        );

        let sqlite = classifier_for(BackendKind::Sqlite);
        assert_eq!(
            sqlite.classify(&BackendError::database("3", "access permission denied")),
            ErrorClass::Forbidden
        );
    }
}
