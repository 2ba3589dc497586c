//! Error codes, categories and severities for the database wrapper.
//!
//! Codes are SCREAMING_SNAKE_CASE and are the stable, machine-readable part
//! of every error surfaced to callers. Add new codes here; never pass ad-hoc
//! strings as error codes.

use core::fmt;

use serde::Serialize;

/// Centralized error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Missing or malformed configuration secret
    ConfigError,
    /// Engine or session could not be established
    ConnectionError,
    /// Session teardown/shutdown or use of a removed session
    SessionError,
    /// Lower-level ORM/driver error, retained unchanged
    QueryError,
    /// Invalid argument provided by the caller
    BadArguments,
    /// Data failed validation (e.g. required filters missing)
    DataValidation,
    /// Exactly-one query matched no rows
    NoResultFound,
    /// Exactly-one query matched more than one row
    MultipleResultsFound,
    /// Generic, detail-scrubbed database error
    DatabaseError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::SessionError => "SESSION_ERROR",
            Self::QueryError => "QUERY_ERROR",
            Self::BadArguments => "BAD_ARGUMENTS",
            Self::DataValidation => "DATA_VALIDATION",
            Self::NoResultFound => "NO_RESULT_FOUND",
            Self::MultipleResultsFound => "MULTIPLE_RESULTS_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Who is at fault for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Server,
    Client,
}

/// How loudly an error should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const ALL: [ErrorCode; 9] = [
        ErrorCode::ConfigError,
        ErrorCode::ConnectionError,
        ErrorCode::SessionError,
        ErrorCode::QueryError,
        ErrorCode::BadArguments,
        ErrorCode::DataValidation,
        ErrorCode::NoResultFound,
        ErrorCode::MultipleResultsFound,
        ErrorCode::DatabaseError,
    ];

    #[test]
    fn codes_are_unique_and_screaming_snake() {
        let mut seen = HashSet::new();
        for code in ALL {
            let s = code.as_str();
            assert!(seen.insert(s), "duplicate code {s}");
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&ErrorCode::DatabaseError).unwrap();
        assert_eq!(json, "\"DATABASE_ERROR\"");
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
