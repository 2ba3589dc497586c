use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

use crate::errors::{Category, ErrorCode, Severity};

/// Stable, serializable view of an error (code, category, severity, message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {detail}")]
    Config { detail: String },
    #[error("Failed to connect to the database: {detail}")]
    Connection { detail: String },
    #[error("Session error: {detail}")]
    Session { detail: String },
    /// Original ORM/driver error, never rewritten.
    #[error(transparent)]
    Query(#[from] DbErr),
    #[error("Invalid arguments: {detail}")]
    BadArguments { detail: String },
    #[error("Data validation error: {detail}")]
    DataValidation { detail: String },
    #[error("No result found: {detail}")]
    NotFound { detail: String },
    #[error("Multiple results found: {detail}")]
    MultipleResults { detail: String },
    #[error("DatabaseError using sea-orm: {detail}")]
    Database { detail: String },
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Config { .. } => ErrorCode::ConfigError,
            AppError::Connection { .. } => ErrorCode::ConnectionError,
            AppError::Session { .. } => ErrorCode::SessionError,
            AppError::Query(_) => ErrorCode::QueryError,
            AppError::BadArguments { .. } => ErrorCode::BadArguments,
            AppError::DataValidation { .. } => ErrorCode::DataValidation,
            AppError::NotFound { .. } => ErrorCode::NoResultFound,
            AppError::MultipleResults { .. } => ErrorCode::MultipleResultsFound,
            AppError::Database { .. } => ErrorCode::DatabaseError,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            AppError::BadArguments { .. } | AppError::DataValidation { .. } => Category::Client,
            _ => Category::Server,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AppError::NotFound { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Details suitable for exposing to an API client.
    pub fn extension_details(&self) -> ErrorDetails {
        ErrorDetails {
            code: self.code(),
            category: self.category(),
            severity: self.severity(),
            message: self.to_string(),
        }
    }

    /// True when an engine or session could not be established.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, AppError::Connection { .. })
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    pub fn connection(detail: impl Into<String>) -> Self {
        Self::Connection {
            detail: detail.into(),
        }
    }

    /// Connection error carrying the underlying failure in its detail.
    pub fn connection_with(detail: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Connection {
            detail: format!("{}: {source}", detail.into()),
        }
    }

    pub fn session(detail: impl Into<String>) -> Self {
        Self::Session {
            detail: detail.into(),
        }
    }

    pub fn bad_arguments(detail: impl Into<String>) -> Self {
        Self::BadArguments {
            detail: detail.into(),
        }
    }

    pub fn data_validation(detail: impl Into<String>) -> Self {
        Self::DataValidation {
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
        }
    }

    pub fn multiple_results(detail: impl Into<String>) -> Self {
        Self::MultipleResults {
            detail: detail.into(),
        }
    }

    pub fn database(detail: impl Into<String>) -> Self {
        Self::Database {
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::config(format!("invalid JSON configuration: {e}"))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::config(format!("invalid YAML configuration: {e}"))
    }
}
