//! Storage errors shared by the Postgres repositories and the in-memory store.

use crate::error::{AppError, AppErrorKind, InfrastructureError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    /// A unique constraint rejected the write
    UniqueViolation { constraint: Option<String> },
    ConnectionFailed { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{}", describe(.kind))]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

fn describe(kind: &DatabaseErrorKind) -> String {
    match kind {
        DatabaseErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
        DatabaseErrorKind::UniqueViolation { constraint } => format!(
            "unique constraint violated: {}",
            constraint.as_deref().unwrap_or("unknown")
        ),
        DatabaseErrorKind::ConnectionFailed { message } => {
            format!("database connection failed: {}", message)
        }
        DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
    }
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionFailed { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "-".to_string(),
            }),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::new(DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(|c| c.to_string()),
                })
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::ConnectionFailed {
                    message: err.to_string(),
                })
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            is_retryable: err.is_retryable(),
            message: err.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity() {
        let err = DatabaseError::not_found("invoice", "abc");
        assert_eq!(err.to_string(), "invoice 'abc' not found");
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn unique_violation_is_detected_and_not_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some("ledger_entries_user_correlation_key".to_string()),
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
        assert_eq!(AppError::from(err).status_code(), 500);
    }
}
