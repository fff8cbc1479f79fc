use crate::database::error::DatabaseError;
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("wallet {user_id} has {available} credits, {required} required")]
    InsufficientBalance {
        user_id: Uuid,
        available: i64,
        required: i64,
    },

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                available,
                required,
                ..
            } => AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
                available,
                required,
            })),
            // Plans are built by the service, so a rejected plan is a bug.
            LedgerError::InvalidTransfer(message) => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
                    message,
                }))
            }
            LedgerError::Storage(db) => db.into(),
        }
    }
}
