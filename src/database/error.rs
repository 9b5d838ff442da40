use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: Option<String> },
    /// Serialization failure or deadlock; the transaction can be replayed.
    Conflict { message: String },
    /// The row exists but is not in a state the operation accepts.
    InvalidState { message: String },
    ConnectionError { message: String },
    PoolExhausted,
    Decode { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let message = match &kind {
            DatabaseErrorKind::NotFound { entity, id } => format!("{} {} not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => format!(
                "unique constraint violated: {}",
                constraint.as_deref().unwrap_or("unknown")
            ),
            DatabaseErrorKind::Conflict { message } => format!("transaction conflict: {}", message),
            DatabaseErrorKind::InvalidState { message } => message.clone(),
            DatabaseErrorKind::ConnectionError { message } => {
                format!("database connection error: {}", message)
            }
            DatabaseErrorKind::PoolExhausted => "database pool exhausted".to_string(),
            DatabaseErrorKind::Decode { message } => format!("row decode error: {}", message),
            DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
        };
        Self { kind, message }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::InvalidState {
            message: message.into(),
        })
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => DatabaseErrorKind::Decode {
                message: err.to_string(),
            },
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(|c| c.to_string()),
                },
                Some("40001") | Some("40P01") => DatabaseErrorKind::Conflict {
                    message: db_err.message().to_string(),
                },
                _ => DatabaseErrorKind::Unknown {
                    message: db_err.message().to_string(),
                },
            },
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Conflict { .. }
                | DatabaseErrorKind::ConnectionError { .. }
                | DatabaseErrorKind::PoolExhausted
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: entity.clone(),
                    id: id.clone(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}
