use sea_orm::SqlErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradebookError {
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("aggregate recompute failed: {message}")]
    AggregateRecompute { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl GradebookError {
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn aggregate_recompute(message: impl Into<String>) -> Self {
        Self::AggregateRecompute {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// True for errors the caller may resolve by retrying the whole mutation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::AggregateRecompute { .. })
    }
}

pub type GradebookResult<T> = Result<T, GradebookError>;

impl From<sea_orm::DbErr> for GradebookError {
    fn from(value: sea_orm::DbErr) -> Self {
        match value.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(message)) => {
                GradebookError::constraint(format!("duplicate key: {message}"))
            }
            Some(SqlErr::ForeignKeyConstraintViolation(message)) => {
                GradebookError::constraint(format!("foreign key: {message}"))
            }
            _ => GradebookError::storage(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GradebookError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = GradebookError::constraint("dup");
        assert!(matches!(err, GradebookError::ConstraintViolation { .. }));
        let err = GradebookError::not_found("missing");
        assert!(matches!(err, GradebookError::NotFound { .. }));
        let err = GradebookError::aggregate_recompute("course 1");
        assert!(matches!(err, GradebookError::AggregateRecompute { .. }));
        let err = GradebookError::validation("bad");
        assert!(matches!(err, GradebookError::Validation { .. }));
        let err = GradebookError::conflict("seeded");
        assert!(matches!(err, GradebookError::Conflict { .. }));
        let err = GradebookError::storage("disk");
        assert!(matches!(err, GradebookError::Storage { .. }));
    }

    #[test]
    fn only_store_failures_are_retryable() {
        assert!(GradebookError::storage("io").is_retryable());
        assert!(GradebookError::aggregate_recompute("io").is_retryable());
        assert!(!GradebookError::constraint("dup").is_retryable());
        assert!(!GradebookError::not_found("gone").is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let err = GradebookError::not_found("grade (1, 2)");
        assert_eq!(err.to_string(), "not found: grade (1, 2)");
    }
}
