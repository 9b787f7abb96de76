use thiserror::Error;

use crate::{domain::error::DomainError, infra::error::InfraError};

/// Exit status for a command that was given bad input.
pub const EXIT_USAGE: i32 = 2;
/// Exit status for every other failure.
pub const EXIT_FAILURE: i32 = 1;

/// Failure of a whole command run, reported once by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Unknown categories and bad slugs are the caller's mistake; the rest
    /// are environment or store failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Domain(_) | AppError::Validation(_) => EXIT_USAGE,
            AppError::Infra(_) | AppError::Unexpected(_) => EXIT_FAILURE,
        }
    }
}
