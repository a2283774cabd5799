use supabase_rls_policy::CompileError;
use thiserror::Error;

/// Errors raised by RLS migrations and the session helpers
#[derive(Error, Debug)]
pub enum RlsError {
    #[error("Policy compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Cannot change config '{name}' from '{current}' to '{requested}' within the same transaction")]
    ConfigConflict {
        name: String,
        current: String,
        requested: String,
    },

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("SQL execution error: {0}")]
    SqlExecution(#[from] sea_orm::DbErr),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RlsError {
    pub fn invalid_state<T: std::fmt::Display>(msg: T) -> Self {
        RlsError::InvalidState(msg.to_string())
    }

    pub fn migration<T: std::fmt::Display>(msg: T) -> Self {
        RlsError::Migration(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RlsError>;
