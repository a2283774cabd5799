use thiserror::Error;

/// Errors raised while turning a policy predicate into SQL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Cannot resolve field '{field}' on table '{table}'")]
    UnknownField { table: String, field: String },

    #[error("Cannot resolve relation '{relation}' on table '{table}'")]
    UnknownRelation { table: String, relation: String },

    #[error("Duplicate policy name '{name}' on table '{table}'")]
    DuplicatePolicy { table: String, name: String },

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("Invalid cast type: {0}")]
    InvalidCast(String),
}

impl CompileError {
    pub fn unknown_field(table: &str, field: &str) -> Self {
        CompileError::UnknownField {
            table: table.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_literal<T: std::fmt::Display>(msg: T) -> Self {
        CompileError::InvalidLiteral(msg.to_string())
    }
}
