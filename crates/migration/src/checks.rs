//! Health checks for a database protected by row-level security

use log::debug;
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::fmt;

use crate::error::{Result, RlsError};
use crate::state::ProjectState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
    Error,
    Critical,
}

impl fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckLevel::Error => f.write_str("ERROR"),
            CheckLevel::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// A problem found by a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMessage {
    pub level: CheckLevel,
    pub id: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.level, self.id, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n\tHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Policies do not apply to superusers, so connecting as one defeats RLS
pub async fn check_no_superuser<C: ConnectionTrait>(conn: &C) -> Result<Vec<CheckMessage>> {
    let row = conn
        .query_one(Statement::from_string(
            DbBackend::Postgres,
            "SELECT rolsuper FROM pg_roles WHERE rolname = current_user",
        ))
        .await?
        .ok_or_else(|| RlsError::invalid_state("current_user has no pg_roles entry"))?;
    let superuser: bool = row.try_get_by_index(0)?;

    let mut messages = Vec::new();
    if superuser {
        messages.push(CheckMessage {
            level: CheckLevel::Error,
            id: "rls.E001",
            message: "The database role has SUPERUSER privilege. Row-level security does NOT apply to SUPERUSER roles.".to_string(),
            hint: Some("Create a new role without SUPERUSER.".to_string()),
        });
    }
    Ok(messages)
}

/// Every table with RLS enabled in `state` must have row security active for the current role
pub async fn check_rls_tables_are_secure<C: ConnectionTrait>(
    conn: &C,
    state: &ProjectState,
) -> Result<Vec<CheckMessage>> {
    let mut messages = Vec::new();
    for table in state.rls_tables() {
        let row = conn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT row_security_active($1)",
                [table.table().into()],
            ))
            .await?;
        let active = match row {
            Some(row) => row.try_get_by_index::<bool>(0)?,
            None => false,
        };
        debug!("row_security_active({}) = {}", table.table(), active);

        if !active {
            messages.push(CheckMessage {
                level: CheckLevel::Critical,
                id: "rls.C001",
                message: format!(
                    "Row-level security is NOT active for table '{}'.",
                    table.table()
                ),
                hint: None,
            });
        }
    }
    Ok(messages)
}

/// Run every check
pub async fn run_checks<C: ConnectionTrait>(
    conn: &C,
    state: &ProjectState,
) -> Result<Vec<CheckMessage>> {
    let mut messages = check_no_superuser(conn).await?;
    messages.extend(check_rls_tables_are_secure(conn, state).await?);
    Ok(messages)
}
