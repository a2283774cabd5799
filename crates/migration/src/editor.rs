//! Execution of DDL statements produced by migration operations

use async_trait::async_trait;
use log::debug;
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction};
use sea_orm_migration::prelude::SchemaManager;
use std::sync::Mutex;

use supabase_rls_policy::quote_name;

use crate::error::{Result, RlsError};

/// Executes schema-changing SQL on behalf of migration operations
#[async_trait]
pub trait SchemaEditor: Send + Sync {
    /// Quote an identifier for use in DDL
    fn quote_name(&self, name: &str) -> String {
        quote_name(name)
    }

    /// Execute one statement
    async fn execute(&self, sql: &str) -> Result<()>;
}

#[async_trait]
impl SchemaEditor for DatabaseConnection {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.execute_unprepared(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaEditor for DatabaseTransaction {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.execute_unprepared(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl<'c> SchemaEditor for SchemaManager<'c> {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.get_connection().execute_unprepared(sql).await?;
        Ok(())
    }
}

/// Editor that records statements instead of executing them
#[derive(Debug, Default)]
pub struct RecordingEditor {
    statements: Mutex<Vec<String>>,
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements recorded so far, in execution order
    pub fn statements(&self) -> Vec<String> {
        match self.statements.lock() {
            Ok(statements) => statements.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Take the recorded statements, leaving the editor empty
    pub fn take(&self) -> Vec<String> {
        match self.statements.lock() {
            Ok(mut statements) => std::mem::take(&mut *statements),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl SchemaEditor for RecordingEditor {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.statements
            .lock()
            .map_err(|_| RlsError::invalid_state("recording editor lock poisoned"))?
            .push(sql.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_editor() {
        let editor = RecordingEditor::new();
        editor.execute("SELECT 1;").await.unwrap();
        editor.execute("SELECT 2;").await.unwrap();

        assert_eq!(editor.quote_name("a\"b"), "\"a\"\"b\"");
        assert_eq!(editor.take(), vec!["SELECT 1;", "SELECT 2;"]);
        assert!(editor.statements().is_empty());
    }
}
