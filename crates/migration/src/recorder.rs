//! Migration history stored in the database

use log::debug;
use sea_orm::prelude::DateTimeUtc;
use sea_orm::{ConnectionTrait, DbBackend, Statement};

use supabase_rls_policy::quote_name;

use crate::error::Result;

/// Row of the migration history table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub app: String,
    pub name: String,
    pub applied_at: DateTimeUtc,
}

/// Reads and writes the migration history table
#[derive(Debug, Clone)]
pub struct MigrationRecorder {
    table: String,
}

impl MigrationRecorder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist yet
    pub async fn ensure_schema<C: ConnectionTrait>(&self, conn: &C) -> Result<()> {
        conn.execute_unprepared(&format!(
            "CREATE TABLE IF NOT EXISTS {}(
                id SERIAL PRIMARY KEY,
                app TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            quote_name(&self.table)
        ))
        .await?;
        Ok(())
    }

    /// Applied migrations, in the order they were applied
    pub async fn applied<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<AppliedMigration>> {
        let rows = conn
            .query_all(Statement::from_string(
                DbBackend::Postgres,
                format!(
                    "SELECT app, name, applied_at FROM {} ORDER BY id ASC",
                    quote_name(&self.table)
                ),
            ))
            .await?;

        let mut migrations = Vec::with_capacity(rows.len());
        for row in rows {
            migrations.push(AppliedMigration {
                app: row.try_get_by_index(0)?,
                name: row.try_get_by_index(1)?,
                applied_at: row.try_get_by_index(2)?,
            });
        }
        Ok(migrations)
    }

    pub async fn record_applied<C: ConnectionTrait>(
        &self,
        conn: &C,
        app: &str,
        name: &str,
    ) -> Result<()> {
        debug!("Recording {} as applied", name);
        conn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "INSERT INTO {}(app, name, applied_at) VALUES ($1, $2, now())",
                quote_name(&self.table)
            ),
            [app.into(), name.into()],
        ))
        .await?;
        Ok(())
    }

    pub async fn record_unapplied<C: ConnectionTrait>(
        &self,
        conn: &C,
        app: &str,
        name: &str,
    ) -> Result<()> {
        debug!("Recording {} as unapplied", name);
        conn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "DELETE FROM {} WHERE app = $1 AND name = $2",
                quote_name(&self.table)
            ),
            [app.into(), name.into()],
        ))
        .await?;
        Ok(())
    }
}
