//! Supabase row-level security for Rust
//!
//! Declare which tables have row-level security and which policies they carry,
//! generate migrations from the declarations, and apply them to a Supabase
//! PostgreSQL database.

pub use supabase_rls_migration as migration;
pub use supabase_rls_policy as policy;

pub use supabase_rls_migration::{
    checks, config, declaration, diff, directory, editor, error, executor, operation, recorder,
    role, session, sql, state,
};

use log::info;
use sea_orm::DatabaseConnection;
use std::path::PathBuf;

use crate::checks::CheckMessage;
use crate::config::RlsOptions;
use crate::declaration::TableDeclaration;
use crate::directory::MigrationDirectory;
use crate::error::Result;
use crate::executor::{Executor, MigrationStatus, PlanStep, Target};
use crate::state::ProjectState;
use supabase_rls_migration::Migration;

/// The main entry point: a migrations directory plus the options used to apply it
pub struct RlsProject {
    /// Options for migrations and the current user setting
    pub options: RlsOptions,
    directory: MigrationDirectory,
}

impl RlsProject {
    /// Create a project reading migrations from `migrations_dir`
    ///
    /// # Example
    ///
    /// ```
    /// use supabase_rls::RlsProject;
    ///
    /// let project = RlsProject::new("migrations");
    /// ```
    pub fn new(migrations_dir: &str) -> Self {
        Self::new_with_options(RlsOptions::default().with_migrations_dir(migrations_dir))
    }

    /// Create a project with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use supabase_rls::{RlsProject, config::RlsOptions};
    ///
    /// let options = RlsOptions::default().with_history_table("policy_history");
    /// let project = RlsProject::new_with_options(options);
    /// ```
    pub fn new_with_options(options: RlsOptions) -> Self {
        let directory = MigrationDirectory::new(&options.migrations_dir);
        Self { options, directory }
    }

    pub fn directory(&self) -> &MigrationDirectory {
        &self.directory
    }

    /// Migrations on disk, in order
    pub fn migrations(&self) -> Result<Vec<Migration>> {
        self.directory.load()
    }

    /// Schema state after every migration on disk
    pub fn state(&self) -> Result<ProjectState> {
        ProjectState::from_migrations(&self.migrations()?)
    }

    /// Compute the migrations that bring the history in line with `declarations`.
    ///
    /// Nothing is written; pass the result to [`write_migrations`](Self::write_migrations).
    pub fn makemigrations(
        &self,
        declarations: &mut [TableDeclaration],
        name: Option<&str>,
    ) -> Result<Vec<Migration>> {
        let history = self.migrations()?;
        diff::make_migrations(&history, declarations, name)
    }

    /// Write migrations to the migrations directory
    pub fn write_migrations(&self, migrations: &[Migration]) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(migrations.len());
        for migration in migrations {
            let path = self.directory.write(migration)?;
            info!("Wrote {}", path.display());
            paths.push(path);
        }
        Ok(paths)
    }

    /// SQL the named migration runs, forwards or backwards
    pub async fn sqlmigrate(&self, name: &str, backwards: bool) -> Result<Vec<String>> {
        executor::sqlmigrate(&self.migrations()?, name, backwards).await
    }

    pub fn executor<'a>(&self, conn: &'a DatabaseConnection) -> Executor<'a> {
        Executor::new(conn, &self.options)
    }

    /// Apply or revert migrations until `target` is reached
    pub async fn migrate(
        &self,
        conn: &DatabaseConnection,
        target: &Target,
    ) -> Result<Vec<PlanStep>> {
        self.executor(conn).migrate(&self.migrations()?, target).await
    }

    /// Revert the last `steps` applied migrations
    pub async fn rollback(&self, conn: &DatabaseConnection, steps: usize) -> Result<Vec<PlanStep>> {
        self.executor(conn).rollback(&self.migrations()?, steps).await
    }

    /// Applied state of every migration on disk
    pub async fn showmigrations(&self, conn: &DatabaseConnection) -> Result<Vec<MigrationStatus>> {
        self.executor(conn).show(&self.migrations()?).await
    }

    /// Run the RLS health checks against the tables known to the migrations
    pub async fn check(&self, conn: &DatabaseConnection) -> Result<Vec<CheckMessage>> {
        checks::run_checks(conn, &self.state()?).await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::RlsProject;
    pub use supabase_rls_migration::{
        set_config, set_current_user, Migration, Operation, RlsError, RlsOptions, TableDeclaration,
    };
    pub use supabase_rls_policy::{DeclaredPolicy, Operand, Policy, PolicyExpr, Predicate};
}
