//! Declarative row-level security migrations
//!
//! Tables declare whether RLS is enabled and which policies they carry. The
//! [`diff`] module compares the declarations with the state built from the
//! migration history and packages the differences into [`Migration`]s, which the
//! [`Executor`] applies one transaction at a time.

pub use sea_orm_migration::prelude::{MigrationTrait, MigratorTrait, SchemaManager};

pub mod checks;
pub mod config;
pub mod declaration;
pub mod diff;
pub mod directory;
pub mod editor;
pub mod error;
pub mod executor;
pub mod migration;
pub mod operation;
pub mod recorder;
pub mod role;
pub mod session;
// RLS ポリシー用の SQL テンプレート
pub mod sql;
pub mod state;

pub use checks::{run_checks, CheckLevel, CheckMessage};
pub use config::RlsOptions;
pub use declaration::{load_declarations, parse_declarations, TableDeclaration};
pub use diff::{diff, make_migrations, Autodetector};
pub use directory::MigrationDirectory;
pub use editor::{RecordingEditor, SchemaEditor};
pub use error::{Result, RlsError};
pub use executor::{plan, sqlmigrate, Executor, MigrationStatus, PlanStep, Target};
pub use migration::{migration_steps, Migration, MigrationStep};
pub use operation::{Operation, OperationCategory};
pub use recorder::{AppliedMigration, MigrationRecorder};
pub use session::{
    clear_config, set_config, set_current_user, with_current_user, LocalSettings, SessionScope,
};
pub use state::{ProjectState, TableKey, TableSchemaState};
