//! Migrations: named, ordered lists of RLS operations

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use sea_orm::DbErr;
use sea_orm_migration::prelude::{MigrationName, MigrationTrait, SchemaManager};
use serde::{Deserialize, Serialize};

use crate::editor::SchemaEditor;
use crate::error::Result;
use crate::operation::Operation;
use crate::state::ProjectState;

const MAX_SUGGESTED_NAME_LEN: usize = 52;

/// A migration of one app, as stored in a migration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// App label the operations apply to
    pub app: String,
    /// Full name including the number prefix, e.g. `0001_initial`
    pub name: String,
    /// First migration of the project
    #[serde(default)]
    pub initial: bool,
    pub operations: Vec<Operation>,
}

impl Migration {
    pub fn new(app: &str, name: &str, operations: Vec<Operation>) -> Self {
        Self {
            app: app.to_string(),
            name: name.to_string(),
            initial: false,
            operations,
        }
    }

    pub fn with_initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }

    /// Apply the operations to `state` without touching the database
    pub fn mutate_state(&self, state: &mut ProjectState) -> Result<()> {
        for operation in &self.operations {
            operation.state_forwards(&self.app, state)?;
        }
        Ok(())
    }

    /// Apply the migration to the database.
    ///
    /// `state` is the project state before this migration; the state after it is
    /// returned.
    pub async fn apply(
        &self,
        state: &ProjectState,
        editor: &dyn SchemaEditor,
    ) -> Result<ProjectState> {
        info!("Applying migration {}", self.name);
        let mut current = state.clone();
        for operation in &self.operations {
            let mut next = current.clone();
            operation.state_forwards(&self.app, &mut next)?;
            debug!("{}", operation);
            operation
                .database_forwards(&self.app, editor, &current, &next)
                .await?;
            current = next;
        }
        Ok(current)
    }

    /// Revert the migration on the database.
    ///
    /// `state` is the project state before this migration was applied, which is
    /// also the state returned.
    pub async fn unapply(
        &self,
        state: &ProjectState,
        editor: &dyn SchemaEditor,
    ) -> Result<ProjectState> {
        info!("Unapplying migration {}", self.name);
        let mut steps = Vec::with_capacity(self.operations.len());
        let mut current = state.clone();
        for operation in &self.operations {
            let mut next = current.clone();
            operation.state_forwards(&self.app, &mut next)?;
            steps.push((operation, current, next.clone()));
            current = next;
        }

        for (operation, before, after) in steps.iter().rev() {
            debug!("Reverting {}", operation);
            operation
                .database_backwards(&self.app, editor, after, before)
                .await?;
        }
        Ok(state.clone())
    }

    /// Suggest a name from the operations, e.g. `documents_enable_rls_documents_add_policy_p`
    pub fn suggest_name(&self) -> String {
        if self.initial {
            return "initial".to_string();
        }

        let fragments: Vec<String> = self
            .operations
            .iter()
            .map(|op| sanitize_fragment(&op.migration_name_fragment()))
            .filter(|fragment| !fragment.is_empty())
            .collect();

        if fragments.is_empty() || fragments.len() != self.operations.len() {
            return format!("auto_{}", Utc::now().format("%Y%m%d_%H%M"));
        }

        let mut name = fragments[0].clone();
        for fragment in &fragments[1..] {
            let candidate = format!("{}_{}", name, fragment);
            if candidate.len() > MAX_SUGGESTED_NAME_LEN {
                name.push_str("_and_more");
                break;
            }
            name = candidate;
        }
        name
    }
}

/// Collapse every run of non-word characters into a single `_`
fn sanitize_fragment(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_run = false;
    for c in fragment.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Runs a [`Migration`] as a sea-orm-migration step
pub struct MigrationStep {
    migration: Migration,
    state_before: ProjectState,
}

impl MigrationStep {
    pub fn new(migration: Migration, state_before: ProjectState) -> Self {
        Self {
            migration,
            state_before,
        }
    }
}

impl MigrationName for MigrationStep {
    fn name(&self) -> &str {
        &self.migration.name
    }
}

#[async_trait]
impl MigrationTrait for MigrationStep {
    async fn up(&self, manager: &SchemaManager) -> std::result::Result<(), DbErr> {
        self.migration
            .apply(&self.state_before, manager)
            .await
            .map(|_| ())
            .map_err(|e| DbErr::Migration(e.to_string()))
    }

    async fn down(&self, manager: &SchemaManager) -> std::result::Result<(), DbErr> {
        self.migration
            .unapply(&self.state_before, manager)
            .await
            .map(|_| ())
            .map_err(|e| DbErr::Migration(e.to_string()))
    }
}

/// Wrap migrations as sea-orm-migration steps, each carrying the state it starts from.
///
/// Use this from a `MigratorTrait::migrations` implementation.
pub fn migration_steps(migrations: &[Migration]) -> Result<Vec<Box<dyn MigrationTrait>>> {
    let mut state = ProjectState::new();
    let mut steps: Vec<Box<dyn MigrationTrait>> = Vec::with_capacity(migrations.len());
    for migration in migrations {
        steps.push(Box::new(MigrationStep::new(migration.clone(), state.clone())));
        migration.mutate_state(&mut state)?;
    }
    Ok(steps)
}
