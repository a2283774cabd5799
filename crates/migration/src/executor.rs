//! Applying and reverting migrations against a database

use log::{info, warn};
use sea_orm::{DatabaseConnection, TransactionTrait};

use crate::config::RlsOptions;
use crate::editor::RecordingEditor;
use crate::error::{Result, RlsError};
use crate::migration::Migration;
use crate::recorder::{AppliedMigration, MigrationRecorder};
use crate::state::ProjectState;

/// Where `migrate` should leave the history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every migration applied
    Latest,
    /// Everything up to and including the named migration applied
    Name(String),
    /// Nothing applied
    Zero,
}

/// One step of a migration plan, indexing into the migration list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    Apply(usize),
    Unapply(usize),
}

/// Applied state of one migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub app: String,
    pub name: String,
    pub applied: bool,
}

/// Steps that move the history from `applied` to `target`.
///
/// The applied migrations must be a prefix of `migrations`, in the same order.
pub fn plan(
    migrations: &[Migration],
    applied: &[String],
    target: &Target,
) -> Result<Vec<PlanStep>> {
    if applied.len() > migrations.len() {
        return Err(RlsError::migration(format!(
            "{} migrations applied but only {} known",
            applied.len(),
            migrations.len()
        )));
    }
    for (migration, name) in migrations.iter().zip(applied) {
        if &migration.name != name {
            return Err(RlsError::migration(format!(
                "Inconsistent history: expected {} but {} is applied",
                migration.name, name
            )));
        }
    }

    let current = applied.len();
    let wanted = match target {
        Target::Latest => migrations.len(),
        Target::Zero => 0,
        Target::Name(name) => {
            migrations
                .iter()
                .position(|m| &m.name == name)
                .ok_or_else(|| RlsError::migration(format!("Unknown migration: {}", name)))?
                + 1
        }
    };

    if wanted >= current {
        Ok((current..wanted).map(PlanStep::Apply).collect())
    } else {
        Ok((wanted..current).rev().map(PlanStep::Unapply).collect())
    }
}

/// SQL a migration would run, without touching a database
pub async fn sqlmigrate(
    migrations: &[Migration],
    name: &str,
    backwards: bool,
) -> Result<Vec<String>> {
    let index = migrations
        .iter()
        .position(|m| m.name == name)
        .ok_or_else(|| RlsError::migration(format!("Unknown migration: {}", name)))?;
    let state = ProjectState::from_migrations(&migrations[..index])?;

    let editor = RecordingEditor::new();
    if backwards {
        migrations[index].unapply(&state, &editor).await?;
    } else {
        migrations[index].apply(&state, &editor).await?;
    }
    Ok(editor.take())
}

/// Runs migrations, one transaction per migration
pub struct Executor<'a> {
    conn: &'a DatabaseConnection,
    recorder: MigrationRecorder,
}

impl<'a> Executor<'a> {
    pub fn new(conn: &'a DatabaseConnection, options: &RlsOptions) -> Self {
        Self {
            conn,
            recorder: MigrationRecorder::new(&options.history_table),
        }
    }

    pub fn recorder(&self) -> &MigrationRecorder {
        &self.recorder
    }

    async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        self.recorder.ensure_schema(self.conn).await?;
        self.recorder.applied(self.conn).await
    }

    /// Apply or revert migrations until `target` is reached.
    ///
    /// Returns the plan that was executed. A failing migration is rolled back and
    /// stops the run; migrations committed before it stay applied.
    pub async fn migrate(
        &self,
        migrations: &[Migration],
        target: &Target,
    ) -> Result<Vec<PlanStep>> {
        let applied: Vec<String> = self.applied().await?.into_iter().map(|m| m.name).collect();
        let steps = plan(migrations, &applied, target)?;
        if steps.is_empty() {
            info!("No migrations to apply");
        }

        for step in &steps {
            match *step {
                PlanStep::Apply(index) => self.apply(migrations, index).await?,
                PlanStep::Unapply(index) => self.unapply(migrations, index).await?,
            }
        }
        Ok(steps)
    }

    /// Revert the last `steps` applied migrations
    pub async fn rollback(&self, migrations: &[Migration], steps: usize) -> Result<Vec<PlanStep>> {
        let applied = self.applied().await?.len();
        let target = if steps >= applied {
            Target::Zero
        } else {
            let migration = migrations.get(applied - steps - 1).ok_or_else(|| {
                RlsError::migration(format!(
                    "{} migrations applied but only {} known",
                    applied,
                    migrations.len()
                ))
            })?;
            Target::Name(migration.name.clone())
        };
        self.migrate(migrations, &target).await
    }

    /// Applied state of every known migration
    pub async fn show(&self, migrations: &[Migration]) -> Result<Vec<MigrationStatus>> {
        let applied = self.applied().await?;
        for record in &applied {
            if !migrations.iter().any(|m| m.name == record.name) {
                warn!("Applied migration {} has no migration file", record.name);
            }
        }
        Ok(migrations
            .iter()
            .map(|m| MigrationStatus {
                app: m.app.clone(),
                name: m.name.clone(),
                applied: applied.iter().any(|a| a.name == m.name),
            })
            .collect())
    }

    async fn apply(&self, migrations: &[Migration], index: usize) -> Result<()> {
        let migration = &migrations[index];
        let state = ProjectState::from_migrations(&migrations[..index])?;

        let txn = self.conn.begin().await?;
        migration.apply(&state, &txn).await?;
        self.recorder
            .record_applied(&txn, &migration.app, &migration.name)
            .await?;
        txn.commit().await?;

        info!("Applied {}", migration.name);
        Ok(())
    }

    async fn unapply(&self, migrations: &[Migration], index: usize) -> Result<()> {
        let migration = &migrations[index];
        let state = ProjectState::from_migrations(&migrations[..index])?;

        let txn = self.conn.begin().await?;
        migration.unapply(&state, &txn).await?;
        self.recorder
            .record_unapplied(&txn, &migration.app, &migration.name)
            .await?;
        txn.commit().await?;

        info!("Unapplied {}", migration.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use supabase_rls_policy::Policy;

    fn migrations() -> Vec<Migration> {
        vec![
            Migration::new("docs", "0001_initial", vec![Operation::alter_rls("documents", true)]),
            Migration::new(
                "docs",
                "0002_documents_add_policy_p",
                vec![Operation::add_policy("documents", &Policy::new("p", "true", None))],
            ),
            Migration::new(
                "docs",
                "0003_documents_no_force_rls",
                vec![Operation::alter_force_rls("documents", false)],
            ),
        ]
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_forwards() {
        let steps = plan(&migrations(), &names(&["0001_initial"]), &Target::Latest).unwrap();
        assert_eq!(steps, vec![PlanStep::Apply(1), PlanStep::Apply(2)]);
    }

    #[test]
    fn test_plan_backwards() {
        let applied = names(&[
            "0001_initial",
            "0002_documents_add_policy_p",
            "0003_documents_no_force_rls",
        ]);
        let target = Target::Name("0001_initial".to_string());
        let steps = plan(&migrations(), &applied, &target).unwrap();
        assert_eq!(steps, vec![PlanStep::Unapply(2), PlanStep::Unapply(1)]);

        let steps = plan(&migrations(), &applied, &Target::Zero).unwrap();
        assert_eq!(steps, vec![PlanStep::Unapply(2), PlanStep::Unapply(1), PlanStep::Unapply(0)]);
    }

    #[test]
    fn test_plan_rejects_inconsistent_history() {
        let result = plan(&migrations(), &names(&["0002_documents_add_policy_p"]), &Target::Latest);
        assert!(matches!(result, Err(RlsError::Migration(_))));

        let result = plan(&migrations(), &[], &Target::Name("0009_missing".to_string()));
        assert!(matches!(result, Err(RlsError::Migration(_))));
    }

    #[tokio::test]
    async fn test_sqlmigrate() {
        let sql = sqlmigrate(&migrations(), "0002_documents_add_policy_p", false).await.unwrap();
        assert_eq!(sql, vec!["CREATE POLICY \"p\" ON \"documents\" USING (true);"]);

        let sql = sqlmigrate(&migrations(), "0003_documents_no_force_rls", true).await.unwrap();
        assert_eq!(sql, vec!["ALTER TABLE \"documents\" FORCE ROW LEVEL SECURITY;"]);
    }
}
