//! Migration operations for row-level security
//!
//! Each [`Operation`] knows how to mutate the in-memory [`ProjectState`] and how
//! to apply or revert itself against a live database through a [`SchemaEditor`].
//!
//! Both database methods receive the state before and after the operation. In
//! `database_backwards` the roles are swapped: `from_state` is the state the
//! operation produced and `to_state` is the state being restored.

use serde::{Deserialize, Serialize};
use std::fmt;

use supabase_rls_policy::Policy;

use crate::editor::SchemaEditor;
use crate::error::{Result, RlsError};
use crate::sql;
use crate::state::{ProjectState, TableSchemaState};

/// Kind of change an operation makes, shown as a prefix by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCategory {
    Addition,
    Removal,
    Alteration,
}

impl OperationCategory {
    pub fn symbol(&self) -> &'static str {
        match self {
            OperationCategory::Addition => "+",
            OperationCategory::Removal => "-",
            OperationCategory::Alteration => "~",
        }
    }
}

/// A single RLS schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Enable or disable row-level security on a table
    AlterRls { table: String, enabled: bool },
    /// Apply row-level security to the table owner too
    AlterForceRls { table: String, forced: bool },
    AddPolicy {
        table: String,
        name: String,
        using: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<String>,
    },
    /// Carries the removed predicates so the removal can be reverted
    RemovePolicy {
        table: String,
        name: String,
        using: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<String>,
    },
    AlterPolicy {
        table: String,
        name: String,
        using: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<String>,
    },
}

impl Operation {
    pub fn alter_rls(table: &str, enabled: bool) -> Self {
        Operation::AlterRls {
            table: table.to_string(),
            enabled,
        }
    }

    pub fn alter_force_rls(table: &str, forced: bool) -> Self {
        Operation::AlterForceRls {
            table: table.to_string(),
            forced,
        }
    }

    pub fn add_policy(table: &str, policy: &Policy) -> Self {
        Operation::AddPolicy {
            table: table.to_string(),
            name: policy.name.clone(),
            using: policy.using.clone(),
            check: policy.check.clone(),
        }
    }

    pub fn remove_policy(table: &str, policy: &Policy) -> Self {
        Operation::RemovePolicy {
            table: table.to_string(),
            name: policy.name.clone(),
            using: policy.using.clone(),
            check: policy.check.clone(),
        }
    }

    pub fn alter_policy(table: &str, policy: &Policy) -> Self {
        Operation::AlterPolicy {
            table: table.to_string(),
            name: policy.name.clone(),
            using: policy.using.clone(),
            check: policy.check.clone(),
        }
    }

    /// Table the operation applies to
    pub fn table(&self) -> &str {
        match self {
            Operation::AlterRls { table, .. }
            | Operation::AlterForceRls { table, .. }
            | Operation::AddPolicy { table, .. }
            | Operation::RemovePolicy { table, .. }
            | Operation::AlterPolicy { table, .. } => table,
        }
    }

    /// Policy carried by the operation, if any
    pub fn policy(&self) -> Option<Policy> {
        match self {
            Operation::AddPolicy {
                name, using, check, ..
            }
            | Operation::RemovePolicy {
                name, using, check, ..
            }
            | Operation::AlterPolicy {
                name, using, check, ..
            } => Some(policy_of(name, using, check)),
            Operation::AlterRls { .. } | Operation::AlterForceRls { .. } => None,
        }
    }

    pub fn category(&self) -> OperationCategory {
        match self {
            Operation::AlterRls { enabled: true, .. }
            | Operation::AlterForceRls { forced: true, .. }
            | Operation::AddPolicy { .. } => OperationCategory::Addition,
            Operation::AlterRls { enabled: false, .. }
            | Operation::AlterForceRls { forced: false, .. }
            | Operation::RemovePolicy { .. } => OperationCategory::Removal,
            Operation::AlterPolicy { .. } => OperationCategory::Alteration,
        }
    }

    /// Human readable description, e.g. `Add Policy owner_only on documents`
    pub fn describe(&self) -> String {
        match self {
            Operation::AlterRls { table, enabled } => format!(
                "{} Row Level Security on {}",
                if *enabled { "Enable" } else { "Disable" },
                table
            ),
            Operation::AlterForceRls { table, forced } => format!(
                "{} Row Level Security on {}",
                if *forced { "Force" } else { "No Force" },
                table
            ),
            Operation::AddPolicy { table, name, .. } => {
                format!("Add Policy {} on {}", name, table)
            }
            Operation::RemovePolicy { table, name, .. } => {
                format!("Remove Policy {} on {}", name, table)
            }
            Operation::AlterPolicy { table, name, .. } => {
                format!("Alter Policy {} on {}", name, table)
            }
        }
    }

    /// Fragment used when suggesting a migration name, e.g. `documents_enable_rls`
    pub fn migration_name_fragment(&self) -> String {
        let table = self.table().to_lowercase();
        match self {
            Operation::AlterRls { enabled, .. } => {
                let verb = if *enabled { "enable" } else { "disable" };
                format!("{}_{}_rls", table, verb)
            }
            Operation::AlterForceRls { forced, .. } => {
                let verb = if *forced { "force" } else { "no_force" };
                format!("{}_{}_rls", table, verb)
            }
            Operation::AddPolicy { name, .. } => format!("{}_add_policy_{}", table, name),
            Operation::RemovePolicy { name, .. } => format!("{}_remove_policy_{}", table, name),
            Operation::AlterPolicy { name, .. } => format!("{}_alter_policy_{}", table, name),
        }
    }

    /// Apply the operation to the in-memory state of `app`
    pub fn state_forwards(&self, app: &str, state: &mut ProjectState) -> Result<()> {
        let table = state.table_mut_or_insert(app, self.table());
        match self {
            Operation::AlterRls { enabled, .. } => {
                table.set_rls_enabled(*enabled);
                table.set_rls_forced(*enabled);
            }
            Operation::AlterForceRls { forced, .. } => table.set_rls_forced(*forced),
            Operation::AddPolicy {
                name, using, check, ..
            } => table.add_policy(policy_of(name, using, check))?,
            Operation::RemovePolicy { name, .. } => {
                table.remove_policy(name)?;
            }
            Operation::AlterPolicy {
                name, using, check, ..
            } => {
                table.replace_policy(policy_of(name, using, check))?;
            }
        }
        Ok(())
    }

    /// Apply the operation to the database
    pub async fn database_forwards(
        &self,
        app: &str,
        editor: &dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> Result<()> {
        let table = editor.quote_name(self.table());
        match self {
            Operation::AlterRls { .. } => {
                apply_rls_flags(editor, &table, to_state.table(app, self.table())).await
            }
            Operation::AlterForceRls { .. } => {
                apply_force_flag(editor, &table, to_state.table(app, self.table())).await
            }
            Operation::AddPolicy {
                name, using, check, ..
            } => {
                let policy = editor.quote_name(name);
                editor
                    .execute(&sql::create_policy_sql(&table, &policy, using, check.as_deref()))
                    .await
            }
            Operation::RemovePolicy { name, .. } => {
                let policy = editor.quote_name(name);
                editor.execute(&sql::drop_policy_sql(&table, &policy)).await
            }
            Operation::AlterPolicy {
                name, using, check, ..
            } => {
                let current = from_state
                    .table(app, self.table())
                    .and_then(|t| t.policy(name));
                alter_policy(editor, &table, current, &policy_of(name, using, check)).await
            }
        }
    }

    /// Revert the operation on the database, restoring `to_state`
    pub async fn database_backwards(
        &self,
        app: &str,
        editor: &dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> Result<()> {
        let table = editor.quote_name(self.table());
        match self {
            Operation::AlterRls { .. } => {
                apply_rls_flags(editor, &table, to_state.table(app, self.table())).await
            }
            Operation::AlterForceRls { .. } => {
                apply_force_flag(editor, &table, to_state.table(app, self.table())).await
            }
            Operation::AddPolicy { name, .. } => {
                let policy = editor.quote_name(name);
                editor.execute(&sql::drop_policy_sql(&table, &policy)).await
            }
            Operation::RemovePolicy {
                name, using, check, ..
            } => {
                let policy = editor.quote_name(name);
                editor
                    .execute(&sql::create_policy_sql(&table, &policy, using, check.as_deref()))
                    .await
            }
            Operation::AlterPolicy { name, .. } => {
                let prior = to_state
                    .table(app, self.table())
                    .and_then(|t| t.policy(name))
                    .cloned()
                    .ok_or_else(|| {
                        RlsError::invalid_state(format!(
                            "cannot revert '{}': no prior policy '{}' on '{}'",
                            self.describe(),
                            name,
                            self.table()
                        ))
                    })?;
                let current = from_state
                    .table(app, self.table())
                    .and_then(|t| t.policy(name));
                alter_policy(editor, &table, current, &prior).await
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.category().symbol(), self.describe())
    }
}

fn policy_of(name: &str, using: &str, check: &Option<String>) -> Policy {
    Policy::new(name, using, check.as_deref())
}

async fn apply_rls_flags(
    editor: &dyn SchemaEditor,
    table: &str,
    state: Option<&TableSchemaState>,
) -> Result<()> {
    let enabled = state.map(|t| t.rls_enabled()).unwrap_or(false);
    let forced = state.map(|t| t.rls_forced()).unwrap_or(false);
    if enabled {
        editor.execute(&sql::enable_rls_sql(table)).await?;
    } else {
        editor.execute(&sql::disable_rls_sql(table)).await?;
    }
    editor.execute(&sql::force_rls_sql(table, forced)).await
}

async fn apply_force_flag(
    editor: &dyn SchemaEditor,
    table: &str,
    state: Option<&TableSchemaState>,
) -> Result<()> {
    let forced = state.map(|t| t.rls_forced()).unwrap_or(false);
    editor.execute(&sql::force_rls_sql(table, forced)).await
}

/// `ALTER POLICY` cannot remove a `WITH CHECK` clause, so a policy losing its check
/// is dropped and created again.
async fn alter_policy(
    editor: &dyn SchemaEditor,
    table: &str,
    current: Option<&Policy>,
    target: &Policy,
) -> Result<()> {
    let policy = editor.quote_name(&target.name);
    let drops_check = current.map(|p| p.check.is_some()).unwrap_or(false) && target.check.is_none();
    if drops_check {
        editor.execute(&sql::drop_policy_sql(table, &policy)).await?;
        editor
            .execute(&sql::create_policy_sql(table, &policy, &target.using, None))
            .await
    } else {
        editor
            .execute(&sql::alter_policy_sql(
                table,
                &policy,
                &target.using,
                target.check.as_deref(),
            ))
            .await
    }
}
