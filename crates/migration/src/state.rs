//! In-memory schema state for RLS-managed tables
//!
//! A [`ProjectState`] is the result of replaying every migration's operations in
//! order. Tables are only mutated through [`Operation::state_forwards`], so the
//! mutators here are crate-private.
//!
//! [`Operation::state_forwards`]: crate::operation::Operation::state_forwards

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use supabase_rls_policy::Policy;

use crate::error::{Result, RlsError};
use crate::migration::Migration;

/// Identifies a table by its app label and table name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableKey {
    pub app: String,
    pub table: String,
}

impl TableKey {
    pub fn new(app: &str, table: &str) -> Self {
        Self {
            app: app.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.table)
    }
}

/// RLS flags and policies of one table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchemaState {
    table: String,
    rls_enabled: bool,
    rls_forced: bool,
    policies: Vec<Policy>,
}

impl TableSchemaState {
    /// An RLS-disabled table without policies
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    /// Desired state of a table, as declared.
    ///
    /// Fails when two policies share a name.
    pub fn declared(
        table: &str,
        rls_enabled: bool,
        rls_forced: bool,
        policies: Vec<Policy>,
    ) -> Result<Self> {
        let mut state = Self::new(table);
        state.rls_enabled = rls_enabled;
        state.rls_forced = rls_forced;
        for policy in policies {
            state.add_policy(policy)?;
        }
        Ok(state)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rls_enabled(&self) -> bool {
        self.rls_enabled
    }

    pub fn rls_forced(&self) -> bool {
        self.rls_forced
    }

    /// Policies in declaration order
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }

    pub(crate) fn set_rls_enabled(&mut self, enabled: bool) {
        self.rls_enabled = enabled;
    }

    pub(crate) fn set_rls_forced(&mut self, forced: bool) {
        self.rls_forced = forced;
    }

    pub(crate) fn add_policy(&mut self, policy: Policy) -> Result<()> {
        if self.policy(&policy.name).is_some() {
            return Err(RlsError::invalid_state(format!(
                "policy '{}' already exists on table '{}'",
                policy.name, self.table
            )));
        }
        self.policies.push(policy);
        Ok(())
    }

    pub(crate) fn remove_policy(&mut self, name: &str) -> Result<Policy> {
        let index = self.position(name)?;
        Ok(self.policies.remove(index))
    }

    pub(crate) fn replace_policy(&mut self, policy: Policy) -> Result<Policy> {
        let index = self.position(&policy.name)?;
        Ok(std::mem::replace(&mut self.policies[index], policy))
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.policies
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| {
                RlsError::invalid_state(format!(
                    "policy '{}' does not exist on table '{}'",
                    name, self.table
                ))
            })
    }
}

/// Schema state of every RLS-managed table at one point in the migration history
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectState {
    tables: BTreeMap<TableKey, TableSchemaState>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay the operations of `migrations`, in order, onto an empty state
    pub fn from_migrations<'a, I>(migrations: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Migration>,
    {
        let mut state = Self::new();
        for migration in migrations {
            migration.mutate_state(&mut state)?;
        }
        Ok(state)
    }

    pub fn table(&self, app: &str, table: &str) -> Option<&TableSchemaState> {
        self.tables.get(&TableKey::new(app, table))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&TableKey, &TableSchemaState)> {
        self.tables.iter()
    }

    /// Tables with RLS enabled
    pub fn rls_tables(&self) -> impl Iterator<Item = &TableSchemaState> {
        self.tables.values().filter(|t| t.rls_enabled())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub(crate) fn table_mut_or_insert(&mut self, app: &str, table: &str) -> &mut TableSchemaState {
        self.tables
            .entry(TableKey::new(app, table))
            .or_insert_with(|| TableSchemaState::new(table))
    }
}
