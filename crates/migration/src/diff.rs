//! Detection of RLS changes between schema states

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

use supabase_rls_policy::{Compiler, ModelCatalog};

use crate::declaration::TableDeclaration;
use crate::directory::migration_number;
use crate::error::{Result, RlsError};
use crate::migration::Migration;
use crate::operation::Operation;
use crate::state::{ProjectState, TableKey, TableSchemaState};

/// Operations turning `from` into `to`, or `None` when they already match.
///
/// A missing `from` stands for a table with RLS disabled and no policies. The
/// operations come in a fixed order: RLS toggle, force toggle, altered policies,
/// new policies, then removed policies. A renamed policy is a removal plus an
/// addition.
pub fn diff(
    app: &str,
    table: &str,
    from: Option<&TableSchemaState>,
    to: &TableSchemaState,
) -> Option<Vec<Operation>> {
    let mut operations = Vec::new();

    let from_enabled = from.map(|t| t.rls_enabled()).unwrap_or(false);
    let from_forced = from.map(|t| t.rls_forced()).unwrap_or(false);

    let toggled = from_enabled != to.rls_enabled();
    if toggled {
        operations.push(Operation::alter_rls(table, to.rls_enabled()));
    }

    // toggling RLS also sets forcing to the new enabled flag
    let forced = if toggled { to.rls_enabled() } else { from_forced };
    if forced != to.rls_forced() {
        operations.push(Operation::alter_force_rls(table, to.rls_forced()));
    }

    let from_policies = from.map(|t| t.policies()).unwrap_or(&[]);

    let mut altered = Vec::new();
    let mut added = Vec::new();
    for policy in to.policies() {
        match from_policies.iter().find(|p| p.name == policy.name) {
            Some(existing) if existing != policy => {
                altered.push(Operation::alter_policy(table, policy))
            }
            Some(_) => {}
            None => added.push(Operation::add_policy(table, policy)),
        }
    }
    let removed = from_policies
        .iter()
        .filter(|p| to.policy(&p.name).is_none())
        .map(|p| Operation::remove_policy(table, p));

    operations.extend(altered);
    operations.extend(added);
    operations.extend(removed);

    if operations.is_empty() {
        None
    } else {
        debug!("{} change(s) detected on {}.{}", operations.len(), app, table);
        Some(operations)
    }
}

/// Detects changes between the migration history and the declared tables
pub struct Autodetector<'a> {
    from_state: &'a ProjectState,
}

impl<'a> Autodetector<'a> {
    pub fn new(from_state: &'a ProjectState) -> Self {
        Self { from_state }
    }

    /// Compile every declaration in place and build the declared project state.
    ///
    /// Every table must be declared once. DDL only names the table, so two
    /// declarations of the same table would manage the same policies.
    pub fn declared_state(&self, declarations: &mut [TableDeclaration]) -> Result<ProjectState> {
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for declaration in declarations.iter() {
            if let Some(app) = owners.insert(&declaration.table, &declaration.app) {
                return Err(RlsError::invalid_state(format!(
                    "table {} is declared more than once (apps {} and {})",
                    declaration.table, app, declaration.app
                )));
            }
        }

        let catalog: ModelCatalog = declarations.iter().map(|d| d.model()).collect();
        let compiler = Compiler::new(&catalog);

        let mut state = ProjectState::new();
        for declaration in declarations.iter_mut() {
            let model = declaration.model();
            let policies = compiler.compile_policies(&mut declaration.policies, &model)?;
            let declared = TableSchemaState::declared(
                &declaration.table,
                declaration.rls_enabled,
                declaration.rls_forced(),
                policies,
            )?;
            let table = state.table_mut_or_insert(&declaration.app, &declaration.table);
            *table = declared;
        }
        Ok(state)
    }

    /// Operations per app that bring the history in line with the declarations.
    ///
    /// Tables present in the history but no longer declared are diffed against an
    /// RLS-disabled table without policies.
    pub fn changes(
        &self,
        declarations: &mut [TableDeclaration],
    ) -> Result<BTreeMap<String, Vec<Operation>>> {
        let to_state = self.declared_state(declarations)?;
        self.check_moved_tables(&to_state)?;
        let mut changes: BTreeMap<String, Vec<Operation>> = BTreeMap::new();

        for (key, to) in to_state.tables() {
            let from = self.from_state.table(&key.app, &key.table);
            if let Some(operations) = diff(&key.app, &key.table, from, to) {
                changes.entry(key.app.clone()).or_default().extend(operations);
            }
        }

        let declared: BTreeSet<&TableKey> = to_state.tables().map(|(key, _)| key).collect();
        for (key, from) in self.from_state.tables() {
            if declared.contains(key) {
                continue;
            }
            let to = TableSchemaState::new(&key.table);
            if let Some(operations) = diff(&key.app, &key.table, Some(from), &to) {
                changes.entry(key.app.clone()).or_default().extend(operations);
            }
        }

        Ok(changes)
    }

    /// Fail when a table still secured by one app in the history is now declared
    /// by another app.
    ///
    /// The new app's migration would create policies that still exist, and the old
    /// app's migration would then drop them.
    fn check_moved_tables(&self, to_state: &ProjectState) -> Result<()> {
        for (key, _) in to_state.tables() {
            let previous = self.from_state.tables().find(|(from, state)| {
                from.table == key.table
                    && from.app != key.app
                    && (state.rls_enabled() || state.rls_forced() || !state.policies().is_empty())
            });
            if let Some((from, _)) = previous {
                return Err(RlsError::invalid_state(format!(
                    "table {} moved from app {} to app {}; migrate its removal from {} first",
                    key.table, from.app, key.app, from.app
                )));
            }
        }
        Ok(())
    }
}

/// Package the detected changes into new, numbered migrations, one per app.
///
/// Numbers continue after the highest number in `history`. When `name` is not
/// given a name is suggested from the operations.
pub fn make_migrations(
    history: &[Migration],
    declarations: &mut [TableDeclaration],
    name: Option<&str>,
) -> Result<Vec<Migration>> {
    let from_state = ProjectState::from_migrations(history)?;
    let changes = Autodetector::new(&from_state).changes(declarations)?;

    let mut number = history
        .iter()
        .filter_map(|m| migration_number(&m.name))
        .max()
        .unwrap_or(0);

    let mut migrations = Vec::with_capacity(changes.len());
    for (app, operations) in changes {
        number += 1;
        let initial = !history.iter().any(|m| m.app == app);
        let mut migration = Migration::new(&app, "", operations).with_initial(initial);
        let suffix = match name {
            Some(name) => name.to_string(),
            None => migration.suggest_name(),
        };
        migration.name = format!("{:04}_{}", number, suffix);
        info!(
            "Created migration {} with {} operation(s)",
            migration.name,
            migration.operations.len()
        );
        migrations.push(migration);
    }
    Ok(migrations)
}
