//! Provisioning of an unprivileged role that row-level security applies to
//!
//! Superusers and roles with `BYPASSRLS` are never subject to policies, so the
//! application should connect with a role created here. The role can also run
//! migrations since it is granted `CREATE` on the public schema.

use log::info;
use sea_orm::{DatabaseConnection, TransactionTrait};

use supabase_rls_policy::quote_name;

use crate::editor::SchemaEditor;
use crate::error::Result;

/// Statements creating `role` with the privileges the application needs
pub fn create_role_sql(role: &str, database: &str, setting: &str) -> Vec<String> {
    let role = quote_name(role);
    let database = quote_name(database);
    let setting = quote_name(setting);

    vec![
        format!("CREATE ROLE {} WITH LOGIN NOBYPASSRLS;", role),
        format!("GRANT USAGE ON SCHEMA public TO {};", role),
        // needed when the role runs migrations
        format!("GRANT CREATE ON SCHEMA public TO {};", role),
        // needed for CREATE EXTENSION
        format!("GRANT CREATE ON DATABASE {} TO {};", database, role),
        format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO {};",
            role
        ),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {};",
            role
        ),
        format!("GRANT SELECT, USAGE ON ALL SEQUENCES IN SCHEMA public TO {};", role),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT USAGE, SELECT ON SEQUENCES TO {};",
            role
        ),
        format!("GRANT EXECUTE ON ALL FUNCTIONS IN SCHEMA public TO {};", role),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT EXECUTE ON FUNCTIONS TO {};",
            role
        ),
        format!("GRANT SET ON PARAMETER {} TO {};", setting, role),
    ]
}

/// Statements dropping `role` and everything it owns
pub fn drop_role_sql(role: &str) -> Vec<String> {
    let role = quote_name(role);
    vec![
        format!("DROP OWNED BY {};", role),
        format!("DROP ROLE {};", role),
    ]
}

/// Create or remove a role in a single transaction
pub async fn provision_role(
    conn: &DatabaseConnection,
    role: &str,
    database: &str,
    setting: &str,
    remove: bool,
) -> Result<()> {
    let statements = if remove {
        drop_role_sql(role)
    } else {
        create_role_sql(role, database, setting)
    };

    let txn = conn.begin().await?;
    for statement in &statements {
        SchemaEditor::execute(&txn, statement).await?;
    }
    txn.commit().await?;

    info!("Role \"{}\" {}", role, if remove { "removed" } else { "created" });
    Ok(())
}
