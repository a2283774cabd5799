#![cfg(feature = "integration-tests")]

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use sea_orm::sea_query::{Alias, DynIden, IntoIden};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement, TransactionTrait,
};
use std::env;
use supabase_rls_migration::{
    diff, migration_steps, set_config, Executor, Migration, MigrationTrait, MigratorTrait,
    RlsError, RlsOptions, Target, TableDeclaration,
};
use supabase_rls_policy::{DeclaredPolicy, Operand, Predicate};

// Lazily load environment variables once
static DATABASE_URL: Lazy<String> = Lazy::new(|| {
    dotenv().ok(); // Load .env file if present
    env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
});

async fn connect() -> DatabaseConnection {
    Database::connect(DATABASE_URL.as_str())
        .await
        .expect("failed to connect to DATABASE_URL")
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, chrono::Utc::now().timestamp_micros())
}

/// `(rls_enabled, rls_forced)` from pg_class
async fn rls_flags(conn: &DatabaseConnection, table: &str) -> (bool, bool) {
    let row = conn
        .query_one(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT relrowsecurity, relforcerowsecurity FROM pg_class WHERE relname = $1",
            [table.into()],
        ))
        .await
        .unwrap()
        .unwrap();
    (
        row.try_get_by_index(0).unwrap(),
        row.try_get_by_index(1).unwrap(),
    )
}

/// Policy names on a table, sorted
async fn policy_names(conn: &DatabaseConnection, table: &str) -> Vec<String> {
    conn.query_all(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT policyname::text FROM pg_policies WHERE tablename = $1 ORDER BY policyname",
        [table.into()],
    ))
    .await
    .unwrap()
    .into_iter()
    .map(|row| row.try_get_by_index::<String>(0).unwrap())
    .collect()
}

#[tokio::test]
async fn test_migrate_and_rollback_against_postgres() {
    let conn = connect().await;
    let table = unique("rls_it_documents");
    let options = RlsOptions::default().with_history_table(&unique("rls_it_history"));

    conn.execute_unprepared(&format!(
        "CREATE TABLE \"{}\" (id SERIAL PRIMARY KEY, owner_id INT)",
        table
    ))
    .await
    .unwrap();

    let declare = |policies: Vec<DeclaredPolicy>| {
        let mut declaration = TableDeclaration::new("it", &table)
            .with_columns(&["id", "owner_id"])
            .with_rls(true);
        declaration.policies = policies;
        vec![declaration]
    };

    let mut history: Vec<Migration> = Vec::new();
    let mut first = declare(vec![DeclaredPolicy::named(
        "owner_only",
        Predicate::eq("owner_id", Operand::app_user()),
    )
    .with_check("owner_id IS NOT NULL")]);
    history.extend(diff::make_migrations(&history, &mut first, None).unwrap());

    let mut second = declare(vec![DeclaredPolicy::named("everyone", "true")]);
    history.extend(diff::make_migrations(&history, &mut second, None).unwrap());

    let executor = Executor::new(&conn, &options);
    executor.migrate(&history, &Target::Latest).await.unwrap();
    assert_eq!(rls_flags(&conn, &table).await, (true, true));
    assert_eq!(policy_names(&conn, &table).await, vec!["everyone"]);

    executor.rollback(&history, 1).await.unwrap();
    assert_eq!(policy_names(&conn, &table).await, vec!["owner_only"]);

    executor.migrate(&history, &Target::Zero).await.unwrap();
    assert_eq!(rls_flags(&conn, &table).await, (false, false));
    assert!(policy_names(&conn, &table).await.is_empty());

    let status = executor.show(&history).await.unwrap();
    assert!(status.iter().all(|s| !s.applied));

    conn.execute_unprepared(&format!("DROP TABLE \"{}\"", table))
        .await
        .unwrap();
    conn.execute_unprepared(&format!("DROP TABLE \"{}\"", options.history_table))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_migration_is_rolled_back() {
    let conn = connect().await;
    let table = unique("rls_it_broken");
    let options = RlsOptions::default().with_history_table(&unique("rls_it_history"));

    conn.execute_unprepared(&format!("CREATE TABLE \"{}\" (id INT)", table))
        .await
        .unwrap();

    let mut declarations = vec![TableDeclaration::new("it", &table)
        .with_rls(true)
        .with_policy(DeclaredPolicy::named("broken", "no_such_column = 1"))];
    let migrations = diff::make_migrations(&[], &mut declarations, None).unwrap();

    let executor = Executor::new(&conn, &options);
    let result = executor.migrate(&migrations, &Target::Latest).await;
    assert!(matches!(result, Err(RlsError::SqlExecution(_))));

    // the ENABLE statement ran in the same transaction and was rolled back
    assert_eq!(rls_flags(&conn, &table).await, (false, false));
    assert!(executor.recorder().applied(&conn).await.unwrap().is_empty());

    conn.execute_unprepared(&format!("DROP TABLE \"{}\"", table))
        .await
        .unwrap();
    conn.execute_unprepared(&format!("DROP TABLE \"{}\"", options.history_table))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_set_config_in_transaction() {
    let conn = connect().await;

    let err = set_config(&conn, "app.user", Some(5)).await.unwrap_err();
    assert!(matches!(err, RlsError::PreconditionViolation(_)));

    let txn = conn.begin().await.unwrap();
    set_config(&txn, "app.user", Some(5)).await.unwrap();
    set_config(&txn, "app.user", Some(5)).await.unwrap();
    let err = set_config(&txn, "app.user", Some(6)).await.unwrap_err();
    assert!(matches!(err, RlsError::ConfigConflict { .. }));
    txn.rollback().await.unwrap();
}

static STEP_TABLE: Lazy<String> = Lazy::new(|| unique("rls_it_steps"));

fn step_migrations() -> Vec<Migration> {
    let declare = |forced: bool, policy: DeclaredPolicy| {
        vec![TableDeclaration::new("it", STEP_TABLE.as_str())
            .with_columns(&["id", "owner_id"])
            .with_rls(true)
            .with_forced_rls(forced)
            .with_policy(policy)]
    };

    let mut history: Vec<Migration> = Vec::new();
    let mut first = declare(
        true,
        DeclaredPolicy::named("owner_only", Predicate::eq("owner_id", Operand::app_user())),
    );
    history.extend(diff::make_migrations(&history, &mut first, None).unwrap());
    let mut second = declare(false, DeclaredPolicy::named("everyone", "true"));
    history.extend(diff::make_migrations(&history, &mut second, None).unwrap());
    history
}

/// Runs the RLS migrations through sea-orm-migration's own migrator
struct StepMigrator;

#[async_trait::async_trait]
impl MigratorTrait for StepMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        migration_steps(&step_migrations()).unwrap()
    }

    fn migration_table_name() -> DynIden {
        Alias::new(format!("{}_seaql", STEP_TABLE.as_str())).into_iden()
    }
}

#[tokio::test]
async fn test_sea_orm_migrator_runs_steps_up_and_down() {
    let conn = connect().await;
    let table = STEP_TABLE.as_str();

    conn.execute_unprepared(&format!(
        "CREATE TABLE \"{}\" (id SERIAL PRIMARY KEY, owner_id INT)",
        table
    ))
    .await
    .unwrap();

    StepMigrator::up(&conn, None).await.unwrap();
    assert_eq!(rls_flags(&conn, table).await, (true, false));
    assert_eq!(policy_names(&conn, table).await, vec!["everyone"]);

    StepMigrator::down(&conn, Some(1)).await.unwrap();
    assert_eq!(rls_flags(&conn, table).await, (true, true));
    assert_eq!(policy_names(&conn, table).await, vec!["owner_only"]);

    StepMigrator::down(&conn, None).await.unwrap();
    assert_eq!(rls_flags(&conn, table).await, (false, false));
    assert!(policy_names(&conn, table).await.is_empty());

    conn.execute_unprepared(&format!("DROP TABLE \"{}\"", table))
        .await
        .unwrap();
    conn.execute_unprepared(&format!("DROP TABLE \"{}_seaql\"", table))
        .await
        .unwrap();
}
