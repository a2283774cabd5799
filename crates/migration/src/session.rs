//! Transaction-local settings read by RLS policies
//!
//! Policies read the current user through `current_setting('app.user', true)`.
//! The setting is set per transaction with [`set_config`], typically once per
//! request through [`set_current_user`] or [`with_current_user`].

use async_trait::async_trait;
use log::debug;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait,
};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::config::RlsOptions;
use crate::error::{Result, RlsError};

/// Something settings can be read from and written to
#[async_trait]
pub trait SessionScope: Send + Sync {
    /// Whether a transaction is open, so `set_config(.., true)` outlives the statement
    fn in_transaction(&self) -> bool;

    /// Current value of a setting, `None` when it was never set
    async fn current_setting(&self, name: &str) -> Result<Option<String>>;

    /// Set a setting for the rest of the transaction
    async fn set_local(&self, name: &str, value: &str) -> Result<()>;
}

async fn query_setting<C: ConnectionTrait>(conn: &C, name: &str) -> Result<Option<String>> {
    let row = conn
        .query_one(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT current_setting($1, true)",
            [name.into()],
        ))
        .await?;
    match row {
        Some(row) => Ok(row.try_get_by_index::<Option<String>>(0)?),
        None => Ok(None),
    }
}

async fn set_local_config<C: ConnectionTrait>(conn: &C, name: &str, value: &str) -> Result<()> {
    debug!("set_config({}, '{}', true)", name, value);
    conn.query_one(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT set_config($1, $2, true)",
        [name.into(), value.into()],
    ))
    .await?;
    Ok(())
}

#[async_trait]
impl SessionScope for DatabaseTransaction {
    fn in_transaction(&self) -> bool {
        true
    }

    async fn current_setting(&self, name: &str) -> Result<Option<String>> {
        query_setting(self, name).await
    }

    async fn set_local(&self, name: &str, value: &str) -> Result<()> {
        set_local_config(self, name, value).await
    }
}

#[async_trait]
impl SessionScope for DatabaseConnection {
    fn in_transaction(&self) -> bool {
        false
    }

    async fn current_setting(&self, name: &str) -> Result<Option<String>> {
        query_setting(self, name).await
    }

    async fn set_local(&self, name: &str, value: &str) -> Result<()> {
        set_local_config(self, name, value).await
    }
}

/// In-memory settings, for code that is exercised without a database
#[derive(Debug, Default)]
pub struct LocalSettings {
    in_transaction: bool,
    values: Mutex<HashMap<String, String>>,
}

impl LocalSettings {
    /// Settings behaving like an open transaction
    pub fn transaction() -> Self {
        Self {
            in_transaction: true,
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Settings behaving like a connection outside any transaction
    pub fn autocommit() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        match self.values.lock() {
            Ok(values) => values.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }
}

#[async_trait]
impl SessionScope for LocalSettings {
    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn current_setting(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name))
    }

    async fn set_local(&self, name: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| RlsError::invalid_state("settings lock poisoned"))?
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Set a transaction-local setting.
///
/// `None` or an empty value clears the setting. Setting the value it already has is
/// a no-op, and an unset or empty setting is set. Replacing a different non-empty
/// value fails with [`RlsError::ConfigConflict`], as does calling this outside a
/// transaction with [`RlsError::PreconditionViolation`].
pub async fn set_config<S, V>(scope: &S, name: &str, value: Option<V>) -> Result<()>
where
    S: SessionScope + ?Sized,
    V: Display,
{
    if !scope.in_transaction() {
        return Err(RlsError::PreconditionViolation(format!(
            "set_config('{}') must be called within a transaction",
            name
        )));
    }

    let value = match value.map(|v| v.to_string()) {
        Some(value) if !value.is_empty() => value,
        _ => return scope.set_local(name, "").await,
    };

    match scope.current_setting(name).await? {
        Some(current) if current == value => Ok(()),
        Some(current) if !current.is_empty() => Err(RlsError::ConfigConflict {
            name: name.to_string(),
            current,
            requested: value,
        }),
        _ => scope.set_local(name, &value).await,
    }
}

/// Clear a transaction-local setting
pub async fn clear_config<S: SessionScope + ?Sized>(scope: &S, name: &str) -> Result<()> {
    set_config::<S, String>(scope, name, None).await
}

/// Set the current user read by policies, or clear it for anonymous requests
pub async fn set_current_user<S, V>(scope: &S, options: &RlsOptions, user: Option<V>) -> Result<()>
where
    S: SessionScope + ?Sized,
    V: Display,
{
    set_config(scope, &options.current_user_setting, user).await
}

/// Run `f` in a transaction where the current user is set, committing on success.
///
/// ```no_run
/// # use sea_orm::{ConnectionTrait, DatabaseConnection};
/// # use supabase_rls_migration::{session::with_current_user, RlsOptions};
/// # async fn example(conn: &DatabaseConnection) -> supabase_rls_migration::Result<()> {
/// let _count = with_current_user(conn, &RlsOptions::default(), Some(5), |txn| {
///     Box::pin(async move {
///         txn.execute_unprepared("SELECT * FROM documents").await?;
///         Ok(1)
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_current_user<V, F, T>(
    conn: &DatabaseConnection,
    options: &RlsOptions,
    user: Option<V>,
    f: F,
) -> Result<T>
where
    V: Display + Send,
    F: for<'c> FnOnce(
        &'c DatabaseTransaction,
    ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>
        + Send,
    T: Send,
{
    let txn = conn.begin().await?;
    set_current_user(&txn, options, user).await?;
    let output = f(&txn).await?;
    txn.commit().await?;
    Ok(output)
}
