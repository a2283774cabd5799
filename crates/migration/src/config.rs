//! Options shared by the migration tooling and the session helpers

use supabase_rls_policy::Operand;

/// Configuration for RLS migrations and the per-request user setting
#[derive(Debug, Clone)]
pub struct RlsOptions {
    /// Setting that holds the current user's id (`app.user`)
    pub current_user_setting: String,
    /// Type the current user setting is cast to in policy predicates
    pub current_user_cast: String,
    /// Table recording applied migrations
    pub history_table: String,
    /// Directory holding migration files
    pub migrations_dir: String,
}

impl Default for RlsOptions {
    fn default() -> Self {
        Self {
            current_user_setting: "app.user".to_string(),
            current_user_cast: "int".to_string(),
            history_table: "rls_migrations".to_string(),
            migrations_dir: "migrations".to_string(),
        }
    }
}

impl RlsOptions {
    /// Create new options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name of the current user setting
    pub fn with_current_user_setting(mut self, setting: &str) -> Self {
        self.current_user_setting = setting.to_string();
        self
    }

    /// Set the cast applied to the current user setting
    pub fn with_current_user_cast(mut self, cast: &str) -> Self {
        self.current_user_cast = cast.to_string();
        self
    }

    /// Set the migration history table
    pub fn with_history_table(mut self, table: &str) -> Self {
        self.history_table = table.to_string();
        self
    }

    /// Set the migrations directory
    pub fn with_migrations_dir(mut self, dir: &str) -> Self {
        self.migrations_dir = dir.to_string();
        self
    }

    /// Predicate operand reading the current user, e.g. for `owner_id = <user>` policies
    pub fn current_user_operand(&self) -> Operand {
        Operand::setting(&self.current_user_setting, Some(&self.current_user_cast))
    }
}
