//! Declared RLS configuration of tables
//!
//! Declarations are the desired state that `makemigrations` diffs the migration
//! history against. They are usually loaded from a JSON file:
//!
//! ```json
//! [
//!   {
//!     "app": "docs",
//!     "table": "documents",
//!     "columns": [{"name": "id"}, {"name": "owner_id"}],
//!     "rls_enabled": true,
//!     "policies": [
//!       {"name": "owner_only", "using": "owner_id = nullif(current_setting('app.user', true), '')::int"}
//!     ]
//!   }
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use supabase_rls_policy::{Column, DeclaredPolicy, Relation, TableModel};

use crate::error::Result;
use crate::state::TableKey;

/// RLS declaration for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDeclaration {
    /// App label grouping the table's migrations
    pub app: String,
    /// Table name
    pub table: String,
    /// Columns that structured predicates may reference
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Relations that structured predicates may follow
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Enable RLS
    #[serde(default)]
    pub rls_enabled: bool,
    /// Force RLS for the table owner, defaults to `rls_enabled`
    #[serde(default)]
    pub rls_forced: Option<bool>,
    /// RLS policies
    #[serde(default)]
    pub policies: Vec<DeclaredPolicy>,
}

impl TableDeclaration {
    pub fn new(app: &str, table: &str) -> Self {
        Self {
            app: app.to_string(),
            table: table.to_string(),
            columns: Vec::new(),
            relations: Vec::new(),
            rls_enabled: false,
            rls_forced: None,
            policies: Vec::new(),
        }
    }

    pub fn with_columns(mut self, names: &[&str]) -> Self {
        self.columns.extend(names.iter().map(|name| Column::new(name)));
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_rls(mut self, enabled: bool) -> Self {
        self.rls_enabled = enabled;
        self
    }

    pub fn with_forced_rls(mut self, forced: bool) -> Self {
        self.rls_forced = Some(forced);
        self
    }

    pub fn with_policy(mut self, policy: DeclaredPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn key(&self) -> TableKey {
        TableKey::new(&self.app, &self.table)
    }

    pub fn rls_forced(&self) -> bool {
        self.rls_forced.unwrap_or(self.rls_enabled)
    }

    /// Table metadata for resolving structured predicates
    pub fn model(&self) -> TableModel {
        TableModel {
            table: self.table.clone(),
            columns: self.columns.clone(),
            relations: self.relations.clone(),
        }
    }
}

/// Load table declarations from a JSON file
pub fn load_declarations<P: AsRef<Path>>(path: P) -> Result<Vec<TableDeclaration>> {
    let content = fs::read_to_string(path)?;
    parse_declarations(&content)
}

/// Parse table declarations from a JSON string
pub fn parse_declarations(json_str: &str) -> Result<Vec<TableDeclaration>> {
    Ok(serde_json::from_str(json_str)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use supabase_rls_policy::PolicyExpr;

    #[test]
    fn test_parse_declarations() {
        let declarations = parse_declarations(
            r#"[
                {
                    "app": "docs",
                    "table": "documents",
                    "columns": [{"name": "id"}, {"name": "owner_id", "data_type": "int"}],
                    "relations": [{"name": "owner", "column": "owner_id", "target_table": "users"}],
                    "rls_enabled": true,
                    "policies": [
                        {"name": "owner_only", "using": {"kind": "compare", "field": "owner", "cmp": "eq",
                                                         "value": {"setting": {"name": "app.user", "cast": "int"}}}},
                        {"using": "true", "check": "false"}
                    ]
                },
                {"app": "docs", "table": "audit_log"}
            ]"#,
        )
        .unwrap();

        assert_eq!(declarations.len(), 2);
        let documents = &declarations[0];
        assert!(documents.rls_forced());
        assert_eq!(documents.model().resolve_field("owner"), Some("owner_id"));
        assert_eq!(documents.policies[1].check, Some(PolicyExpr::sql("false")));

        let audit = &declarations[1];
        assert!(!audit.rls_enabled);
        assert!(!audit.rls_forced());
        assert!(audit.policies.is_empty());
    }

    #[test]
    fn test_forced_overrides_enabled() {
        let declaration = TableDeclaration::new("docs", "documents")
            .with_rls(true)
            .with_forced_rls(false);
        assert!(!declaration.rls_forced());
    }
}
