//! Declared and compiled row-level security policies

use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::expr::{Operand, Predicate};
use crate::model::{ModelCatalog, TableModel};

/// A compiled policy, as stored in schema state and migration files.
///
/// Equality is structural over all three fields; predicates are compared as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub using: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

impl Policy {
    pub fn new(name: &str, using: &str, check: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            using: using.to_string(),
            check: check.map(str::to_string),
        }
    }
}

/// Predicate computed on demand, the first time its policy is compiled
#[derive(Clone)]
pub struct Deferred(Arc<dyn Fn() -> Predicate + Send + Sync>);

impl Deferred {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Predicate + Send + Sync + 'static,
    {
        Deferred(Arc::new(f))
    }

    pub fn evaluate(&self) -> Predicate {
        (self.0)()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred(..)")
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Source of a `USING` or `WITH CHECK` predicate
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyExpr {
    /// Literal SQL, used verbatim
    Sql(String),
    /// Structured predicate resolved against the table model
    Structured(Predicate),
    /// Predicate built lazily by a callable
    Deferred(Deferred),
}

impl PolicyExpr {
    pub fn sql(sql: &str) -> Self {
        PolicyExpr::Sql(sql.to_string())
    }

    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn() -> Predicate + Send + Sync + 'static,
    {
        PolicyExpr::Deferred(Deferred::new(f))
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, PolicyExpr::Sql(_))
    }

    /// Compile to SQL text, replacing `self` with the compiled [`PolicyExpr::Sql`].
    ///
    /// Calling this again returns the memoized text.
    pub fn compile(
        &mut self,
        model: &TableModel,
        catalog: &ModelCatalog,
    ) -> Result<String, CompileError> {
        let sql = match self {
            PolicyExpr::Sql(sql) => return Ok(sql.clone()),
            PolicyExpr::Structured(predicate) => {
                Compiler::new(catalog).compile_predicate(model, predicate)?
            }
            PolicyExpr::Deferred(deferred) => {
                let predicate = deferred.evaluate();
                Compiler::new(catalog).compile_predicate(model, &predicate)?
            }
        };
        *self = PolicyExpr::Sql(sql.clone());
        Ok(sql)
    }
}

impl From<&str> for PolicyExpr {
    fn from(sql: &str) -> Self {
        PolicyExpr::sql(sql)
    }
}

impl From<String> for PolicyExpr {
    fn from(sql: String) -> Self {
        PolicyExpr::Sql(sql)
    }
}

impl From<Predicate> for PolicyExpr {
    fn from(predicate: Predicate) -> Self {
        PolicyExpr::Structured(predicate)
    }
}

impl Serialize for PolicyExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PolicyExpr::Sql(sql) => serializer.serialize_str(sql),
            PolicyExpr::Structured(predicate) => predicate.serialize(serializer),
            PolicyExpr::Deferred(_) => Err(S::Error::custom(
                "deferred predicates must be compiled before serialization",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for PolicyExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Sql(String),
            Structured(Predicate),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Sql(sql) => PolicyExpr::Sql(sql),
            Repr::Structured(predicate) => PolicyExpr::Structured(predicate),
        })
    }
}

/// A policy as declared on a table, before compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub using: PolicyExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<PolicyExpr>,
}

impl DeclaredPolicy {
    pub fn new<E: Into<PolicyExpr>>(using: E) -> Self {
        Self {
            name: None,
            using: using.into(),
            check: None,
        }
    }

    pub fn named<E: Into<PolicyExpr>>(name: &str, using: E) -> Self {
        Self {
            name: Some(name.to_string()),
            using: using.into(),
            check: None,
        }
    }

    /// Policy named `is_superuser` letting through every row when the current
    /// application user has `flag_column` set in `user_table`.
    ///
    /// The user is looked up by its `id` column. `user_table` must be in the catalog
    /// the policy is compiled against.
    pub fn is_superuser(user_table: &str, flag_column: &str) -> Self {
        let user_table = user_table.to_string();
        let flag_column = flag_column.to_string();
        Self::named(
            "is_superuser",
            PolicyExpr::deferred(move || {
                Predicate::row_exists(
                    &user_table,
                    Some(
                        Predicate::eq("id", Operand::app_user())
                            .and(Predicate::eq(&flag_column, true)),
                    ),
                )
            }),
        )
    }

    pub fn with_check<E: Into<PolicyExpr>>(mut self, check: E) -> Self {
        self.check = Some(check.into());
        self
    }

    /// Compile both predicates in place and return the resulting policy.
    ///
    /// The name defaults to `<table>_policy`. A check that compiles to an empty
    /// string is dropped.
    pub fn compile(
        &mut self,
        model: &TableModel,
        catalog: &ModelCatalog,
    ) -> Result<Policy, CompileError> {
        let name = self
            .name
            .get_or_insert_with(|| format!("{}_policy", model.table))
            .clone();
        let using = self.using.compile(model, catalog)?;
        let check = match self.check.as_mut() {
            Some(check) => Some(check.compile(model, catalog)?),
            None => None,
        };

        Ok(Policy {
            name,
            using,
            check: check.filter(|c| !c.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Operand;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn model() -> TableModel {
        TableModel::new("documents").with_columns(&["id", "owner_id"])
    }

    #[test]
    fn test_default_name_and_passthrough() {
        let catalog = ModelCatalog::new();
        let mut declared = DeclaredPolicy::new("user_id = current_user_id()");
        let policy = declared.compile(&model(), &catalog).unwrap();

        assert_eq!(
            policy,
            Policy::new("documents_policy", "user_id = current_user_id()", None)
        );
        assert_eq!(declared.name.as_deref(), Some("documents_policy"));
    }

    #[test]
    fn test_compile_is_memoized() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let catalog = ModelCatalog::new();
        let mut declared = DeclaredPolicy::named(
            "owner_only",
            PolicyExpr::deferred(|| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Predicate::eq("owner_id", Operand::app_user())
            }),
        );

        let first = declared.compile(&model(), &catalog).unwrap();
        assert!(declared.using.is_compiled());
        let second = declared.compile(&model(), &catalog).unwrap();

        assert_eq!(first, second);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_check_is_dropped() {
        let catalog = ModelCatalog::new();
        let mut declared = DeclaredPolicy::named("p", "true").with_check("");
        assert_eq!(declared.compile(&model(), &catalog).unwrap().check, None);
    }

    #[test]
    fn test_structured_compile_error() {
        let catalog = ModelCatalog::new();
        let mut declared = DeclaredPolicy::named("p", Predicate::eq("missing", 1));
        assert!(declared.compile(&model(), &catalog).is_err());
        assert!(!declared.using.is_compiled());
    }

    #[test]
    fn test_deserialize_string_or_predicate() {
        let declared: DeclaredPolicy = serde_json::from_value(json!({
            "name": "owner_only",
            "using": {"kind": "compare", "field": "owner_id", "cmp": "eq",
                      "value": {"setting": {"name": "app.user", "cast": "int"}}},
            "check": "owner_id IS NOT NULL"
        }))
        .unwrap();

        assert!(matches!(declared.using, PolicyExpr::Structured(_)));
        assert_eq!(declared.check, Some(PolicyExpr::sql("owner_id IS NOT NULL")));
    }

    #[test]
    fn test_deferred_cannot_serialize() {
        let expr = PolicyExpr::deferred(|| Predicate::sql("true"));
        assert!(serde_json::to_string(&expr).is_err());
    }
}
