//! Structured policy predicates
//!
//! A [`Predicate`] is a small boolean expression tree over the columns and relations
//! of a table. It is resolved against a [`TableModel`](crate::model::TableModel) and
//! rendered to SQL by the [`Compiler`](crate::compiler::Compiler).
//!
//! ```
//! use supabase_rls_policy::{Operand, Predicate};
//!
//! let predicate = Predicate::eq("owner_id", Operand::app_user())
//!     .and(Predicate::eq("archived", false));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::Comparison;

/// Setting holding the authenticated user's identifier
pub const DEFAULT_USER_SETTING: &str = "app.user";

/// Type the user setting is cast to
pub const DEFAULT_USER_CAST: &str = "int";

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Another column (or relation key) of the same table
    Column(String),
    /// A literal value, inlined into the SQL
    Value(Value),
    /// A transaction-local setting, read with `current_setting(name, true)`
    Setting {
        name: String,
        #[serde(default)]
        cast: Option<String>,
    },
}

impl Operand {
    pub fn column(name: &str) -> Self {
        Operand::Column(name.to_string())
    }

    pub fn value<V: Into<Value>>(value: V) -> Self {
        Operand::Value(value.into())
    }

    pub fn setting(name: &str, cast: Option<&str>) -> Self {
        Operand::Setting {
            name: name.to_string(),
            cast: cast.map(str::to_string),
        }
    }

    /// The current application user, `nullif(current_setting('app.user', true), '')::int`
    pub fn app_user() -> Self {
        Operand::setting(DEFAULT_USER_SETTING, Some(DEFAULT_USER_CAST))
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Value(Value::Bool(value))
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Value(Value::from(value))
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Value(Value::from(value))
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Value(Value::from(value))
    }
}

/// Boolean expression over a table's columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// `field <cmp> value`
    Compare {
        field: String,
        cmp: Comparison,
        value: Operand,
    },
    /// `field IS [NOT] NULL`
    IsNull {
        field: String,
        #[serde(default)]
        negated: bool,
    },
    /// `field IN (values...)`
    In { field: String, values: Vec<Value> },
    /// Every child holds
    And { all: Vec<Predicate> },
    /// At least one child holds
    Or { any: Vec<Predicate> },
    /// Negation
    Not { predicate: Box<Predicate> },
    /// A related row exists, optionally matching a filter on the related table
    Exists {
        relation: String,
        #[serde(default)]
        filter: Option<Box<Predicate>>,
    },
    /// Some row of another table matches the filter, unrelated to the current row
    RowExists {
        table: String,
        #[serde(default)]
        filter: Option<Box<Predicate>>,
    },
    /// Raw SQL fragment, used verbatim
    Sql { sql: String },
}

impl Predicate {
    pub fn compare<O: Into<Operand>>(field: &str, cmp: Comparison, value: O) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            cmp,
            value: value.into(),
        }
    }

    pub fn eq<O: Into<Operand>>(field: &str, value: O) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn neq<O: Into<Operand>>(field: &str, value: O) -> Self {
        Self::compare(field, Comparison::Neq, value)
    }

    pub fn is_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_string(),
            negated: false,
        }
    }

    pub fn is_not_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_string(),
            negated: true,
        }
    }

    pub fn in_list<V: Into<Value>>(field: &str, values: Vec<V>) -> Self {
        Predicate::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(relation: &str, filter: Option<Predicate>) -> Self {
        Predicate::Exists {
            relation: relation.to_string(),
            filter: filter.map(Box::new),
        }
    }

    pub fn row_exists(table: &str, filter: Option<Predicate>) -> Self {
        Predicate::RowExists {
            table: table.to_string(),
            filter: filter.map(Box::new),
        }
    }

    pub fn sql(sql: &str) -> Self {
        Predicate::Sql {
            sql: sql.to_string(),
        }
    }

    /// Combine with another predicate using `AND`, flattening nested conjunctions
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And { mut all } => {
                all.push(other);
                Predicate::And { all }
            }
            first => Predicate::And {
                all: vec![first, other],
            },
        }
    }

    /// Combine with another predicate using `OR`, flattening nested disjunctions
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or { mut any } => {
                any.push(other);
                Predicate::Or { any }
            }
            first => Predicate::Or {
                any: vec![first, other],
            },
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not {
            predicate: Box::new(self),
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}
