//! Table metadata that structured predicates are resolved against

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column data type
    #[serde(default)]
    pub data_type: Option<String>,
}

impl Column {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: None,
        }
    }

    pub fn typed(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: Some(data_type.to_string()),
        }
    }
}

/// Foreign-key relation from one table to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Relation name used in predicates (e.g. `owner`)
    pub name: String,
    /// Local column holding the key (e.g. `owner_id`)
    pub column: String,
    /// Referenced table
    pub target_table: String,
    /// Referenced column
    #[serde(default = "default_target_column")]
    pub target_column: String,
}

fn default_target_column() -> String {
    "id".to_string()
}

impl Relation {
    pub fn new(name: &str, column: &str, target_table: &str) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            target_table: target_table.to_string(),
            target_column: default_target_column(),
        }
    }

    pub fn with_target_column(mut self, column: &str) -> Self {
        self.target_column = column.to_string();
        self
    }
}

/// Columns and relations of one table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableModel {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl TableModel {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_columns(mut self, names: &[&str]) -> Self {
        self.columns.extend(names.iter().map(|name| Column::new(name)));
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Resolve a predicate field to a column name.
    ///
    /// A field is either a column, or a relation name standing for its key column.
    pub fn resolve_field(&self, field: &str) -> Option<&str> {
        if let Some(column) = self.column(field) {
            return Some(&column.name);
        }
        self.relation(field).map(|r| r.column.as_str())
    }
}

/// Lookup of table models by table name
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: BTreeMap<String, TableModel>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: TableModel) {
        self.models.insert(model.table.clone(), model);
    }

    pub fn get(&self, table: &str) -> Option<&TableModel> {
        self.models.get(table)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<TableModel> for ModelCatalog {
    fn from_iter<I: IntoIterator<Item = TableModel>>(iter: I) -> Self {
        let mut catalog = ModelCatalog::new();
        for model in iter {
            catalog.insert(model);
        }
        catalog
    }
}
