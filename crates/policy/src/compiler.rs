//! Rendering of structured predicates into SQL boolean expressions

use log::debug;

use crate::error::CompileError;
use crate::expr::{Operand, Predicate};
use crate::filter::Comparison;
use crate::model::{ModelCatalog, TableModel};
use crate::policy::{DeclaredPolicy, Policy};
use crate::quote::{quote_literal, quote_name, quote_string};

/// Compiles predicates against a catalog of table models.
///
/// The catalog is only consulted when an `exists` predicate follows a relation
/// to another table.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'a> {
    catalog: &'a ModelCatalog,
}

impl<'a> Compiler<'a> {
    pub fn new(catalog: &'a ModelCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &'a ModelCatalog {
        self.catalog
    }

    /// Render a predicate as SQL, with columns qualified by the model's table name
    pub fn compile_predicate(
        &self,
        model: &TableModel,
        predicate: &Predicate,
    ) -> Result<String, CompileError> {
        let qualifier = quote_name(&model.table);
        self.render(model, &qualifier, predicate, 0)
    }

    /// Compile one declared policy in place and return the resulting [`Policy`]
    pub fn compile_policy(
        &self,
        declared: &mut DeclaredPolicy,
        model: &TableModel,
    ) -> Result<Policy, CompileError> {
        declared.compile(model, self.catalog)
    }

    /// Compile every declared policy of a table.
    ///
    /// Fails on the first policy whose name (explicit or defaulted) is already taken.
    pub fn compile_policies(
        &self,
        declared: &mut [DeclaredPolicy],
        model: &TableModel,
    ) -> Result<Vec<Policy>, CompileError> {
        let mut policies: Vec<Policy> = Vec::with_capacity(declared.len());
        for policy in declared.iter_mut() {
            let compiled = self.compile_policy(policy, model)?;
            if policies.iter().any(|p| p.name == compiled.name) {
                return Err(CompileError::DuplicatePolicy {
                    table: model.table.clone(),
                    name: compiled.name,
                });
            }
            policies.push(compiled);
        }
        debug!(
            "Compiled {} policies for table {}",
            policies.len(),
            model.table
        );
        Ok(policies)
    }

    fn render(
        &self,
        model: &TableModel,
        qualifier: &str,
        predicate: &Predicate,
        depth: usize,
    ) -> Result<String, CompileError> {
        match predicate {
            Predicate::Compare { field, cmp, value } => {
                let lhs = column_ref(model, qualifier, field)?;
                self.render_compare(model, qualifier, &lhs, *cmp, value)
            }
            Predicate::IsNull { field, negated } => {
                let lhs = column_ref(model, qualifier, field)?;
                if *negated {
                    Ok(format!("{} IS NOT NULL", lhs))
                } else {
                    Ok(format!("{} IS NULL", lhs))
                }
            }
            Predicate::In { field, values } => {
                let lhs = column_ref(model, qualifier, field)?;
                if values.is_empty() {
                    return Err(CompileError::invalid_literal(format!(
                        "empty IN list for field '{}'",
                        field
                    )));
                }
                let items = values
                    .iter()
                    .map(quote_literal)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("{} IN ({})", lhs, items.join(", ")))
            }
            Predicate::And { all } => self.render_group(model, qualifier, all, "AND", depth),
            Predicate::Or { any } => self.render_group(model, qualifier, any, "OR", depth),
            Predicate::Not { predicate } => Ok(format!(
                "NOT ({})",
                self.render(model, qualifier, predicate, depth)?
            )),
            Predicate::Exists { relation, filter } => {
                let rel = model
                    .relation(relation)
                    .ok_or_else(|| CompileError::UnknownRelation {
                        table: model.table.clone(),
                        relation: relation.clone(),
                    })?;
                let target = self
                    .catalog
                    .get(&rel.target_table)
                    .ok_or_else(|| CompileError::UnknownTable(rel.target_table.clone()))?;
                let alias = format!("U{}", depth);

                let mut sql = format!(
                    "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {}.{}",
                    quote_name(&target.table),
                    alias,
                    alias,
                    quote_name(&rel.target_column),
                    qualifier,
                    quote_name(&rel.column),
                );
                if let Some(filter) = filter {
                    sql.push_str(" AND ");
                    sql.push_str(&self.render(target, &alias, filter, depth + 1)?);
                }
                sql.push(')');
                Ok(sql)
            }
            Predicate::RowExists { table, filter } => {
                let target = self
                    .catalog
                    .get(table)
                    .ok_or_else(|| CompileError::UnknownTable(table.clone()))?;
                let alias = format!("U{}", depth);

                let condition = match filter {
                    Some(filter) => self.render(target, &alias, filter, depth + 1)?,
                    None => "true".to_string(),
                };
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} {} WHERE {})",
                    quote_name(&target.table),
                    alias,
                    condition
                ))
            }
            Predicate::Sql { sql } => Ok(format!("({})", sql)),
        }
    }

    fn render_group(
        &self,
        model: &TableModel,
        qualifier: &str,
        children: &[Predicate],
        joiner: &str,
        depth: usize,
    ) -> Result<String, CompileError> {
        match children {
            [] if joiner == "AND" => Ok("true".to_string()),
            [] => Ok("false".to_string()),
            [only] => self.render(model, qualifier, only, depth),
            _ => {
                let parts = children
                    .iter()
                    .map(|child| self.render(model, qualifier, child, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(&format!(" {} ", joiner))))
            }
        }
    }

    fn render_compare(
        &self,
        model: &TableModel,
        qualifier: &str,
        lhs: &str,
        cmp: Comparison,
        value: &Operand,
    ) -> Result<String, CompileError> {
        let rhs = match value {
            Operand::Value(serde_json::Value::Null) => {
                return match cmp {
                    Comparison::Eq => Ok(format!("{} IS NULL", lhs)),
                    Comparison::Neq => Ok(format!("{} IS NOT NULL", lhs)),
                    other => Err(CompileError::invalid_literal(format!(
                        "NULL cannot be compared with '{}'",
                        other.as_str()
                    ))),
                };
            }
            Operand::Value(v) => quote_literal(v)?,
            Operand::Column(column) => column_ref(model, qualifier, column)?,
            Operand::Setting { name, cast } => setting_ref(name, cast.as_deref())?,
        };
        Ok(format!("{} {} {}", lhs, cmp.as_sql(), rhs))
    }
}

fn column_ref(model: &TableModel, qualifier: &str, field: &str) -> Result<String, CompileError> {
    let column = model
        .resolve_field(field)
        .ok_or_else(|| CompileError::unknown_field(&model.table, field))?;
    Ok(format!("{}.{}", qualifier, quote_name(column)))
}

fn setting_ref(name: &str, cast: Option<&str>) -> Result<String, CompileError> {
    let read = format!("nullif(current_setting({}, true), '')", quote_string(name)?);
    match cast {
        None => Ok(read),
        Some(cast) if is_valid_cast(cast) => Ok(format!("{}::{}", read, cast)),
        Some(cast) => Err(CompileError::InvalidCast(cast.to_string())),
    }
}

fn is_valid_cast(cast: &str) -> bool {
    !cast.trim().is_empty()
        && cast
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '[' | ']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relation;
    use serde_json::json;

    fn catalog() -> ModelCatalog {
        [
            TableModel::new("documents")
                .with_columns(&["id", "owner_id", "title", "archived", "team_id"])
                .with_relation(Relation::new("owner", "owner_id", "users"))
                .with_relation(Relation::new("team", "team_id", "teams")),
            TableModel::new("teams")
                .with_columns(&["id", "name"])
                .with_relation(Relation::new("members", "id", "memberships").with_target_column("team_id")),
            TableModel::new("memberships").with_columns(&["id", "team_id", "user_id"]),
        ]
        .into_iter()
        .collect()
    }

    fn compile(predicate: &Predicate) -> Result<String, CompileError> {
        let catalog = catalog();
        let compiler = Compiler::new(&catalog);
        let model = catalog.get("documents").unwrap();
        compiler.compile_predicate(model, predicate)
    }

    #[test]
    fn test_row_exists_is_uncorrelated() {
        let sql = compile(&Predicate::row_exists(
            "memberships",
            Some(Predicate::eq("user_id", Operand::app_user())),
        ))
        .unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"memberships\" U0 WHERE U0.\"user_id\" = nullif(current_setting('app.user', true), '')::int)"
        );

        assert_eq!(
            compile(&Predicate::row_exists("nowhere", None)).unwrap_err(),
            CompileError::UnknownTable("nowhere".to_string())
        );
    }

    #[test]
    fn test_compare_with_app_user() {
        let sql = compile(&Predicate::eq("owner", Operand::app_user())).unwrap();
        assert_eq!(
            sql,
            "\"documents\".\"owner_id\" = nullif(current_setting('app.user', true), '')::int"
        );
    }

    #[test]
    fn test_and_or_not() {
        let p = Predicate::eq("archived", false)
            .and(Predicate::eq("title", "it's").or(Predicate::is_null("title")));
        assert_eq!(
            compile(&p).unwrap(),
            "(\"documents\".\"archived\" = false AND (\"documents\".\"title\" = 'it''s' OR \"documents\".\"title\" IS NULL))"
        );

        let n = Predicate::eq("id", 1).negate();
        assert_eq!(compile(&n).unwrap(), "NOT (\"documents\".\"id\" = 1)");
    }

    #[test]
    fn test_empty_groups() {
        assert_eq!(compile(&Predicate::And { all: vec![] }).unwrap(), "true");
        assert_eq!(compile(&Predicate::Or { any: vec![] }).unwrap(), "false");
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(
            compile(&Predicate::eq("title", json!(null))).unwrap(),
            "\"documents\".\"title\" IS NULL"
        );
        assert_eq!(
            compile(&Predicate::neq("title", json!(null))).unwrap(),
            "\"documents\".\"title\" IS NOT NULL"
        );
        assert!(compile(&Predicate::compare("title", Comparison::Gt, json!(null))).is_err());
    }

    #[test]
    fn test_in_list() {
        assert_eq!(
            compile(&Predicate::in_list("id", vec![1, 2, 3])).unwrap(),
            "\"documents\".\"id\" IN (1, 2, 3)"
        );
        assert!(matches!(
            compile(&Predicate::in_list::<i32>("id", vec![])),
            Err(CompileError::InvalidLiteral(_))
        ));
    }

    #[test]
    fn test_exists_nested() {
        let p = Predicate::exists(
            "team",
            Some(Predicate::exists(
                "members",
                Some(Predicate::eq("user_id", Operand::app_user())),
            )),
        );
        assert_eq!(
            compile(&p).unwrap(),
            "EXISTS (SELECT 1 FROM \"teams\" U0 WHERE U0.\"id\" = \"documents\".\"team_id\" AND \
             EXISTS (SELECT 1 FROM \"memberships\" U1 WHERE U1.\"team_id\" = U0.\"id\" AND \
             U1.\"user_id\" = nullif(current_setting('app.user', true), '')::int))"
        );
    }

    #[test]
    fn test_unknown_names_fail() {
        assert_eq!(
            compile(&Predicate::eq("nope", 1)),
            Err(CompileError::unknown_field("documents", "nope"))
        );
        assert!(matches!(
            compile(&Predicate::exists("nope", None)),
            Err(CompileError::UnknownRelation { .. })
        ));
        // relation to a table that has no model
        assert!(matches!(
            compile(&Predicate::exists("owner", None)),
            Err(CompileError::UnknownTable(t)) if t == "users"
        ));
    }

    #[test]
    fn test_invalid_cast() {
        let p = Predicate::eq("owner", Operand::setting("app.user", Some("int; DROP TABLE x")));
        assert!(matches!(compile(&p), Err(CompileError::InvalidCast(_))));

        let ok = Predicate::eq("owner", Operand::setting("app.user", Some("integer[]")));
        assert!(compile(&ok).is_ok());
    }

    #[test]
    fn test_raw_sql_leaf_and_column_operand() {
        let p = Predicate::sql("owner_id = 1").and(Predicate::eq("id", Operand::column("owner")));
        assert_eq!(
            compile(&p).unwrap(),
            "((owner_id = 1) AND \"documents\".\"id\" = \"documents\".\"owner_id\")"
        );
    }
}
