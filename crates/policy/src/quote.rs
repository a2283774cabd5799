//! PostgreSQL quoting for identifiers and literal values

use serde_json::Value;

use crate::error::CompileError;

/// Quote an identifier (table, column, policy or role name).
///
/// The name is wrapped in double quotes and embedded double quotes are doubled,
/// so `my"table` becomes `"my""table"`.
pub fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string as a SQL literal.
///
/// Single quotes are doubled. When the value contains a backslash the escape string
/// syntax (`E'...'`) is used with backslashes doubled, which reads the same whatever
/// `standard_conforming_strings` is set to.
pub fn quote_string(value: &str) -> Result<String, CompileError> {
    if value.contains('\0') {
        return Err(CompileError::invalid_literal(
            "string literals cannot contain NUL characters",
        ));
    }

    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        Ok(format!("E'{}'", escaped.replace('\\', "\\\\")))
    } else {
        Ok(format!("'{}'", escaped))
    }
}

/// Render a JSON value as an inline SQL literal
pub fn quote_literal(value: &Value) -> Result<String, CompileError> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => quote_string(s),
        Value::Array(_) | Value::Object(_) => Err(CompileError::invalid_literal(format!(
            "{} cannot be inlined as a scalar literal",
            value
        ))),
    }
}
