//! SQL templates for row-level security DDL
//!
//! Every function takes identifiers that are already quoted (see
//! [`quote_name`](supabase_rls_policy::quote_name)) and predicates that are already
//! compiled SQL text.

// テーブルの RLS を有効化する SQL を生成
pub fn enable_rls_sql(table: &str) -> String {
    format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY;", table)
}

// テーブルの RLS を無効化する SQL を生成
pub fn disable_rls_sql(table: &str) -> String {
    format!("ALTER TABLE {} DISABLE ROW LEVEL SECURITY;", table)
}

// RLS 強制を設定する SQL を生成 (所有者にも適用するかどうか)
pub fn force_rls_sql(table: &str, force: bool) -> String {
    let force_str = if force { "FORCE" } else { "NO FORCE" };

    format!("ALTER TABLE {} {} ROW LEVEL SECURITY;", table, force_str)
}

fn check_clause(check: Option<&str>) -> String {
    match check {
        Some(check_expr) => format!(" WITH CHECK ({})", check_expr),
        None => "".to_string(),
    }
}

// ポリシー作成 SQL を生成
pub fn create_policy_sql(table: &str, policy: &str, using: &str, check: Option<&str>) -> String {
    format!(
        "CREATE POLICY {} ON {} USING ({}){};",
        policy,
        table,
        using,
        check_clause(check)
    )
}

// ポリシー変更 SQL を生成
pub fn alter_policy_sql(table: &str, policy: &str, using: &str, check: Option<&str>) -> String {
    format!(
        "ALTER POLICY {} ON {} USING ({}){};",
        policy,
        table,
        using,
        check_clause(check)
    )
}

// ポリシー削除 SQL を生成
pub fn drop_policy_sql(table: &str, policy: &str) -> String {
    format!("DROP POLICY IF EXISTS {} ON {};", policy, table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rls_toggles() {
        assert_eq!(
            enable_rls_sql("\"documents\""),
            "ALTER TABLE \"documents\" ENABLE ROW LEVEL SECURITY;"
        );
        assert_eq!(
            disable_rls_sql("\"documents\""),
            "ALTER TABLE \"documents\" DISABLE ROW LEVEL SECURITY;"
        );
        assert_eq!(
            force_rls_sql("\"documents\"", true),
            "ALTER TABLE \"documents\" FORCE ROW LEVEL SECURITY;"
        );
        assert_eq!(
            force_rls_sql("\"documents\"", false),
            "ALTER TABLE \"documents\" NO FORCE ROW LEVEL SECURITY;"
        );
    }

    #[test]
    fn test_policy_statements() {
        assert_eq!(
            create_policy_sql("\"documents\"", "\"owner_only\"", "owner_id = 1", None),
            "CREATE POLICY \"owner_only\" ON \"documents\" USING (owner_id = 1);"
        );
        assert_eq!(
            create_policy_sql("\"documents\"", "\"owner_only\"", "true", Some("owner_id = 1")),
            "CREATE POLICY \"owner_only\" ON \"documents\" USING (true) WITH CHECK (owner_id = 1);"
        );
        assert_eq!(
            alter_policy_sql("\"documents\"", "\"owner_only\"", "false", None),
            "ALTER POLICY \"owner_only\" ON \"documents\" USING (false);"
        );
        assert_eq!(
            drop_policy_sql("\"documents\"", "\"owner_only\""),
            "DROP POLICY IF EXISTS \"owner_only\" ON \"documents\";"
        );
    }
}
