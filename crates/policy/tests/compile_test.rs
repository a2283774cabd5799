use serde_json::json;
use supabase_rls_policy::{
    Column, Comparison, CompileError, Compiler, DeclaredPolicy, ModelCatalog, Operand, Policy,
    PolicyExpr, Predicate, Relation, TableModel,
};

fn catalog() -> ModelCatalog {
    let mut catalog = ModelCatalog::new();
    catalog.insert(
        TableModel::new("projects")
            .with_column(Column::typed("id", "int4"))
            .with_columns(&["owner_id", "archived", "status"])
            .with_relation(Relation::new("team", "team_id", "memberships").with_target_column("team_id")),
    );
    catalog.insert(TableModel::new("memberships").with_columns(&["team_id", "user_id", "role"]));
    catalog.insert(TableModel::new("users").with_columns(&["id", "is_superuser"]));
    catalog
}

#[test]
fn test_owner_or_public_policy() {
    let catalog = catalog();
    let model = catalog.get("projects").unwrap().clone();
    let compiler = Compiler::new(&catalog);

    let mut declared = vec![
        DeclaredPolicy::named(
            "owner_or_public",
            Predicate::eq("owner_id", Operand::app_user())
                .or(Predicate::in_list("status", vec!["public", "shared"])),
        )
        .with_check(Predicate::eq("archived", false)),
        DeclaredPolicy::named(
            "team_admins",
            Predicate::exists(
                "team",
                Some(
                    Predicate::eq("user_id", Operand::app_user())
                        .and(Predicate::eq("role", "admin")),
                ),
            ),
        ),
    ];

    let policies = compiler.compile_policies(&mut declared, &model).unwrap();
    assert_eq!(
        policies,
        vec![
            Policy::new(
                "owner_or_public",
                "(\"projects\".\"owner_id\" = nullif(current_setting('app.user', true), '')::int OR \"projects\".\"status\" IN ('public', 'shared'))",
                Some("\"projects\".\"archived\" = false"),
            ),
            Policy::new(
                "team_admins",
                "EXISTS (SELECT 1 FROM \"memberships\" U0 WHERE U0.\"team_id\" = \"projects\".\"team_id\" AND (U0.\"user_id\" = nullif(current_setting('app.user', true), '')::int AND U0.\"role\" = 'admin'))",
                None,
            ),
        ]
    );

    // compiled in place, so a second pass does not touch the catalog
    assert!(declared.iter().all(|p| p.using.is_compiled()));
    let empty = ModelCatalog::new();
    let again = Compiler::new(&empty)
        .compile_policies(&mut declared, &model)
        .unwrap();
    assert_eq!(again, policies);
}

#[test]
fn test_deferred_predicate_sees_late_configuration() {
    let catalog = catalog();
    let model = catalog.get("projects").unwrap().clone();

    let mut declared = DeclaredPolicy::new(PolicyExpr::deferred(|| {
        Predicate::compare("id", Comparison::Gt, Operand::setting("app.min_id", Some("bigint")))
    }));
    let policy = declared.compile(&model, &catalog).unwrap();

    assert_eq!(policy.name, "projects_policy");
    assert_eq!(
        policy.using,
        "\"projects\".\"id\" > nullif(current_setting('app.min_id', true), '')::bigint"
    );
}

#[test]
fn test_resolution_errors() {
    let catalog = catalog();
    let model = catalog.get("projects").unwrap().clone();
    let compiler = Compiler::new(&catalog);

    let err = compiler
        .compile_predicate(&model, &Predicate::eq("missing", 1))
        .unwrap_err();
    assert_eq!(err, CompileError::unknown_field("projects", "missing"));

    let err = compiler
        .compile_predicate(&model, &Predicate::exists("owner", None))
        .unwrap_err();
    assert!(matches!(err, CompileError::UnknownRelation { .. }));

    let err = compiler
        .compile_predicate(
            &model,
            &Predicate::compare("owner_id", Comparison::Eq, Operand::setting("app.user", Some("int; DROP"))),
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidCast(_)));
}

#[test]
fn test_declared_policies_from_json() {
    let mut declared: Vec<DeclaredPolicy> = serde_json::from_value(json!([
        {"name": "literal", "using": "true"},
        {"using": {"kind": "is_null", "field": "owner_id", "negated": true}, "check": ""}
    ]))
    .unwrap();

    let catalog = catalog();
    let model = catalog.get("projects").unwrap().clone();
    let policies = Compiler::new(&catalog)
        .compile_policies(&mut declared, &model)
        .unwrap();

    assert_eq!(policies[0], Policy::new("literal", "true", None));
    assert_eq!(
        policies[1],
        Policy::new("projects_policy", "\"projects\".\"owner_id\" IS NOT NULL", None)
    );
}

#[test]
fn test_is_superuser_policy() {
    let catalog = catalog();
    let model = catalog.get("projects").unwrap().clone();

    let mut declared = DeclaredPolicy::is_superuser("users", "is_superuser");
    assert!(!declared.using.is_compiled());

    let policy = declared.compile(&model, &catalog).unwrap();
    assert_eq!(
        policy,
        Policy::new(
            "is_superuser",
            "EXISTS (SELECT 1 FROM \"users\" U0 WHERE (U0.\"id\" = nullif(current_setting('app.user', true), '')::int AND U0.\"is_superuser\" = true))",
            None,
        )
    );

    // the user table has to be known to the compiler
    let mut missing = DeclaredPolicy::is_superuser("accounts", "is_admin");
    assert_eq!(
        missing.compile(&model, &catalog).unwrap_err(),
        CompileError::UnknownTable("accounts".to_string())
    );
}
