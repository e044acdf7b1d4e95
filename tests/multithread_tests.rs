use indexmap::IndexMap;
use scex::{
    AclBuilder, CompilerConfig, ExpressionCompiler, ExpressionDef, ExpressionProfile, SyntaxRules,
    TypeRegistry, Value,
};
use std::sync::Arc;
use std::thread;

#[test]
fn compiled_expressions_are_shared_across_threads() {
    let eng =
        ExpressionCompiler::new(Arc::new(TypeRegistry::new()), CompilerConfig::default()).unwrap();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.members_named("+");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("mt", SyntaxRules::default(), acl));
    let mut vars = IndexMap::new();
    vars.insert("a".to_string(), "Int".to_string());
    vars.insert("b".to_string(), "Int".to_string());
    let def =
        ExpressionDef::create(profile, "a + b", false, false, "Unit", "Int", vars).unwrap();
    let shared_expr = eng.compile(&def).unwrap();

    let mut handles = vec![];
    for i in 0..10i64 {
        let expr = Arc::clone(&shared_expr);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let out =
                    expr.eval_with_vars(&Value::Unit, &[Value::Int(i), Value::Int(i * 2)]).unwrap();
                assert_eq!(out, Value::Int(i * 3));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_identical_compiles_coalesce() {
    let eng = Arc::new(
        ExpressionCompiler::new(Arc::new(TypeRegistry::new()), CompilerConfig::default()).unwrap(),
    );
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("coalesce", SyntaxRules::default(), acl));
    let def = ExpressionDef::create(
        profile,
        "\"hello\".length",
        false,
        false,
        "Unit",
        "Int",
        IndexMap::new(),
    )
    .unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let eng = Arc::clone(&eng);
        let def = def.clone();
        handles.push(thread::spawn(move || {
            let expr = eng.compile(&def).unwrap();
            assert_eq!(expr.eval(&Value::Unit).unwrap(), Value::Int(5));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(eng.stats().units_compiled, 1);
}
