use indexmap::IndexMap;
use scex::{
    Acl, AclBuilder, CompilerConfig, ErrorKind, ExpressionCompiler, ExpressionDef,
    ExpressionProfile, ScexError, SyntaxKind, SyntaxRules, TypeRegistry, Value,
};
use std::sync::Arc;

fn string_profile(name: &str) -> Arc<ExpressionProfile> {
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length");
            });
            b.on("Int", |t| {
                t.members_named("+");
            });
        })
        .build()
        .unwrap();
    Arc::new(ExpressionProfile::new(name, SyntaxRules::default(), acl))
}

fn compiler() -> ExpressionCompiler {
    ExpressionCompiler::new(Arc::new(TypeRegistry::new()), CompilerConfig::default()).unwrap()
}

fn def(profile: &Arc<ExpressionProfile>, expr: &str, result: &str) -> ExpressionDef {
    ExpressionDef::create(profile.clone(), expr, false, false, "Unit", result, IndexMap::new())
        .unwrap()
}

#[test]
fn string_length_evaluates() {
    let eng = compiler();
    let profile = string_profile("s1");
    let expr = eng.compile(&def(&profile, "\"hello\".length", "Int")).unwrap();
    assert_eq!(expr.eval(&Value::Unit).unwrap(), Value::Int(5));
}

#[test]
fn unlisted_member_is_denied() {
    let eng = compiler();
    let profile = string_profile("s2");
    let err = eng.compile(&def(&profile, "\"hello\".toUpperCase", "String")).unwrap_err();
    match err {
        ScexError::Compilation(report) => {
            assert_eq!(report.errors.len(), 1);
            let d = &report.errors[0];
            assert_eq!(d.kind, ErrorKind::AccessDenied);
            assert_eq!(
                d.message,
                "member `String.toUpperCase` is not allowed on `String`"
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn default_deny_without_any_acl() {
    let eng = compiler();
    let profile = Arc::new(ExpressionProfile::new("empty", SyntaxRules::default(), Acl::empty()));
    let err = eng.compile(&def(&profile, "\"x\".length", "Int")).unwrap_err();
    match err {
        ScexError::Compilation(report) => assert!(report.has(ErrorKind::AccessDenied)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn identical_defs_share_one_callable() {
    let eng = compiler();
    let profile = string_profile("cache");
    let a = eng.compile(&def(&profile, "\"hello\".length", "Int")).unwrap();
    let b = eng.compile(&def(&profile, "\"hello\".length", "Int")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(eng.stats().units_compiled, 1);
}

#[test]
fn compiles_are_deterministic() {
    let profile = string_profile("det");
    let d = def(&profile, "\"hello\".length + 2", "Int");
    let first = compiler().compile(&d).unwrap().eval(&Value::Unit).unwrap();
    let second = compiler().compile(&d).unwrap().eval(&Value::Unit).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Value::Int(7));
}

#[test]
fn free_variables_are_positional() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.members_named("+").members_named("*");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("vars", SyntaxRules::default(), acl));
    let mut vars = IndexMap::new();
    vars.insert("a".to_string(), "Int".to_string());
    vars.insert("b".to_string(), "Int".to_string());
    let d = ExpressionDef::create(profile, "a + b * 2", false, false, "Unit", "Int", vars)
        .unwrap();
    let expr = eng.compile(&d).unwrap();
    assert_eq!(expr.vars(), vec!["a", "b"]);
    assert_eq!(
        expr.eval_with_vars(&Value::Unit, &[Value::Int(10), Value::Int(4)]).unwrap(),
        Value::Int(18)
    );
    match expr.eval_with_vars(&Value::Unit, &[Value::Int(1)]) {
        Err(scex::EvalError::ValuesLen { expected, got }) => {
            assert_eq!(expected, 2);
            assert_eq!(got, 1);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn type_mismatch_is_reported() {
    let eng = compiler();
    let profile = string_profile("mismatch");
    let err = eng.compile(&def(&profile, "\"hello\".length", "String")).unwrap_err();
    match err {
        ScexError::Compilation(report) => {
            assert!(report.has(ErrorKind::Type));
            assert!(report.errors[0].message.contains("expected String, found Int"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn forbidden_syntax_is_rejected() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.members_named("+");
            });
            b.on("Boolean", |t| {
                t.members_named("&&");
            });
        })
        .build()
        .unwrap();
    let rules = SyntaxRules::default().forbid(SyntaxKind::If);
    let profile = Arc::new(ExpressionProfile::new("no-if", rules, acl));
    let d = ExpressionDef::create(
        profile,
        "if (true) 1 else 2",
        false,
        false,
        "Unit",
        "Int",
        IndexMap::new(),
    )
    .unwrap();
    match eng.compile(&d).unwrap_err() {
        ScexError::Compilation(report) => {
            assert!(report.has(ErrorKind::SyntaxForbidden));
            assert!(report.errors[0].message.contains("if expression"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn unknown_identifier_is_a_type_error() {
    let eng = compiler();
    let profile = string_profile("unknown");
    match eng.compile(&def(&profile, "nonsense + 1", "Int")).unwrap_err() {
        ScexError::Compilation(report) => {
            assert!(report.has(ErrorKind::Type));
            assert!(report.errors[0].message.contains("unknown identifier: nonsense"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn header_definitions_are_in_scope_and_trusted() {
    let eng = compiler();
    // The header may use members the user expression cannot.
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.members_named("+");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(
        ExpressionProfile::new("hdr", SyntaxRules::default(), acl)
            .with_header("val seven = \"seven!\".length"),
    );
    let d = ExpressionDef::create(
        profile.clone(),
        "seven + 1",
        false,
        false,
        "Unit",
        "Int",
        IndexMap::new(),
    )
    .unwrap();
    assert_eq!(eng.compile(&d).unwrap().eval(&Value::Unit).unwrap(), Value::Int(7));

    // The same access written by the user is still denied.
    let denied = ExpressionDef::create(
        profile,
        "\"seven!\".length + 1",
        false,
        false,
        "Unit",
        "Int",
        IndexMap::new(),
    )
    .unwrap();
    match eng.compile(&denied).unwrap_err() {
        ScexError::Compilation(report) => assert!(report.has(ErrorKind::AccessDenied)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn utilities_compile_once_and_are_shared() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Double", |t| {
                t.members_named("*").members_named("+");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(
        ExpressionProfile::new("utils", SyntaxRules::default(), acl)
            .with_utilities("utils", "val pi = 3.14159\nval tau = pi + pi"),
    );
    let d1 = ExpressionDef::create(
        profile.clone(),
        "tau * 2.0",
        false,
        false,
        "Unit",
        "Double",
        IndexMap::new(),
    )
    .unwrap();
    let d2 = ExpressionDef::create(
        profile,
        "pi * 1.0",
        false,
        false,
        "Unit",
        "Double",
        IndexMap::new(),
    )
    .unwrap();
    let v1 = eng.compile(&d1).unwrap().eval(&Value::Unit).unwrap();
    let v2 = eng.compile(&d2).unwrap().eval(&Value::Unit).unwrap();
    match (v1, v2) {
        (Value::Double(tau2), Value::Double(pi)) => {
            assert!((tau2 - 4.0 * 3.14159).abs() < 1e-9);
            assert!((pi - 3.14159).abs() < 1e-9);
        }
        other => panic!("unexpected values: {:?}", other),
    }
}

#[test]
fn if_expressions_evaluate_lazily() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.members_named("<").members_named("/");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("ifs", SyntaxRules::default(), acl));
    let mut vars = IndexMap::new();
    vars.insert("n".to_string(), "Int".to_string());
    let d = ExpressionDef::create(
        profile,
        "if (n < 1) 0 else 10 / n",
        false,
        false,
        "Unit",
        "Int",
        vars,
    )
    .unwrap();
    let expr = eng.compile(&d).unwrap();
    assert_eq!(expr.eval_with_vars(&Value::Unit, &[Value::Int(0)]).unwrap(), Value::Int(0));
    assert_eq!(expr.eval_with_vars(&Value::Unit, &[Value::Int(5)]).unwrap(), Value::Int(2));
}
