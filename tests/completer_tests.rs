use indexmap::IndexMap;
use scex::{
    AclBuilder, CompilerConfig, ErrorKind, EvalError, ExpressionCompiler, ExpressionDef,
    ExpressionProfile, HostObject, SymbolAttributes, SyntaxRules, TypeRegistry, Value,
};
use std::any::Any;
use std::sync::Arc;

fn compiler() -> ExpressionCompiler {
    ExpressionCompiler::new(Arc::new(TypeRegistry::new()), CompilerConfig::default()).unwrap()
}

#[test]
fn type_completion_lists_exactly_the_allowed_members() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member_with("charAt", &["Int"]);
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("charAt-only", SyntaxRules::default(), acl));
    let completer = eng.completer(profile, false, "Unit", "Char", IndexMap::new());

    let completion = completer.get_type_completion("\"abc\".", 6);
    assert!(completion.errors.is_empty());
    let rendered: Vec<String> = completion.members.iter().map(|m| m.render()).collect();
    assert_eq!(rendered, vec!["charAt(index: Int): Char"]);
}

#[test]
fn every_offered_member_compiles_under_the_same_profile() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length").member("toUpperCase").member_with("charAt", &["Int"]);
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("consistent", SyntaxRules::default(), acl));
    let completer =
        eng.completer(profile.clone(), false, "Unit", "Any", IndexMap::new());

    let completion = completer.get_type_completion("\"abc\".", 6);
    assert!(!completion.members.is_empty());
    for member in &completion.members {
        let expr = if member.params.is_empty() {
            format!("\"abc\".{}", member.name)
        } else {
            // Exercise the one overload the profile pins: charAt(Int).
            format!("\"abc\".{}(0)", member.name)
        };
        let def = ExpressionDef::create(
            profile.clone(),
            &expr,
            false,
            false,
            "Unit",
            "Any",
            IndexMap::new(),
        )
        .unwrap();
        assert!(eng.compile(&def).is_ok(), "offered member failed to compile: {}", expr);
    }
}

#[test]
fn completion_uses_profile_documentation_and_parameter_names() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member_with("charAt", &["Int"]);
            });
        })
        .build()
        .unwrap();
    let attrs = SymbolAttributes::new()
        .document("String.charAt", "Character at a zero-based position.")
        .rename_params("String.charAt", &["position"]);
    let profile = Arc::new(
        ExpressionProfile::new("documented", SyntaxRules::default(), acl).with_attributes(attrs),
    );
    let completer = eng.completer(profile, false, "Unit", "Char", IndexMap::new());

    let completion = completer.get_type_completion("\"abc\".", 6);
    let m = &completion.members[0];
    assert_eq!(m.params[0].name, "position");
    assert_eq!(m.documentation.as_deref(), Some("Character at a zero-based position."));
}

#[derive(Debug)]
struct Person {
    age: i64,
}

impl HostObject for Person {
    fn type_name(&self) -> &str {
        "Person"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn person_registry() -> Arc<TypeRegistry> {
    let mut reg = TypeRegistry::new();
    reg.register_type("Person", None).unwrap();
    reg.register_field(
        "Person",
        "age",
        "Int",
        Arc::new(|r, _| match r {
            Value::Obj(o) => o
                .as_any()
                .downcast_ref::<Person>()
                .map(|p| Value::Int(p.age))
                .ok_or_else(|| EvalError::Internal("not a Person".into())),
            _ => Err(EvalError::Internal("not a Person".into())),
        }),
        None,
    )
    .unwrap();
    reg.register_field("Person", "name", "String", Arc::new(|_, _| Ok(Value::Str("x".into()))), None)
        .unwrap();
    Arc::new(reg)
}

#[test]
fn scope_completion_honors_the_acl_and_lists_bindings() {
    let eng = ExpressionCompiler::new(person_registry(), CompilerConfig::default()).unwrap();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Person", |t| {
                t.member("name");
            });
            b.statics("Math", |t| {
                t.member("abs");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(
        ExpressionProfile::new("scope", SyntaxRules::default(), acl)
            .with_utilities("scope-utils", "val zero = 0"),
    );
    let mut vars = IndexMap::new();
    vars.insert("rate".to_string(), "Double".to_string());
    let completer = eng.completer(profile, false, "Person", "Any", vars);

    let completion = completer.get_scope_completion("", 0);
    let names: Vec<&str> = completion.members.iter().map(|m| m.name.as_str()).collect();
    assert!(names.contains(&"name"), "allowed context member missing: {:?}", names);
    assert!(!names.contains(&"age"), "denied context member offered: {:?}", names);
    assert!(names.contains(&"rate"), "declared variable missing: {:?}", names);
    assert!(names.contains(&"zero"), "utility binding missing: {:?}", names);
    assert!(names.contains(&"Math"), "referenced module missing: {:?}", names);
    assert!(!names.contains(&"_ctx"), "internal symbol leaked: {:?}", names);
}

#[test]
fn implicit_view_members_are_flagged() {
    let mut reg = TypeRegistry::new();
    reg.register_type("StrOps", None).unwrap();
    reg.register_method(
        "StrOps",
        "reversed",
        &[],
        "String",
        Arc::new(|r, _| Ok(Value::Str(String::try_from(r)?.chars().rev().collect()))),
    )
    .unwrap();
    reg.register_view("str2ops", "String", "StrOps", Arc::new(|v, _| Ok(v.clone()))).unwrap();
    let eng = ExpressionCompiler::new(Arc::new(reg), CompilerConfig::default()).unwrap();

    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length");
            });
            b.implicitly_as("str2ops", "StrOps", |t| {
                t.member("reversed");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("viewy", SyntaxRules::default(), acl));
    let completer = eng.completer(profile, false, "Unit", "Any", IndexMap::new());

    let completion = completer.get_type_completion("\"abc\".", 6);
    let mut names: Vec<(String, bool)> =
        completion.members.iter().map(|m| (m.name.clone(), m.via_implicit)).collect();
    names.sort();
    assert_eq!(
        names,
        vec![("length".to_string(), false), ("reversed".to_string(), true)]
    );
}

#[test]
fn get_errors_reports_without_raising() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("errors", SyntaxRules::default(), acl));
    let completer = eng.completer(profile, false, "Unit", "Int", IndexMap::new());

    assert!(completer.get_errors("\"abc\".length").is_empty());

    let errors = completer.get_errors("\"abc\".toUpperCase");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::AccessDenied);

    let errors = completer.get_errors("1 +");
    assert!(!errors.is_empty());
    assert_eq!(errors[0].kind, ErrorKind::Parse);
}

#[test]
fn type_completion_survives_erroneous_enclosing_expressions() {
    let eng = compiler();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("partial", SyntaxRules::default(), acl));
    let completer = eng.completer(profile, false, "Unit", "Any", IndexMap::new());

    // The surrounding call is unterminated; the qualifier still resolves.
    let completion = completer.get_type_completion("Math.abs(\"abc\".", 15);
    let names: Vec<&str> = completion.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["length"]);

    // Completely hopeless input produces diagnostics, never a panic.
    let completion = completer.get_type_completion("???", 3);
    assert!(completion.members.is_empty());
}
