use indexmap::IndexMap;
use scex::{
    Acl, AclBuilder, CompilerConfig, ErrorKind, EvalError, ExpressionCompiler, ExpressionDef,
    ExpressionProfile, HostObject, ScexError, SyntaxRules, TypeRegistry, Value,
};
use std::any::Any;
use std::sync::Arc;

fn compiler_with(reg: TypeRegistry) -> ExpressionCompiler {
    ExpressionCompiler::new(Arc::new(reg), CompilerConfig::default()).unwrap()
}

fn def_in(
    profile: &Arc<ExpressionProfile>,
    expr: &str,
    result: &str,
    vars: IndexMap<String, String>,
) -> ExpressionDef {
    ExpressionDef::create(profile.clone(), expr, false, false, "Unit", result, vars).unwrap()
}

fn compiles(eng: &ExpressionCompiler, profile: &Arc<ExpressionProfile>, expr: &str, result: &str) -> bool {
    eng.compile(&def_in(profile, expr, result, IndexMap::new())).is_ok()
}

fn assert_denied(eng: &ExpressionCompiler, profile: &Arc<ExpressionProfile>, expr: &str, result: &str) {
    match eng.compile(&def_in(profile, expr, result, IndexMap::new())).unwrap_err() {
        ScexError::Compilation(report) => assert!(
            report.has(ErrorKind::AccessDenied),
            "expected AccessDenied, got {:?}",
            report.errors
        ),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn last_matching_entry_wins() {
    let eng = compiler_with(TypeRegistry::new());
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Any", |t| {
                t.member("==");
            });
        })
        .deny(|b| {
            b.on("Any", |t| {
                t.member("==");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("eq-deny", SyntaxRules::default(), acl));
    assert_denied(&eng, &profile, "1 == 2", "Boolean");

    // The same entries in the opposite order allow.
    let acl = AclBuilder::new()
        .deny(|b| {
            b.on("Any", |t| {
                t.member("==");
            });
        })
        .allow(|b| {
            b.on("Any", |t| {
                t.member("==");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("eq-allow", SyntaxRules::default(), acl));
    assert!(compiles(&eng, &profile, "1 == 2", "Boolean"));
}

#[test]
fn adding_a_later_deny_is_monotonic() {
    let eng = compiler_with(TypeRegistry::new());
    let base = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member("length");
            });
        })
        .build()
        .unwrap();
    let shadow = AclBuilder::new()
        .deny(|b| {
            b.on("String", |t| {
                t.member("length");
            });
        })
        .build()
        .unwrap();

    let open = Arc::new(ExpressionProfile::new("mono-open", SyntaxRules::default(), base.clone()));
    assert!(compiles(&eng, &open, "\"abc\".length", "Int"));

    let shadowed = Arc::new(ExpressionProfile::new(
        "mono-shadowed",
        SyntaxRules::default(),
        base.concat(&shadow),
    ));
    assert_denied(&eng, &shadowed, "\"abc\".length", "Int");
}

#[test]
fn all_members_covers_inherited_symbols() {
    let eng = compiler_with(TypeRegistry::new());
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.all_members();
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("all", SyntaxRules::default(), acl));
    assert!(compiles(&eng, &profile, "\"a\".toUpperCase", "String"));
    assert!(compiles(&eng, &profile, "\"a\".length", "Int"));
    // `==` is declared on Any but reached through a String qualifier.
    assert!(compiles(&eng, &profile, "\"a\" == \"b\"", "Boolean"));
    // Another qualifier type stays closed.
    assert_denied(&eng, &profile, "1 == 2", "Boolean");
}

#[test]
fn overload_pinned_entries_distinguish_parameter_lists() {
    let eng = compiler_with(TypeRegistry::new());
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("String", |t| {
                t.member_with("substring", &["Int", "Int"]);
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("pinned", SyntaxRules::default(), acl));
    assert!(compiles(&eng, &profile, "\"abcdef\".substring(1, 3)", "String"));
    // Same name, different member: still denied.
    assert_denied(&eng, &profile, "\"abcdef\".length", "Int");
}

#[test]
fn statics_require_their_own_entries() {
    let eng = compiler_with(TypeRegistry::new());
    let acl = AclBuilder::new()
        .allow(|b| {
            b.statics("Math", |t| {
                t.all_members();
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("math", SyntaxRules::default(), acl));
    let d = def_in(&profile, "Math.max(1.5, 2.5)", "Double", IndexMap::new());
    assert_eq!(eng.compile(&d).unwrap().eval(&Value::Unit).unwrap(), Value::Double(2.5));

    let closed = Arc::new(ExpressionProfile::new(
        "math-closed",
        SyntaxRules::default(),
        Acl::empty(),
    ));
    assert_denied(&eng, &closed, "Math.max(1.5, 2.5)", "Double");
}

#[derive(Debug)]
struct Point {
    x: i64,
    y: i64,
}

impl HostObject for Point {
    fn type_name(&self) -> &str {
        "Point"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn point_of(v: &Value) -> Result<&Point, EvalError> {
    match v {
        Value::Obj(o) => o.as_any().downcast_ref::<Point>().ok_or_else(|| {
            EvalError::TypeMismatch { expected: "Point".into(), found: o.type_name().into() }
        }),
        other => Err(EvalError::TypeMismatch {
            expected: "Point".into(),
            found: other.type_name().into(),
        }),
    }
}

fn point_registry() -> TypeRegistry {
    let mut reg = TypeRegistry::new();
    reg.register_type("Point", None).unwrap();
    reg.register_constructor(
        "Point",
        &[("x", "Int"), ("y", "Int")],
        Arc::new(|_, args| {
            let x = i64::try_from(&args[0])?;
            let y = i64::try_from(&args[1])?;
            Ok(Value::Obj(Arc::new(Point { x, y })))
        }),
    )
    .unwrap();
    reg.register_field("Point", "x", "Int", Arc::new(|r, _| Ok(Value::Int(point_of(r)?.x))), None)
        .unwrap();
    reg.register_field("Point", "y", "Int", Arc::new(|r, _| Ok(Value::Int(point_of(r)?.y))), None)
        .unwrap();
    reg
}

#[test]
fn constructors_are_guarded_by_their_wildcard() {
    let acl = AclBuilder::new()
        .allow(|b| {
            b.constructors("Point");
            b.on("Point", |t| {
                t.member("x");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("points", SyntaxRules::default(), acl));
    let eng = compiler_with(point_registry());
    let d = def_in(&profile, "new Point(3, 4).x", "Int", IndexMap::new());
    assert_eq!(eng.compile(&d).unwrap().eval(&Value::Unit).unwrap(), Value::Int(3));

    // Without the constructor entry, `new` is denied even though `x` is
    // allowed.
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Point", |t| {
                t.member("x");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("points-closed", SyntaxRules::default(), acl));
    let eng = compiler_with(point_registry());
    assert_denied(&eng, &profile, "new Point(3, 4).x", "Int");
}

fn view_registry() -> TypeRegistry {
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
    reg
}

#[test]
fn implicit_view_members_need_the_view_pattern() {
    let acl = AclBuilder::new()
        .allow(|b| {
            b.implicitly_as("str2ops", "StrOps", |t| {
                t.all_members();
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("views", SyntaxRules::default(), acl));
    let eng = compiler_with(view_registry());
    let d = def_in(&profile, "\"abc\".reversed", "String", IndexMap::new());
    assert_eq!(
        eng.compile(&d).unwrap().eval(&Value::Unit).unwrap(),
        Value::Str("cba".to_string())
    );

    // A plain pattern on the view target does not cover view-routed sites.
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("StrOps", |t| {
                t.all_members();
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("views-plain", SyntaxRules::default(), acl));
    let eng = compiler_with(view_registry());
    assert_denied(&eng, &profile, "\"abc\".reversed", "String");
}

#[test]
fn applied_patterns_respect_openness_and_covariance() {
    let mut reg = TypeRegistry::new();
    reg.register_type("Num", None).unwrap();
    reg.register_type("MyInt", Some("Num")).unwrap();
    reg.register_type("Box", None).unwrap();
    reg.register_method("Box", "size", &[], "Int", Arc::new(|_, _| Ok(Value::Int(0)))).unwrap();
    let eng = compiler_with(reg);

    let mut vars = IndexMap::new();
    vars.insert("b".to_string(), "Box[MyInt]".to_string());

    let open = AclBuilder::new()
        .allow(|pb| {
            pb.on("Box[_]", |t| {
                t.member("size");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("box-open", SyntaxRules::default(), open));
    assert!(eng.compile(&def_in(&profile, "b.size", "Int", vars.clone())).is_ok());

    let plus = AclBuilder::new()
        .allow(|pb| {
            pb.on("Box[@plus Num]", |t| {
                t.member("size");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("box-plus", SyntaxRules::default(), plus));
    assert!(eng.compile(&def_in(&profile, "b.size", "Int", vars.clone())).is_ok());

    let wrong = AclBuilder::new()
        .allow(|pb| {
            pb.on("Box[String]", |t| {
                t.member("size");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("box-wrong", SyntaxRules::default(), wrong));
    match eng.compile(&def_in(&profile, "b.size", "Int", vars)).unwrap_err() {
        ScexError::Compilation(report) => assert!(report.has(ErrorKind::AccessDenied)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn fq_name_in_pattern_must_use_the_declaring_type() {
    // `==` is declared on Any; an entry written against Int never matches.
    let eng = compiler_with(TypeRegistry::new());
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.member("==");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("wrong-owner", SyntaxRules::default(), acl));
    assert_denied(&eng, &profile, "1 == 2", "Boolean");
}
