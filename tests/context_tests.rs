use indexmap::IndexMap;
use scex::{
    member, AclBuilder, CompilerConfig, ErrorKind, EvalError, ExpressionCompiler, ExpressionDef,
    ExpressionProfile, HostObject, ScexError, SyntaxRules, TypeRegistry, Value,
};
use std::any::Any;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Person {
    name: Mutex<String>,
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

fn person_of(v: &Value) -> Result<&Person, EvalError> {
    match v {
        Value::Obj(o) => o.as_any().downcast_ref::<Person>().ok_or_else(|| {
            EvalError::TypeMismatch { expected: "Person".into(), found: o.type_name().into() }
        }),
        other => Err(EvalError::TypeMismatch {
            expected: "Person".into(),
            found: other.type_name().into(),
        }),
    }
}

// A context method registered declaratively; the registry picks it up from
// the inventory via `install_registered`.
#[member(owner = "Person", name = "greet")]
fn greet(recv: Value, greeting: String) -> String {
    let person = person_of(&recv).expect("receiver is a Person");
    format!("{}, {}!", greeting, person.name.lock().unwrap())
}

fn person_registry() -> TypeRegistry {
    let mut reg = TypeRegistry::new();
    reg.register_type("Person", None).unwrap();
    reg.register_field(
        "Person",
        "name",
        "String",
        Arc::new(|r, _| Ok(Value::Str(person_of(r)?.name.lock().unwrap().clone()))),
        Some(Arc::new(|r, args| {
            *person_of(r)?.name.lock().unwrap() = String::try_from(&args[0])?;
            Ok(Value::Unit)
        })),
    )
    .unwrap();
    reg.register_field("Person", "age", "Int", Arc::new(|r, _| Ok(Value::Int(person_of(r)?.age))), None)
        .unwrap();
    reg.install_registered().unwrap();
    reg
}

fn person_profile(name: &str) -> Arc<ExpressionProfile> {
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Person", |t| {
                t.member("name").member("age").member("greet");
            });
            b.on("Int", |t| {
                t.members_named("+");
            });
            b.on("String", |t| {
                t.members_named("+");
            });
        })
        .build()
        .unwrap();
    Arc::new(ExpressionProfile::new(name, SyntaxRules::default(), acl))
}

fn compiler() -> ExpressionCompiler {
    ExpressionCompiler::new(Arc::new(person_registry()), CompilerConfig::default()).unwrap()
}

fn alice() -> Value {
    Value::Obj(Arc::new(Person { name: Mutex::new("alice".to_string()), age: 30 }))
}

fn person_def(profile: &Arc<ExpressionProfile>, expr: &str, result: &str) -> ExpressionDef {
    ExpressionDef::create(profile.clone(), expr, false, false, "Person", result, IndexMap::new())
        .unwrap()
}

#[test]
fn context_members_import_as_bare_identifiers() {
    let eng = compiler();
    let profile = person_profile("ctx");
    let expr = eng.compile(&person_def(&profile, "age + 1", "Int")).unwrap();
    assert_eq!(expr.eval(&alice()).unwrap(), Value::Int(31));

    // Explicit `_ctx` selection reaches the same members.
    let expr = eng.compile(&person_def(&profile, "_ctx.name", "String")).unwrap();
    assert_eq!(expr.eval(&alice()).unwrap(), Value::Str("alice".to_string()));
}

#[test]
fn macro_registered_methods_are_callable() {
    let eng = compiler();
    let profile = person_profile("macro");
    let expr = eng.compile(&person_def(&profile, "greet(\"hi\")", "String")).unwrap();
    assert_eq!(expr.eval(&alice()).unwrap(), Value::Str("hi, alice!".to_string()));
}

#[test]
fn setter_expressions_assign_through_the_context() {
    let eng = compiler();
    let profile = person_profile("setter");
    let setter = ExpressionDef::create(
        profile.clone(),
        "name",
        false,
        true,
        "Person",
        "String",
        IndexMap::new(),
    )
    .unwrap();
    let setter = eng.compile(&setter).unwrap();

    let ctx = alice();
    setter.assign(&ctx, Value::Str("bob".to_string())).unwrap();
    let getter = eng.compile(&person_def(&profile, "name", "String")).unwrap();
    assert_eq!(getter.eval(&ctx).unwrap(), Value::Str("bob".to_string()));
}

#[test]
fn setter_template_targets_its_single_hole() {
    let eng = compiler();
    let profile = person_profile("setter-template");
    let setter = ExpressionDef::create(
        profile,
        "${name}",
        true,
        true,
        "Person",
        "String",
        IndexMap::new(),
    )
    .unwrap();
    let setter = eng.compile(&setter).unwrap();
    let ctx = alice();
    setter.assign(&ctx, Value::Str("carol".to_string())).unwrap();
    assert_eq!(
        person_of(&ctx).unwrap().name.lock().unwrap().as_str(),
        "carol"
    );
}

#[test]
fn non_assignable_roots_are_rejected_in_setter_mode() {
    let eng = compiler();
    let profile = person_profile("setter-bad");
    for expr in ["age", "name + \"x\""] {
        let d = ExpressionDef::create(
            profile.clone(),
            expr,
            false,
            true,
            "Person",
            "String",
            IndexMap::new(),
        )
        .unwrap();
        match eng.compile(&d).unwrap_err() {
            ScexError::Compilation(report) => {
                assert!(
                    report.errors.iter().any(|e| e.message.contains("not assignable")
                        || e.kind == ErrorKind::Type),
                    "unexpected report: {:?}",
                    report.errors
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

#[test]
fn host_errors_surface_unchanged() {
    let mut reg = person_registry();
    reg.register_method(
        "Person",
        "explode",
        &[],
        "Int",
        Arc::new(|_, _| Err(EvalError::Host("boom".to_string()))),
    )
    .unwrap();
    let eng = ExpressionCompiler::new(Arc::new(reg), CompilerConfig::default()).unwrap();
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Person", |t| {
                t.member("explode");
            });
        })
        .build()
        .unwrap();
    let profile = Arc::new(ExpressionProfile::new("boom", SyntaxRules::default(), acl));
    let d = ExpressionDef::create(
        profile,
        "explode",
        false,
        false,
        "Person",
        "Int",
        IndexMap::new(),
    )
    .unwrap();
    match eng.compile(&d).unwrap().eval(&alice()) {
        Err(EvalError::Host(msg)) => assert_eq!(msg, "boom"),
        other => panic!("unexpected result: {:?}", other),
    }
}
