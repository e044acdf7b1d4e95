use indexmap::IndexMap;
use scex::{
    AclBuilder, CompilerConfig, ErrorKind, ExpressionCompiler, ExpressionDef, ExpressionProfile,
    ScexError, SyntaxRules, TypeRegistry, Value,
};
use std::sync::Arc;

fn arithmetic_profile(name: &str) -> Arc<ExpressionProfile> {
    let acl = AclBuilder::new()
        .allow(|b| {
            b.on("Int", |t| {
                t.members_named("+").members_named("*");
            });
        })
        .build()
        .unwrap();
    Arc::new(ExpressionProfile::new(name, SyntaxRules::default(), acl))
}

fn compiler() -> ExpressionCompiler {
    ExpressionCompiler::new(Arc::new(TypeRegistry::new()), CompilerConfig::default()).unwrap()
}

fn template_def(profile: &Arc<ExpressionProfile>, text: &str) -> ExpressionDef {
    ExpressionDef::create(profile.clone(), text, true, false, "Unit", "String", IndexMap::new())
        .unwrap()
}

#[test]
fn template_concatenates_literals_and_holes() {
    let eng = compiler();
    let profile = arithmetic_profile("t1");
    let expr = eng.compile(&template_def(&profile, "x=${1+2}, y=${3*4}")).unwrap();
    assert_eq!(expr.eval(&Value::Unit).unwrap(), Value::Str("x=3, y=12".to_string()));
}

#[test]
fn template_glue_is_exempt_from_the_acl() {
    let eng = compiler();
    // The profile does not allow String.+, yet the synthesized
    // concatenation compiles; only hole contents are validated.
    let profile = arithmetic_profile("t2");
    assert!(eng.compile(&template_def(&profile, "a=${1+2} b=${3*4}")).is_ok());

    // A '+' written by the user inside a hole on strings is still denied.
    let d = template_def(&profile, "${\"a\" + \"b\"}");
    match eng.compile(&d).unwrap_err() {
        ScexError::Compilation(report) => {
            assert!(report.has(ErrorKind::AccessDenied));
            assert!(report.errors[0].message.contains("String.+"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn literal_only_template() {
    let eng = compiler();
    let profile = arithmetic_profile("t3");
    let expr = eng.compile(&template_def(&profile, "plain $5 \\$text")).unwrap();
    assert_eq!(expr.eval(&Value::Unit).unwrap(), Value::Str("plain $5 $text".to_string()));
}

#[test]
fn single_hole_passes_through_with_its_own_type() {
    let eng = compiler();
    let profile = arithmetic_profile("t4");
    // A lone `${expr}` keeps the hole's type instead of becoming a string.
    let d = ExpressionDef::create(
        profile.clone(),
        "${2 * 21}",
        true,
        false,
        "Unit",
        "Int",
        IndexMap::new(),
    )
    .unwrap();
    assert_eq!(eng.compile(&d).unwrap().eval(&Value::Unit).unwrap(), Value::Int(42));
}

#[test]
fn unbalanced_hole_is_a_parse_error_at_the_opener() {
    let profile = arithmetic_profile("t5");
    let err = ExpressionDef::create(
        profile,
        "x=${1+2",
        true,
        false,
        "Unit",
        "String",
        IndexMap::new(),
    )
    .unwrap_err();
    assert_eq!(err.errors.len(), 1);
    let d = &err.errors[0];
    assert_eq!(d.kind, ErrorKind::Parse);
    assert_eq!((d.line, d.column), (1, 3));
    assert!(d.message.contains("unbalanced"));
}

#[test]
fn hole_errors_remap_to_original_positions() {
    let eng = compiler();
    let profile = arithmetic_profile("t6");
    let d = template_def(&profile, "a=${1 ++ 2}");
    match eng.compile(&d).unwrap_err() {
        ScexError::Compilation(report) => {
            let diag = &report.errors[0];
            assert_eq!(diag.kind, ErrorKind::Parse);
            assert_eq!(diag.line, 1);
            // Points at the second '+' of the original template text.
            assert_eq!(diag.column, 8);
            assert_eq!(diag.line_text, "a=${1 ++ 2}");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn template_round_trips_variables() {
    let eng = compiler();
    let profile = arithmetic_profile("t7");
    let mut vars = IndexMap::new();
    vars.insert("n".to_string(), "Int".to_string());
    let d = ExpressionDef::create(
        profile,
        "n=${n}, n2=${n * n}",
        true,
        false,
        "Unit",
        "String",
        vars,
    )
    .unwrap();
    let expr = eng.compile(&d).unwrap();
    assert_eq!(
        expr.eval_with_vars(&Value::Unit, &[Value::Int(7)]).unwrap(),
        Value::Str("n=7, n2=49".to_string())
    );
}
