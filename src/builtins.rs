use crate::error::EvalError;
use crate::registry::{NativeFn, TypeRegistry};
use crate::value::Value;
use std::sync::Arc;

fn native<F>(f: F) -> NativeFn
where
    F: Fn(&Value, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn int(v: &Value) -> Result<i64, EvalError> {
    i64::try_from(v)
}

fn dbl(v: &Value) -> Result<f64, EvalError> {
    f64::try_from(v)
}

fn int_bin(
    reg: &mut TypeRegistry,
    name: &str,
    f: impl Fn(i64, i64) -> Result<i64, EvalError> + Send + Sync + 'static,
) {
    reg.register_method(
        "Int",
        name,
        &[("that", "Int")],
        "Int",
        native(move |r, a| Ok(Value::Int(f(int(r)?, int(&a[0])?)?))),
    )
    .expect("builtin registration");
}

fn int_cmp(reg: &mut TypeRegistry, name: &str, f: impl Fn(i64, i64) -> bool + Send + Sync + 'static) {
    reg.register_method(
        "Int",
        name,
        &[("that", "Int")],
        "Boolean",
        native(move |r, a| Ok(Value::Bool(f(int(r)?, int(&a[0])?)))),
    )
    .expect("builtin registration");
}

fn dbl_bin(reg: &mut TypeRegistry, name: &str, f: impl Fn(f64, f64) -> f64 + Send + Sync + 'static) {
    reg.register_method(
        "Double",
        name,
        &[("that", "Double")],
        "Double",
        native(move |r, a| Ok(Value::Double(f(dbl(r)?, dbl(&a[0])?)))),
    )
    .expect("builtin registration");
}

fn dbl_cmp(
    reg: &mut TypeRegistry,
    name: &str,
    f: impl Fn(f64, f64) -> bool + Send + Sync + 'static,
) {
    reg.register_method(
        "Double",
        name,
        &[("that", "Double")],
        "Boolean",
        native(move |r, a| Ok(Value::Bool(f(dbl(r)?, dbl(&a[0])?)))),
    )
    .expect("builtin registration");
}

fn math_static(
    reg: &mut TypeRegistry,
    name: &str,
    params: &[(&str, &str)],
    f: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
) {
    reg.register_static("Math", name, params, "Double", native(move |_, a| f(a)))
        .expect("builtin registration");
}

/// Populates a fresh registry with the builtin types, their members, and the
/// `Math` module. Registration of builtins cannot fail; the `expect`s guard
/// against duplicate declarations in this file only.
pub(crate) fn install(reg: &mut TypeRegistry) {
    for name in ["Any", "Unit", "Boolean", "Int", "Double", "Char", "String", "Math"] {
        reg.register_type(name, None).expect("builtin type");
    }

    // Any: identity comparisons and rendering. `==`/`!=` are declared here
    // once; every qualifier reaches them through the subtype chain.
    reg.register_method(
        "Any",
        "==",
        &[("that", "Any")],
        "Boolean",
        native(|r, a| Ok(Value::Bool(r == &a[0]))),
    )
    .expect("builtin registration");
    reg.register_method(
        "Any",
        "!=",
        &[("that", "Any")],
        "Boolean",
        native(|r, a| Ok(Value::Bool(r != &a[0]))),
    )
    .expect("builtin registration");
    reg.register_method(
        "Any",
        "toString",
        &[],
        "String",
        native(|r, _| Ok(Value::Str(r.display_string()))),
    )
    .expect("builtin registration");

    // Boolean. `&&` and `||` are short-circuited by codegen; the native
    // implementations exist for folding and completion.
    reg.register_method(
        "Boolean",
        "&&",
        &[("that", "Boolean")],
        "Boolean",
        native(|r, a| Ok(Value::Bool(bool::try_from(r)? && bool::try_from(&a[0])?))),
    )
    .expect("builtin registration");
    reg.register_method(
        "Boolean",
        "||",
        &[("that", "Boolean")],
        "Boolean",
        native(|r, a| Ok(Value::Bool(bool::try_from(r)? || bool::try_from(&a[0])?))),
    )
    .expect("builtin registration");
    reg.register_method(
        "Boolean",
        "unary_!",
        &[],
        "Boolean",
        native(|r, _| Ok(Value::Bool(!bool::try_from(r)?))),
    )
    .expect("builtin registration");

    // Int.
    int_bin(reg, "+", |a, b| {
        a.checked_add(b).ok_or_else(|| EvalError::Arithmetic("integer overflow".into()))
    });
    int_bin(reg, "-", |a, b| {
        a.checked_sub(b).ok_or_else(|| EvalError::Arithmetic("integer overflow".into()))
    });
    int_bin(reg, "*", |a, b| {
        a.checked_mul(b).ok_or_else(|| EvalError::Arithmetic("integer overflow".into()))
    });
    int_bin(reg, "/", |a, b| {
        a.checked_div(b).ok_or_else(|| EvalError::Arithmetic("division by zero".into()))
    });
    int_bin(reg, "%", |a, b| {
        a.checked_rem(b).ok_or_else(|| EvalError::Arithmetic("division by zero".into()))
    });
    int_bin(reg, "min", |a, b| Ok(a.min(b)));
    int_bin(reg, "max", |a, b| Ok(a.max(b)));
    int_cmp(reg, "<", |a, b| a < b);
    int_cmp(reg, "<=", |a, b| a <= b);
    int_cmp(reg, ">", |a, b| a > b);
    int_cmp(reg, ">=", |a, b| a >= b);
    reg.register_method(
        "Int",
        "unary_-",
        &[],
        "Int",
        native(|r, _| {
            int(r)?
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::Arithmetic("integer overflow".into()))
        }),
    )
    .expect("builtin registration");
    reg.register_method(
        "Int",
        "toDouble",
        &[],
        "Double",
        native(|r, _| Ok(Value::Double(int(r)? as f64))),
    )
    .expect("builtin registration");

    // Double.
    dbl_bin(reg, "+", |a, b| a + b);
    dbl_bin(reg, "-", |a, b| a - b);
    dbl_bin(reg, "*", |a, b| a * b);
    dbl_bin(reg, "/", |a, b| a / b);
    dbl_bin(reg, "min", f64::min);
    dbl_bin(reg, "max", f64::max);
    dbl_cmp(reg, "<", |a, b| a < b);
    dbl_cmp(reg, "<=", |a, b| a <= b);
    dbl_cmp(reg, ">", |a, b| a > b);
    dbl_cmp(reg, ">=", |a, b| a >= b);
    reg.register_method(
        "Double",
        "unary_-",
        &[],
        "Double",
        native(|r, _| Ok(Value::Double(-dbl(r)?))),
    )
    .expect("builtin registration");
    reg.register_method(
        "Double",
        "toInt",
        &[],
        "Int",
        native(|r, _| Ok(Value::Int(dbl(r)? as i64))),
    )
    .expect("builtin registration");

    // Char.
    reg.register_method(
        "Char",
        "toInt",
        &[],
        "Int",
        native(|r, _| Ok(Value::Int(char::try_from(r)? as i64))),
    )
    .expect("builtin registration");

    // String. Concatenation accepts `Any` and renders it, so templates can
    // splice non-string holes.
    reg.register_method(
        "String",
        "+",
        &[("that", "Any")],
        "String",
        native(|r, a| {
            let mut s = String::try_from(r)?;
            s.push_str(&a[0].display_string());
            Ok(Value::Str(s))
        }),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "length",
        &[],
        "Int",
        native(|r, _| Ok(Value::Int(String::try_from(r)?.chars().count() as i64))),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "charAt",
        &[("index", "Int")],
        "Char",
        native(|r, a| {
            let s = String::try_from(r)?;
            let i = int(&a[0])?;
            s.chars()
                .nth(usize::try_from(i).ok().ok_or_else(|| {
                    EvalError::Arithmetic(format!("string index out of range: {}", i))
                })?)
                .map(Value::Char)
                .ok_or_else(|| EvalError::Arithmetic(format!("string index out of range: {}", i)))
        }),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "substring",
        &[("begin", "Int"), ("end", "Int")],
        "String",
        native(|r, a| {
            let s = String::try_from(r)?;
            let chars: Vec<char> = s.chars().collect();
            let begin = int(&a[0])?;
            let end = int(&a[1])?;
            let valid = 0 <= begin && begin <= end && (end as usize) <= chars.len();
            if !valid {
                return Err(EvalError::Arithmetic(format!(
                    "substring range out of bounds: {}..{}",
                    begin, end
                )));
            }
            Ok(Value::Str(chars[begin as usize..end as usize].iter().collect()))
        }),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "toUpperCase",
        &[],
        "String",
        native(|r, _| Ok(Value::Str(String::try_from(r)?.to_uppercase()))),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "toLowerCase",
        &[],
        "String",
        native(|r, _| Ok(Value::Str(String::try_from(r)?.to_lowercase()))),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "trim",
        &[],
        "String",
        native(|r, _| Ok(Value::Str(String::try_from(r)?.trim().to_string()))),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "isEmpty",
        &[],
        "Boolean",
        native(|r, _| Ok(Value::Bool(String::try_from(r)?.is_empty()))),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "contains",
        &[("s", "String")],
        "Boolean",
        native(|r, a| Ok(Value::Bool(String::try_from(r)?.contains(&String::try_from(&a[0])?)))),
    )
    .expect("builtin registration");
    reg.register_method(
        "String",
        "startsWith",
        &[("prefix", "String")],
        "Boolean",
        native(|r, a| {
            Ok(Value::Bool(String::try_from(r)?.starts_with(&String::try_from(&a[0])?)))
        }),
    )
    .expect("builtin registration");

    // Math module statics.
    math_static(reg, "abs", &[("x", "Double")], |a| Ok(Value::Double(dbl(&a[0])?.abs())));
    math_static(reg, "max", &[("a", "Double"), ("b", "Double")], |a| {
        Ok(Value::Double(dbl(&a[0])?.max(dbl(&a[1])?)))
    });
    math_static(reg, "min", &[("a", "Double"), ("b", "Double")], |a| {
        Ok(Value::Double(dbl(&a[0])?.min(dbl(&a[1])?)))
    });
    math_static(reg, "pow", &[("base", "Double"), ("exp", "Double")], |a| {
        Ok(Value::Double(dbl(&a[0])?.powf(dbl(&a[1])?)))
    });
    math_static(reg, "floor", &[("x", "Double")], |a| Ok(Value::Double(dbl(&a[0])?.floor())));
    math_static(reg, "ceil", &[("x", "Double")], |a| Ok(Value::Double(dbl(&a[0])?.ceil())));
}
