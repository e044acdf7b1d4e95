use crate::error::EvalError;
use std::any::Any;
use std::sync::Arc;

/// A host object reference. Hosts implement [`HostObject`] for context types
/// and any other object types they register with the type registry.
pub type ObjRef = Arc<dyn HostObject>;

/// Trait implemented by host types that participate in expressions.
///
/// Member implementations downcast through [`HostObject::as_any`]; mutation
/// (settable fields) is the host's concern and goes through interior
/// mutability.
pub trait HostObject: Send + Sync {
    /// The registered type name of this object.
    fn type_name(&self) -> &str;
    /// Downcast support for member implementations.
    fn as_any(&self) -> &dyn Any;
}

/// A runtime value flowing through compiled expressions.
#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Double(f64),
    Char(char),
    Str(String),
    Obj(ObjRef),
}

impl Value {
    /// The runtime type name of this value, as the registry knows it.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Unit => "Unit",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Int",
            Value::Double(_) => "Double",
            Value::Char(_) => "Char",
            Value::Str(_) => "String",
            Value::Obj(o) => o.type_name(),
        }
    }

    /// Rendering used by `toString` and by string concatenation of `Any`.
    pub fn display_string(&self) -> String {
        match self {
            Value::Unit => "()".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    format!("{:.1}", d)
                } else {
                    d.to_string()
                }
            }
            Value::Char(c) => c.to_string(),
            Value::Str(s) => s.clone(),
            Value::Obj(o) => format!("<{}>", o.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Host objects compare by identity.
            (Value::Obj(a), Value::Obj(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Obj(o) => write!(f, "Obj(<{}>)", o.type_name()),
            Value::Unit => write!(f, "Unit"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Double(d) => write!(f, "Double({})", d),
            Value::Char(c) => write!(f, "Char({:?})", c),
        }
    }
}

fn mismatch(expected: &str, found: &Value) -> EvalError {
    EvalError::TypeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

impl TryFrom<&Value> for i64 {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<i64, EvalError> {
        match v {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch("Int", other)),
        }
    }
}

impl TryFrom<&Value> for f64 {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<f64, EvalError> {
        match v {
            Value::Double(d) => Ok(*d),
            other => Err(mismatch("Double", other)),
        }
    }
}

impl TryFrom<&Value> for bool {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<bool, EvalError> {
        match v {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("Boolean", other)),
        }
    }
}

impl TryFrom<&Value> for char {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<char, EvalError> {
        match v {
            Value::Char(c) => Ok(*c),
            other => Err(mismatch("Char", other)),
        }
    }
}

impl TryFrom<&Value> for String {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<String, EvalError> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            other => Err(mismatch("String", other)),
        }
    }
}

impl TryFrom<&Value> for () {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<(), EvalError> {
        match v {
            Value::Unit => Ok(()),
            other => Err(mismatch("Unit", other)),
        }
    }
}

impl TryFrom<&Value> for Value {
    type Error = EvalError;
    fn try_from(v: &Value) -> Result<Value, EvalError> {
        Ok(v.clone())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Value {
        Value::Char(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Value {
        Value::Unit
    }
}

impl From<ObjRef> for Value {
    fn from(v: ObjRef) -> Value {
        Value::Obj(v)
    }
}
