#![doc = include_str!("../README.md")]

mod acl;
mod acl_builder;
mod assemble;
mod ast;
mod builtins;
mod cache;
mod codegen;
mod compiler;
mod completer;
mod diskcache;
mod error;
mod lexer;
#[cfg(feature = "optimize")]
mod optimizer;
mod parser;
mod pos;
mod profile;
mod program;
mod registry;
mod sig;
mod syntax;
mod template;
mod typer;
mod types;
mod value;

pub use compiler::{CacheStats, CompiledExpr, CompilerConfig, ExpressionCompiler};
pub use completer::{Completer, Completion, MemberDescriptor, ParamDescriptor};
pub use profile::{
    ExpressionDef, ExpressionProfile, MemberAttributes, NamedSource, SymbolAttributes,
};

pub use acl::{
    AccessCandidate, AccessPattern, Acl, AclEntry, PatternArg, Policy, SymbolPattern, TypePattern,
    WildcardKind,
};
pub use acl_builder::{AclBuilder, PolicyBlock, TypeBlock};
pub use syntax::{SyntaxKind, SyntaxRules};

pub use error::{CompilationFailed, Diagnostic, ErrorKind, EvalError, ScexError};
pub use registry::{MemberKind, MemberMeta, MemberRef, NativeFn, Param, TypeRegistry};
pub use sig::SignatureRecord;
pub use template::PosMapping;
pub use types::{parse_type, TypeRep};
pub use value::{HostObject, ObjRef, Value};

// Re-export inventory and the #[member] macro for host crates that register
// members declaratively.
pub use inventory;
pub use scex_macros::member;
