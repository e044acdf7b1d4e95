use thiserror::Error;

/// The kind of a compile diagnostic, in pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Template holes, unbalanced braces, malformed tokens.
    Parse,
    /// A syntactic construct outside the profile's allowed shape set.
    SyntaxForbidden,
    /// A member access rejected by the profile's access-control list.
    AccessDenied,
    /// A typing error from the expression front-end.
    Type,
    /// An unexpected internal compiler condition.
    CompilerFailure,
}

/// One compile diagnostic, positioned against the original expression text.
///
/// `line` and `column` are 1-based; `line_text` is the source line the
/// diagnostic points into, after remapping through the template mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub line_text: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Aggregate of every diagnostic produced by one compilation.
#[derive(Debug, Error)]
#[error("compilation failed with {} error(s); first: {}", errors.len(), errors.first().map(|e| e.to_string()).unwrap_or_default())]
pub struct CompilationFailed {
    pub errors: Vec<Diagnostic>,
}

impl CompilationFailed {
    /// True if any diagnostic has the given kind.
    pub fn has(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

/// The primary error type for the `scex` crate.
#[derive(Debug, Error)]
pub enum ScexError {
    /// The expression did not compile; carries the remapped diagnostics.
    #[error(transparent)]
    Compilation(#[from] CompilationFailed),
    /// Classfile-directory creation or artifact I/O failed. Propagates
    /// immediately, never aggregated into a compile report.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// An attempt was made to register a symbol that conflicts with an
    /// existing registration.
    #[error("registration error: {0}")]
    Registration(String),
    /// An unexpected internal error. These often indicate a bug in `scex`.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Runtime errors produced while evaluating a compiled expression.
///
/// Errors raised by host-registered members are surfaced unchanged through
/// [`EvalError::Host`].
#[derive(Debug, Error)]
pub enum EvalError {
    /// The number of variable values did not match the expression's variables.
    #[error("values length mismatch: expected {expected}, got {got}")]
    ValuesLen { expected: usize, got: usize },
    /// A value had a different runtime shape than its static type promised.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    /// Integer division by zero, overflow, and similar arithmetic conditions.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    /// An error raised by a host-registered member implementation.
    #[error("{0}")]
    Host(String),
    /// An evicted callable failed to re-resolve through the cache.
    #[error("expression re-resolution failed: {0}")]
    Reresolve(String),
    /// An unexpected internal evaluation error.
    #[error("internal evaluation error: {0}")]
    Internal(String),
}
