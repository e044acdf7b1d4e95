use crate::acl::{AccessCandidate, Acl};
use crate::assemble::{assemble, AssembledSource};
use crate::cache::{lock, ExprCache, ProfileUtils};
use crate::diskcache::DiskCache;
use crate::error::{CompilationFailed, Diagnostic, ErrorKind, EvalError, ScexError};
use crate::parser::Parser;
use crate::pos::{line_col, RawDiag};
use crate::profile::{ExpressionDef, ExpressionProfile};
use crate::program::Program;
use crate::registry::{MemberKind, TypeRegistry};
use crate::syntax::validate as validate_syntax;
use crate::template::PosMapping;
use crate::typer::{AccessValidator, TypedExpr, TypedKind, Typer, UserRange};
use crate::types::{parse_type, TypeRep};
use crate::value::Value;
use foldhash::{HashMap, HashMapExt};
use indexmap::IndexMap;
use log::debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Process-wide compiler configuration.
#[derive(Clone, Debug)]
pub struct CompilerConfig {
    /// Directory for the persistent artifact cache; `None` keeps generated
    /// units in memory only.
    pub classfile_dir: Option<PathBuf>,
    /// Host-controlled token appended to the cache version; bump it to
    /// force-invalidate a shared classfile directory.
    pub compat_token: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig { classfile_dir: None, compat_token: "0".to_string() }
    }
}

/// Monotonic cache-behavior counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Units compiled from source in this process.
    pub units_compiled: usize,
    /// Units reused from the on-disk cache after signature validation.
    pub disk_hits: usize,
}

/// Mutable compiler state, guarded by one mutex: the underlying front-end is
/// single-threaded, so every typing and code-generation step runs under it.
struct State {
    utils: HashMap<String, Arc<ProfileUtils>>,
    /// In-memory classfile directory, used when no disk directory is
    /// configured. Keyed by unit name.
    mem_dir: HashMap<String, StoredUnit>,
    disk: Option<DiskCache>,
}

/// One generated unit retained in the in-memory classfile directory;
/// dropped when its expression is evicted.
#[allow(dead_code)]
struct StoredUnit {
    source: String,
    program: Program,
}

pub(crate) struct Shared {
    pub registry: Arc<TypeRegistry>,
    #[allow(dead_code)]
    config: CompilerConfig,
    state: Mutex<State>,
    pub cache: ExprCache,
    units_compiled: AtomicUsize,
    disk_hits: AtomicUsize,
}

impl Shared {
    /// Fetches (compiling on first use) the utilities block of a profile,
    /// holding the compiler lock for the duration.
    pub(crate) fn utils_for(
        &self,
        profile: &Arc<ExpressionProfile>,
    ) -> Result<Arc<ProfileUtils>, ScexError> {
        let mut state = lock(&self.state);
        profile_utils(&self.registry, &mut state, profile)
    }
}

/// The expression compilation engine (C6): drives preprocessing, assembly,
/// validation, typing, code generation and both cache levels.
///
/// Cheap to clone handles are not provided; wrap it in an `Arc` if several
/// subsystems compile against the same registry. All compilation serializes
/// on one internal lock; evaluation of compiled expressions never takes it.
///
/// # Examples
///
/// ```
/// use scex::{AclBuilder, CompilerConfig, ExpressionCompiler, ExpressionDef,
///            ExpressionProfile, SyntaxRules, TypeRegistry, Value};
/// use std::sync::Arc;
///
/// let acl = AclBuilder::new()
///     .allow(|b| {
///         b.on("String", |t| {
///             t.member("length");
///         });
///     })
///     .build()
///     .unwrap();
/// let profile = Arc::new(ExpressionProfile::new("demo", SyntaxRules::default(), acl));
/// let compiler = ExpressionCompiler::new(
///     Arc::new(TypeRegistry::new()),
///     CompilerConfig::default(),
/// ).unwrap();
///
/// let def = ExpressionDef::create(
///     profile, "\"hello\".length", false, false, "Unit", "Int",
///     Default::default(),
/// ).unwrap();
/// let expr = compiler.compile(&def).unwrap();
/// assert_eq!(expr.eval(&Value::Unit).unwrap(), Value::Int(5));
/// ```
pub struct ExpressionCompiler {
    shared: Arc<Shared>,
}

impl ExpressionCompiler {
    /// Creates a compiler over a registry. Opening a configured classfile
    /// directory happens here; I/O failures propagate immediately.
    pub fn new(
        registry: Arc<TypeRegistry>,
        config: CompilerConfig,
    ) -> Result<ExpressionCompiler, ScexError> {
        let disk = match &config.classfile_dir {
            Some(dir) => Some(DiskCache::open(dir, &config.compat_token)?),
            None => None,
        };
        Ok(ExpressionCompiler {
            shared: Arc::new(Shared {
                registry,
                config,
                state: Mutex::new(State {
                    utils: HashMap::new(),
                    mem_dir: HashMap::new(),
                    disk,
                }),
                cache: ExprCache::new(),
                units_compiled: AtomicUsize::new(0),
                disk_hits: AtomicUsize::new(0),
            }),
        })
    }

    /// Compiles a definition into its cached callable. Identical definitions
    /// return the same wrapper while it is cached; concurrent identical
    /// requests coalesce on the compiler lock.
    pub fn compile(&self, def: &ExpressionDef) -> Result<Arc<CompiledExpr>, ScexError> {
        resolve_artifact(&self.shared, def)?;
        let mut outer = lock(&self.shared.cache.outer);
        if let Some(wrapper) = outer.get(def) {
            return Ok(wrapper.clone());
        }
        let wrapper = Arc::new(CompiledExpr {
            def: def.clone(),
            shared: Arc::downgrade(&self.shared),
            slot: Mutex::new(Weak::new()),
        });
        outer.insert(def.clone(), wrapper.clone());
        Ok(wrapper)
    }

    /// Evicts one definition's artifact. The callable wrapper, if any caller
    /// still holds it, transparently recompiles on its next evaluation.
    pub fn evict(&self, def: &ExpressionDef) {
        let mut state = lock(&self.shared.state);
        lock(&self.shared.cache.outer).remove(def);
        if let Some(unit) = self.shared.cache.evict(def) {
            debug!("evicting unit {}", unit);
            state.mem_dir.remove(&unit);
        }
    }

    /// Rebuilds the compiler and invalidates both cache levels atomically:
    /// per-profile utilities, in-memory classfiles and installed artifacts
    /// are all dropped. Outstanding callables re-resolve on next use.
    pub fn reset(&self) {
        let mut state = lock(&self.shared.state);
        state.utils.clear();
        state.mem_dir.clear();
        self.shared.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            units_compiled: self.shared.units_compiled.load(Ordering::Relaxed),
            disk_hits: self.shared.disk_hits.load(Ordering::Relaxed),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }

    /// A completion surface sharing this compiler's registry, caches and
    /// lock (C9).
    pub fn completer(
        &self,
        profile: Arc<ExpressionProfile>,
        template: bool,
        context_type: &str,
        result_type: &str,
        variable_types: IndexMap<String, String>,
    ) -> crate::completer::Completer {
        crate::completer::Completer::new(
            self.shared.clone(),
            profile,
            template,
            context_type.to_string(),
            result_type.to_string(),
            variable_types,
        )
    }
}

/// The access validator installed into the typer: consults the profile ACL
/// and renders the denial message of spec'd shape.
struct AclValidator<'a> {
    acl: &'a Acl,
    reg: &'a TypeRegistry,
}

impl AccessValidator for AclValidator<'_> {
    fn validate(&self, candidate: &AccessCandidate<'_>) -> Result<(), String> {
        if self.acl.allows(candidate, self.reg) {
            Ok(())
        } else {
            Err(format!(
                "member `{}` is not allowed on `{}`",
                candidate.member.fq_name(),
                candidate.qualifier.render()
            ))
        }
    }
}

/// Looks up or compiles the artifact for a definition. The fast path reads
/// the inner cache without the compiler lock; misses serialize on it and
/// re-check, so concurrent identical requests compile once.
pub(crate) fn resolve_artifact(
    shared: &Arc<Shared>,
    def: &ExpressionDef,
) -> Result<Arc<crate::program::LinkedProgram>, ScexError> {
    if let Some(artifact) = shared.cache.artifact(def) {
        return Ok(artifact);
    }
    let mut state = lock(&shared.state);
    if let Some(artifact) = shared.cache.artifact(def) {
        return Ok(artifact);
    }
    let utils = profile_utils(&shared.registry, &mut state, &def.profile)?;
    let unit = def.unit_name();
    let reused = state.disk.as_ref().and_then(|d| d.load(&unit, &shared.registry));
    let program = match reused {
        Some(program) => {
            shared.disk_hits.fetch_add(1, Ordering::Relaxed);
            program
        }
        None => {
            let (program, source) = compile_unit(&shared.registry, &utils, def)?;
            shared.units_compiled.fetch_add(1, Ordering::Relaxed);
            match &state.disk {
                Some(disk) => disk.store(&unit, &source, &program)?,
                None => {
                    state.mem_dir.insert(unit.clone(), StoredUnit { source, program: program.clone() });
                }
            }
            program
        }
    };
    let linked = Arc::new(program.link(&shared.registry)?);
    shared.cache.install(def.clone(), linked.clone(), unit);
    Ok(linked)
}

/// Compiles (or fetches) the utilities block of a profile. Utilities are
/// context-independent `val` definitions typed once per profile identity.
fn profile_utils(
    reg: &TypeRegistry,
    state: &mut State,
    profile: &Arc<ExpressionProfile>,
) -> Result<Arc<ProfileUtils>, ScexError> {
    if let Some(utils) = state.utils.get(&profile.name) {
        return Ok(utils.clone());
    }
    let utils = match &profile.utilities {
        None => Arc::new(ProfileUtils::empty()),
        Some(source) => {
            debug!("compiling utilities `{}` of profile `{}`", source.name, profile.name);
            let defs = Parser::new(&source.code)
                .and_then(|p| p.parse_defs())
                .map_err(|d| utilities_failure(&source.code, d))?;
            let mut typer = Typer::new(
                reg,
                TypeRep::named("Unit"),
                Vec::new(),
                Vec::new(),
                None,
                None,
            );
            let typed = typer.type_defs(&defs);
            if !typer.diags.is_empty() {
                let errors =
                    typer.diags.into_iter().map(|d| plain_diag(&source.code, d)).collect();
                return Err(CompilationFailed { errors }.into());
            }
            Arc::new(ProfileUtils { defs: typed })
        }
    };
    state.utils.insert(profile.name.clone(), utils.clone());
    Ok(utils)
}

fn utilities_failure(code: &str, d: RawDiag) -> ScexError {
    CompilationFailed { errors: vec![plain_diag(code, d)] }.into()
}

/// A diagnostic positioned directly against one source text, with no
/// template remapping (utilities and header-internal errors).
fn plain_diag(text: &str, d: RawDiag) -> Diagnostic {
    let (line, column, line_text) = line_col(text, d.span.start);
    Diagnostic { kind: d.kind, message: d.message, line, column, line_text }
}

/// Runs one definition through the full front-end (C1 output assumed in the
/// def): assemble, parse, syntax-validate, type with the ACL hook, lower,
/// optimize. Returns the program and the generated source.
pub(crate) fn compile_unit(
    reg: &TypeRegistry,
    utils: &ProfileUtils,
    def: &ExpressionDef,
) -> Result<(Program, String), ScexError> {
    let assembled = assemble(def);
    debug!("compiling unit {}", assembled.unit_name);

    let unit = Parser::new(&assembled.source)
        .and_then(|p| p.parse_unit())
        .map_err(|d| compilation_failure(vec![d], &assembled, def))?;

    let mut diags: Vec<RawDiag> = Vec::new();

    // Host-supplied type strings.
    let ctx_type = parse_declared_type(&def.context_type, &mut diags);
    let result_type = parse_declared_type(&def.result_type, &mut diags);
    let mut vars: Vec<(String, TypeRep)> = Vec::with_capacity(def.variable_types.len());
    for (name, ty) in &def.variable_types {
        vars.push((name.clone(), parse_declared_type(ty, &mut diags)));
    }
    if !diags.is_empty() {
        return Err(compilation_failure(diags, &assembled, def));
    }

    // C3: the user expression only; header and utilities are profile code.
    diags.extend(validate_syntax(&unit.body, &def.profile.syntax));

    let validator = AclValidator { acl: &def.profile.acl, reg };
    let user_range = UserRange { user_start: assembled.expr_offset, mapping: &def.mapping };
    let mut typer = Typer::new(
        reg,
        ctx_type,
        vars.clone(),
        utils.bindings(),
        Some(&validator),
        Some(user_range),
    );
    let (header_defs, body) = typer.type_unit(&unit);
    diags.extend(typer.diags);

    if diags.is_empty() {
        check_result(reg, &body, &result_type, def, &mut diags);
    }
    if !diags.is_empty() {
        return Err(compilation_failure(diags, &assembled, def));
    }

    let program = crate::codegen::Codegen::new(reg).generate(
        assembled.unit_name.clone(),
        &utils.defs,
        &header_defs,
        &body,
        vars.into_iter().map(|(n, _)| n).collect(),
        result_type,
        def.setter,
    )?;
    #[cfg(feature = "optimize")]
    let program = crate::optimizer::optimize(program);
    let program = program.prune();
    Ok((program, assembled.source))
}

fn parse_declared_type(text: &str, diags: &mut Vec<RawDiag>) -> TypeRep {
    match parse_type(text) {
        Some(ty) => ty,
        None => {
            diags.push(RawDiag::new(
                ErrorKind::CompilerFailure,
                crate::pos::Span::default(),
                format!("malformed type representation: {}", text),
            ));
            TypeRep::named("Any")
        }
    }
}

/// Result conformance, plus setter-mode assignability of the root.
fn check_result(
    reg: &TypeRegistry,
    body: &TypedExpr,
    result_type: &TypeRep,
    def: &ExpressionDef,
    diags: &mut Vec<RawDiag>,
) {
    if def.setter {
        let assignable = matches!(
            &body.kind,
            TypedKind::Call { member, args, via: None, .. }
                if member.kind == MemberKind::Field && member.assignable && args.is_empty()
        );
        if !assignable {
            diags.push(RawDiag::new(
                ErrorKind::SyntaxForbidden,
                body.span,
                "expression is not assignable",
            ));
            return;
        }
        if !reg.is_subtype(&body.ty, result_type) {
            diags.push(RawDiag::new(
                ErrorKind::Type,
                body.span,
                format!("type mismatch: expected {}, found {}", result_type, body.ty),
            ));
        }
        return;
    }
    if let TypedKind::Module(name) = &body.kind {
        diags.push(RawDiag::new(
            ErrorKind::Type,
            body.span,
            format!("module `{}` is not a value", name),
        ));
        return;
    }
    if !reg.is_subtype(&body.ty, result_type) {
        diags.push(RawDiag::new(
            ErrorKind::Type,
            body.span,
            format!("type mismatch: expected {}, found {}", result_type, body.ty),
        ));
    }
}

/// Remaps raw diagnostics to the original expression text (C6 step 3) and
/// aggregates them into one report.
fn compilation_failure(
    mut diags: Vec<RawDiag>,
    assembled: &AssembledSource,
    def: &ExpressionDef,
) -> ScexError {
    diags.sort_by_key(|d| d.span.start);
    let errors = diags
        .into_iter()
        .map(|d| remap_diag(d, assembled.expr_offset, &def.mapping, &def.original, &assembled.source))
        .collect();
    CompilationFailed { errors }.into()
}

fn remap_diag(
    d: RawDiag,
    expr_offset: usize,
    mapping: &PosMapping,
    original: &str,
    assembled: &str,
) -> Diagnostic {
    let (line, column, line_text) = if d.span.start >= expr_offset {
        let proc = d.span.start - expr_offset;
        let orig = mapping.to_original_nearest(proc);
        line_col(original, orig)
    } else {
        // Header diagnostics position against the generated unit.
        line_col(assembled, d.span.start)
    };
    Diagnostic { kind: d.kind, message: d.message, line, column, line_text }
}

/// A compiled, repeatedly invocable expression.
///
/// The wrapper holds only a weak reference to the linked artifact; the
/// artifact cache owns it. When the artifact has been evicted (or the
/// compiler reset), the next evaluation transparently re-resolves through
/// the cache, recompiling if necessary — callers never observe a cache miss.
pub struct CompiledExpr {
    def: ExpressionDef,
    shared: Weak<Shared>,
    slot: Mutex<Weak<crate::program::LinkedProgram>>,
}

impl CompiledExpr {
    /// The free variables of the expression, in the order
    /// [`CompiledExpr::eval_with_vars`] expects their values.
    pub fn vars(&self) -> Vec<&str> {
        self.def.variable_types.keys().map(|k| k.as_str()).collect()
    }

    /// Evaluates a variable-free expression against a context value.
    pub fn eval(&self, ctx: &Value) -> Result<Value, EvalError> {
        self.eval_with_vars(ctx, &[])
    }

    /// Evaluates with free-variable values in `vars()` order.
    ///
    /// # Errors
    /// - `EvalError::ValuesLen` if too few values are supplied.
    /// - `EvalError::Reresolve` if the artifact was evicted and the registry
    ///   no longer compiles the expression.
    pub fn eval_with_vars(&self, ctx: &Value, values: &[Value]) -> Result<Value, EvalError> {
        self.resolve()?.eval(ctx, values)
    }

    /// Assigns to a setter-mode expression: `(context, value) -> unit`.
    pub fn assign(&self, ctx: &Value, value: Value) -> Result<(), EvalError> {
        self.assign_with_vars(ctx, &[], value)
    }

    pub fn assign_with_vars(
        &self,
        ctx: &Value,
        values: &[Value],
        value: Value,
    ) -> Result<(), EvalError> {
        let linked = self.resolve()?;
        if !linked.program.setter {
            return Err(EvalError::Internal("expression is not a setter".into()));
        }
        linked.assign(ctx, values, value)
    }

    fn resolve(&self) -> Result<Arc<crate::program::LinkedProgram>, EvalError> {
        if let Some(artifact) = lock(&self.slot).upgrade() {
            return Ok(artifact);
        }
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| EvalError::Reresolve("compiler was dropped".into()))?;
        let artifact =
            resolve_artifact(&shared, &self.def).map_err(|e| EvalError::Reresolve(e.to_string()))?;
        *lock(&self.slot) = Arc::downgrade(&artifact);
        Ok(artifact)
    }
}

impl std::fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpr").field("def", &self.def).finish()
    }
}
