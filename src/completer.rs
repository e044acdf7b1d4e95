use crate::acl::AccessCandidate;
use crate::ast::Expr;
use crate::compiler::{compile_unit, Shared};
use crate::error::{Diagnostic, ErrorKind, ScexError};
use crate::parser::Parser;
use crate::profile::{ExpressionDef, ExpressionProfile};
use crate::registry::MemberRef;
use crate::typer::Typer;
use crate::types::TypeRep;
use foldhash::{HashMap, HashMapExt};
use indexmap::IndexMap;
use log::debug;
use std::sync::{Arc, Mutex};

/// One parameter of a completion entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    pub type_name: String,
}

/// One member offered by the completer: decoded name, parameter list,
/// rendered result type, whether an implicit view contributes it, and the
/// profile's attached documentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub params: Vec<ParamDescriptor>,
    pub result_type: String,
    pub via_implicit: bool,
    pub documentation: Option<String>,
}

impl MemberDescriptor {
    /// `charAt(index: Int): Char`-style rendering; parameterless entries
    /// render as `length: Int`.
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            format!("{}: {}", self.name, self.result_type)
        } else {
            let params = self
                .params
                .iter()
                .map(|p| format!("{}: {}", p.name, p.type_name))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({}): {}", self.name, params, self.result_type)
        }
    }
}

/// A completion answer: the permitted members plus whatever diagnostics the
/// input produced. The completer never raises on invalid input.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    pub members: Vec<MemberDescriptor>,
    pub errors: Vec<Diagnostic>,
}

/// The interactive completion surface (C9), sharing the compiler's registry
/// and per-profile utilities. One completer is shaped like one compile
/// request: profile, template flag, context type, result type and free
/// variables.
pub struct Completer {
    shared: Arc<Shared>,
    profile: Arc<ExpressionProfile>,
    template: bool,
    context_type: String,
    result_type: String,
    variable_types: IndexMap<String, String>,
    /// Member sets are cached per qualifier type; the ACL and attribute
    /// table are fixed for the completer's lifetime.
    type_cache: Mutex<HashMap<TypeRep, Arc<Vec<MemberDescriptor>>>>,
}

impl Completer {
    pub(crate) fn new(
        shared: Arc<Shared>,
        profile: Arc<ExpressionProfile>,
        template: bool,
        context_type: String,
        result_type: String,
        variable_types: IndexMap<String, String>,
    ) -> Completer {
        Completer {
            shared,
            profile,
            template,
            context_type,
            result_type,
            variable_types,
            type_cache: Mutex::new(HashMap::new()),
        }
    }

    fn make_def(&self, expression: &str) -> Result<ExpressionDef, Vec<Diagnostic>> {
        ExpressionDef::create(
            self.profile.clone(),
            expression,
            self.template,
            false,
            &self.context_type,
            &self.result_type,
            self.variable_types.clone(),
        )
        .map_err(|f| f.errors)
    }

    /// Assembles and types the expression, returning its diagnostics.
    pub fn get_errors(&self, expression: &str) -> Vec<Diagnostic> {
        let def = match self.make_def(expression) {
            Ok(def) => def,
            Err(errors) => return errors,
        };
        let utils = match self.shared.utils_for(&self.profile) {
            Ok(utils) => utils,
            Err(e) => return internal_diags(e),
        };
        match compile_unit(&self.shared.registry, &utils, &def) {
            Ok(_) => Vec::new(),
            Err(ScexError::Compilation(f)) => f.errors,
            Err(other) => internal_diags(other),
        }
    }

    /// Every term in scope: imported context members the ACL permits,
    /// declared free variables, the profile's utility and header bindings,
    /// and modules whose members the ACL references. Internal symbols are
    /// excluded.
    pub fn get_scope_completion(&self, expression: &str, _pos: usize) -> Completion {
        let reg = &self.shared.registry;
        let mut members = Vec::new();
        let mut errors = Vec::new();

        let ctx_type = match crate::types::parse_type(&self.context_type) {
            Some(ty) => ty,
            None => return Completion::default(),
        };
        for member in reg.visible_members(&ctx_type) {
            let candidate =
                AccessCandidate { qualifier: &ctx_type, member: &member, via_implicit: None };
            if self.profile.acl.allows(&candidate, reg) {
                members.push(self.describe(&member, false));
            }
        }
        for (name, ty) in &self.variable_types {
            members.push(MemberDescriptor {
                name: name.clone(),
                params: Vec::new(),
                result_type: ty.clone(),
                via_implicit: false,
                documentation: None,
            });
        }
        match self.shared.utils_for(&self.profile) {
            Ok(utils) => {
                for (name, typed) in &utils.defs {
                    members.push(MemberDescriptor {
                        name: name.clone(),
                        params: Vec::new(),
                        result_type: typed.ty.render(),
                        via_implicit: false,
                        documentation: None,
                    });
                }
            }
            Err(e) => errors.extend(internal_diags(e)),
        }
        if let Ok(def) = self.make_def(expression) {
            if let Some(header) = self.typed_header_bindings(&def) {
                for (name, ty) in header {
                    members.push(MemberDescriptor {
                        name,
                        params: Vec::new(),
                        result_type: ty.render(),
                        via_implicit: false,
                        documentation: None,
                    });
                }
            }
        }
        for module in self.profile.acl.module_refs() {
            members.push(MemberDescriptor {
                name: module.to_string(),
                params: Vec::new(),
                result_type: module.to_string(),
                via_implicit: false,
                documentation: None,
            });
        }
        Completion { members, errors }
    }

    /// Members legal after the `.` at `pos` (an offset into the original
    /// expression text): the qualifier's own members plus those added by
    /// applicable implicit views, filtered through the ACL.
    pub fn get_type_completion(&self, expression: &str, pos: usize) -> Completion {
        let def = match self.make_def(expression) {
            Ok(def) => def,
            Err(errors) => return Completion { members: Vec::new(), errors },
        };
        let proc_pos = def.mapping.to_processed(pos);
        let Some(qualifier) = find_qualifier(&def.expression, proc_pos) else {
            return Completion { members: Vec::new(), errors: self.get_errors(expression) };
        };
        let Some(ty) = self.type_qualifier(&def, &qualifier) else {
            return Completion { members: Vec::new(), errors: self.get_errors(expression) };
        };
        Completion { members: self.members_of(&ty), errors: Vec::new() }
    }

    /// Types the extracted qualifier in the same scope a real compile would
    /// see (utilities, header bindings, variables, imported context
    /// members). Access validation does not apply here; the offered member
    /// set is filtered instead.
    fn type_qualifier(&self, def: &ExpressionDef, qualifier: &Expr) -> Option<TypeRep> {
        let reg = &self.shared.registry;
        let utils = self.shared.utils_for(&self.profile).ok()?;
        let ctx_type = crate::types::parse_type(&def.context_type)?;
        let mut vars = Vec::new();
        for (name, ty) in &def.variable_types {
            vars.push((name.clone(), crate::types::parse_type(ty)?));
        }
        let mut locals = utils.bindings();
        if let Some(header) = self.typed_header_bindings(def) {
            locals.extend(header);
        }
        let mut typer = Typer::new(reg, ctx_type, vars, locals, None, None);
        let typed = typer.type_expr(qualifier);
        if typer.diags.is_empty() {
            Some(typed.ty)
        } else {
            None
        }
    }

    fn typed_header_bindings(&self, def: &ExpressionDef) -> Option<Vec<(String, TypeRep)>> {
        if def.header.trim().is_empty() {
            return Some(Vec::new());
        }
        let reg = &self.shared.registry;
        let utils = self.shared.utils_for(&self.profile).ok()?;
        let defs = Parser::new(&def.header).ok()?.parse_defs().ok()?;
        let ctx_type = crate::types::parse_type(&def.context_type)?;
        let mut typer = Typer::new(reg, ctx_type, Vec::new(), utils.bindings(), None, None);
        let typed = typer.type_defs(&defs);
        if !typer.diags.is_empty() {
            return None;
        }
        Some(typed.into_iter().map(|(name, t)| (name, t.ty)).collect())
    }

    fn members_of(&self, ty: &TypeRep) -> Vec<MemberDescriptor> {
        if let Some(cached) = crate::cache::lock(&self.type_cache).get(ty) {
            debug!("type completion cache hit for {}", ty);
            return cached.as_ref().clone();
        }
        let reg = &self.shared.registry;
        let mut out = Vec::new();
        for member in reg.visible_members(ty) {
            let candidate = AccessCandidate { qualifier: ty, member: &member, via_implicit: None };
            if self.profile.acl.allows(&candidate, reg) {
                out.push(self.describe(&member, false));
            }
        }
        for (view, member) in reg.view_members(ty) {
            let candidate =
                AccessCandidate { qualifier: ty, member: &member, via_implicit: Some(&view) };
            if self.profile.acl.allows(&candidate, reg) {
                out.push(self.describe(&member, true));
            }
        }
        crate::cache::lock(&self.type_cache).insert(ty.clone(), Arc::new(out.clone()));
        out
    }

    fn describe(&self, member: &MemberRef, via_implicit: bool) -> MemberDescriptor {
        let attrs = self.profile.attributes.get(&member.fq_name());
        let overrides = attrs.and_then(|a| a.param_names.as_ref());
        let params = member
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| ParamDescriptor {
                name: overrides
                    .and_then(|names| names.get(i).cloned())
                    .unwrap_or_else(|| p.name.clone()),
                type_name: p.ty.render(),
            })
            .collect();
        MemberDescriptor {
            name: member.name.clone(),
            params,
            result_type: member.result.render(),
            via_implicit,
            documentation: attrs.and_then(|a| a.documentation.clone()),
        }
    }
}

fn internal_diags(e: ScexError) -> Vec<Diagnostic> {
    vec![Diagnostic {
        kind: ErrorKind::CompilerFailure,
        message: e.to_string(),
        line: 1,
        column: 1,
        line_text: String::new(),
    }]
}

/// Locates the qualifier expression whose members the cursor asks for: the
/// text before the `.` immediately left of the (possibly partial) member
/// name at `pos`.
fn find_qualifier(text: &str, pos: usize) -> Option<Expr> {
    let bytes = text.as_bytes();
    let mut i = pos.min(bytes.len());
    while i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_') {
        i -= 1;
    }
    if i == 0 || bytes[i - 1] != b'.' {
        return None;
    }
    let qual_end = i - 1;
    let prefix = &text[..qual_end];
    if let Ok(parsed) = Parser::new(prefix).and_then(|p| p.parse_expression()) {
        if let Some(node) = node_ending_at(&parsed, qual_end) {
            return Some(node.clone());
        }
    }
    // The enclosing expression is erroneous (e.g. an open call); fall back
    // to the longest parseable suffix before the dot.
    for start in 0..qual_end {
        // Never split an identifier or a literal.
        let boundary = start == 0 || {
            let prev = bytes[start - 1];
            !(prev.is_ascii_alphanumeric() || prev == b'_' || prev == b'"' || prev == b'\'')
        };
        if !boundary {
            continue;
        }
        if let Ok(parsed) = Parser::new(&text[start..qual_end]).and_then(|p| p.parse_expression())
        {
            return Some(parsed);
        }
    }
    None
}

/// The highest qualifier-shaped node whose span ends exactly at `end`.
fn node_ending_at(e: &Expr, end: usize) -> Option<&Expr> {
    if e.span().end == end
        && matches!(
            e,
            Expr::Lit { .. } | Expr::Ident { .. } | Expr::Select { .. } | Expr::Apply { .. } | Expr::New { .. }
        )
    {
        return Some(e);
    }
    let children: Vec<&Expr> = match e {
        Expr::Select { recv, .. } => vec![recv],
        Expr::Apply { target, args, .. } => {
            std::iter::once(&**target).chain(args.iter()).collect()
        }
        Expr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
        Expr::Unary { expr, .. } => vec![expr],
        Expr::If { cond, then_e, else_e, .. } => vec![cond, then_e, else_e],
        Expr::New { args, .. } => args.iter().collect(),
        _ => Vec::new(),
    };
    // Rightmost child first: the qualifier ends at the cursor.
    children.into_iter().rev().find_map(|c| node_ending_at(c, end))
}
