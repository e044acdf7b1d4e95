use crate::acl::AccessCandidate;
use crate::ast::{Expr, Lit, Unit, ValDef};
use crate::error::ErrorKind;
use crate::pos::{RawDiag, Span};
use crate::registry::{MemberKind, MemberRef, TypeRegistry};
use crate::template::PosMapping;
use crate::types::TypeRep;

/// A typed expression node.
#[derive(Clone, Debug)]
pub(crate) struct TypedExpr {
    pub kind: TypedKind,
    pub ty: TypeRep,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub(crate) enum TypedKind {
    Lit(Lit),
    /// The context value (`_ctx`, or the implicit receiver of imported
    /// context members).
    Context,
    /// A declared free variable, by index into the definition's ordered map.
    Var(usize),
    /// A `val`-bound local, by slot (utilities first, then header).
    Local(usize),
    /// A module used as a static qualifier; never a value.
    Module(String),
    /// Method call or field read. Field reads and nullary methods have no
    /// arguments; `via` names the implicit view the receiver goes through.
    Call {
        member: MemberRef,
        recv: Box<TypedExpr>,
        args: Vec<TypedExpr>,
        via: Option<String>,
    },
    StaticCall { member: MemberRef, args: Vec<TypedExpr> },
    Construct { member: MemberRef, args: Vec<TypedExpr> },
    If { cond: Box<TypedExpr>, then_e: Box<TypedExpr>, else_e: Box<TypedExpr> },
    /// Placeholder after a reported error; never reaches codegen.
    Error,
}

const ERROR_TYPE: &str = "<error>";

/// Validates one member-access site against the profile policy. The driver
/// installs an ACL-backed implementation; the typer invokes it for every
/// select it resolves inside the user expression (C4's typer hook).
pub(crate) trait AccessValidator {
    /// `Err(message)` denies the access.
    fn validate(&self, candidate: &AccessCandidate<'_>) -> Result<(), String>;
}

/// Where, inside the assembled unit, access validation applies: only sites
/// at or after `user_start` whose processed offset maps back to user-written
/// text. Everything else (header, utilities, template glue) is
/// profile-trusted.
pub(crate) struct UserRange<'a> {
    pub user_start: usize,
    pub mapping: &'a PosMapping,
}

pub(crate) struct Typer<'a> {
    reg: &'a TypeRegistry,
    ctx_type: TypeRep,
    vars: Vec<(String, TypeRep)>,
    locals: Vec<(String, TypeRep)>,
    validator: Option<&'a dyn AccessValidator>,
    user_range: Option<UserRange<'a>>,
    pub diags: Vec<RawDiag>,
}

impl<'a> Typer<'a> {
    pub(crate) fn new(
        reg: &'a TypeRegistry,
        ctx_type: TypeRep,
        vars: Vec<(String, TypeRep)>,
        locals: Vec<(String, TypeRep)>,
        validator: Option<&'a dyn AccessValidator>,
        user_range: Option<UserRange<'a>>,
    ) -> Typer<'a> {
        Typer { reg, ctx_type, vars, locals, validator, user_range, diags: Vec::new() }
    }

    fn error(&mut self, span: Span, message: impl Into<String>) -> TypedExpr {
        self.diags.push(RawDiag::new(ErrorKind::Type, span, message));
        TypedExpr { kind: TypedKind::Error, ty: TypeRep::named(ERROR_TYPE), span }
    }

    fn is_error(t: &TypedExpr) -> bool {
        t.ty.name() == ERROR_TYPE
    }

    /// Runs the access hook for a resolved site. Sites outside the user
    /// range, and sites on synthetic (template-fabricated) text, are exempt.
    fn check_access(
        &mut self,
        qualifier: &TypeRep,
        member: &MemberRef,
        via: Option<&str>,
        site: Span,
    ) {
        let Some(validator) = self.validator else { return };
        if let Some(range) = &self.user_range {
            if site.start < range.user_start {
                return;
            }
            let proc = site.start - range.user_start;
            if range.mapping.to_original(proc).is_none() {
                return;
            }
        }
        let candidate = AccessCandidate { qualifier, member, via_implicit: via };
        if let Err(message) = validator.validate(&candidate) {
            self.diags.push(RawDiag::new(ErrorKind::AccessDenied, site, message));
        }
    }

    /// Types the spliced header definitions, appending their slots after the
    /// pre-seeded utility locals. Returns the typed initializers in slot
    /// order.
    pub(crate) fn type_defs(&mut self, defs: &[ValDef]) -> Vec<(String, TypedExpr)> {
        let mut out = Vec::with_capacity(defs.len());
        for def in defs {
            let body = self.type_expr(&def.body);
            self.locals.push((def.name.clone(), body.ty.clone()));
            out.push((def.name.clone(), body));
        }
        out
    }

    pub(crate) fn type_unit(&mut self, unit: &Unit) -> (Vec<(String, TypedExpr)>, TypedExpr) {
        let defs = self.type_defs(&unit.defs);
        let body = self.type_expr(&unit.body);
        (defs, body)
    }

    pub(crate) fn type_expr(&mut self, e: &Expr) -> TypedExpr {
        match e {
            Expr::Lit { lit, span } => {
                let ty = match lit {
                    Lit::Unit => "Unit",
                    Lit::Bool(_) => "Boolean",
                    Lit::Int(_) => "Int",
                    Lit::Double(_) => "Double",
                    Lit::Char(_) => "Char",
                    Lit::Str(_) => "String",
                };
                TypedExpr { kind: TypedKind::Lit(lit.clone()), ty: TypeRep::named(ty), span: *span }
            }
            Expr::Ident { name, span } => self.type_ident(name, *span),
            Expr::Select { recv, name, name_span, span } => {
                self.type_select(recv, name, *name_span, *span, None)
            }
            Expr::Apply { target, args, span } => self.type_apply(target, args, *span),
            Expr::Binary { op, lhs, rhs, op_span, span } => {
                self.type_binary(op, lhs, rhs, *op_span, *span)
            }
            Expr::Unary { op, expr, op_span, span } => {
                let recv = self.type_expr(expr);
                if Self::is_error(&recv) {
                    return recv;
                }
                self.member_call(recv, op, Some(Vec::new()), *op_span, *span)
            }
            Expr::If { cond, then_e, else_e, span } => {
                let cond = self.type_expr(cond);
                if !Self::is_error(&cond) && cond.ty != TypeRep::named("Boolean") {
                    self.diags.push(RawDiag::new(
                        ErrorKind::Type,
                        cond.span,
                        format!("type mismatch: expected Boolean, found {}", cond.ty),
                    ));
                }
                let then_e = self.demand_value(then_e);
                let else_e = self.demand_value(else_e);
                let ty = if Self::is_error(&then_e) || Self::is_error(&else_e) {
                    TypeRep::named(ERROR_TYPE)
                } else {
                    self.reg.lub(&then_e.ty, &else_e.ty)
                };
                TypedExpr {
                    kind: TypedKind::If {
                        cond: Box::new(cond),
                        then_e: Box::new(then_e),
                        else_e: Box::new(else_e),
                    },
                    ty,
                    span: *span,
                }
            }
            Expr::New { type_name, args, name_span, span } => {
                let typed_args: Vec<TypedExpr> = args.iter().map(|a| self.type_expr(a)).collect();
                if typed_args.iter().any(Self::is_error) {
                    return TypedExpr {
                        kind: TypedKind::Error,
                        ty: TypeRep::named(ERROR_TYPE),
                        span: *span,
                    };
                }
                let arg_tys: Vec<TypeRep> = typed_args.iter().map(|a| a.ty.clone()).collect();
                match self.reg.resolve_constructor(type_name, &arg_tys) {
                    Some(member) => {
                        let qualifier = TypeRep::named(type_name);
                        self.check_access(&qualifier, &member, None, *name_span);
                        let ty = member.result.clone();
                        TypedExpr {
                            kind: TypedKind::Construct { member, args: typed_args },
                            ty,
                            span: *span,
                        }
                    }
                    None => self.error(
                        *name_span,
                        format!(
                            "no constructor of `{}` takes ({})",
                            type_name,
                            render_types(&arg_tys)
                        ),
                    ),
                }
            }
        }
    }

    /// Types a subexpression that must produce a value; modules are only
    /// legal as static qualifiers.
    fn demand_value(&mut self, e: &Expr) -> TypedExpr {
        let t = self.type_expr(e);
        if let TypedKind::Module(name) = &t.kind {
            let name = name.clone();
            return self.error(t.span, format!("module `{}` is not a value", name));
        }
        t
    }

    fn type_ident(&mut self, name: &str, span: Span) -> TypedExpr {
        if name == "_ctx" {
            return TypedExpr { kind: TypedKind::Context, ty: self.ctx_type.clone(), span };
        }
        // Innermost binding wins: header shadows utilities.
        if let Some(slot) = self.locals.iter().rposition(|(n, _)| n == name) {
            let ty = self.locals[slot].1.clone();
            return TypedExpr { kind: TypedKind::Local(slot), ty, span };
        }
        if let Some(idx) = self.vars.iter().position(|(n, _)| n == name) {
            let ty = self.vars[idx].1.clone();
            return TypedExpr { kind: TypedKind::Var(idx), ty, span };
        }
        // Imported context member, as if written `_ctx.name`.
        let ctx_type = self.ctx_type.clone();
        if let Some(member) = self.reg.resolve_member(&ctx_type, name, None) {
            self.check_access(&ctx_type, &member, None, span);
            let recv = TypedExpr { kind: TypedKind::Context, ty: ctx_type, span };
            let ty = member.result.clone();
            return TypedExpr {
                kind: TypedKind::Call { member, recv: Box::new(recv), args: Vec::new(), via: None },
                ty,
                span,
            };
        }
        if self.reg.has_type(name) {
            return TypedExpr {
                kind: TypedKind::Module(name.to_string()),
                ty: TypeRep::named(name),
                span,
            };
        }
        self.error(span, format!("unknown identifier: {}", name))
    }

    fn type_select(
        &mut self,
        recv: &Expr,
        name: &str,
        name_span: Span,
        span: Span,
        args: Option<Vec<TypedExpr>>,
    ) -> TypedExpr {
        let recv = self.type_expr(recv);
        if Self::is_error(&recv) {
            return TypedExpr { kind: TypedKind::Error, ty: recv.ty, span };
        }
        if let TypedKind::Module(module) = &recv.kind {
            let module = module.clone();
            return self.type_static(&module, name, args, name_span, span);
        }
        self.member_call(recv, name, args, name_span, span)
    }

    fn type_static(
        &mut self,
        module: &str,
        name: &str,
        args: Option<Vec<TypedExpr>>,
        name_span: Span,
        span: Span,
    ) -> TypedExpr {
        let args = args.unwrap_or_default();
        if args.iter().any(Self::is_error) {
            return TypedExpr { kind: TypedKind::Error, ty: TypeRep::named(ERROR_TYPE), span };
        }
        let arg_tys: Vec<TypeRep> = args.iter().map(|a| a.ty.clone()).collect();
        match self.reg.resolve_static(module, name, &arg_tys) {
            Some(member) => {
                let qualifier = TypeRep::named(module);
                self.check_access(&qualifier, &member, None, name_span);
                let ty = member.result.clone();
                TypedExpr { kind: TypedKind::StaticCall { member, args }, ty, span }
            }
            None => self.error(
                name_span,
                format!("unknown member `{}.{}` taking ({})", module, name, render_types(&arg_tys)),
            ),
        }
    }

    /// Resolves `recv.name(args)` (or a bare select when `args` is `None`)
    /// against the receiver's type chain, falling back to implicit views.
    fn member_call(
        &mut self,
        recv: TypedExpr,
        name: &str,
        args: Option<Vec<TypedExpr>>,
        name_span: Span,
        span: Span,
    ) -> TypedExpr {
        if let TypedKind::Module(m) = &recv.kind {
            let m = m.clone();
            return self.error(recv.span, format!("module `{}` is not a value", m));
        }
        if args.as_ref().is_some_and(|a| a.iter().any(Self::is_error)) {
            return TypedExpr { kind: TypedKind::Error, ty: TypeRep::named(ERROR_TYPE), span };
        }
        let arg_tys: Option<Vec<TypeRep>> =
            args.as_ref().map(|a| a.iter().map(|t| t.ty.clone()).collect());
        let direct = self.reg.resolve_member(&recv.ty, name, arg_tys.as_deref());
        let (member, via) = match direct {
            Some(m) => (m, None),
            None => match self.reg.resolve_via_views(&recv.ty, name, arg_tys.as_deref()) {
                Some((view, m)) => (m, Some(view.name)),
                None => {
                    let what = match &arg_tys {
                        Some(tys) => {
                            format!("`{}` taking ({})", name, render_types(tys))
                        }
                        None => format!("`{}`", name),
                    };
                    return self.error(
                        name_span,
                        format!("value of type `{}` has no member {}", recv.ty, what),
                    );
                }
            },
        };
        self.check_access(&recv.ty, &member, via.as_deref(), name_span);
        let ty = member.result.clone();
        TypedExpr {
            kind: TypedKind::Call {
                member,
                recv: Box::new(recv),
                args: args.unwrap_or_default(),
                via,
            },
            ty,
            span,
        }
    }

    fn type_apply(&mut self, target: &Expr, args: &[Expr], span: Span) -> TypedExpr {
        let typed_args: Vec<TypedExpr> = args.iter().map(|a| self.type_expr(a)).collect();
        match target {
            Expr::Select { recv, name, name_span, .. } => {
                self.type_select(recv, name, *name_span, span, Some(typed_args))
            }
            Expr::Ident { name, span: ident_span } => {
                self.type_ident_apply(name, typed_args, *ident_span, span)
            }
            other => {
                let what = self.type_expr(other);
                self.error(what.span, "expression is not callable")
            }
        }
    }

    /// `f(args)` with a bare identifier target: an imported context method.
    fn type_ident_apply(
        &mut self,
        name: &str,
        args: Vec<TypedExpr>,
        ident_span: Span,
        span: Span,
    ) -> TypedExpr {
        if args.iter().any(Self::is_error) {
            return TypedExpr { kind: TypedKind::Error, ty: TypeRep::named(ERROR_TYPE), span };
        }
        let arg_tys: Vec<TypeRep> = args.iter().map(|a| a.ty.clone()).collect();
        let ctx_type = self.ctx_type.clone();
        if let Some(member) = self.reg.resolve_member(&ctx_type, name, Some(&arg_tys)) {
            self.check_access(&ctx_type, &member, None, ident_span);
            let recv = TypedExpr { kind: TypedKind::Context, ty: ctx_type, span: ident_span };
            let ty = member.result.clone();
            return TypedExpr {
                kind: TypedKind::Call { member, recv: Box::new(recv), args, via: None },
                ty,
                span,
            };
        }
        self.error(ident_span, format!("unknown function: {}/{}", name, arg_tys.len()))
    }

    fn type_binary(
        &mut self,
        op: &str,
        lhs: &Expr,
        rhs: &Expr,
        op_span: Span,
        span: Span,
    ) -> TypedExpr {
        let lhs = self.demand_value(lhs);
        let rhs = self.demand_value(rhs);
        if Self::is_error(&lhs) || Self::is_error(&rhs) {
            return TypedExpr { kind: TypedKind::Error, ty: TypeRep::named(ERROR_TYPE), span };
        }
        self.member_call(lhs, op, Some(vec![rhs]), op_span, span)
    }
}

fn render_types(tys: &[TypeRep]) -> String {
    tys.iter().map(|t| t.render()).collect::<Vec<_>>().join(", ")
}
