use crate::ast::Lit;
use crate::error::ScexError;
use crate::program::{
    view_erased_signature, view_typed_signature, Op, Program, SymbolSig, ViewSig,
};
use crate::registry::{MemberRef, TypeRegistry};
use crate::typer::{TypedExpr, TypedKind};
use crate::types::TypeRep;

/// Lowers typed trees into serializable programs (the back half of C6),
/// building the symbol and view tables the signature records derive from.
pub(crate) struct Codegen<'a> {
    reg: &'a TypeRegistry,
    symbols: Vec<SymbolSig>,
    views: Vec<ViewSig>,
}

impl<'a> Codegen<'a> {
    pub(crate) fn new(reg: &'a TypeRegistry) -> Codegen<'a> {
        Codegen { reg, symbols: Vec::new(), views: Vec::new() }
    }

    /// Generates the program for one unit: the prelude initializers (utility
    /// slots first, then header slots) and the body.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn generate(
        mut self,
        unit: String,
        utils: &[(String, TypedExpr)],
        header_defs: &[(String, TypedExpr)],
        body: &TypedExpr,
        vars: Vec<String>,
        result_type: TypeRep,
        setter: bool,
    ) -> Result<Program, ScexError> {
        let mut prelude = Vec::with_capacity(utils.len() + header_defs.len());
        for (_, init) in utils.iter().chain(header_defs) {
            prelude.push(self.gen(init)?);
        }
        let body = if setter { self.gen_assign(body)? } else { self.gen(body)? };
        Ok(Program {
            unit,
            symbols: self.symbols,
            views: self.views,
            num_locals: prelude.len(),
            prelude,
            body,
            vars,
            result_type,
            setter,
        })
    }

    fn sym_id(&mut self, member: &MemberRef) -> usize {
        let params: Vec<TypeRep> = member.params.iter().map(|p| p.ty.clone()).collect();
        if let Some(i) = self.symbols.iter().position(|s| {
            s.owner == member.owner
                && s.name == member.name
                && s.kind == member.kind
                && s.params == params
        }) {
            return i;
        }
        self.symbols.push(SymbolSig {
            owner: member.owner.clone(),
            name: member.name.clone(),
            kind: member.kind,
            params,
            typed: member.typed_signature(),
            erased: member.erased_signature(),
        });
        self.symbols.len() - 1
    }

    fn view_id(&mut self, name: &str) -> Result<usize, ScexError> {
        if let Some(i) = self.views.iter().position(|v| v.name == name) {
            return Ok(i);
        }
        let view = self
            .reg
            .view_by_name(name)
            .ok_or_else(|| ScexError::Internal(format!("unknown view `{}` in typed tree", name)))?;
        self.views.push(ViewSig {
            name: name.to_string(),
            typed: view_typed_signature(&view.name, &view.from, &view.to),
            erased: view_erased_signature(&view.name, &view.from, &view.to),
        });
        Ok(self.views.len() - 1)
    }

    fn gen(&mut self, t: &TypedExpr) -> Result<Op, ScexError> {
        match &t.kind {
            TypedKind::Lit(lit) => Ok(match lit {
                Lit::Unit => Op::Unit,
                Lit::Bool(b) => Op::Bool(*b),
                Lit::Int(i) => Op::Int(*i),
                Lit::Double(d) => Op::Double(*d),
                Lit::Char(c) => Op::Char(*c),
                Lit::Str(s) => Op::Str(s.clone()),
            }),
            TypedKind::Context => Ok(Op::Context),
            TypedKind::Var(i) => Ok(Op::Var(*i)),
            TypedKind::Local(i) => Ok(Op::Local(*i)),
            TypedKind::Call { member, recv, args, via } => {
                let mut recv_op = self.gen(recv)?;
                if let Some(view) = via {
                    let view = self.view_id(view)?;
                    recv_op = Op::View { view, expr: Box::new(recv_op) };
                }
                // Boolean connectives lower to short-circuit ops instead of
                // native calls.
                if member.owner == "Boolean" && args.len() == 1 {
                    if member.name == "&&" {
                        let rhs = self.gen(&args[0])?;
                        return Ok(Op::And(Box::new(recv_op), Box::new(rhs)));
                    }
                    if member.name == "||" {
                        let rhs = self.gen(&args[0])?;
                        return Ok(Op::Or(Box::new(recv_op), Box::new(rhs)));
                    }
                }
                let sym = self.sym_id(member);
                let args = args.iter().map(|a| self.gen(a)).collect::<Result<Vec<_>, _>>()?;
                Ok(Op::Invoke { sym, recv: Box::new(recv_op), args })
            }
            TypedKind::StaticCall { member, args } => {
                let sym = self.sym_id(member);
                let args = args.iter().map(|a| self.gen(a)).collect::<Result<Vec<_>, _>>()?;
                Ok(Op::InvokeStatic { sym, args })
            }
            TypedKind::Construct { member, args } => {
                let sym = self.sym_id(member);
                let args = args.iter().map(|a| self.gen(a)).collect::<Result<Vec<_>, _>>()?;
                Ok(Op::Construct { sym, args })
            }
            TypedKind::If { cond, then_e, else_e } => Ok(Op::If {
                cond: Box::new(self.gen(cond)?),
                then_op: Box::new(self.gen(then_e)?),
                else_op: Box::new(self.gen(else_e)?),
            }),
            TypedKind::Module(name) => {
                Err(ScexError::Internal(format!("module `{}` reached codegen", name)))
            }
            TypedKind::Error => {
                Err(ScexError::Internal("error node reached codegen".to_string()))
            }
        }
    }

    /// Lowers the root of a setter expression: a bare assignable field read
    /// becomes an assignment of the incoming value. The driver validates
    /// assignability before codegen runs.
    fn gen_assign(&mut self, t: &TypedExpr) -> Result<Op, ScexError> {
        match &t.kind {
            TypedKind::Call { member, recv, args, via: None }
                if member.assignable && args.is_empty() =>
            {
                let sym = self.sym_id(member);
                let recv = self.gen(recv)?;
                Ok(Op::Assign { sym, recv: Box::new(recv) })
            }
            _ => Err(ScexError::Internal("non-assignable setter root reached codegen".into())),
        }
    }
}
