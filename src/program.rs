use crate::error::{EvalError, ScexError};
use crate::registry::{MemberKind, NativeFn, TypeRegistry};
use crate::types::TypeRep;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One instruction of a compiled expression. Programs are pure data so they
/// can be persisted by the on-disk cache and relinked against the registry
/// after a restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum Op {
    Unit,
    Bool(bool),
    Int(i64),
    Double(f64),
    Char(char),
    Str(String),
    /// The context value.
    Context,
    /// A free variable, by position in the definition's ordered map.
    Var(usize),
    /// A `val` binding, by slot.
    Local(usize),
    /// Method call or field read through a symbol-table entry.
    Invoke { sym: usize, recv: Box<Op>, args: Vec<Op> },
    InvokeStatic { sym: usize, args: Vec<Op> },
    Construct { sym: usize, args: Vec<Op> },
    /// Root of a setter expression: assigns the incoming value to the field.
    Assign { sym: usize, recv: Box<Op> },
    /// Implicit conversion of the inner value.
    View { view: usize, expr: Box<Op> },
    /// Short-circuit boolean operators.
    And(Box<Op>, Box<Op>),
    Or(Box<Op>, Box<Op>),
    If { cond: Box<Op>, then_op: Box<Op>, else_op: Box<Op> },
}

/// A symbol-table entry: enough identity to relink the native
/// implementation, plus the typed and erased signatures recorded for cache
/// validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SymbolSig {
    pub owner: String,
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<TypeRep>,
    pub typed: String,
    pub erased: String,
}

/// An implicit view referenced by the program.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ViewSig {
    pub name: String,
    pub typed: String,
    pub erased: String,
}

pub(crate) fn view_typed_signature(name: &str, from: &TypeRep, to: &TypeRep) -> String {
    format!("{}({}): {}", name, from.render(), to.render())
}

pub(crate) fn view_erased_signature(name: &str, from: &TypeRep, to: &TypeRep) -> String {
    format!("{}({}){}", name, from.erased(), to.erased())
}

/// A compiled, serializable expression artifact: symbol and view tables, the
/// `val`-binding prelude in slot order, and the body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Program {
    pub unit: String,
    pub symbols: Vec<SymbolSig>,
    pub views: Vec<ViewSig>,
    pub num_locals: usize,
    pub prelude: Vec<Op>,
    pub body: Op,
    pub vars: Vec<String>,
    pub result_type: TypeRep,
    pub setter: bool,
}

impl Program {
    /// Resolves every symbol and view against the registry — the
    /// class-loading step. Fails only if the registry no longer carries a
    /// recorded symbol, which signature validation normally prevents.
    pub(crate) fn link(&self, reg: &TypeRegistry) -> Result<LinkedProgram, ScexError> {
        let mut fns = Vec::with_capacity(self.symbols.len());
        let mut assigns = Vec::with_capacity(self.symbols.len());
        for sym in &self.symbols {
            let (invoke, assign) =
                reg.link(&sym.owner, &sym.name, &sym.params, sym.kind).ok_or_else(|| {
                    ScexError::Internal(format!("cannot link symbol `{}`", sym.typed))
                })?;
            fns.push(invoke);
            assigns.push(assign);
        }
        let mut views = Vec::with_capacity(self.views.len());
        for view in &self.views {
            let v = reg.view_by_name(&view.name).ok_or_else(|| {
                ScexError::Internal(format!("cannot link view `{}`", view.name))
            })?;
            views.push(v.apply.clone());
        }
        Ok(LinkedProgram { program: self.clone(), fns, assigns, views })
    }

    /// Drops symbol- and view-table entries no instruction references and
    /// renumbers the remaining ones. Constant folding can orphan entries.
    pub(crate) fn prune(mut self) -> Program {
        let mut used_syms = vec![false; self.symbols.len()];
        let mut used_views = vec![false; self.views.len()];
        {
            let mut stack: Vec<&Op> = self.prelude.iter().chain(std::iter::once(&self.body)).collect();
            while let Some(op) = stack.pop() {
                match op {
                    Op::Invoke { sym, recv, args } => {
                        used_syms[*sym] = true;
                        stack.push(recv);
                        stack.extend(args.iter());
                    }
                    Op::InvokeStatic { sym, args } | Op::Construct { sym, args } => {
                        used_syms[*sym] = true;
                        stack.extend(args.iter());
                    }
                    Op::Assign { sym, recv } => {
                        used_syms[*sym] = true;
                        stack.push(recv);
                    }
                    Op::View { view, expr } => {
                        used_views[*view] = true;
                        stack.push(expr);
                    }
                    Op::And(a, b) | Op::Or(a, b) => {
                        stack.push(a);
                        stack.push(b);
                    }
                    Op::If { cond, then_op, else_op } => {
                        stack.push(cond);
                        stack.push(then_op);
                        stack.push(else_op);
                    }
                    _ => {}
                }
            }
        }
        let sym_map = renumber(&used_syms);
        let view_map = renumber(&used_views);
        self.symbols = keep(self.symbols, &used_syms);
        self.views = keep(self.views, &used_views);
        self.prelude = self.prelude.into_iter().map(|op| remap(op, &sym_map, &view_map)).collect();
        self.body = remap(std::mem::replace(&mut self.body, Op::Unit), &sym_map, &view_map);
        self
    }
}

fn renumber(used: &[bool]) -> Vec<usize> {
    let mut map = vec![0usize; used.len()];
    let mut next = 0;
    for (i, &u) in used.iter().enumerate() {
        if u {
            map[i] = next;
            next += 1;
        }
    }
    map
}

fn keep<T>(items: Vec<T>, used: &[bool]) -> Vec<T> {
    items.into_iter().zip(used).filter(|(_, &u)| u).map(|(t, _)| t).collect()
}

fn remap(op: Op, sym_map: &[usize], view_map: &[usize]) -> Op {
    match op {
        Op::Invoke { sym, recv, args } => Op::Invoke {
            sym: sym_map[sym],
            recv: Box::new(remap(*recv, sym_map, view_map)),
            args: args.into_iter().map(|a| remap(a, sym_map, view_map)).collect(),
        },
        Op::InvokeStatic { sym, args } => Op::InvokeStatic {
            sym: sym_map[sym],
            args: args.into_iter().map(|a| remap(a, sym_map, view_map)).collect(),
        },
        Op::Construct { sym, args } => Op::Construct {
            sym: sym_map[sym],
            args: args.into_iter().map(|a| remap(a, sym_map, view_map)).collect(),
        },
        Op::Assign { sym, recv } => {
            Op::Assign { sym: sym_map[sym], recv: Box::new(remap(*recv, sym_map, view_map)) }
        }
        Op::View { view, expr } => {
            Op::View { view: view_map[view], expr: Box::new(remap(*expr, sym_map, view_map)) }
        }
        Op::And(a, b) => Op::And(
            Box::new(remap(*a, sym_map, view_map)),
            Box::new(remap(*b, sym_map, view_map)),
        ),
        Op::Or(a, b) => Op::Or(
            Box::new(remap(*a, sym_map, view_map)),
            Box::new(remap(*b, sym_map, view_map)),
        ),
        Op::If { cond, then_op, else_op } => Op::If {
            cond: Box::new(remap(*cond, sym_map, view_map)),
            then_op: Box::new(remap(*then_op, sym_map, view_map)),
            else_op: Box::new(remap(*else_op, sym_map, view_map)),
        },
        other => other,
    }
}

/// A program linked against the live registry: the invocable artifact.
pub(crate) struct LinkedProgram {
    pub program: Program,
    fns: Vec<NativeFn>,
    assigns: Vec<Option<NativeFn>>,
    views: Vec<NativeFn>,
}

impl LinkedProgram {
    pub(crate) fn eval(&self, ctx: &Value, vars: &[Value]) -> Result<Value, EvalError> {
        self.run(ctx, vars, None)
    }

    pub(crate) fn assign(
        &self,
        ctx: &Value,
        vars: &[Value],
        value: Value,
    ) -> Result<(), EvalError> {
        self.run(ctx, vars, Some(&value)).map(|_| ())
    }

    fn run(&self, ctx: &Value, vars: &[Value], new_value: Option<&Value>) -> Result<Value, EvalError> {
        if vars.len() < self.program.vars.len() {
            return Err(EvalError::ValuesLen {
                expected: self.program.vars.len(),
                got: vars.len(),
            });
        }
        let mut locals: Vec<Value> = Vec::with_capacity(self.program.num_locals);
        for init in &self.program.prelude {
            let v = self.eval_op(init, ctx, vars, &locals, new_value)?;
            locals.push(v);
        }
        self.eval_op(&self.program.body, ctx, vars, &locals, new_value)
    }

    fn eval_args(
        &self,
        args: &[Op],
        ctx: &Value,
        vars: &[Value],
        locals: &[Value],
        newv: Option<&Value>,
    ) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|a| self.eval_op(a, ctx, vars, locals, newv)).collect()
    }

    fn eval_op(
        &self,
        op: &Op,
        ctx: &Value,
        vars: &[Value],
        locals: &[Value],
        newv: Option<&Value>,
    ) -> Result<Value, EvalError> {
        match op {
            Op::Unit => Ok(Value::Unit),
            Op::Bool(b) => Ok(Value::Bool(*b)),
            Op::Int(i) => Ok(Value::Int(*i)),
            Op::Double(d) => Ok(Value::Double(*d)),
            Op::Char(c) => Ok(Value::Char(*c)),
            Op::Str(s) => Ok(Value::Str(s.clone())),
            Op::Context => Ok(ctx.clone()),
            Op::Var(i) => Ok(vars[*i].clone()),
            Op::Local(i) => locals.get(*i).cloned().ok_or_else(|| {
                EvalError::Internal(format!("uninitialized local slot {}", i))
            }),
            Op::Invoke { sym, recv, args } => {
                let recv = self.eval_op(recv, ctx, vars, locals, newv)?;
                let args = self.eval_args(args, ctx, vars, locals, newv)?;
                self.fns[*sym](&recv, &args)
            }
            Op::InvokeStatic { sym, args } | Op::Construct { sym, args } => {
                let args = self.eval_args(args, ctx, vars, locals, newv)?;
                self.fns[*sym](&Value::Unit, &args)
            }
            Op::Assign { sym, recv } => {
                let value = newv.ok_or_else(|| {
                    EvalError::Internal("setter artifact evaluated without a value".into())
                })?;
                let recv = self.eval_op(recv, ctx, vars, locals, newv)?;
                let assign = self.assigns[*sym].as_ref().ok_or_else(|| {
                    EvalError::Internal(format!(
                        "symbol `{}` is not assignable",
                        self.program.symbols[*sym].typed
                    ))
                })?;
                assign(&recv, std::slice::from_ref(value))?;
                Ok(Value::Unit)
            }
            Op::View { view, expr } => {
                let v = self.eval_op(expr, ctx, vars, locals, newv)?;
                self.views[*view](&v, &[])
            }
            Op::And(a, b) => {
                let lhs = bool::try_from(&self.eval_op(a, ctx, vars, locals, newv)?)?;
                if !lhs {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(bool::try_from(&self.eval_op(b, ctx, vars, locals, newv)?)?))
            }
            Op::Or(a, b) => {
                let lhs = bool::try_from(&self.eval_op(a, ctx, vars, locals, newv)?)?;
                if lhs {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(bool::try_from(&self.eval_op(b, ctx, vars, locals, newv)?)?))
            }
            Op::If { cond, then_op, else_op } => {
                let c = bool::try_from(&self.eval_op(cond, ctx, vars, locals, newv)?)?;
                if c {
                    self.eval_op(then_op, ctx, vars, locals, newv)
                } else {
                    self.eval_op(else_op, ctx, vars, locals, newv)
                }
            }
        }
    }
}
