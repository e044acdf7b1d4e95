use crate::program::{Op, Program, SymbolSig};
use crate::value::Value;

// Safe, semantics-preserving constant folder over generated programs.
// Only builtin operators with literal operands fold; registered host members
// are treated as impure and never touched. Folds that would raise at runtime
// (overflow, division by zero) are left in place so evaluation reports them.
pub(crate) fn optimize(mut program: Program) -> Program {
    program.prelude = program
        .prelude
        .into_iter()
        .map(|op| fixpoint(op, &program.symbols, 2))
        .collect();
    program.body = fixpoint(std::mem::replace(&mut program.body, Op::Unit), &program.symbols, 2);
    program
}

fn fixpoint(mut op: Op, symbols: &[SymbolSig], max_rounds: usize) -> Op {
    for _ in 0..max_rounds {
        let (next, changed) = fold(op, symbols);
        op = next;
        if !changed {
            break;
        }
    }
    op
}

fn lit_value(op: &Op) -> Option<Value> {
    match op {
        Op::Unit => Some(Value::Unit),
        Op::Bool(b) => Some(Value::Bool(*b)),
        Op::Int(i) => Some(Value::Int(*i)),
        Op::Double(d) => Some(Value::Double(*d)),
        Op::Char(c) => Some(Value::Char(*c)),
        Op::Str(s) => Some(Value::Str(s.clone())),
        _ => None,
    }
}

fn value_op(v: Value) -> Op {
    match v {
        Value::Unit => Op::Unit,
        Value::Bool(b) => Op::Bool(b),
        Value::Int(i) => Op::Int(i),
        Value::Double(d) => Op::Double(d),
        Value::Char(c) => Op::Char(c),
        Value::Str(s) => Op::Str(s),
        Value::Obj(_) => unreachable!("object literals do not exist"),
    }
}

/// Evaluates one builtin operator application on literals. `None` leaves the
/// node unfolded.
fn fold_builtin(sym: &SymbolSig, recv: &Value, args: &[Value]) -> Option<Value> {
    match (sym.owner.as_str(), sym.name.as_str()) {
        ("Int", "+") | ("Int", "-") | ("Int", "*") | ("Int", "/") | ("Int", "%") => {
            let (Value::Int(a), Value::Int(b)) = (recv, args.first()?) else { return None };
            let folded = match sym.name.as_str() {
                "+" => a.checked_add(*b),
                "-" => a.checked_sub(*b),
                "*" => a.checked_mul(*b),
                "/" => a.checked_div(*b),
                _ => a.checked_rem(*b),
            };
            folded.map(Value::Int)
        }
        ("Int", "<") | ("Int", "<=") | ("Int", ">") | ("Int", ">=") => {
            let (Value::Int(a), Value::Int(b)) = (recv, args.first()?) else { return None };
            let folded = match sym.name.as_str() {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a >= b,
            };
            Some(Value::Bool(folded))
        }
        ("Int", "unary_-") => {
            let Value::Int(a) = recv else { return None };
            a.checked_neg().map(Value::Int)
        }
        ("Double", "+") | ("Double", "-") | ("Double", "*") | ("Double", "/") => {
            let (Value::Double(a), Value::Double(b)) = (recv, args.first()?) else { return None };
            let folded = match sym.name.as_str() {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                _ => a / b,
            };
            Some(Value::Double(folded))
        }
        ("Double", "unary_-") => {
            let Value::Double(a) = recv else { return None };
            Some(Value::Double(-a))
        }
        ("Boolean", "unary_!") => {
            let Value::Bool(a) = recv else { return None };
            Some(Value::Bool(!a))
        }
        ("String", "+") => {
            let Value::Str(a) = recv else { return None };
            let mut out = a.clone();
            out.push_str(&args.first()?.display_string());
            Some(Value::Str(out))
        }
        ("Any", "==") => Some(Value::Bool(recv == args.first()?)),
        ("Any", "!=") => Some(Value::Bool(recv != args.first()?)),
        _ => None,
    }
}

fn fold(op: Op, symbols: &[SymbolSig]) -> (Op, bool) {
    match op {
        Op::Invoke { sym, recv, args } => {
            let (recv, c1) = fold(*recv, symbols);
            let mut changed = c1;
            let args: Vec<Op> = args
                .into_iter()
                .map(|a| {
                    let (a, c) = fold(a, symbols);
                    changed |= c;
                    a
                })
                .collect();
            if let Some(recv_v) = lit_value(&recv) {
                let arg_vs: Option<Vec<Value>> = args.iter().map(lit_value).collect();
                if let Some(arg_vs) = arg_vs {
                    if let Some(v) = fold_builtin(&symbols[sym], &recv_v, &arg_vs) {
                        return (value_op(v), true);
                    }
                }
            }
            (Op::Invoke { sym, recv: Box::new(recv), args }, changed)
        }
        Op::And(a, b) => {
            let (a, c1) = fold(*a, symbols);
            let (b, c2) = fold(*b, symbols);
            match (lit_value(&a), lit_value(&b)) {
                (Some(Value::Bool(false)), _) => (Op::Bool(false), true),
                (Some(Value::Bool(true)), _) => (b, true),
                (_, Some(Value::Bool(true))) => (a, true),
                _ => (Op::And(Box::new(a), Box::new(b)), c1 | c2),
            }
        }
        Op::Or(a, b) => {
            let (a, c1) = fold(*a, symbols);
            let (b, c2) = fold(*b, symbols);
            match (lit_value(&a), lit_value(&b)) {
                (Some(Value::Bool(true)), _) => (Op::Bool(true), true),
                (Some(Value::Bool(false)), _) => (b, true),
                (_, Some(Value::Bool(false))) => (a, true),
                _ => (Op::Or(Box::new(a), Box::new(b)), c1 | c2),
            }
        }
        Op::If { cond, then_op, else_op } => {
            let (cond, c1) = fold(*cond, symbols);
            let (then_op, c2) = fold(*then_op, symbols);
            let (else_op, c3) = fold(*else_op, symbols);
            match lit_value(&cond) {
                Some(Value::Bool(true)) => (then_op, true),
                Some(Value::Bool(false)) => (else_op, true),
                _ => (
                    Op::If {
                        cond: Box::new(cond),
                        then_op: Box::new(then_op),
                        else_op: Box::new(else_op),
                    },
                    c1 | c2 | c3,
                ),
            }
        }
        Op::InvokeStatic { sym, args } => {
            let mut changed = false;
            let args = args
                .into_iter()
                .map(|a| {
                    let (a, c) = fold(a, symbols);
                    changed |= c;
                    a
                })
                .collect();
            (Op::InvokeStatic { sym, args }, changed)
        }
        Op::Construct { sym, args } => {
            let mut changed = false;
            let args = args
                .into_iter()
                .map(|a| {
                    let (a, c) = fold(a, symbols);
                    changed |= c;
                    a
                })
                .collect();
            (Op::Construct { sym, args }, changed)
        }
        Op::Assign { sym, recv } => {
            let (recv, c) = fold(*recv, symbols);
            (Op::Assign { sym, recv: Box::new(recv) }, c)
        }
        Op::View { view, expr } => {
            let (expr, c) = fold(*expr, symbols);
            (Op::View { view, expr: Box::new(expr) }, c)
        }
        other => (other, false),
    }
}
