use crate::ast::Expr;
use crate::error::ErrorKind;
use crate::pos::RawDiag;
use std::collections::HashSet;

/// The syntactic node kinds a profile may permit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyntaxKind {
    Literal,
    Identifier,
    Select,
    /// Any application, including desugared binary and unary operators.
    Apply,
    If,
    New,
}

/// The syntax rule set of a profile: which node kinds are legal in user
/// expressions. Everything absent from the set is rejected.
#[derive(Clone, Debug)]
pub struct SyntaxRules {
    allowed: HashSet<SyntaxKind>,
}

impl Default for SyntaxRules {
    /// The recommended whitelist: literals, identifiers, selects, applies,
    /// ifs and `new`.
    fn default() -> Self {
        SyntaxRules {
            allowed: [
                SyntaxKind::Literal,
                SyntaxKind::Identifier,
                SyntaxKind::Select,
                SyntaxKind::Apply,
                SyntaxKind::If,
                SyntaxKind::New,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl SyntaxRules {
    /// A rule set permitting exactly the given kinds.
    pub fn allowing(kinds: &[SyntaxKind]) -> SyntaxRules {
        SyntaxRules { allowed: kinds.iter().copied().collect() }
    }

    pub fn allow(mut self, kind: SyntaxKind) -> SyntaxRules {
        self.allowed.insert(kind);
        self
    }

    pub fn forbid(mut self, kind: SyntaxKind) -> SyntaxRules {
        self.allowed.remove(&kind);
        self
    }

    pub fn permits(&self, kind: SyntaxKind) -> bool {
        self.allowed.contains(&kind)
    }
}

fn classify(e: &Expr) -> (SyntaxKind, &'static str) {
    match e {
        Expr::Lit { .. } => (SyntaxKind::Literal, "literal"),
        Expr::Ident { .. } => (SyntaxKind::Identifier, "identifier"),
        Expr::Select { .. } => (SyntaxKind::Select, "member selection"),
        Expr::Apply { .. } => (SyntaxKind::Apply, "application"),
        Expr::Binary { .. } | Expr::Unary { .. } => (SyntaxKind::Apply, "operator application"),
        Expr::If { .. } => (SyntaxKind::If, "if expression"),
        Expr::New { .. } => (SyntaxKind::New, "object construction"),
    }
}

/// Visits one node: whether it is permitted, and the children to recurse
/// into.
fn visit<'a>(e: &'a Expr, rules: &SyntaxRules) -> (bool, Vec<&'a Expr>) {
    let (kind, _) = classify(e);
    let children: Vec<&Expr> = match e {
        Expr::Lit { .. } | Expr::Ident { .. } => Vec::new(),
        Expr::Select { recv, .. } => vec![recv],
        Expr::Apply { target, args, .. } => {
            std::iter::once(&**target).chain(args.iter()).collect()
        }
        Expr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
        Expr::Unary { expr, .. } => vec![expr],
        Expr::If { cond, then_e, else_e, .. } => vec![cond, then_e, else_e],
        Expr::New { args, .. } => args.iter().collect(),
    };
    (rules.permits(kind), children)
}

/// Walks the user expression and reports every node outside the profile's
/// allowed shape set (C3).
pub(crate) fn validate(root: &Expr, rules: &SyntaxRules) -> Vec<RawDiag> {
    let mut diags = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let (permitted, children) = visit(node, rules);
        if !permitted {
            let (_, desc) = classify(node);
            diags.push(RawDiag::new(
                ErrorKind::SyntaxForbidden,
                node.span(),
                format!("forbidden syntactic construct: {}", desc),
            ));
        }
        stack.extend(children);
    }
    diags.sort_by_key(|d| d.span.start);
    diags
}
