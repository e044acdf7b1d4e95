use crate::registry::{MemberKind, MemberRef, TypeRegistry};
use crate::types::TypeRep;
use std::collections::HashSet;

/// The decision an ACL entry contributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Allow,
    Deny,
}

/// Wildcard expanders a pattern may carry instead of a concrete symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WildcardKind {
    None,
    /// Every method and field reachable on the pattern type.
    AllMembers,
    /// Every overload of one name on the pattern type.
    MembersNamed(String),
    /// Every constructor of the pattern type.
    AllConstructors,
    /// Every static member of the pattern type.
    AllStatics,
}

/// One applied-type argument of a qualifier pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternArg {
    /// `_` — matches any argument (existential openness).
    Wild,
    /// Matches the exact argument type.
    Exact(TypeRep),
    /// `@plus T` — covariant: matches any argument that is a subtype of `T`.
    Plus(TypeRep),
}

/// The static-type side of an access pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypePattern {
    pub name: String,
    /// `None` matches any instantiation of the constructor.
    pub args: Option<Vec<PatternArg>>,
}

impl TypePattern {
    pub fn named(name: &str) -> TypePattern {
        TypePattern { name: name.to_string(), args: None }
    }

    fn matches(&self, qualifier: &TypeRep, reg: &TypeRegistry) -> bool {
        if qualifier.name() == self.name {
            return match (&self.args, qualifier) {
                (None, _) => true,
                (Some(pargs), TypeRep::Applied { args, .. }) if pargs.len() == args.len() => {
                    pargs.iter().zip(args).all(|(p, a)| match p {
                        PatternArg::Wild => true,
                        PatternArg::Exact(t) => a == t,
                        PatternArg::Plus(t) => reg.is_subtype(a, t),
                    })
                }
                _ => false,
            };
        }
        // Subtype walk by constructor name; applied arguments can only be
        // constrained at the pattern's own level.
        self.args.is_none() && reg.is_subtype(qualifier, &TypeRep::named(&self.name))
    }
}

/// A concrete symbol pattern: fully-qualified name, optionally pinned to one
/// overload by its parameter types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolPattern {
    pub fq_name: String,
    pub params: Option<Vec<TypeRep>>,
}

/// The pattern side of one ACL entry, matched structurally against access
/// candidates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPattern {
    pub qualifier: TypePattern,
    pub symbol: Option<SymbolPattern>,
    /// Matches only sites routed through this exact implicit view.
    pub via_implicit: Option<String>,
    pub wildcard: WildcardKind,
}

impl AccessPattern {
    fn matches(&self, cand: &AccessCandidate<'_>, reg: &TypeRegistry) -> bool {
        if self.via_implicit.as_deref() != cand.via_implicit {
            return false;
        }
        match &self.wildcard {
            WildcardKind::None => {
                let Some(symbol) = &self.symbol else { return false };
                if !self.qualifier.matches(cand.qualifier, reg) {
                    return false;
                }
                let fq = cand.member.fq_name();
                // An override of an allowed symbol is allowed.
                let name_ok =
                    symbol.fq_name == fq || cand.member.overridden.contains(&symbol.fq_name);
                let params_ok = symbol.params.as_ref().is_none_or(|p| {
                    p.len() == cand.member.params.len()
                        && p.iter().zip(&cand.member.params).all(|(a, b)| a == &b.ty)
                });
                name_ok && params_ok
            }
            WildcardKind::AllMembers => {
                matches!(cand.member.kind, MemberKind::Method | MemberKind::Field)
                    && self.qualifier.matches(cand.qualifier, reg)
            }
            WildcardKind::MembersNamed(name) => {
                matches!(cand.member.kind, MemberKind::Method | MemberKind::Field)
                    && cand.member.name == *name
                    && self.qualifier.matches(cand.qualifier, reg)
            }
            WildcardKind::AllConstructors => {
                cand.member.kind == MemberKind::Constructor
                    && cand.member.owner == self.qualifier.name
            }
            WildcardKind::AllStatics => {
                cand.member.kind == MemberKind::Static && cand.member.owner == self.qualifier.name
            }
        }
    }
}

/// One entry of an ACL: pattern, policy, and the zero-based order at which it
/// was added.
#[derive(Clone, Debug)]
pub struct AclEntry {
    pub pattern: AccessPattern,
    pub policy: Policy,
    pub order: usize,
}

/// A reified member-access site: the qualifier's static type, the resolved
/// symbol, and the implicit view (if any) the access is routed through.
#[derive(Clone, Copy, Debug)]
pub struct AccessCandidate<'a> {
    pub qualifier: &'a TypeRep,
    pub member: &'a MemberRef,
    pub via_implicit: Option<&'a str>,
}

/// An ordered access-control list. Later entries shadow earlier ones on the
/// same reference; a reference no entry matches is denied.
#[derive(Clone, Debug, Default)]
pub struct Acl {
    entries: Vec<AclEntry>,
    module_refs: HashSet<String>,
}

impl Acl {
    /// The deny-everything ACL.
    pub fn empty() -> Acl {
        Acl::default()
    }

    pub(crate) fn from_parts(entries: Vec<AclEntry>, module_refs: HashSet<String>) -> Acl {
        Acl { entries, module_refs }
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    /// Walks entries in order; the last matching entry wins. `None` means no
    /// entry matched, which callers treat as a deny.
    pub fn decide(&self, cand: &AccessCandidate<'_>, reg: &TypeRegistry) -> Option<Policy> {
        let mut last = None;
        for entry in &self.entries {
            if entry.pattern.matches(cand, reg) {
                last = Some(entry.policy);
            }
        }
        last
    }

    pub fn allows(&self, cand: &AccessCandidate<'_>, reg: &TypeRegistry) -> bool {
        self.decide(cand, reg) == Some(Policy::Allow)
    }

    /// Order-preserving concatenation: `other`'s entries come after and
    /// shadow this list's entries; orders are reassigned.
    pub fn concat(&self, other: &Acl) -> Acl {
        let mut entries = Vec::with_capacity(self.entries.len() + other.entries.len());
        entries.extend(self.entries.iter().cloned());
        entries.extend(other.entries.iter().cloned());
        for (order, e) in entries.iter_mut().enumerate() {
            e.order = order;
        }
        let module_refs = self.module_refs.union(&other.module_refs).cloned().collect();
        Acl { entries, module_refs }
    }

    /// True when any entry names a member of the given module; set by the
    /// builder, consumed by the completer.
    pub fn references_module_member(&self, module: &str) -> bool {
        self.module_refs.contains(module)
    }

    pub(crate) fn module_refs(&self) -> impl Iterator<Item = &str> {
        self.module_refs.iter().map(|s| s.as_str())
    }
}
