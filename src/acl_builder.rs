use crate::acl::{
    AccessPattern, Acl, AclEntry, PatternArg, Policy, SymbolPattern, TypePattern, WildcardKind,
};
use crate::error::ScexError;
use crate::types::parse_type;
use std::collections::HashSet;

/// Parses a qualifier pattern: `Name`, `Name[_]`, `Name[@plus T]`,
/// `Name[Exact]`. A bare name matches any instantiation.
fn parse_type_pattern(s: &str) -> Result<TypePattern, String> {
    let s = s.trim();
    let Some(open) = s.find('[') else {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
            return Err(format!("malformed type pattern: {}", s));
        }
        return Ok(TypePattern::named(s));
    };
    if !s.ends_with(']') {
        return Err(format!("malformed type pattern: {}", s));
    }
    let name = s[..open].trim().to_string();
    let body = &s[open + 1..s.len() - 1];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = body.as_bytes();
    for i in 0..=bytes.len() {
        let at_end = i == bytes.len();
        if at_end || (bytes[i] == b',' && depth == 0) {
            let arg = body[start..i].trim();
            args.push(parse_pattern_arg(arg)?);
            start = i + 1;
        } else if bytes[i] == b'[' {
            depth += 1;
        } else if bytes[i] == b']' {
            depth = depth.saturating_sub(1);
        }
    }
    Ok(TypePattern { name, args: Some(args) })
}

fn parse_pattern_arg(arg: &str) -> Result<PatternArg, String> {
    if arg == "_" {
        return Ok(PatternArg::Wild);
    }
    if let Some(rest) = arg.strip_prefix("@plus ") {
        let ty = parse_type(rest.trim()).ok_or_else(|| format!("malformed type: {}", rest))?;
        return Ok(PatternArg::Plus(ty));
    }
    let ty = parse_type(arg).ok_or_else(|| format!("malformed type: {}", arg))?;
    Ok(PatternArg::Exact(ty))
}

/// Declarative construction of ACLs (C5).
///
/// Entries are created inside `allow` and `deny` blocks and receive
/// monotonically increasing order indices, so a later `deny` shadows an
/// earlier `allow` of the same reference and vice versa.
///
/// # Examples
///
/// ```
/// use scex::AclBuilder;
///
/// let acl = AclBuilder::new()
///     .allow(|b| {
///         b.on("String", |t| {
///             t.member("length").member_with("charAt", &["Int"]);
///         });
///         b.on("Int", |t| {
///             t.members_named("+");
///         });
///     })
///     .deny(|b| {
///         b.on("Any", |t| {
///             t.member("==");
///         });
///     })
///     .build()
///     .unwrap();
/// assert_eq!(acl.entries().len(), 4);
/// ```
#[derive(Default)]
pub struct AclBuilder {
    entries: Vec<AclEntry>,
    module_refs: HashSet<String>,
    errors: Vec<String>,
}

impl AclBuilder {
    pub fn new() -> AclBuilder {
        AclBuilder::default()
    }

    pub fn allow(self, f: impl FnOnce(&mut PolicyBlock<'_>)) -> AclBuilder {
        self.block(Policy::Allow, f)
    }

    pub fn deny(self, f: impl FnOnce(&mut PolicyBlock<'_>)) -> AclBuilder {
        self.block(Policy::Deny, f)
    }

    fn block(mut self, policy: Policy, f: impl FnOnce(&mut PolicyBlock<'_>)) -> AclBuilder {
        let mut block = PolicyBlock { builder: &mut self, policy };
        f(&mut block);
        self
    }

    /// Finishes the list. Malformed patterns recorded during construction
    /// surface here.
    pub fn build(self) -> Result<Acl, ScexError> {
        if let Some(first) = self.errors.first() {
            return Err(ScexError::Registration(first.clone()));
        }
        Ok(Acl::from_parts(self.entries, self.module_refs))
    }

    fn push(&mut self, pattern: AccessPattern, policy: Policy) {
        let order = self.entries.len();
        self.entries.push(AclEntry { pattern, policy, order });
    }
}

/// One `allow { … }` / `deny { … }` block.
pub struct PolicyBlock<'a> {
    builder: &'a mut AclBuilder,
    policy: Policy,
}

impl PolicyBlock<'_> {
    /// Patterns whose qualifier is (a subtype of) the given type.
    pub fn on(&mut self, qualifier: &str, f: impl FnOnce(&mut TypeBlock<'_>)) -> &mut Self {
        self.scoped(qualifier, None, false, f)
    }

    /// Patterns matching only accesses routed through the named implicit
    /// view onto `target`.
    pub fn implicitly_as(
        &mut self,
        view: &str,
        target: &str,
        f: impl FnOnce(&mut TypeBlock<'_>),
    ) -> &mut Self {
        self.scoped(target, Some(view.to_string()), false, f)
    }

    /// Patterns over the static members of a module type. Records that the
    /// profile references members of this module.
    pub fn statics(&mut self, module: &str, f: impl FnOnce(&mut TypeBlock<'_>)) -> &mut Self {
        self.builder.module_refs.insert(module.to_string());
        self.scoped(module, None, true, f)
    }

    /// Shorthand for the `all.constructors` wildcard on one type.
    pub fn constructors(&mut self, qualifier: &str) -> &mut Self {
        match parse_type_pattern(qualifier) {
            Ok(pattern) => {
                let policy = self.policy;
                self.builder.push(
                    AccessPattern {
                        qualifier: pattern,
                        symbol: None,
                        via_implicit: None,
                        wildcard: WildcardKind::AllConstructors,
                    },
                    policy,
                );
            }
            Err(e) => self.builder.errors.push(e),
        }
        self
    }

    fn scoped(
        &mut self,
        qualifier: &str,
        via: Option<String>,
        statics: bool,
        f: impl FnOnce(&mut TypeBlock<'_>),
    ) -> &mut Self {
        match parse_type_pattern(qualifier) {
            Ok(pattern) => {
                let policy = self.policy;
                let mut block = TypeBlock {
                    builder: &mut *self.builder,
                    policy,
                    qualifier: pattern,
                    via,
                    statics,
                };
                f(&mut block);
            }
            Err(e) => self.builder.errors.push(e),
        }
        self
    }
}

/// Pattern construction against one qualifier type.
pub struct TypeBlock<'a> {
    builder: &'a mut AclBuilder,
    policy: Policy,
    qualifier: TypePattern,
    via: Option<String>,
    statics: bool,
}

impl TypeBlock<'_> {
    fn pattern(&self, symbol: Option<SymbolPattern>, wildcard: WildcardKind) -> AccessPattern {
        AccessPattern {
            qualifier: self.qualifier.clone(),
            symbol,
            via_implicit: self.via.clone(),
            wildcard,
        }
    }

    /// A specific symbol, every overload. The fully-qualified name is formed
    /// from the block's qualifier type, which must be the declaring type.
    pub fn member(&mut self, name: &str) -> &mut Self {
        let fq_name = format!("{}.{}", self.qualifier.name, name);
        let p = self.pattern(Some(SymbolPattern { fq_name, params: None }), WildcardKind::None);
        let policy = self.policy;
        self.builder.push(p, policy);
        self
    }

    /// A specific symbol pinned to the overload with the given parameter
    /// types.
    pub fn member_with(&mut self, name: &str, params: &[&str]) -> &mut Self {
        let parsed: Result<Vec<_>, _> = params
            .iter()
            .map(|p| parse_type(p).ok_or_else(|| format!("malformed type: {}", p)))
            .collect();
        match parsed {
            Ok(params) => {
                let fq_name = format!("{}.{}", self.qualifier.name, name);
                let p = self.pattern(
                    Some(SymbolPattern { fq_name, params: Some(params) }),
                    WildcardKind::None,
                );
                let policy = self.policy;
                self.builder.push(p, policy);
            }
            Err(e) => self.builder.errors.push(e),
        }
        self
    }

    /// The `all.members` wildcard (or `allStatic[T].members` inside a
    /// `statics` block).
    pub fn all_members(&mut self) -> &mut Self {
        let wildcard =
            if self.statics { WildcardKind::AllStatics } else { WildcardKind::AllMembers };
        let p = self.pattern(None, wildcard);
        let policy = self.policy;
        self.builder.push(p, policy);
        self
    }

    /// The `all.membersNamed(n)` wildcard: every overload of one name.
    pub fn members_named(&mut self, name: &str) -> &mut Self {
        if self.statics {
            // Statics have no override chains; pin the symbol directly.
            return self.member(name);
        }
        let p = self.pattern(None, WildcardKind::MembersNamed(name.to_string()));
        let policy = self.policy;
        self.builder.push(p, policy);
        self
    }

    /// The `all.constructors` wildcard for the block's type.
    pub fn constructors(&mut self) -> &mut Self {
        let p = self.pattern(None, WildcardKind::AllConstructors);
        let policy = self.policy;
        self.builder.push(p, policy);
        self
    }
}
