use crate::error::{EvalError, ScexError};
use crate::types::{parse_type, TypeRep};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Native implementation of a member: `(receiver, arguments) -> value`.
///
/// Statics and constructors receive `Value::Unit` as the receiver.
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    Method,
    Field,
    Static,
    Constructor,
}

/// One declared parameter of a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRep,
}

/// A member declaration inside a [`TypeDef`].
#[derive(Clone)]
pub struct MemberDef {
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<Param>,
    pub result: TypeRep,
    pub invoke: NativeFn,
    /// Present only for assignable fields.
    pub assign: Option<NativeFn>,
}

/// A registered type: name, single-inheritance parent, members.
pub struct TypeDef {
    pub name: String,
    pub parent: Option<String>,
    pub members: Vec<MemberDef>,
    pub statics: Vec<MemberDef>,
    pub constructors: Vec<MemberDef>,
}

/// A registered implicit conversion with a stable symbol name.
#[derive(Clone)]
pub struct ImplicitView {
    pub name: String,
    pub from: TypeRep,
    pub to: TypeRep,
    pub apply: NativeFn,
}

/// A fully resolved member reference, detached from the registry so it can
/// travel through typed trees, access candidates and signature records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
    /// Declaring type name.
    pub owner: String,
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<Param>,
    pub result: TypeRep,
    /// Fully-qualified names of the declarations this member overrides,
    /// nearest first.
    pub overridden: Vec<String>,
    /// True for fields with a registered setter; what setter-mode
    /// expressions may assign to.
    pub assignable: bool,
}

impl MemberRef {
    /// `Owner.name` — the identity the ACL and signature records key on.
    pub fn fq_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    /// Typed signature, rendered with the type printer:
    /// `Owner.name(P1, P2): R` for callables, `Owner.name: R` for fields.
    pub fn typed_signature(&self) -> String {
        match self.kind {
            MemberKind::Field => format!("{}: {}", self.fq_name(), self.result.render()),
            _ => {
                let params = self
                    .params
                    .iter()
                    .map(|p| p.ty.render())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({}): {}", self.fq_name(), params, self.result.render())
            }
        }
    }

    /// Erased signature, as reflection sees the symbol: applied types
    /// collapse to their constructor names.
    pub fn erased_signature(&self) -> String {
        match self.kind {
            MemberKind::Field => format!("{}:{}", self.fq_name(), self.result.erased()),
            _ => {
                let params = self
                    .params
                    .iter()
                    .map(|p| p.ty.erased().to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}({}){}", self.fq_name(), params, self.result.erased())
            }
        }
    }
}

/// Registration metadata submitted by the `#[member]` attribute macro.
///
/// Collected by [`TypeRegistry::install_registered`].
pub struct MemberMeta {
    pub owner: &'static str,
    pub name: &'static str,
    /// `(parameter name, type name)` pairs, excluding the receiver.
    pub params: &'static [(&'static str, &'static str)],
    pub result: &'static str,
    pub invoke: fn(&Value, &[Value]) -> Result<Value, EvalError>,
}

inventory::collect!(MemberMeta);

/// The symbol table the whole pipeline resolves against: the Rust rendition
/// of the host classpath plus its reflection bridge.
///
/// Hosts register their context and object types here; the typer resolves
/// member accesses against it, the ACL matches candidates against it, and the
/// on-disk cache revalidates recorded signatures against it.
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
    views: Vec<ImplicitView>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry pre-populated with the builtin types and the `Math` module.
    pub fn new() -> Self {
        let mut reg = TypeRegistry { types: HashMap::new(), views: Vec::new() };
        crate::builtins::install(&mut reg);
        reg
    }

    /// Registers a new type with an optional parent (defaults to `Any`).
    pub fn register_type(&mut self, name: &str, parent: Option<&str>) -> Result<(), ScexError> {
        if self.types.contains_key(name) {
            return Err(ScexError::Registration(format!("type already exists: {}", name)));
        }
        let parent = match name {
            "Any" => None,
            _ => Some(parent.unwrap_or("Any").to_string()),
        };
        self.types.insert(
            name.to_string(),
            TypeDef {
                name: name.to_string(),
                parent,
                members: Vec::new(),
                statics: Vec::new(),
                constructors: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    fn type_mut(&mut self, name: &str) -> Result<&mut TypeDef, ScexError> {
        self.types
            .get_mut(name)
            .ok_or_else(|| ScexError::Registration(format!("unknown type: {}", name)))
    }

    fn parse_params(params: &[(&str, &str)]) -> Result<Vec<Param>, ScexError> {
        params
            .iter()
            .map(|(name, ty)| {
                let ty = parse_type(ty)
                    .ok_or_else(|| ScexError::Registration(format!("malformed type: {}", ty)))?;
                Ok(Param { name: name.to_string(), ty })
            })
            .collect()
    }

    fn add_member(
        &mut self,
        owner: &str,
        kind: MemberKind,
        name: &str,
        params: &[(&str, &str)],
        result: &str,
        invoke: NativeFn,
        assign: Option<NativeFn>,
    ) -> Result<(), ScexError> {
        let params = Self::parse_params(params)?;
        let result = parse_type(result)
            .ok_or_else(|| ScexError::Registration(format!("malformed type: {}", result)))?;
        let def = self.type_mut(owner)?;
        let list = match kind {
            MemberKind::Static => &mut def.statics,
            MemberKind::Constructor => &mut def.constructors,
            _ => &mut def.members,
        };
        if list.iter().any(|m| m.name == name && m.params.len() == params.len()) {
            return Err(ScexError::Registration(format!(
                "member already exists: {}.{}/{}",
                owner,
                name,
                params.len()
            )));
        }
        list.push(MemberDef { name: name.to_string(), kind, params, result, invoke, assign });
        Ok(())
    }

    /// Registers an instance method. Parameters are `(name, type)` pairs with
    /// textual type representations.
    pub fn register_method(
        &mut self,
        owner: &str,
        name: &str,
        params: &[(&str, &str)],
        result: &str,
        invoke: NativeFn,
    ) -> Result<(), ScexError> {
        self.add_member(owner, MemberKind::Method, name, params, result, invoke, None)
    }

    /// Registers a field with a getter and an optional setter. Settable
    /// fields are what setter-mode expressions assign to.
    pub fn register_field(
        &mut self,
        owner: &str,
        name: &str,
        ty: &str,
        get: NativeFn,
        set: Option<NativeFn>,
    ) -> Result<(), ScexError> {
        self.add_member(owner, MemberKind::Field, name, &[], ty, get, set)
    }

    /// Registers a static (module) member of a type.
    pub fn register_static(
        &mut self,
        owner: &str,
        name: &str,
        params: &[(&str, &str)],
        result: &str,
        invoke: NativeFn,
    ) -> Result<(), ScexError> {
        self.add_member(owner, MemberKind::Static, name, params, result, invoke, None)
    }

    /// Registers a constructor for `new T(args)` expressions. The symbol is
    /// named `<init>`.
    pub fn register_constructor(
        &mut self,
        owner: &str,
        params: &[(&str, &str)],
        invoke: NativeFn,
    ) -> Result<(), ScexError> {
        let result = owner.to_string();
        self.add_member(owner, MemberKind::Constructor, "<init>", params, &result, invoke, None)
    }

    /// Registers a named implicit conversion.
    pub fn register_view(
        &mut self,
        name: &str,
        from: &str,
        to: &str,
        apply: NativeFn,
    ) -> Result<(), ScexError> {
        if self.views.iter().any(|v| v.name == name) {
            return Err(ScexError::Registration(format!("view already exists: {}", name)));
        }
        let from = parse_type(from)
            .ok_or_else(|| ScexError::Registration(format!("malformed type: {}", from)))?;
        let to = parse_type(to)
            .ok_or_else(|| ScexError::Registration(format!("malformed type: {}", to)))?;
        self.views.push(ImplicitView { name: name.to_string(), from, to, apply });
        Ok(())
    }

    /// Folds in every `#[member]` submission from the inventory. Owners that
    /// are not yet registered are created as subtypes of `Any`.
    pub fn install_registered(&mut self) -> Result<(), ScexError> {
        for meta in inventory::iter::<MemberMeta> {
            if !self.types.contains_key(meta.owner) {
                self.register_type(meta.owner, None)?;
            }
            let f = meta.invoke;
            let invoke: NativeFn = Arc::new(move |recv: &Value, args: &[Value]| f(recv, args));
            self.register_method(meta.owner, meta.name, meta.params, meta.result, invoke)?;
        }
        Ok(())
    }

    /// Walks the parent chain of `name`, including `name` itself. Tolerates
    /// accidental parent cycles in host registrations.
    fn chain<'a>(&'a self, name: &str) -> Vec<&'a TypeDef> {
        let mut out: Vec<&TypeDef> = Vec::new();
        let mut cur = self.types.get(name);
        while let Some(def) = cur {
            if out.iter().any(|seen| seen.name == def.name) {
                break;
            }
            out.push(def);
            cur = def.parent.as_deref().and_then(|p| self.types.get(p));
        }
        out
    }

    /// Nominal subtyping: reflexive, `Any` on top, parent-chain walk for the
    /// constructor name; applied arguments are invariant.
    pub fn is_subtype(&self, sub: &TypeRep, sup: &TypeRep) -> bool {
        if sub == sup || sup.name() == "Any" {
            return true;
        }
        match (sub, sup) {
            (_, TypeRep::Named(sup_name)) => {
                self.chain(sub.name()).iter().any(|d| &d.name == sup_name)
            }
            _ => false,
        }
    }

    /// Least upper bound of two types, used to type `if` branches.
    pub fn lub(&self, a: &TypeRep, b: &TypeRep) -> TypeRep {
        if self.is_subtype(a, b) {
            return b.clone();
        }
        if self.is_subtype(b, a) {
            return a.clone();
        }
        for def in self.chain(a.name()) {
            let cand = TypeRep::named(&def.name);
            if self.is_subtype(b, &cand) {
                return cand;
            }
        }
        TypeRep::named("Any")
    }

    fn to_ref(&self, qualifier_name: &str, def: &MemberDef) -> MemberRef {
        let mut overridden = Vec::new();
        // Walk strictly above the declaring owner for same-name, same-arity
        // declarations: overriding an allowed symbol keeps it allowed.
        let mut above = false;
        for ty in self.chain(qualifier_name) {
            if !above {
                if ty.members.iter().any(|m| std::ptr::eq(m, def)) {
                    above = true;
                }
                continue;
            }
            if ty.members.iter().any(|m| m.name == def.name && m.params.len() == def.params.len())
            {
                overridden.push(format!("{}.{}", ty.name, def.name));
            }
        }
        let owner = self
            .chain(qualifier_name)
            .iter()
            .find(|t| t.members.iter().any(|m| std::ptr::eq(m, def)))
            .map(|t| t.name.clone())
            .unwrap_or_else(|| qualifier_name.to_string());
        MemberRef {
            owner,
            name: def.name.clone(),
            kind: def.kind,
            params: def.params.clone(),
            result: def.result.clone(),
            overridden,
            assignable: def.assign.is_some(),
        }
    }

    fn applicable(&self, def: &MemberDef, args: &[TypeRep]) -> bool {
        def.params.len() == args.len()
            && def.params.iter().zip(args).all(|(p, a)| self.is_subtype(a, &p.ty))
    }

    /// Resolves a member access `qualifier.name(args)` walking the qualifier's
    /// type chain. `args` is `None` for a bare select (field or nullary
    /// method).
    pub fn resolve_member(
        &self,
        qualifier: &TypeRep,
        name: &str,
        args: Option<&[TypeRep]>,
    ) -> Option<MemberRef> {
        for ty in self.chain(qualifier.name()) {
            for def in &ty.members {
                if def.name != name {
                    continue;
                }
                let ok = match args {
                    Some(args) => self.applicable(def, args),
                    None => def.kind == MemberKind::Field || def.params.is_empty(),
                };
                if ok {
                    return Some(self.to_ref(qualifier.name(), def));
                }
            }
        }
        None
    }

    /// Resolves a member through implicit views applicable to `qualifier`.
    /// Returns the view together with the member found on the view's target.
    pub fn resolve_via_views(
        &self,
        qualifier: &TypeRep,
        name: &str,
        args: Option<&[TypeRep]>,
    ) -> Option<(ImplicitView, MemberRef)> {
        for view in &self.views {
            if !self.is_subtype(qualifier, &view.from) {
                continue;
            }
            if let Some(m) = self.resolve_member(&view.to, name, args) {
                return Some((view.clone(), m));
            }
        }
        None
    }

    pub fn resolve_static(
        &self,
        owner: &str,
        name: &str,
        args: &[TypeRep],
    ) -> Option<MemberRef> {
        let def = self.types.get(owner)?;
        def.statics
            .iter()
            .find(|m| m.name == name && self.applicable(m, args))
            .map(|m| MemberRef {
                owner: owner.to_string(),
                name: m.name.clone(),
                kind: MemberKind::Static,
                params: m.params.clone(),
                result: m.result.clone(),
                overridden: Vec::new(),
                assignable: false,
            })
    }

    pub fn resolve_constructor(&self, owner: &str, args: &[TypeRep]) -> Option<MemberRef> {
        let def = self.types.get(owner)?;
        def.constructors
            .iter()
            .find(|m| self.applicable(m, args))
            .map(|m| MemberRef {
                owner: owner.to_string(),
                name: "<init>".to_string(),
                kind: MemberKind::Constructor,
                params: m.params.clone(),
                result: m.result.clone(),
                overridden: Vec::new(),
                assignable: false,
            })
    }

    /// True if the type declares a static member set; such names act as
    /// module references in expressions.
    pub fn is_module(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|d| !d.statics.is_empty())
    }

    /// Every member visible on `ty` (own and inherited, subtype declarations
    /// shadowing), for the completer.
    pub fn visible_members(&self, ty: &TypeRep) -> Vec<MemberRef> {
        let mut out: Vec<MemberRef> = Vec::new();
        for def in self.chain(ty.name()) {
            for m in &def.members {
                if out.iter().any(|o| o.name == m.name && o.params.len() == m.params.len()) {
                    continue;
                }
                out.push(self.to_ref(ty.name(), m));
            }
        }
        out
    }

    /// Members contributed to `ty` by applicable implicit views, with the
    /// contributing view's symbol name.
    pub fn view_members(&self, ty: &TypeRep) -> Vec<(String, MemberRef)> {
        let mut out = Vec::new();
        for view in &self.views {
            if !self.is_subtype(ty, &view.from) {
                continue;
            }
            for m in self.visible_members(&view.to) {
                out.push((view.name.clone(), m));
            }
        }
        out
    }

    pub fn view_by_name(&self, name: &str) -> Option<&ImplicitView> {
        self.views.iter().find(|v| v.name == name)
    }

    /// Relinks a symbol recorded in a persisted program to its native
    /// implementation. Returns the invoke and (for fields) assign functions.
    pub fn link(
        &self,
        owner: &str,
        name: &str,
        params: &[TypeRep],
        kind: MemberKind,
    ) -> Option<(NativeFn, Option<NativeFn>)> {
        let def = self.types.get(owner)?;
        let list = match kind {
            MemberKind::Static => &def.statics,
            MemberKind::Constructor => &def.constructors,
            _ => &def.members,
        };
        list.iter()
            .find(|m| {
                m.name == name
                    && m.params.len() == params.len()
                    && m.params.iter().zip(params).all(|(p, a)| &p.ty == a)
            })
            .map(|m| (m.invoke.clone(), m.assign.clone()))
    }

    /// Every current declaration named `name` on `owner` or its ancestors,
    /// used by signature revalidation ("a symbol or any of its overrides").
    pub fn declarations_named(&self, owner: &str, name: &str) -> Vec<MemberRef> {
        let mut out = Vec::new();
        if name == "<init>" {
            if let Some(def) = self.types.get(owner) {
                for m in &def.constructors {
                    out.push(MemberRef {
                        owner: owner.to_string(),
                        name: name.to_string(),
                        kind: MemberKind::Constructor,
                        params: m.params.clone(),
                        result: m.result.clone(),
                        overridden: Vec::new(),
                        assignable: false,
                    });
                }
            }
            return out;
        }
        for def in self.chain(owner) {
            for m in def.members.iter().filter(|m| m.name == name) {
                out.push(self.to_ref(owner, m));
            }
            for m in def.statics.iter().filter(|m| m.name == name) {
                out.push(MemberRef {
                    owner: def.name.clone(),
                    name: m.name.clone(),
                    kind: MemberKind::Static,
                    params: m.params.clone(),
                    result: m.result.clone(),
                    overridden: Vec::new(),
                    assignable: false,
                });
            }
        }
        out
    }
}
