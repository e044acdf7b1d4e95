use crate::acl::Acl;
use crate::error::{CompilationFailed, Diagnostic};
use crate::pos::line_col;
use crate::syntax::SyntaxRules;
use crate::template::{preprocess, PosMapping};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A source with a stable identity, so its compilation can be cached per
/// profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedSource {
    pub name: String,
    pub code: String,
}

/// Documentation and parameter-name overrides attached to one symbol, keyed
/// by fully-qualified name. Consumed by the completer.
#[derive(Clone, Debug, Default)]
pub struct MemberAttributes {
    pub documentation: Option<String>,
    pub param_names: Option<Vec<String>>,
}

/// The symbol-attribute table of a profile.
#[derive(Clone, Debug, Default)]
pub struct SymbolAttributes {
    map: HashMap<String, MemberAttributes>,
}

impl SymbolAttributes {
    pub fn new() -> SymbolAttributes {
        SymbolAttributes::default()
    }

    pub fn document(mut self, fq_name: &str, doc: &str) -> SymbolAttributes {
        self.map.entry(fq_name.to_string()).or_default().documentation = Some(doc.to_string());
        self
    }

    pub fn rename_params(mut self, fq_name: &str, names: &[&str]) -> SymbolAttributes {
        self.map.entry(fq_name.to_string()).or_default().param_names =
            Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn get(&self, fq_name: &str) -> Option<&MemberAttributes> {
        self.map.get(fq_name)
    }
}

/// An immutable security and capability domain: which syntax is legal, which
/// member accesses are allowed, and which helper code every expression of
/// this profile sees.
pub struct ExpressionProfile {
    pub name: String,
    pub syntax: SyntaxRules,
    pub acl: Acl,
    pub attributes: SymbolAttributes,
    /// `val` definitions prepended to every expression of this profile.
    pub header: String,
    /// `val` definitions with stable identity, compiled once per profile.
    pub utilities: Option<NamedSource>,
}

impl ExpressionProfile {
    pub fn new(name: &str, syntax: SyntaxRules, acl: Acl) -> ExpressionProfile {
        ExpressionProfile {
            name: name.to_string(),
            syntax,
            acl,
            attributes: SymbolAttributes::default(),
            header: String::new(),
            utilities: None,
        }
    }

    pub fn with_header(mut self, header: &str) -> ExpressionProfile {
        self.header = header.to_string();
        self
    }

    pub fn with_utilities(mut self, name: &str, code: &str) -> ExpressionProfile {
        self.utilities = Some(NamedSource { name: name.to_string(), code: code.to_string() });
        self
    }

    pub fn with_attributes(mut self, attributes: SymbolAttributes) -> ExpressionProfile {
        self.attributes = attributes;
        self
    }
}

/// The immutable key one compiled expression is cached under.
///
/// Equality and hashing cover the fields that determine the artifact:
/// profile identity, mode flags, preprocessed expression, header, context and
/// result types, and the ordered free-variable map. The original source text
/// and the position mapping ride along for diagnostic remapping only.
#[derive(Clone)]
pub struct ExpressionDef {
    pub profile: Arc<ExpressionProfile>,
    pub template: bool,
    pub setter: bool,
    /// The preprocessed (template-expanded) expression text.
    pub expression: String,
    pub header: String,
    pub context_type: String,
    pub result_type: String,
    pub variable_types: IndexMap<String, String>,
    /// Diagnostic-only: the expression as the host wrote it.
    pub original: String,
    /// Diagnostic-only: processed-to-original offset mapping.
    pub mapping: PosMapping,
}

impl ExpressionDef {
    /// Builds a definition, running the template preprocessor (C1).
    ///
    /// Preprocessing errors (unbalanced holes, bad setter templates) are
    /// returned as a compile report positioned against `expression`.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        profile: Arc<ExpressionProfile>,
        expression: &str,
        template: bool,
        setter: bool,
        context_type: &str,
        result_type: &str,
        variable_types: IndexMap<String, String>,
    ) -> Result<ExpressionDef, CompilationFailed> {
        let pre = preprocess(expression, template, setter).map_err(|d| {
            let (line, column, line_text) = line_col(expression, d.span.start);
            CompilationFailed {
                errors: vec![Diagnostic { kind: d.kind, message: d.message, line, column, line_text }],
            }
        })?;
        let header = profile.header.clone();
        Ok(ExpressionDef {
            profile,
            template,
            setter,
            expression: pre.text,
            header,
            context_type: context_type.to_string(),
            result_type: result_type.to_string(),
            variable_types,
            original: expression.to_string(),
            mapping: pre.mapping,
        })
    }

    fn identity_fields(&self) -> impl Iterator<Item = &str> {
        [
            self.profile.name.as_str(),
            if self.template { "t" } else { "" },
            if self.setter { "s" } else { "" },
            self.expression.as_str(),
            self.header.as_str(),
            self.context_type.as_str(),
            self.result_type.as_str(),
        ]
        .into_iter()
    }

    /// Stable content digest; the generated unit is named
    /// `_scex_expr$<digest>` so identical requests map to the same on-disk
    /// artifact across restarts.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for field in self.identity_fields() {
            hasher.update(field.as_bytes());
            hasher.update([0]);
        }
        for (name, ty) in &self.variable_types {
            hasher.update(name.as_bytes());
            hasher.update([1]);
            hasher.update(ty.as_bytes());
            hasher.update([0]);
        }
        let digest = hasher.finalize();
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn unit_name(&self) -> String {
        format!("_scex_expr${}", self.digest())
    }
}

impl PartialEq for ExpressionDef {
    fn eq(&self, other: &Self) -> bool {
        self.identity_fields().eq(other.identity_fields())
            && self.variable_types == other.variable_types
    }
}

impl Eq for ExpressionDef {}

impl Hash for ExpressionDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for f in self.identity_fields() {
            f.hash(state);
        }
        for (name, ty) in &self.variable_types {
            name.hash(state);
            ty.hash(state);
        }
    }
}

impl std::fmt::Debug for ExpressionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionDef")
            .field("profile", &self.profile.name)
            .field("template", &self.template)
            .field("setter", &self.setter)
            .field("expression", &self.expression)
            .field("context_type", &self.context_type)
            .field("result_type", &self.result_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Arc<ExpressionProfile> {
        Arc::new(ExpressionProfile::new("p", SyntaxRules::default(), Acl::empty()))
    }

    fn def(expr: &str) -> ExpressionDef {
        ExpressionDef::create(profile(), expr, false, false, "Unit", "Int", IndexMap::new())
            .unwrap()
    }

    #[test]
    fn equality_ignores_diagnostic_fields() {
        let mut a = def("1 + 2");
        let b = def("1 + 2");
        assert_eq!(a, b);
        a.original = "something else".to_string();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_separates_defs() {
        assert_ne!(def("1 + 2").digest(), def("1 + 3").digest());
        let t = ExpressionDef::create(
            profile(),
            "1 + 2",
            true,
            false,
            "Unit",
            "String",
            IndexMap::new(),
        )
        .unwrap();
        assert_ne!(def("1 + 2").digest(), t.digest());
    }
}
