use crate::profile::ExpressionDef;

/// The synthetic compilation unit built around one expression (C2).
pub(crate) struct AssembledSource {
    pub source: String,
    /// Byte offset where the user expression begins; everything before it is
    /// profile-trusted and exempt from access validation.
    pub expr_offset: usize,
    pub unit_name: String,
}

/// Wraps the preprocessed expression into a unit: a banner naming the unit
/// and its context/result types, the profile header definitions, then the
/// user expression. The profile's utilities block is not spliced here; it is
/// compiled once per profile and enters the scope through the typer.
pub(crate) fn assemble(def: &ExpressionDef) -> AssembledSource {
    let unit_name = def.unit_name();
    let mut source = String::new();
    source.push_str(&format!("// unit {}\n", unit_name));
    source.push_str(&format!(
        "// context: {}, result: {}\n",
        def.context_type, def.result_type
    ));
    if !def.header.trim().is_empty() {
        source.push_str(def.header.trim_end());
        source.push('\n');
    }
    let expr_offset = source.len();
    source.push_str(&def.expression);
    AssembledSource { source, expr_offset, unit_name }
}
