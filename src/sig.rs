use crate::program::{view_erased_signature, view_typed_signature, Program};
use crate::registry::TypeRegistry;

/// One recorded external-symbol signature of a persisted artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureRecord {
    pub fq_name: String,
    pub typed: String,
    pub erased: String,
}

/// The fully-qualified name is the typed signature's prefix: everything
/// before the parameter list (or the field's `: `).
fn fq_of_typed(typed: &str) -> String {
    let end = typed.find('(').or_else(|| typed.find(':')).unwrap_or(typed.len());
    typed[..end].trim().to_string()
}

/// The ordered signature record set of a program: every symbol and implicit
/// view it references, deduplicated.
pub(crate) fn records_of(program: &Program) -> Vec<SignatureRecord> {
    let mut out: Vec<SignatureRecord> = Vec::new();
    let all = program
        .symbols
        .iter()
        .map(|s| (s.typed.clone(), s.erased.clone()))
        .chain(program.views.iter().map(|v| (v.typed.clone(), v.erased.clone())));
    for (typed, erased) in all {
        if out.iter().any(|r| r.typed == typed && r.erased == erased) {
            continue;
        }
        out.push(SignatureRecord { fq_name: fq_of_typed(&typed), typed, erased });
    }
    out
}

/// Renders the `.sig` file: a `SIGNATURES:` banner, then blank-line
/// separated typed/erased pairs.
pub(crate) fn render_sig_file(records: &[SignatureRecord]) -> String {
    let mut out = String::from("SIGNATURES:\n");
    for (i, r) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&r.typed);
        out.push('\n');
        out.push_str(&r.erased);
        out.push('\n');
    }
    out
}

/// Parses a `.sig` file. `None` on malformed content; the caller treats that
/// as a cache miss.
pub(crate) fn parse_sig_file(text: &str) -> Option<Vec<SignatureRecord>> {
    let mut lines = text.lines();
    if lines.next()? != "SIGNATURES:" {
        return None;
    }
    let mut records = Vec::new();
    let rest: Vec<&str> = lines.collect();
    let mut i = 0;
    while i < rest.len() {
        if rest[i].is_empty() {
            i += 1;
            continue;
        }
        let typed = rest[i].to_string();
        let erased = rest.get(i + 1)?.to_string();
        if erased.is_empty() {
            return None;
        }
        records.push(SignatureRecord { fq_name: fq_of_typed(&typed), typed, erased });
        i += 2;
    }
    Some(records)
}

/// Checks that every recorded triple still resolves to a symbol (or one of
/// its overrides) with the identical typed/erased pair. Returns the first
/// failing fully-qualified name.
///
/// Known, accepted gaps: changes to implicit-resolution choice and new
/// overloads shadowing previously bound ones are not detected.
pub(crate) fn validate_records(
    records: &[SignatureRecord],
    reg: &TypeRegistry,
) -> Result<(), String> {
    for record in records {
        let ok = match record.fq_name.rsplit_once('.') {
            Some((owner, name)) => reg
                .declarations_named(owner, name)
                .iter()
                .any(|m| m.typed_signature() == record.typed && m.erased_signature() == record.erased),
            // No dot: an implicit view symbol.
            None => reg.view_by_name(&record.fq_name).is_some_and(|v| {
                view_typed_signature(&v.name, &v.from, &v.to) == record.typed
                    && view_erased_signature(&v.name, &v.from, &v.to) == record.erased
            }),
        };
        if !ok {
            return Err(record.fq_name.clone());
        }
    }
    Ok(())
}
