use serde::{Deserialize, Serialize};

/// A textual-level type representation, as produced by the host's type-string
/// bridge and by the front-end's own type printer.
///
/// Types are nominal; applied constructors render as `Name[A, B]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRep {
    Named(String),
    Applied { name: String, args: Vec<TypeRep> },
}

impl TypeRep {
    pub fn named(name: &str) -> TypeRep {
        TypeRep::Named(name.to_string())
    }

    /// The constructor name, ignoring any applied arguments.
    pub fn name(&self) -> &str {
        match self {
            TypeRep::Named(n) => n,
            TypeRep::Applied { name, .. } => name,
        }
    }

    /// Full rendering, the "compiler's own type-printer" of typed signatures.
    pub fn render(&self) -> String {
        match self {
            TypeRep::Named(n) => n.clone(),
            TypeRep::Applied { name, args } => {
                let args = args.iter().map(|a| a.render()).collect::<Vec<_>>();
                format!("{}[{}]", name, args.join(", "))
            }
        }
    }

    /// Erased rendering: applied constructors collapse to their bare name,
    /// the way reflection sees them.
    pub fn erased(&self) -> &str {
        self.name()
    }
}

impl std::fmt::Display for TypeRep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parses a textual type representation: `Name` or `Name[A, B[C]]`.
///
/// Returns `None` on malformed input; callers turn that into a diagnostic
/// naming the offending text.
pub fn parse_type(s: &str) -> Option<TypeRep> {
    let mut p = TyParser { src: s.as_bytes(), i: 0 };
    p.skip_ws();
    let ty = p.ty()?;
    p.skip_ws();
    if p.i == p.src.len() { Some(ty) } else { None }
}

struct TyParser<'a> {
    src: &'a [u8],
    i: usize,
}

impl<'a> TyParser<'a> {
    fn skip_ws(&mut self) {
        while self.src.get(self.i).is_some_and(|c| c.is_ascii_whitespace()) {
            self.i += 1;
        }
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.i;
        while self
            .src
            .get(self.i)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_' || *c == b'.')
        {
            self.i += 1;
        }
        if self.i == start {
            return None;
        }
        Some(std::str::from_utf8(&self.src[start..self.i]).ok()?.to_string())
    }

    fn ty(&mut self) -> Option<TypeRep> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        if self.src.get(self.i) != Some(&b'[') {
            return Some(TypeRep::Named(name));
        }
        self.i += 1;
        let mut args = Vec::new();
        loop {
            args.push(self.ty()?);
            self.skip_ws();
            match self.src.get(self.i) {
                Some(b',') => {
                    self.i += 1;
                }
                Some(b']') => {
                    self.i += 1;
                    break;
                }
                _ => return None,
            }
        }
        Some(TypeRep::Applied { name, args })
    }
}
