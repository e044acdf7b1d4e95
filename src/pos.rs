use crate::error::ErrorKind;

/// Byte range into the source a node or token was parsed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span { start: self.start, end: other.end }
    }
}

/// A diagnostic before position remapping: a kind, a message and a span into
/// the source being processed (assembled unit or processed expression).
#[derive(Clone, Debug)]
pub(crate) struct RawDiag {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
}

impl RawDiag {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> RawDiag {
        RawDiag { kind, span, message: message.into() }
    }
}

/// Computes the 1-based line/column of `offset` in `text`, along with the
/// text of that line.
pub(crate) fn line_col(text: &str, offset: usize) -> (u32, u32, String) {
    let mut offset = offset.min(text.len());
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_no = before.matches('\n').count() as u32 + 1;
    let col = (offset - line_start) as u32 + 1;
    let line_end = text[line_start..].find('\n').map(|i| line_start + i).unwrap_or(text.len());
    (line_no, col, text[line_start..line_end].to_string())
}
