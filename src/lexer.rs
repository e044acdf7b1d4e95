use crate::error::ErrorKind;
use crate::pos::{RawDiag, Span};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Int(i64),
    Double(f64),
    Str(String),
    CharLit(char),
    Dot,
    Comma,
    LParen,
    RParen,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Clone, Debug)]
pub(crate) struct Token {
    pub tok: Tok,
    pub span: Span,
}

pub(crate) struct Lexer<'a> {
    src: &'a [u8],
    i: usize,
}

fn parse_err(span: Span, msg: impl Into<String>) -> RawDiag {
    RawDiag::new(ErrorKind::Parse, span, msg)
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(s: &'a str) -> Self {
        Self { src: s.as_bytes(), i: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.i).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.i + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.src.get(self.i).copied();
        if ch.is_some() {
            self.i += 1;
        }
        ch
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
                self.i += 1;
            }
            if self.peek() == Some(b'/') && self.peek2() == Some(b'/') {
                while self.peek().is_some_and(|c| c != b'\n') {
                    self.i += 1;
                }
                continue;
            }
            break;
        }
    }

    fn tok(&self, start: usize, tok: Tok) -> Token {
        Token { tok, span: Span::new(start, self.i) }
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, RawDiag> {
        self.skip_ws_and_comments();
        let start = self.i;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(self.tok(start, Tok::Eof)),
        };
        match c {
            b'(' => {
                self.bump();
                Ok(self.tok(start, Tok::LParen))
            }
            b')' => {
                self.bump();
                Ok(self.tok(start, Tok::RParen))
            }
            b',' => {
                self.bump();
                Ok(self.tok(start, Tok::Comma))
            }
            b'.' if !self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                self.bump();
                Ok(self.tok(start, Tok::Dot))
            }
            b'+' => {
                self.bump();
                Ok(self.tok(start, Tok::Plus))
            }
            b'-' => {
                self.bump();
                Ok(self.tok(start, Tok::Minus))
            }
            b'*' => {
                self.bump();
                Ok(self.tok(start, Tok::Star))
            }
            b'/' => {
                self.bump();
                Ok(self.tok(start, Tok::Slash))
            }
            b'%' => {
                self.bump();
                Ok(self.tok(start, Tok::Percent))
            }
            b'=' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(self.tok(start, Tok::EqEq))
                } else {
                    Ok(self.tok(start, Tok::Assign))
                }
            }
            b'!' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(self.tok(start, Tok::NotEq))
                } else {
                    Ok(self.tok(start, Tok::Bang))
                }
            }
            b'<' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(self.tok(start, Tok::Le))
                } else {
                    Ok(self.tok(start, Tok::Lt))
                }
            }
            b'>' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(self.tok(start, Tok::Ge))
                } else {
                    Ok(self.tok(start, Tok::Gt))
                }
            }
            b'&' => {
                self.bump();
                if self.peek() == Some(b'&') {
                    self.bump();
                    Ok(self.tok(start, Tok::AndAnd))
                } else {
                    Err(parse_err(Span::new(start, self.i), "expected '&' after '&' for '&&'"))
                }
            }
            b'|' => {
                self.bump();
                if self.peek() == Some(b'|') {
                    self.bump();
                    Ok(self.tok(start, Tok::OrOr))
                } else {
                    Err(parse_err(Span::new(start, self.i), "expected '|' after '|' for '||'"))
                }
            }
            b'"' => self.lex_string(),
            b'\'' => self.lex_char(),
            c if c.is_ascii_digit() || c == b'.' => self.lex_number(),
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => self.lex_ident(),
            other => Err(parse_err(
                Span::new(start, start + 1),
                format!("unexpected character '{}'", other as char),
            )),
        }
    }

    fn lex_escape(&mut self, start: usize) -> Result<char, RawDiag> {
        match self.bump() {
            Some(b'n') => Ok('\n'),
            Some(b't') => Ok('\t'),
            Some(b'\\') => Ok('\\'),
            Some(b'"') => Ok('"'),
            Some(b'\'') => Ok('\''),
            Some(b'$') => Ok('$'),
            other => Err(parse_err(
                Span::new(start, self.i),
                match other {
                    Some(c) => format!("invalid escape '\\{}'", c as char),
                    None => "unterminated escape".to_string(),
                },
            )),
        }
    }

    fn lex_string(&mut self) -> Result<Token, RawDiag> {
        let start = self.i;
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(parse_err(Span::new(start, self.i), "unterminated string literal"));
                }
                Some(b'"') => break,
                Some(b'\\') => out.push(self.lex_escape(start)?),
                Some(c) => {
                    // Re-assemble multi-byte UTF-8 sequences.
                    if c < 0x80 {
                        out.push(c as char);
                    } else {
                        let from = self.i - 1;
                        while self.peek().is_some_and(|b| b & 0xC0 == 0x80) {
                            self.i += 1;
                        }
                        let s = std::str::from_utf8(&self.src[from..self.i]).map_err(|_| {
                            parse_err(Span::new(from, self.i), "invalid utf-8 in string literal")
                        })?;
                        out.push_str(s);
                    }
                }
            }
        }
        Ok(self.tok(start, Tok::Str(out)))
    }

    fn lex_char(&mut self) -> Result<Token, RawDiag> {
        let start = self.i;
        self.bump(); // opening quote
        let c = match self.bump() {
            None => return Err(parse_err(Span::new(start, self.i), "unterminated char literal")),
            Some(b'\\') => self.lex_escape(start)?,
            Some(c) if c < 0x80 => c as char,
            Some(_) => {
                let from = self.i - 1;
                while self.peek().is_some_and(|b| b & 0xC0 == 0x80) {
                    self.i += 1;
                }
                std::str::from_utf8(&self.src[from..self.i])
                    .ok()
                    .and_then(|s| s.chars().next())
                    .ok_or_else(|| {
                        parse_err(Span::new(from, self.i), "invalid utf-8 in char literal")
                    })?
            }
        };
        if self.bump() != Some(b'\'') {
            return Err(parse_err(Span::new(start, self.i), "unterminated char literal"));
        }
        Ok(self.tok(start, Tok::CharLit(c)))
    }

    fn lex_number(&mut self) -> Result<Token, RawDiag> {
        let start = self.i;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.i += 1;
            } else if c == b'.' && !seen_dot && self.peek2().is_some_and(|d| d.is_ascii_digit()) {
                seen_dot = true;
                self.i += 1;
            } else {
                break;
            }
        }
        let s = std::str::from_utf8(&self.src[start..self.i]).unwrap();
        let span = Span::new(start, self.i);
        if seen_dot {
            let v: f64 = s
                .parse()
                .map_err(|e| parse_err(span, format!("invalid number '{}': {}", s, e)))?;
            Ok(Token { tok: Tok::Double(v), span })
        } else {
            let v: i64 = s
                .parse()
                .map_err(|e| parse_err(span, format!("invalid number '{}': {}", s, e)))?;
            Ok(Token { tok: Tok::Int(v), span })
        }
    }

    fn lex_ident(&mut self) -> Result<Token, RawDiag> {
        let start = self.i;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$')
        {
            self.i += 1;
        }
        let s = std::str::from_utf8(&self.src[start..self.i]).unwrap().to_string();
        Ok(self.tok(start, Tok::Ident(s)))
    }
}
