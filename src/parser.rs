use crate::ast::{Expr, Lit, Unit, ValDef};
use crate::error::ErrorKind;
use crate::lexer::{Lexer, Tok, Token};
use crate::pos::{RawDiag, Span};

pub(crate) struct Parser<'a> {
    lex: Lexer<'a>,
    look: Token,
}

fn parse_err(span: Span, msg: impl Into<String>) -> RawDiag {
    RawDiag::new(ErrorKind::Parse, span, msg)
}

impl<'a> Parser<'a> {
    pub(crate) fn new(s: &'a str) -> Result<Self, RawDiag> {
        let mut lex = Lexer::new(s);
        let look = lex.next_token()?;
        Ok(Self { lex, look })
    }

    fn bump(&mut self) -> Result<(), RawDiag> {
        self.look = self.lex.next_token()?;
        Ok(())
    }

    fn expect(&mut self, t: &Tok, what: &str) -> Result<Span, RawDiag> {
        if std::mem::discriminant(&self.look.tok) == std::mem::discriminant(t) {
            let span = self.look.span;
            self.bump()?;
            Ok(span)
        } else {
            Err(parse_err(self.look.span, format!("expected {}", what)))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.look.tok, Tok::Ident(s) if s == kw)
    }

    /// Parses a full unit: leading `val` definitions, then one expression.
    pub(crate) fn parse_unit(mut self) -> Result<Unit, RawDiag> {
        let mut defs = Vec::new();
        while self.is_keyword("val") {
            self.bump()?;
            let (name, name_span) = self.ident("definition name")?;
            self.expect(&Tok::Assign, "'='")?;
            let body = self.or_expr()?;
            defs.push(ValDef { name, name_span, body });
        }
        let body = self.or_expr()?;
        if !matches!(self.look.tok, Tok::Eof) {
            return Err(parse_err(self.look.span, "trailing tokens"));
        }
        Ok(Unit { defs, body })
    }

    /// Parses a definitions-only source, the shape of a profile's utilities
    /// block.
    pub(crate) fn parse_defs(mut self) -> Result<Vec<ValDef>, RawDiag> {
        let mut defs = Vec::new();
        while self.is_keyword("val") {
            self.bump()?;
            let (name, name_span) = self.ident("definition name")?;
            self.expect(&Tok::Assign, "'='")?;
            let body = self.or_expr()?;
            defs.push(ValDef { name, name_span, body });
        }
        if !matches!(self.look.tok, Tok::Eof) {
            return Err(parse_err(self.look.span, "expected 'val' definition"));
        }
        Ok(defs)
    }

    /// Parses a single expression with no definitions.
    pub(crate) fn parse_expression(mut self) -> Result<Expr, RawDiag> {
        let e = self.or_expr()?;
        if !matches!(self.look.tok, Tok::Eof) {
            return Err(parse_err(self.look.span, "trailing tokens"));
        }
        Ok(e)
    }

    fn ident(&mut self, what: &str) -> Result<(String, Span), RawDiag> {
        match self.look.tok.clone() {
            Tok::Ident(s) => {
                let span = self.look.span;
                self.bump()?;
                Ok((s, span))
            }
            _ => Err(parse_err(self.look.span, format!("expected {}", what))),
        }
    }

    fn binary_level<F>(
        &mut self,
        next: F,
        ops: &[(Tok, &str)],
    ) -> Result<Expr, RawDiag>
    where
        F: Fn(&mut Self) -> Result<Expr, RawDiag>,
    {
        let mut node = next(self)?;
        'outer: loop {
            for (tok, name) in ops {
                if std::mem::discriminant(&self.look.tok) == std::mem::discriminant(tok) {
                    let op_span = self.look.span;
                    self.bump()?;
                    let rhs = next(self)?;
                    let span = node.span().to(rhs.span());
                    node = Expr::Binary {
                        op: name.to_string(),
                        lhs: Box::new(node),
                        rhs: Box::new(rhs),
                        op_span,
                        span,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(node)
    }

    fn or_expr(&mut self) -> Result<Expr, RawDiag> {
        self.binary_level(Self::and_expr, &[(Tok::OrOr, "||")])
    }

    fn and_expr(&mut self) -> Result<Expr, RawDiag> {
        self.binary_level(Self::equality, &[(Tok::AndAnd, "&&")])
    }

    fn equality(&mut self) -> Result<Expr, RawDiag> {
        self.binary_level(Self::relational, &[(Tok::EqEq, "=="), (Tok::NotEq, "!=")])
    }

    fn relational(&mut self) -> Result<Expr, RawDiag> {
        self.binary_level(
            Self::additive,
            &[(Tok::Le, "<="), (Tok::Lt, "<"), (Tok::Ge, ">="), (Tok::Gt, ">")],
        )
    }

    fn additive(&mut self) -> Result<Expr, RawDiag> {
        self.binary_level(Self::multiplicative, &[(Tok::Plus, "+"), (Tok::Minus, "-")])
    }

    fn multiplicative(&mut self) -> Result<Expr, RawDiag> {
        self.binary_level(Self::unary, &[(Tok::Star, "*"), (Tok::Slash, "/"), (Tok::Percent, "%")])
    }

    fn unary(&mut self) -> Result<Expr, RawDiag> {
        let op = match self.look.tok {
            Tok::Minus => "unary_-",
            Tok::Bang => "unary_!",
            _ => return self.postfix(),
        };
        let op_span = self.look.span;
        self.bump()?;
        let expr = self.unary()?;
        let span = op_span.to(expr.span());
        Ok(Expr::Unary { op: op.to_string(), expr: Box::new(expr), op_span, span })
    }

    fn args(&mut self) -> Result<(Vec<Expr>, Span), RawDiag> {
        let open = self.expect(&Tok::LParen, "'('")?;
        let mut args = Vec::new();
        if !matches!(self.look.tok, Tok::RParen) {
            loop {
                args.push(self.or_expr()?);
                if matches!(self.look.tok, Tok::Comma) {
                    self.bump()?;
                    continue;
                }
                break;
            }
        }
        let close = self.expect(&Tok::RParen, "')'")?;
        Ok((args, open.to(close)))
    }

    fn postfix(&mut self) -> Result<Expr, RawDiag> {
        let mut node = self.primary()?;
        loop {
            match self.look.tok {
                Tok::Dot => {
                    self.bump()?;
                    let (name, name_span) = self.ident("member name")?;
                    let span = node.span().to(name_span);
                    node = Expr::Select { recv: Box::new(node), name, name_span, span };
                }
                Tok::LParen => {
                    let (args, args_span) = self.args()?;
                    let span = node.span().to(args_span);
                    node = Expr::Apply { target: Box::new(node), args, span };
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<Expr, RawDiag> {
        let span = self.look.span;
        match self.look.tok.clone() {
            Tok::Int(v) => {
                self.bump()?;
                Ok(Expr::Lit { lit: Lit::Int(v), span })
            }
            Tok::Double(v) => {
                self.bump()?;
                Ok(Expr::Lit { lit: Lit::Double(v), span })
            }
            Tok::Str(s) => {
                self.bump()?;
                Ok(Expr::Lit { lit: Lit::Str(s), span })
            }
            Tok::CharLit(c) => {
                self.bump()?;
                Ok(Expr::Lit { lit: Lit::Char(c), span })
            }
            Tok::Ident(s) => match s.as_str() {
                "true" | "false" => {
                    self.bump()?;
                    Ok(Expr::Lit { lit: Lit::Bool(s == "true"), span })
                }
                "if" => self.if_expr(),
                "new" => self.new_expr(),
                "val" => Err(parse_err(span, "definitions are not allowed here")),
                "else" => Err(parse_err(span, "unexpected 'else'")),
                _ => {
                    self.bump()?;
                    Ok(Expr::Ident { name: s, span })
                }
            },
            Tok::LParen => {
                self.bump()?;
                if matches!(self.look.tok, Tok::RParen) {
                    let close = self.look.span;
                    self.bump()?;
                    return Ok(Expr::Lit { lit: Lit::Unit, span: span.to(close) });
                }
                let e = self.or_expr()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(e)
            }
            _ => Err(parse_err(span, "expected literal, identifier, or '('")),
        }
    }

    fn if_expr(&mut self) -> Result<Expr, RawDiag> {
        let start = self.look.span;
        self.bump()?; // 'if'
        self.expect(&Tok::LParen, "'('")?;
        let cond = self.or_expr()?;
        self.expect(&Tok::RParen, "')'")?;
        let then_e = self.or_expr()?;
        if !self.is_keyword("else") {
            return Err(parse_err(self.look.span, "expected 'else'"));
        }
        self.bump()?;
        let else_e = self.or_expr()?;
        let span = start.to(else_e.span());
        Ok(Expr::If {
            cond: Box::new(cond),
            then_e: Box::new(then_e),
            else_e: Box::new(else_e),
            span,
        })
    }

    fn new_expr(&mut self) -> Result<Expr, RawDiag> {
        let start = self.look.span;
        self.bump()?; // 'new'
        let (type_name, name_span) = self.ident("type name")?;
        let (args, args_span) = self.args()?;
        let span = start.to(args_span);
        Ok(Expr::New { type_name, args, name_span, span })
    }
}
