// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::ast::{
    BinOp, BlockStmt, CmpOp, Expr, ForStmt, ForTarget, IfArm, IfStmt, IncludeStmt, OutputStmt,
    SetStmt, Span, Stmt, TextStmt,
};
use crate::error::Error;
use crate::lexer::{tokenize, Keyword, Operator, Token, TokenKind};
use crate::value::Value;

/// Parses template source into a statement list.
///
/// Runs the lexer first, then a single recursive descent over the token
/// stream. Statement bodies are parsed against the set of tags that may
/// legally close them, so a stray or missing end tag is reported with the
/// closers that would have been accepted.
pub fn parse(source: &str) -> Result<Vec<Stmt>, Error> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let (body, closer) = parser.parse_body(&[])?;
    debug_assert!(closer.is_none());
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> Result<Token, Error> {
        match self.next() {
            Some(token) if &token.kind == kind => Ok(token),
            Some(token) => Err(Error::syntax_with_span(
                format!("expected {context}, found {}", describe(&token.kind)),
                token.span,
            )),
            None => Err(Error::syntax(
                format!("expected {context}, found end of template"),
                None,
            )),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, Error> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => Ok(name),
            Some(token) => Err(Error::syntax_with_span(
                format!("expected {context}, found {}", describe(&token.kind)),
                token.span,
            )),
            None => Err(Error::syntax(
                format!("expected {context}, found end of template"),
                None,
            )),
        }
    }

    /// Parses statements until one of `closers` opens, or the end of input
    /// when `closers` is empty. The closing keyword is consumed; anything
    /// after it (an `elif` condition, the closing `%}`) is left for the
    /// caller.
    fn parse_body(&mut self, closers: &[Keyword]) -> Result<(Vec<Stmt>, Option<Keyword>), Error> {
        let mut body = Vec::new();
        loop {
            let Some(token) = self.next() else {
                if closers.is_empty() {
                    return Ok((body, None));
                }
                return Err(Error::syntax(
                    format!("unclosed block, expected {}", closer_list(closers)),
                    None,
                ));
            };
            match token.kind {
                TokenKind::Text(text) => {
                    body.push(Stmt::Text(TextStmt {
                        span: token.span,
                        text,
                    }));
                }
                TokenKind::VarOpen => {
                    let expr = self.parse_expr()?;
                    let close = self.expect(&TokenKind::VarClose, "'}}'")?;
                    body.push(Stmt::Output(OutputStmt {
                        span: Span::new(token.span.start, close.span.end),
                        expr,
                    }));
                }
                TokenKind::TagOpen => {
                    let keyword = self.tag_keyword()?;
                    if closers.contains(&keyword) {
                        return Ok((body, Some(keyword)));
                    }
                    body.push(self.parse_stmt(keyword, token.span)?);
                }
                other => {
                    return Err(Error::syntax_with_span(
                        format!("unexpected {}", describe(&other)),
                        token.span,
                    ));
                }
            }
        }
    }

    fn tag_keyword(&mut self) -> Result<Keyword, Error> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Keyword(keyword),
                ..
            }) => Ok(keyword),
            Some(token) => Err(Error::syntax_with_span(
                format!("expected a statement, found {}", describe(&token.kind)),
                token.span,
            )),
            None => Err(Error::syntax("unexpected end of template", None)),
        }
    }

    fn parse_stmt(&mut self, keyword: Keyword, open: Span) -> Result<Stmt, Error> {
        match keyword {
            Keyword::If => self.parse_if(open),
            Keyword::For => self.parse_for(open),
            Keyword::Set => self.parse_set(open),
            Keyword::Include => self.parse_include(open),
            Keyword::Block => self.parse_block(open),
            other => Err(Error::syntax_with_span(
                format!("unexpected '{}' tag", other.as_str()),
                open,
            )),
        }
    }

    fn parse_if(&mut self, open: Span) -> Result<Stmt, Error> {
        let mut arms = Vec::new();
        let mut else_body = None;
        let mut cond = self.parse_expr()?;
        self.expect(&TokenKind::TagClose, "'%}'")?;
        let end = loop {
            let (body, closer) =
                self.parse_body(&[Keyword::Elif, Keyword::Else, Keyword::Endif])?;
            arms.push(IfArm { cond, body });
            match closer {
                Some(Keyword::Elif) => {
                    cond = self.parse_expr()?;
                    self.expect(&TokenKind::TagClose, "'%}'")?;
                }
                Some(Keyword::Else) => {
                    self.expect(&TokenKind::TagClose, "'%}'")?;
                    let (body, _) = self.parse_body(&[Keyword::Endif])?;
                    else_body = Some(body);
                    break self.expect(&TokenKind::TagClose, "'%}'")?;
                }
                _ => break self.expect(&TokenKind::TagClose, "'%}'")?,
            }
        };
        Ok(Stmt::If(IfStmt {
            span: Span::new(open.start, end.span.end),
            arms,
            else_body,
        }))
    }

    fn parse_for(&mut self, open: Span) -> Result<Stmt, Error> {
        let first = self.expect_ident("a loop variable")?;
        let target = if self.eat(&TokenKind::Comma) {
            let second = self.expect_ident("a loop variable")?;
            ForTarget::Pair(first, second)
        } else {
            ForTarget::Single(first)
        };
        self.expect(&TokenKind::Keyword(Keyword::In), "'in'")?;
        let iterable = self.parse_expr()?;
        self.expect(&TokenKind::TagClose, "'%}'")?;

        let (body, closer) = self.parse_body(&[Keyword::Else, Keyword::Endfor])?;
        let mut else_body = None;
        if closer == Some(Keyword::Else) {
            self.expect(&TokenKind::TagClose, "'%}'")?;
            let (body, _) = self.parse_body(&[Keyword::Endfor])?;
            else_body = Some(body);
        }
        let end = self.expect(&TokenKind::TagClose, "'%}'")?;
        Ok(Stmt::For(ForStmt {
            span: Span::new(open.start, end.span.end),
            target,
            iterable,
            body,
            else_body,
        }))
    }

    fn parse_set(&mut self, open: Span) -> Result<Stmt, Error> {
        let name = self.expect_ident("a variable name")?;
        self.expect(&TokenKind::Assign, "'='")?;
        let expr = self.parse_expr()?;
        let end = self.expect(&TokenKind::TagClose, "'%}'")?;
        Ok(Stmt::Set(SetStmt {
            span: Span::new(open.start, end.span.end),
            name,
            expr,
        }))
    }

    fn parse_include(&mut self, open: Span) -> Result<Stmt, Error> {
        let target = self.parse_expr()?;
        let end = self.expect(&TokenKind::TagClose, "'%}'")?;
        Ok(Stmt::Include(IncludeStmt {
            span: Span::new(open.start, end.span.end),
            target,
        }))
    }

    fn parse_block(&mut self, open: Span) -> Result<Stmt, Error> {
        let name = self.expect_ident("a block name")?;
        self.expect(&TokenKind::TagClose, "'%}'")?;
        let (body, _) = self.parse_body(&[Keyword::Endblock])?;
        // `{% endblock name %}` may repeat the name; it must match.
        if let Some(Token {
            kind: TokenKind::Ident(_),
            ..
        }) = self.peek()
        {
            let repeated = self.expect_ident("a block name")?;
            if repeated != name {
                return Err(Error::syntax(
                    format!("endblock '{repeated}' does not match block '{name}'"),
                    None,
                ));
            }
        }
        let end = self.expect(&TokenKind::TagClose, "'%}'")?;
        Ok(Stmt::Block(BlockStmt {
            span: Span::new(open.start, end.span.end),
            name,
            body,
        }))
    }

    // Expressions, loosest binding first: or, and, not, comparisons and
    // tests, `~`, additive, multiplicative, unary minus, then postfix
    // (attribute, index, filter pipe).

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Keyword(Keyword::Or)) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::Keyword(Keyword::And)) {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, Error> {
        if self.eat(&TokenKind::Keyword(Keyword::Not)) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_concat()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Op(Operator::Eq)) => CmpOp::Eq,
                Some(TokenKind::Op(Operator::Ne)) => CmpOp::Ne,
                Some(TokenKind::Op(Operator::Lt)) => CmpOp::Lt,
                Some(TokenKind::Op(Operator::Le)) => CmpOp::Le,
                Some(TokenKind::Op(Operator::Gt)) => CmpOp::Gt,
                Some(TokenKind::Op(Operator::Ge)) => CmpOp::Ge,
                Some(TokenKind::Keyword(Keyword::Is)) => {
                    self.pos += 1;
                    lhs = self.parse_test(lhs)?;
                    continue;
                }
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_concat()?;
            lhs = Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_test(&mut self, base: Expr) -> Result<Expr, Error> {
        let negated = self.eat(&TokenKind::Keyword(Keyword::Not));
        let name = match self.next() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => name,
            // `is none` reuses the literal keyword as a test name.
            Some(Token {
                kind: TokenKind::Keyword(Keyword::None),
                ..
            }) => "none".to_string(),
            Some(token) => {
                return Err(Error::syntax_with_span(
                    format!("expected a test name, found {}", describe(&token.kind)),
                    token.span,
                ));
            }
            None => return Err(Error::syntax("expected a test name", None)),
        };
        let args = if self.eat(&TokenKind::LParen) {
            self.parse_args()?
        } else {
            Vec::new()
        };
        Ok(Expr::Test {
            base: Box::new(base),
            name,
            args,
            negated,
        })
    }

    fn parse_concat(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_sum()?;
        while self.eat(&TokenKind::Op(Operator::Concat)) {
            let rhs = self.parse_sum()?;
            lhs = Expr::BinOp {
                op: BinOp::Concat,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_sum(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Op(Operator::Add)) => BinOp::Add,
                Some(TokenKind::Op(Operator::Sub)) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_product()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_product(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Op(Operator::Mul)) => BinOp::Mul,
                Some(TokenKind::Op(Operator::Div)) => BinOp::Div,
                Some(TokenKind::Op(Operator::Rem)) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.eat(&TokenKind::Op(Operator::Sub)) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("an attribute name")?;
                expr = Expr::Attr {
                    base: Box::new(expr),
                    name,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(&TokenKind::Pipe) {
                let name = self.expect_ident("a filter name")?;
                let args = if self.eat(&TokenKind::LParen) {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                expr = Expr::Filter {
                    base: Box::new(expr),
                    name,
                    args,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let Some(token) = self.next() else {
            return Err(Error::syntax("unexpected end of expression", None));
        };
        let expr = match token.kind {
            TokenKind::Int(value) => Expr::Const(Value::Int(value)),
            TokenKind::Float(value) => Expr::Const(Value::F64(value)),
            TokenKind::Str(value) => Expr::Const(Value::String(value)),
            TokenKind::Keyword(Keyword::True) => Expr::Const(Value::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Expr::Const(Value::Bool(false)),
            TokenKind::Keyword(Keyword::None) => Expr::Const(Value::None),
            TokenKind::Ident(name) => {
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    Expr::Call { name, args }
                } else {
                    Expr::Var(name)
                }
            }
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                inner
            }
            other => {
                return Err(Error::syntax_with_span(
                    format!("unexpected {} in expression", describe(&other)),
                    token.span,
                ));
            }
        };
        Ok(expr)
    }

    /// Parses a comma separated argument list; the opening paren is already
    /// consumed.
    fn parse_args(&mut self) -> Result<Vec<Expr>, Error> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(args);
        }
    }
}

fn closer_list(closers: &[Keyword]) -> String {
    let names: Vec<String> = closers
        .iter()
        .map(|k| format!("'{{% {} %}}'", k.as_str()))
        .collect();
    names.join(" or ")
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Text(_) => "template text".to_string(),
        TokenKind::VarOpen => "'{{'".to_string(),
        TokenKind::VarClose => "'}}'".to_string(),
        TokenKind::TagOpen => "'{%'".to_string(),
        TokenKind::TagClose => "'%}'".to_string(),
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Keyword(keyword) => format!("'{}'", keyword.as_str()),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Int(_) | TokenKind::Float(_) => "number literal".to_string(),
        TokenKind::Pipe => "'|'".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::Assign => "'='".to_string(),
        TokenKind::Op(_) => "operator".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_output() {
        let body = parse("Hello, {{ name }}!").unwrap();
        assert_eq!(body.len(), 3);
        assert!(matches!(&body[0], Stmt::Text(t) if t.text == "Hello, "));
        let Stmt::Output(out) = &body[1] else {
            panic!("expected output");
        };
        assert!(matches!(&out.expr, Expr::Var(n) if n == "name"));
    }

    #[test]
    fn parses_if_elif_else() {
        let body = parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}").unwrap();
        let Stmt::If(node) = &body[0] else {
            panic!("expected if");
        };
        assert_eq!(node.arms.len(), 2);
        assert_eq!(node.else_body.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn parses_for_with_else() {
        let body = parse("{% for x in items %}{{ x }}{% else %}none{% endfor %}").unwrap();
        let Stmt::For(node) = &body[0] else {
            panic!("expected for");
        };
        assert!(matches!(&node.target, ForTarget::Single(n) if n == "x"));
        assert!(node.else_body.is_some());
    }

    #[test]
    fn parses_pair_target() {
        let body = parse("{% for k, v in m %}{% endfor %}").unwrap();
        let Stmt::For(node) = &body[0] else {
            panic!("expected for");
        };
        assert!(matches!(&node.target, ForTarget::Pair(k, v) if k == "k" && v == "v"));
    }

    #[test]
    fn precedence_or_binds_loosest() {
        let body = parse("{{ a or b and not c == 1 }}").unwrap();
        let Stmt::Output(out) = &body[0] else {
            panic!("expected output");
        };
        let Expr::Or(_, rhs) = &out.expr else {
            panic!("expected or at the top");
        };
        assert!(matches!(**rhs, Expr::And(_, _)));
    }

    #[test]
    fn arithmetic_precedence() {
        let body = parse("{{ 1 + 2 * 3 }}").unwrap();
        let Stmt::Output(out) = &body[0] else {
            panic!("expected output");
        };
        let Expr::BinOp { op: BinOp::Add, rhs, .. } = &out.expr else {
            panic!("expected addition at the top");
        };
        assert!(matches!(**rhs, Expr::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn filter_pipe_with_args() {
        let body = parse("{{ names|join(\", \") }}").unwrap();
        let Stmt::Output(out) = &body[0] else {
            panic!("expected output");
        };
        let Expr::Filter { name, args, .. } = &out.expr else {
            panic!("expected filter");
        };
        assert_eq!(name, "join");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn is_not_test() {
        let body = parse("{% if x is not defined %}{% endif %}").unwrap();
        let Stmt::If(node) = &body[0] else {
            panic!("expected if");
        };
        let Expr::Test { name, negated, .. } = &node.arms[0].cond else {
            panic!("expected test");
        };
        assert_eq!(name, "defined");
        assert!(*negated);
    }

    #[test]
    fn set_and_include() {
        let body = parse("{% set x = 1 %}{% include \"other\" %}").unwrap();
        assert!(matches!(&body[0], Stmt::Set(node) if node.name == "x"));
        assert!(matches!(&body[1], Stmt::Include(_)));
    }

    #[test]
    fn block_with_matching_end_name() {
        let body = parse("{% block head %}x{% endblock head %}").unwrap();
        assert!(matches!(&body[0], Stmt::Block(node) if node.name == "head"));
        let err = parse("{% block head %}x{% endblock foot %}").unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn missing_endfor_names_closers() {
        let err = parse("{% for x in items %}{{ x }}").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("endfor"), "{message}");
    }

    #[test]
    fn stray_end_tag_is_rejected() {
        let err = parse("{% endif %}").unwrap_err();
        assert!(err.to_string().contains("endif"));
    }

    #[test]
    fn nested_index_access() {
        let body = parse("{{ rows[0][\"name\"] }}").unwrap();
        let Stmt::Output(out) = &body[0] else {
            panic!("expected output");
        };
        let Expr::Index { base, .. } = &out.expr else {
            panic!("expected index");
        };
        assert!(matches!(**base, Expr::Index { .. }));
    }
}
