// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::ast::Span;
use crate::error::Error;

/// A lexical unit with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What was lexed.
    pub kind: TokenKind,
    /// Byte range in the template source.
    pub span: Span,
}

/// Token kinds produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TokenKind {
    /// Raw template text, whitespace control already applied.
    Text(String),
    /// `{{`
    VarOpen,
    /// `}}`
    VarClose,
    /// `{%`
    TagOpen,
    /// `%}`
    TagClose,
    /// Identifier.
    Ident(String),
    /// Reserved word.
    Keyword(Keyword),
    /// String literal, escapes resolved.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `|`
    Pipe,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `=`
    Assign,
    /// Binary/comparison operator.
    Op(Operator),
}

/// Operators recognised inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `~`
    Concat,
}

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `if`
    If,
    /// `elif`
    Elif,
    /// `else`
    Else,
    /// `endif`
    Endif,
    /// `for`
    For,
    /// `in`
    In,
    /// `endfor`
    Endfor,
    /// `set`
    Set,
    /// `include`
    Include,
    /// `block`
    Block,
    /// `endblock`
    Endblock,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `is`
    Is,
    /// `true`
    True,
    /// `false`
    False,
    /// `none`
    None,
}

impl Keyword {
    /// Source spelling of the keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Endif => "endif",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::Endfor => "endfor",
            Keyword::Set => "set",
            Keyword::Include => "include",
            Keyword::Block => "block",
            Keyword::Endblock => "endblock",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::Is => "is",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::None => "none",
        }
    }
}

fn keyword_for(ident: &str) -> Option<Keyword> {
    Some(match ident {
        "if" => Keyword::If,
        "elif" => Keyword::Elif,
        "else" => Keyword::Else,
        "endif" => Keyword::Endif,
        "for" => Keyword::For,
        "in" => Keyword::In,
        "endfor" => Keyword::Endfor,
        "set" => Keyword::Set,
        "include" => Keyword::Include,
        "block" => Keyword::Block,
        "endblock" => Keyword::Endblock,
        "and" => Keyword::And,
        "or" => Keyword::Or,
        "not" => Keyword::Not,
        "is" => Keyword::Is,
        "true" | "True" => Keyword::True,
        "false" | "False" => Keyword::False,
        "none" | "None" => Keyword::None,
        _ => return None,
    })
}

/// Converts template source into a flat token stream.
///
/// One forward scan over the source, switching between raw-text mode and the
/// inside of `{{ }}` / `{% %}` tags. `{# #}` comments are dropped here.
/// Whitespace-control markers (`-` adjacent to a delimiter) are resolved
/// textually during this pass: the surrounding raw-text runs are trimmed and
/// the markers never reach the parser.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Error> {
    Lexer::new(source).run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagMode {
    Var,
    Stmt,
    Comment,
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    trim_next_text: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            tokens: Vec::new(),
            trim_next_text: false,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, Error> {
        while self.pos < self.source.len() {
            let open = find_tag_start(self.source, self.pos);
            let text_end = open.unwrap_or(self.source.len());
            let Some(open) = open else {
                self.push_text(self.pos, text_end, false);
                break;
            };

            let mode = match &self.source[open..open + 2] {
                "{{" => TagMode::Var,
                "{%" => TagMode::Stmt,
                _ => TagMode::Comment,
            };
            let trim_left = self.source.as_bytes().get(open + 2) == Some(&b'-');

            self.push_text(self.pos, text_end, trim_left);
            self.pos = open + 2 + usize::from(trim_left);

            match mode {
                TagMode::Comment => self.skip_comment(open)?,
                TagMode::Var => {
                    self.push_token(TokenKind::VarOpen, Span::new(open, open + 2));
                    self.lex_tag_body(open, TagMode::Var)?;
                }
                TagMode::Stmt => {
                    self.push_token(TokenKind::TagOpen, Span::new(open, open + 2));
                    self.lex_tag_body(open, TagMode::Stmt)?;
                }
            }
        }
        Ok(self.tokens)
    }

    fn push_text(&mut self, start: usize, end: usize, trim_right: bool) {
        let mut text = &self.source[start..end];
        if self.trim_next_text {
            text = text.trim_start();
            self.trim_next_text = false;
        }
        if trim_right {
            text = text.trim_end();
        }
        if !text.is_empty() {
            let token = Token {
                kind: TokenKind::Text(text.to_string()),
                span: Span::new(start, end),
            };
            self.tokens.push(token);
        }
    }

    fn push_token(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn skip_comment(&mut self, open: usize) -> Result<(), Error> {
        let Some(rel) = self.source[self.pos..].find("#}") else {
            return Err(Error::syntax_with_span(
                "unterminated comment",
                Span::new(open, open + 2),
            ));
        };
        let close = self.pos + rel;
        if close > self.pos && self.source.as_bytes()[close - 1] == b'-' {
            self.trim_next_text = true;
        }
        self.pos = close + 2;
        Ok(())
    }

    fn lex_tag_body(&mut self, open: usize, mode: TagMode) -> Result<(), Error> {
        let close_delim = match mode {
            TagMode::Var => "}}",
            _ => "%}",
        };
        loop {
            self.skip_whitespace();

            let rest = &self.source[self.pos..];
            if rest.is_empty() {
                let what = match mode {
                    TagMode::Var => "unclosed expression",
                    _ => "unclosed statement",
                };
                return Err(Error::syntax_with_span(what, Span::new(open, open + 2)));
            }

            if let Some(after_trim) = rest.strip_prefix('-') {
                if after_trim.starts_with(close_delim) {
                    self.trim_next_text = true;
                    self.pos += 1;
                    continue;
                }
            }
            if rest.starts_with(close_delim) {
                let kind = match mode {
                    TagMode::Var => TokenKind::VarClose,
                    _ => TokenKind::TagClose,
                };
                self.push_token(kind, Span::new(self.pos, self.pos + 2));
                self.pos += 2;
                return Ok(());
            }

            let token = self.next_expr_token()?;
            self.tokens.push(token);
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.pos)
    }

    fn next_expr_token(&mut self) -> Result<Token, Error> {
        let start = self.pos;
        let Some(chr) = self.bump_char() else {
            return Err(Error::syntax("unexpected end of input", None));
        };

        let kind = match chr {
            '|' => TokenKind::Pipe,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '+' => TokenKind::Op(Operator::Add),
            '-' => TokenKind::Op(Operator::Sub),
            '*' => TokenKind::Op(Operator::Mul),
            '/' => TokenKind::Op(Operator::Div),
            '%' => TokenKind::Op(Operator::Rem),
            '~' => TokenKind::Op(Operator::Concat),
            '=' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Op(Operator::Eq)
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Op(Operator::Ne)
                } else {
                    return Err(Error::syntax_with_span(
                        "unexpected '!' without '='",
                        self.span_from(start),
                    ));
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Op(Operator::Le)
                } else {
                    TokenKind::Op(Operator::Lt)
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Op(Operator::Ge)
                } else {
                    TokenKind::Op(Operator::Gt)
                }
            }
            quote @ ('"' | '\'') => {
                let literal = self.read_string(start, quote)?;
                TokenKind::Str(literal)
            }
            c if is_identifier_start(c) => {
                let ident = self.read_identifier(c);
                match keyword_for(&ident) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Ident(ident),
                }
            }
            c if c.is_ascii_digit() => self.read_number(c, start)?,
            _ => {
                return Err(Error::syntax(
                    format!("unexpected character '{chr}'"),
                    Some(self.span_from(start)),
                ));
            }
        };

        Ok(Token {
            kind,
            span: self.span_from(start),
        })
    }

    fn read_identifier(&mut self, first: char) -> String {
        let mut ident = String::new();
        ident.push(first);
        while let Some(ch) = self.peek_char() {
            if is_identifier_part(ch) {
                ident.push(ch);
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        ident
    }

    fn read_string(&mut self, start: usize, quote: char) -> Result<String, Error> {
        let mut literal = String::new();
        while let Some(ch) = self.bump_char() {
            match ch {
                c if c == quote => return Ok(literal),
                '\\' => {
                    let Some(next) = self.bump_char() else {
                        return Err(Error::syntax_with_span(
                            "unterminated escape sequence",
                            self.span_from(start),
                        ));
                    };
                    let escaped = match next {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        other => {
                            return Err(Error::BadEscape {
                                sequence: other,
                                span: Some(self.span_from(start)),
                            });
                        }
                    };
                    literal.push(escaped);
                }
                other => literal.push(other),
            }
        }
        Err(Error::syntax_with_span(
            "unterminated string literal",
            self.span_from(start),
        ))
    }

    fn read_number(&mut self, first: char, start: usize) -> Result<TokenKind, Error> {
        let mut literal = String::new();
        literal.push(first);
        let mut is_float = false;

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                literal.push(ch);
                self.pos += 1;
            } else if ch == '.' && !is_float {
                // A dot only continues the literal when a digit follows;
                // otherwise it is attribute access on the number.
                let after = self.source[self.pos + 1..].chars().next();
                if after.is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    literal.push(ch);
                    self.pos += 1;
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        if is_float {
            literal
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| Error::syntax_with_span("invalid float literal", self.span_from(start)))
        } else {
            literal
                .parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| {
                    Error::syntax_with_span(
                        "integer literal out of range",
                        self.span_from(start),
                    )
                })
        }
    }
}

fn find_tag_start(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && matches!(bytes[i + 1], b'{' | b'%' | b'#') {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_identifier_part(ch: char) -> bool {
    is_identifier_start(ch) || ch.is_ascii_digit()
}
