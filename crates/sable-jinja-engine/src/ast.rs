// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::fmt;

use crate::value::Value;

/// Byte offsets into the original template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Offset of the first byte.
    pub start: usize,
    /// Offset one past the last byte.
    pub end: usize,
}

impl Span {
    /// Creates a span from byte offsets.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 1-based line and column of the span start within `source`. The
    /// column counts characters, not bytes.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.start.min(source.len())];
        let line = upto.matches('\n').count() + 1;
        let col = match upto.rfind('\n') {
            Some(newline) => upto[newline + 1..].chars().count() + 1,
            None => upto.chars().count() + 1,
        };
        (line, col)
    }
}

/// Statement nodes recognised by the parser.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Stmt {
    /// Raw text emitted verbatim (whitespace trimming already applied).
    Text(TextStmt),
    /// `{{ expr }}` interpolation.
    Output(OutputStmt),
    /// `{% if %}` with its elif chain and optional else branch.
    If(IfStmt),
    /// `{% for %}` with optional else branch on empty iteration.
    For(ForStmt),
    /// `{% set name = expr %}` scope-local assignment.
    Set(SetStmt),
    /// `{% include expr %}` renders another registered template in place.
    Include(IncludeStmt),
    /// `{% block name %}` named region.
    Block(BlockStmt),
}

impl Stmt {
    /// Returns the source span covered by the statement.
    pub fn span(&self) -> Span {
        match self {
            Stmt::Text(node) => node.span,
            Stmt::Output(node) => node.span,
            Stmt::If(node) => node.span,
            Stmt::For(node) => node.span,
            Stmt::Set(node) => node.span,
            Stmt::Include(node) => node.span,
            Stmt::Block(node) => node.span,
        }
    }
}

/// Raw text literal.
#[derive(Debug, Clone)]
pub struct TextStmt {
    /// Source span of the run.
    pub span: Span,
    /// The literal text, post whitespace control.
    pub text: String,
}

/// `{{ expr }}` output statement.
#[derive(Debug, Clone)]
pub struct OutputStmt {
    /// Source span of the whole tag.
    pub span: Span,
    /// The interpolated expression.
    pub expr: Expr,
}

/// One `if`/`elif` arm: condition plus body.
#[derive(Debug, Clone)]
pub struct IfArm {
    /// The branch condition.
    pub cond: Expr,
    /// Statements executed when the condition is truthy.
    pub body: Vec<Stmt>,
}

/// Conditional statement.
#[derive(Debug, Clone)]
pub struct IfStmt {
    /// Span from the opening tag through `{% endif %}`.
    pub span: Span,
    /// The `if` arm followed by any `elif` arms, in source order.
    pub arms: Vec<IfArm>,
    /// Optional `else` branch.
    pub else_body: Option<Vec<Stmt>>,
}

/// Loop variable target of a `for` statement.
#[derive(Debug, Clone)]
pub enum ForTarget {
    /// `for x in ...`
    Single(String),
    /// `for k, v in ...`
    Pair(String, String),
}

/// Loop statement.
#[derive(Debug, Clone)]
pub struct ForStmt {
    /// Span from the opening tag through `{% endfor %}`.
    pub span: Span,
    /// Loop variable(s).
    pub target: ForTarget,
    /// Expression producing the iterable.
    pub iterable: Expr,
    /// Per-iteration body.
    pub body: Vec<Stmt>,
    /// Branch taken exactly when the iterable is empty.
    pub else_body: Option<Vec<Stmt>>,
}

/// Scope-local assignment.
#[derive(Debug, Clone)]
pub struct SetStmt {
    /// Source span of the tag.
    pub span: Span,
    /// Name being bound.
    pub name: String,
    /// Bound expression.
    pub expr: Expr,
}

/// Include of another registered template.
#[derive(Debug, Clone)]
pub struct IncludeStmt {
    /// Source span of the tag.
    pub span: Span,
    /// Expression evaluating to the target template name.
    pub target: Expr,
}

/// Named block region.
#[derive(Debug, Clone)]
pub struct BlockStmt {
    /// Span from the opening tag through `{% endblock %}`.
    pub span: Span,
    /// Block name.
    pub name: String,
    /// Block body.
    pub body: Vec<Stmt>,
}

/// Expression nodes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Expr {
    /// Literal value (string/number/bool/none).
    Const(Value),
    /// Plain identifier lookup against the render context.
    Var(String),
    /// Dotted attribute access, `base.name`.
    Attr {
        /// Expression producing the container.
        base: Box<Expr>,
        /// Attribute name.
        name: String,
    },
    /// Bracketed index access, `base[index]`.
    Index {
        /// Expression producing the container.
        base: Box<Expr>,
        /// Expression producing the accessor.
        index: Box<Expr>,
    },
    /// Unary numeric negation.
    Neg(Box<Expr>),
    /// Logical negation.
    Not(Box<Expr>),
    /// Arithmetic or concatenation operator.
    BinOp {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Comparison operator.
    Compare {
        /// The operator.
        op: CmpOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Filter application, `expr|name(args)`.
    Filter {
        /// The piped expression.
        base: Box<Expr>,
        /// Filter name, resolved at evaluation time.
        name: String,
        /// Additional filter arguments.
        args: Vec<Expr>,
    },
    /// Test application, `expr is [not] name(args)`.
    Test {
        /// The tested expression.
        base: Box<Expr>,
        /// Test name, resolved at evaluation time.
        name: String,
        /// Additional test arguments.
        args: Vec<Expr>,
        /// Whether the result is inverted (`is not`).
        negated: bool,
    },
    /// Global function call, `name(args)`.
    Call {
        /// Function name, resolved at evaluation time.
        name: String,
        /// Call arguments.
        args: Vec<Expr>,
    },
}

/// Binary arithmetic/concatenation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
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
    /// `~` string concatenation
    Concat,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
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
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Text(node) => write!(f, "Text({:?})", node.text),
            Stmt::Output(_) => write!(f, "Output"),
            Stmt::If(_) => write!(f, "If"),
            Stmt::For(_) => write!(f, "For"),
            Stmt::Set(node) => write!(f, "Set({})", node.name),
            Stmt::Include(_) => write!(f, "Include"),
            Stmt::Block(node) => write!(f, "Block({})", node.name),
        }
    }
}
