// AST node types for mica source files.
//
// Every node carries a byte-offset `Span` into the owning source text; the
// tree annotator relies on those spans when it flattens the AST into the
// queryable arena.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use serde::Serialize;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn union(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn len(self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }
}

// ── Operators ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOpKind {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BoolOpKind {
    And,
    Or,
}

// ── Literals ──

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Module root ──

/// A complete mica module: a sequence of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
    pub span: Span,
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `fn name(params) { body }`
    FnDef {
        name: Ident,
        params: Vec<Ident>,
        body: Vec<Stmt>,
    },
    /// `class Name { body }`
    ClassDef { name: Ident, body: Vec<Stmt> },
    /// `t1 = t2 = ... = value` (single target in the common case).
    /// Targets are name / attribute / subscript / tuple-of-target
    /// expressions; the parser validates them.
    Assign { targets: Vec<Expr>, value: Expr },
    /// `name op= value`. Targets are restricted to plain names.
    AugAssign {
        target: Ident,
        op: BinOpKind,
        value: Expr,
    },
    /// `del target, target, ...`
    Delete { targets: Vec<Expr> },
    /// `return` / `return expr`
    Return { value: Option<Expr> },
    /// `if test { ... } else { ... }`
    If {
        test: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// `while test { ... }`
    While { test: Expr, body: Vec<Stmt> },
    /// An expression evaluated for effect.
    Expr { value: Expr },
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Lit),
    Name(String),
    /// `(a, b)` or a bare statement-level `a, b` target/value list.
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
    },
    /// `a and b` / `a or b`. Short-circuit; compiles to jumps only.
    BoolOp {
        op: BoolOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Attribute {
        obj: Box<Expr>,
        name: Ident,
    },
    Subscript {
        obj: Box<Expr>,
        index: Box<Expr>,
    },
    /// `fn(params) -> expr`
    Lambda {
        params: Vec<Ident>,
        body: Box<Expr>,
    },
    /// `f"text {name} more"`
    FString { parts: Vec<FsPart> },
}

/// One segment of a format string.
#[derive(Debug, Clone, PartialEq)]
pub enum FsPart {
    /// Literal text between fields (escapes resolved).
    Text(String),
    /// `{name}` interpolation field. `span` covers the braces; the inner
    /// name expression carries its own exact span.
    Field { name: Box<Expr>, span: Span },
}
