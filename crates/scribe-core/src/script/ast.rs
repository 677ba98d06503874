//! Syntax tree for cell script.

use std::fmt;
use std::rc::Rc;

/// 1-indexed source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: Rc<str>,
        init: Option<Expr>,
        constant: bool,
        pos: Pos,
    },
    Fn(Rc<FnDecl>),
    Expr(Expr),
    Return(Option<Expr>, Pos),
    If {
        cond: Expr,
        then: Block,
        otherwise: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Break(Pos),
    Continue(Pos),
    Throw(Expr, Pos),
    Try {
        body: Block,
        binding: Option<Rc<str>>,
        handler: Block,
    },
    Block(Block),
    /// `import name from "module"` or `import "module"`.
    Import {
        binding: Option<Rc<str>>,
        module: String,
        pos: Pos,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    pub body: Block,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, Pos),
    Ident(Rc<str>, Pos),
    List(Vec<Expr>, Pos),
    Object(Vec<(Rc<str>, Expr)>, Pos),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        pos: Pos,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        pos: Pos,
    },
    Member {
        object: Box<Expr>,
        name: Rc<str>,
        pos: Pos,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        pos: Pos,
    },
    Function(Rc<FnDecl>),
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Literal(_, pos)
            | Expr::Ident(_, pos)
            | Expr::List(_, pos)
            | Expr::Object(_, pos)
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Logical { pos, .. }
            | Expr::Assign { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Member { pos, .. }
            | Expr::Index { pos, .. } => *pos,
            Expr::Function(decl) => decl.pos,
        }
    }
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Block,
}
