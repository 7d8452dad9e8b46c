//! Abstract Syntax Tree
//!
//! Names are resolved while parsing: every variable reference is already a
//! local slot, an upvalue index or a global name.

use crate::vm::{BinOp, UnOp, UpvalDesc};

/// Index into [`FunctionBody::locals`]
pub type LocalId = usize;

/// Statement list
pub type Block = Vec<Stmt>;

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

impl Expr {
    pub fn new(
        kind: ExprKind,
        line: u32,
    ) -> Self {
        Self { kind, line }
    }

    /// Whether the expression can produce a variable number of values
    pub fn is_multi(&self) -> bool {
        matches!(self.kind, ExprKind::Call(..) | ExprKind::Method(..))
    }

    /// Take the kind out, leaving `nil` behind
    pub fn into_kind(mut self) -> ExprKind {
        ::std::mem::replace(&mut self.kind, ExprKind::Nil)
    }
}

// 长运算链是左深树，按工作表逐个释放，释放深度与链长无关
impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(&mut self.kind, &mut pending);
        while let Some(mut expr) = pending.pop() {
            detach_children(&mut expr.kind, &mut pending);
        }
    }
}

fn detach_children(
    kind: &mut ExprKind,
    out: &mut Vec<Expr>,
) {
    match ::std::mem::replace(kind, ExprKind::Nil) {
        ExprKind::Binary(_, lhs, rhs)
        | ExprKind::And(lhs, rhs)
        | ExprKind::Or(lhs, rhs)
        | ExprKind::Index(lhs, rhs) => {
            out.push(*lhs);
            out.push(*rhs);
        }
        ExprKind::Paren(inner) | ExprKind::Unary(_, inner) => out.push(*inner),
        ExprKind::Call(callee, args) | ExprKind::Method(callee, _, args) => {
            out.push(*callee);
            out.extend(args);
        }
        ExprKind::Table(items) => {
            for item in items {
                match item {
                    TableItem::Positional(value) => out.push(value),
                    TableItem::Keyed(key, value) => {
                        out.push(key);
                        out.push(value);
                    }
                }
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Local(LocalId),
    Upval(u16),
    Global(String),
    /// `(e)` truncates a call to one value
    Paren(Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    /// `obj:name(args)`
    Method(Box<Expr>, String, Vec<Expr>),
    Function(Box<FunctionBody>),
    Table(Vec<TableItem>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Table constructor entry
#[derive(Debug, Clone, PartialEq)]
pub enum TableItem {
    Positional(Expr),
    Keyed(Expr, Expr),
}

/// Statement
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

impl Stmt {
    pub fn new(
        kind: StmtKind,
        line: u32,
    ) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Function or method call evaluated for its effects
    Call(Expr),
    Local {
        targets: Vec<LocalId>,
        values: Vec<Expr>,
    },
    LocalFunction {
        local: LocalId,
        func: Box<FunctionBody>,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        branches: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    /// `for v = start, limit, step do ... end`; `state` is the first of
    /// three consecutive hidden locals
    NumericFor {
        state: LocalId,
        var: LocalId,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    /// `for a, b in explist do ... end`; `state` holds the iterator,
    /// its state and the control value in three consecutive hidden locals
    GenericFor {
        state: LocalId,
        vars: Vec<LocalId>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Return(Vec<Expr>),
    Break,
}

/// Local variable metadata, fixed once its function is parsed
#[derive(Debug, Clone, PartialEq)]
pub struct LocalInfo {
    pub name: String,
    pub slot: u16,
    /// Referenced from a nested function, so it lives in a cell
    pub captured: bool,
}

/// Parsed function (the main chunk is one too)
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub name: Option<String>,
    pub line: u32,
    pub params: Vec<LocalId>,
    pub locals: Vec<LocalInfo>,
    pub upvals: Vec<UpvalDesc>,
    /// Frame slots needed by the deepest nesting of locals
    pub slots: u16,
    pub body: Block,
}

impl FunctionBody {
    pub fn local(
        &self,
        id: LocalId,
    ) -> &LocalInfo {
        &self.locals[id]
    }
}
