//! # Abstract Syntax Tree
//!
//! Arena-allocated AST for one statement. Every node lives in the
//! statement's `bumpalo` arena and borrows string slices from the input, so
//! a parse performs almost no heap allocation and the whole tree drops in
//! one free when the statement finishes binding.

use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stmt<'a> {
    CreateTable {
        name: &'a str,
        columns: &'a [ColumnDef<'a>],
    },
    CreateIndex {
        name: &'a str,
        table: &'a str,
        method: &'a str,
        column: &'a str,
        op_class: Option<&'a str>,
        options: &'a [(&'a str, f64)],
    },
    Select(&'a SelectStmt<'a>),
    Insert {
        table: &'a str,
        rows: &'a [&'a [&'a Expr<'a>]],
    },
    Update {
        table: &'a str,
        assignments: &'a [(&'a str, &'a Expr<'a>)],
        filter: Option<&'a Expr<'a>>,
    },
    Delete {
        table: &'a str,
        filter: Option<&'a Expr<'a>>,
    },
    Explain(&'a Stmt<'a>),
    Begin {
        serializable: bool,
    },
    Commit,
    Abort,
    Set {
        name: &'a str,
        value: &'a str,
    },
    Show {
        name: &'a str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnDef<'a> {
    pub name: &'a str,
    pub type_id: TypeId,
    /// VARCHAR(n) / VECTOR(d); 0 for fixed types.
    pub length: u32,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectStmt<'a> {
    pub projections: &'a [SelectItem<'a>],
    pub from: Option<&'a TableRef<'a>>,
    pub filter: Option<&'a Expr<'a>>,
    pub group_by: &'a [&'a Expr<'a>],
    pub having: Option<&'a Expr<'a>>,
    pub order_by: &'a [(OrderDir, &'a Expr<'a>)],
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectItem<'a> {
    Star,
    Expr { expr: &'a Expr<'a>, alias: Option<&'a str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstJoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TableRef<'a> {
    Table {
        name: &'a str,
        alias: Option<&'a str>,
    },
    Join {
        left: &'a TableRef<'a>,
        right: &'a TableRef<'a>,
        join_type: AstJoinType,
        on: &'a Expr<'a>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    L2Dist,
    IpDist,
    CosineDist,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expr<'a> {
    Column {
        table: Option<&'a str>,
        name: &'a str,
    },
    IntLit(i64),
    FloatLit(f64),
    StringLit(&'a str),
    BoolLit(bool),
    NullLit,
    VectorLit(&'a [f64]),
    Binary {
        op: BinaryOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
    },
    /// Aggregate or scalar call; only aggregates exist today.
    FnCall {
        name: &'a str,
        arg: Option<&'a Expr<'a>>,
        star: bool,
    },
    Neg(&'a Expr<'a>),
}
