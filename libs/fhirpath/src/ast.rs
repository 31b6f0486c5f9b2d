//! Abstract syntax tree for FHIRPath expressions.
//!
//! One tagged variant per expression form; the evaluator dispatches on the
//! variant. Trees are small and short-lived, so plain boxed recursion is
//! used rather than an arena.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::value::{DatePrecision, DateTimePrecision, TimePrecision};

/// A FHIRPath expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    /// `$this`
    This,
    /// `$index`
    Index,
    /// `$total`
    Total,
    /// `%name` or `%'name'`
    EnvVariable(String),

    /// `{}`
    NullLiteral,
    BooleanLiteral(bool),
    StringLiteral(String),
    IntegerLiteral(i32),
    DecimalLiteral(Decimal),
    DateLiteral(NaiveDate, DatePrecision),
    /// UTC-normalized instant, precision, and the source offset (seconds
    /// east of UTC; `None` when the literal had no timezone).
    DateTimeLiteral(DateTime<Utc>, DateTimePrecision, Option<i32>),
    TimeLiteral(NaiveTime, TimePrecision),
    QuantityLiteral { value: Decimal, unit: String },

    /// Bare identifier: field selection or resource-type gate.
    Member { name: String },
    /// `name(args...)`
    Function { name: String, args: Vec<AstNode> },
    /// `target.invocation` where invocation is a Member, Function, This,
    /// Index, or Total node.
    Invocation {
        target: Box<AstNode>,
        invocation: Box<AstNode>,
    },
    /// `target[index]`
    Indexer {
        target: Box<AstNode>,
        index: Box<AstNode>,
    },

    /// Unary `+` / `-`.
    UnaryOp {
        op: UnaryOperator,
        operand: Box<AstNode>,
    },
    /// All infix operators.
    BinaryOp {
        op: BinaryOperator,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    /// `expr is T` / `expr as T`
    TypeOp {
        op: TypeOperator,
        expr: Box<AstNode>,
        specifier: TypeSpecifierName,
    },
    /// `( expr )` — kept in the tree so compile-twice structural equality
    /// is exact.
    ParenGroup(Box<AstNode>),
}

/// Unary operator: `+` | `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Minus,
}

/// All infix binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Mul,      // *
    Div,      // /
    TruncDiv, // div
    Mod,      // mod
    Add,      // +
    Sub,      // -
    Concat,   // &
    Union,    // |
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    Eq,       // =
    Ne,       // !=
    Equiv,    // ~
    NotEquiv, // !~
    In,       // in
    ContainsOp, // contains
    And,      // and
    Or,       // or
    Xor,      // xor
    Implies,  // implies
}

/// Type operator: `is` | `as`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOperator {
    Is,
    As,
}

/// A (possibly qualified) type specifier: `Boolean`, `System.Integer`,
/// `FHIR.Patient`. Resolution against the two namespaces happens at
/// evaluation (or strict-compile) time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpecifierName {
    pub qualifier: Option<String>,
    pub name: String,
}

impl TypeSpecifierName {
    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TypeSpecifierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
