//! Predicate trees.

use sqlshape_schema::{DbColumn, Rel};

/// Predicate operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpOp {
    /// Placeholder that emits nothing.
    Nop,
    And,
    Or,
    Not,
    /// The literal `false`.
    False,
    Equals,
    NotEquals,
    /// IS NOT DISTINCT FROM
    NotDistinct,
    /// IS DISTINCT FROM
    Distinct,
    GreaterOrEquals,
    LesserOrEquals,
    GreaterThan,
    LesserThan,
    /// `= ANY`
    In,
    /// `!= ALL`
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Similar,
    NotSimilar,
    Regex,
    NotRegex,
    IRegex,
    NotIRegex,
    /// JSON containment `@>`
    Contains,
    /// JSON containment `<@`
    ContainedIn,
    /// JSON `?`
    HasKey,
    /// JSON `?|`
    HasKeyAny,
    /// JSON `?&`
    HasKeyAll,
    EqualsTrue,
    NotEqualsTrue,
    IsNull,
    /// Full-text match against the table's tsvector column.
    TsQuery,
}

/// Scalar kind for literal lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    Str,
    Num,
    Bool,
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, Default)]
pub enum ExpVal {
    /// No payload (And/Or/Not/False).
    #[default]
    None,
    /// Literal, emitted single-quoted.
    Lit(String),
    /// Named variable, resolved against the compiler's var map or bound as
    /// a positional parameter.
    Var(String),
    /// Another column, `exp.table` + `exp.col`.
    Ref,
    /// Literal array.
    List(Vec<String>, ValKind),
}

/// One predicate node.
#[derive(Debug, Clone)]
pub struct Exp {
    pub op: ExpOp,
    /// Target column; absent for boolean connectives and full-text ops.
    pub col: Option<DbColumn>,
    /// Table override for `ExpVal::Ref` comparisons.
    pub table: Option<String>,
    pub val: ExpVal,
    pub children: Vec<Exp>,
    /// For nested-relation predicates, the relationship hops to traverse
    /// with EXISTS before applying this expression.
    pub rels: Vec<Rel>,
}

impl Exp {
    pub fn new(op: ExpOp) -> Self {
        Self {
            op,
            col: None,
            table: None,
            val: ExpVal::None,
            children: Vec::new(),
            rels: Vec::new(),
        }
    }

    pub fn and(children: Vec<Exp>) -> Self {
        Self {
            children,
            ..Self::new(ExpOp::And)
        }
    }

    pub fn or(children: Vec<Exp>) -> Self {
        Self {
            children,
            ..Self::new(ExpOp::Or)
        }
    }

    pub fn not(child: Exp) -> Self {
        Self {
            children: vec![child],
            ..Self::new(ExpOp::Not)
        }
    }

    /// `col <op> 'literal'`
    pub fn op_col_lit(op: ExpOp, col: DbColumn, val: impl Into<String>) -> Self {
        Self {
            col: Some(col),
            val: ExpVal::Lit(val.into()),
            ..Self::new(op)
        }
    }

    /// `col <op> $var`
    pub fn op_col_var(op: ExpOp, col: DbColumn, var: impl Into<String>) -> Self {
        Self {
            col: Some(col),
            val: ExpVal::Var(var.into()),
            ..Self::new(op)
        }
    }

    /// `col <op> other_table.col`
    pub fn op_col_ref(op: ExpOp, col: DbColumn, table: impl Into<String>) -> Self {
        Self {
            col: Some(col),
            table: Some(table.into()),
            val: ExpVal::Ref,
            ..Self::new(op)
        }
    }

    /// `col <op> (ARRAY[...])`
    pub fn op_col_list(op: ExpOp, col: DbColumn, items: Vec<String>, kind: ValKind) -> Self {
        Self {
            col: Some(col),
            val: ExpVal::List(items, kind),
            ..Self::new(op)
        }
    }

    /// Full-text search with the query text bound to `var`.
    pub fn ts_query(var: impl Into<String>) -> Self {
        Self {
            val: ExpVal::Var(var.into()),
            ..Self::new(ExpOp::TsQuery)
        }
    }

    /// Traverse `rels` with EXISTS before applying this expression.
    pub fn through(mut self, rels: Vec<Rel>) -> Self {
        self.rels = rels;
        self
    }
}
