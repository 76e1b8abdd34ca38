//! The compiled, role-resolved query intermediate representation.
//!
//! A [`QCode`] is a tree of [`Select`] nodes produced upstream from a parsed
//! operation, read-only during SQL emission. Each selection references one
//! table source, carries its projection, predicates, ordering and paging,
//! and links to its parent through a relationship descriptor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// Schema types travel with the IR; consumers get both from one import.
pub use sqlshape_schema::{
    DbColumn, DbSchema, Dialect, JsonType, Rel, RecursiveRel, RelCols, RemoteRel, SchemaError,
    TableInfo, ThroughRel,
};

mod access;
mod expr;

pub use access::{
    AccessControl, AccessConfig, AccessError, AccessRules, DeleteConfig, Filter, FilterArg,
    InsertConfig, OpKind, QueryConfig, RoleConfig, UpdateConfig, UpsertConfig, apply_rules,
    compile_filter,
};
pub use expr::{Exp, ExpOp, ExpVal, ValKind};

/// Operation type of a compiled query bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QType {
    Query,
    Subscription,
    Mutation,
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QType::Query => "query",
            QType::Subscription => "subscription",
            QType::Mutation => "mutation",
        })
    }
}

/// Selection node flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelType {
    #[default]
    Table,
    Union,
    Member,
}

/// Why a selection is excluded from rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipRender {
    #[default]
    None,
    /// Requires an authenticated user; the output key is emitted as NULL.
    UserNeeded,
    /// Filled in post-query by a remote resolver; only the placeholder id
    /// column is emitted.
    Remote,
}

/// One projected output field.
#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub col: DbColumn,
    /// Output JSON key.
    pub field_name: String,
    /// Aggregate or server function applied to the column.
    pub func: Option<String>,
}

impl SelectColumn {
    pub fn new(col: DbColumn) -> Self {
        let field_name = col.name.clone();
        Self {
            col,
            field_name,
            func: None,
        }
    }

    pub fn aliased(col: DbColumn, field_name: impl Into<String>) -> Self {
        Self {
            col,
            field_name: field_name.into(),
            func: None,
        }
    }

    pub fn func(col: DbColumn, func: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            col,
            field_name: field_name.into(),
            func: Some(func.into()),
        }
    }
}

/// Sort direction, including null placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
    AscNullsFirst,
    DescNullsFirst,
    AscNullsLast,
    DescNullsLast,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub col: DbColumn,
    pub order: Order,
}

/// Limit/offset and keyset-cursor settings for one selection.
#[derive(Debug, Clone, Default)]
pub struct Paging {
    pub limit: u32,
    pub offset: u32,
    /// Variable name driving LIMIT LEAST($var, limit).
    pub limit_var: Option<String>,
    pub offset_var: Option<String>,
    /// Suppress the LIMIT clause entirely.
    pub no_limit: bool,
    /// Opaque-cursor pagination; adds the cursor CTE and __cur_ columns.
    pub cursor: bool,
}

/// One selection: a single GraphQL field resolving to a table source.
#[derive(Debug, Clone)]
pub struct Select {
    pub id: usize,
    pub parent_id: Option<usize>,
    /// Parent reference used by union members instead of `parent_id`.
    pub uparent_id: Option<usize>,
    pub sel_type: SelType,
    /// Output JSON key.
    pub field_name: String,
    pub table: String,
    pub ti: TableInfo,
    pub rel: Rel,
    /// At most one row; skips array aggregation.
    pub singular: bool,
    pub cols: Vec<SelectColumn>,
    pub order_by: Vec<OrderBy>,
    pub distinct_on: Vec<DbColumn>,
    /// Group by the plain projection columns (set when aggregates are mixed
    /// with plain columns).
    pub group_cols: bool,
    pub where_: Option<Exp>,
    pub paging: Paging,
    pub children: Vec<usize>,
    /// Named arguments, e.g. find: "children" on recursive selections.
    pub args: HashMap<String, String>,
    pub skip_render: SkipRender,
}

impl Select {
    pub fn new(id: usize, field_name: impl Into<String>, ti: TableInfo) -> Self {
        Self {
            id,
            parent_id: None,
            uparent_id: None,
            sel_type: SelType::Table,
            field_name: field_name.into(),
            table: ti.name.clone(),
            ti,
            rel: Rel::None,
            singular: false,
            cols: Vec::new(),
            order_by: Vec::new(),
            distinct_on: Vec::new(),
            group_cols: false,
            where_: None,
            paging: Paging::default(),
            children: Vec::new(),
            args: HashMap::new(),
            skip_render: SkipRender::None,
        }
    }

    pub fn column(mut self, col: SelectColumn) -> Self {
        self.cols.push(col);
        self
    }

    /// Project a plain column under its own name.
    ///
    /// # Panics
    ///
    /// Panics when the table has no such column; producers validate
    /// projections before building selections.
    pub fn col(mut self, name: &str) -> Self {
        let col = self
            .ti
            .get_column(name)
            .unwrap_or_else(|_| panic!("no column '{name}' on '{}'", self.ti.name))
            .clone();
        self.cols.push(SelectColumn::new(col));
        self
    }

    pub fn rel(mut self, rel: Rel, parent_id: usize) -> Self {
        self.rel = rel;
        self.parent_id = Some(parent_id);
        self
    }

    pub fn singular(mut self) -> Self {
        self.singular = true;
        self
    }

    pub fn where_(mut self, exp: Exp) -> Self {
        self.where_ = Some(exp);
        self
    }

    pub fn and_where(mut self, exp: Exp) -> Self {
        self.where_ = Some(match self.where_.take() {
            Some(existing) => Exp::and(vec![exp, existing]),
            None => exp,
        });
        self
    }

    pub fn order(mut self, col: DbColumn, order: Order) -> Self {
        self.order_by.push(OrderBy { col, order });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.paging.limit = limit;
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

/// A compiled query bundle: the operation type, the schema snapshot it was
/// resolved against, the ordered root selections, and the selection arena.
#[derive(Debug, Clone)]
pub struct QCode {
    pub qtype: QType,
    pub schema: Arc<DbSchema>,
    pub roots: Vec<usize>,
    pub selects: Vec<Select>,
}

impl QCode {
    pub fn new(qtype: QType, schema: Arc<DbSchema>) -> Self {
        Self {
            qtype,
            schema,
            roots: Vec::new(),
            selects: Vec::new(),
        }
    }

    /// Add a selection to the arena. Roots are selections without a parent;
    /// children are linked into their parent's child list.
    pub fn push(&mut self, sel: Select) -> usize {
        let id = sel.id;
        debug_assert_eq!(id, self.selects.len(), "selection ids must be dense");
        match sel.parent_id {
            Some(pid) => self.selects[pid].children.push(id),
            None => self.roots.push(id),
        }
        self.selects.push(sel);
        id
    }
}

#[cfg(test)]
mod tests;
