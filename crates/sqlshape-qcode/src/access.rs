//! Role-based access rules.
//!
//! Each (role, table) pair resolves to an [`AccessRules`] record with five
//! operation blocks. Rules are registered during setup through
//! [`AccessControl::add_role`] and consumed while shaping selections, before
//! any SQL emission.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use sqlshape_schema::{pluralize, singularize, DbSchema, SchemaError, TableInfo};
use thiserror::Error;

use crate::{Exp, ExpOp, Select, SkipRender, ValKind};

/// Operation kind an access rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Query,
    Insert,
    Update,
    Upsert,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpKind::Query => "query",
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Upsert => "upsert",
            OpKind::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum AccessError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("{op} blocked: {field} ({role})")]
    Blocked {
        op: OpKind,
        field: String,
        role: String,
    },
}

/// Argument of a forced-filter predicate.
#[derive(Debug, Clone)]
pub enum FilterArg {
    /// A variable reference (stored without the leading `$`).
    Var(String),
    /// A literal value.
    Literal(String),
    /// A literal list.
    List(Vec<String>, ValKind),
}

/// One forced-filter condition on a role's table.
#[derive(Debug, Clone)]
pub struct Filter {
    pub col: String,
    pub op: ExpOp,
    pub arg: FilterArg,
}

impl Filter {
    pub fn new(col: impl Into<String>, op: ExpOp, arg: FilterArg) -> Self {
        Self {
            col: col.into(),
            op,
            arg,
        }
    }

    /// `col = $var`, the common ownership filter.
    pub fn eq_var(col: impl Into<String>, var: impl Into<String>) -> Self {
        Self::new(col, ExpOp::Equals, FilterArg::Var(var.into()))
    }
}

/// Compile filter specs against a table into a single predicate.
///
/// Returns the AND-composed expression and whether it references user
/// variables (`user_id`, `user_id_provider`); selections guarded by such a
/// filter are skipped for requests without a user.
pub fn compile_filter(
    ti: &TableInfo,
    filters: &[Filter],
) -> Result<(Option<Exp>, bool), AccessError> {
    let mut needs_user = false;
    let mut children = Vec::with_capacity(filters.len());

    for f in filters {
        let col = ti.get_column(&f.col)?.clone();
        let exp = match &f.arg {
            FilterArg::Var(name) => {
                if name == "user_id" || name == "user_id_provider" {
                    needs_user = true;
                }
                Exp::op_col_var(f.op, col, name.clone())
            }
            FilterArg::Literal(v) => Exp::op_col_lit(f.op, col, v.clone()),
            FilterArg::List(items, kind) => Exp::op_col_list(f.op, col, items.clone(), *kind),
        };
        children.push(exp);
    }

    Ok(match children.len() {
        0 => (None, false),
        1 => (children.pop(), needs_user),
        _ => (Some(Exp::and(children)), needs_user),
    })
}

#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    /// Row cap for this role; 0 means no cap.
    pub limit: u32,
    pub filters: Vec<Filter>,
    pub columns: Vec<String>,
    pub disable_functions: bool,
    pub block: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InsertConfig {
    pub columns: Vec<String>,
    pub presets: IndexMap<String, String>,
    pub block: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateConfig {
    pub filters: Vec<Filter>,
    pub columns: Vec<String>,
    pub presets: IndexMap<String, String>,
    pub block: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpsertConfig {
    pub filters: Vec<Filter>,
    pub columns: Vec<String>,
    pub presets: IndexMap<String, String>,
    pub block: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteConfig {
    pub filters: Vec<Filter>,
    pub columns: Vec<String>,
    pub block: bool,
}

/// Per-table rule configuration for one role.
#[derive(Debug, Clone, Default)]
pub struct RoleConfig {
    pub query: QueryConfig,
    pub insert: InsertConfig,
    pub update: UpdateConfig,
    pub upsert: UpsertConfig,
    pub delete: DeleteConfig,
}

#[derive(Debug, Clone, Default)]
struct FilterBlock {
    fil: Option<Exp>,
    needs_user: bool,
}

#[derive(Debug, Clone, Default)]
struct QueryRules {
    limit: u32,
    filter: FilterBlock,
    cols: HashSet<String>,
    disable_funcs: bool,
    block: bool,
}

#[derive(Debug, Clone, Default)]
struct MutationRules {
    filter: FilterBlock,
    cols: HashSet<String>,
    presets: IndexMap<String, String>,
    block: bool,
}

/// Resolved access rules for one (role, table) pair.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    role: String,
    query: QueryRules,
    insert: MutationRules,
    update: MutationRules,
    upsert: MutationRules,
    delete: MutationRules,
}

impl AccessRules {
    fn empty(role: &str) -> Self {
        Self {
            role: role.to_string(),
            ..Self::default()
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// The forced filter for an operation, with its needs-user flag.
    /// Inserts never take a filter.
    pub fn filter(&self, op: OpKind) -> (Option<&Exp>, bool) {
        let block = match op {
            OpKind::Query => &self.query.filter,
            OpKind::Insert => return (None, false),
            OpKind::Update => &self.update.filter,
            OpKind::Upsert => &self.upsert.filter,
            OpKind::Delete => &self.delete.filter,
        };
        (block.fil.as_ref(), block.needs_user)
    }

    /// A column is allowed iff whitelisted or the whitelist is empty.
    pub fn column_allowed(&self, op: OpKind, name: &str) -> bool {
        let cols = match op {
            OpKind::Query => &self.query.cols,
            OpKind::Insert => &self.insert.cols,
            OpKind::Update => &self.update.cols,
            OpKind::Upsert => &self.upsert.cols,
            OpKind::Delete => &self.delete.cols,
        };
        cols.is_empty() || cols.contains(&name.to_lowercase())
    }

    /// The query row cap, when this role defines one.
    pub fn limit(&self, op: OpKind) -> Option<u32> {
        if op == OpKind::Query && self.query.limit != 0 {
            Some(self.query.limit)
        } else {
            None
        }
    }

    pub fn check_blocked(&self, op: OpKind, field: &str) -> Result<(), AccessError> {
        let blocked = match op {
            OpKind::Query => self.query.block,
            OpKind::Insert => self.insert.block,
            OpKind::Update => self.update.block,
            OpKind::Upsert => self.upsert.block,
            OpKind::Delete => self.delete.block,
        };
        if blocked {
            return Err(AccessError::Blocked {
                op,
                field: field.to_string(),
                role: self.role.clone(),
            });
        }
        Ok(())
    }

    pub fn is_skipped(&self, op: OpKind) -> bool {
        op == OpKind::Query && self.query.block
    }

    pub fn funcs_blocked(&self) -> bool {
        self.query.disable_funcs
    }

    pub fn presets(&self, op: OpKind) -> Option<&IndexMap<String, String>> {
        match op {
            OpKind::Insert => Some(&self.insert.presets),
            OpKind::Update => Some(&self.update.presets),
            _ => None,
        }
    }
}

fn make_set(list: &[String]) -> HashSet<String> {
    list.iter().map(|s| s.to_lowercase()).collect()
}

#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Role assumed for unauthenticated requests.
    pub default_role: String,
    /// Block queries for roles without an explicit rule record.
    pub default_block: bool,
    /// Limit applied to selections that specify none.
    pub default_limit: u32,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_role: "anon".to_string(),
            default_block: false,
            default_limit: 20,
        }
    }
}

/// The role table: (role, table) keys to rule records.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    config: AccessConfig,
    rules: HashMap<(String, String), AccessRules>,
    default_rules: AccessRules,
}

impl AccessControl {
    pub fn new(config: AccessConfig) -> Self {
        let mut default_rules = AccessRules::empty(&config.default_role);
        default_rules.query.block = config.default_block;
        Self {
            config,
            rules: HashMap::new(),
            default_rules,
        }
    }

    pub fn default_limit(&self) -> u32 {
        self.config.default_limit
    }

    /// Register rules for one (role, table) pair under both the singular
    /// and plural table spellings.
    ///
    /// Validates the table and every filter column first; nothing is
    /// written when validation fails.
    pub fn add_role(
        &mut self,
        schema: &DbSchema,
        role: &str,
        table: &str,
        rc: RoleConfig,
    ) -> Result<(), AccessError> {
        let ti = schema.table_info(table, "")?;

        let mut rules = AccessRules::empty(role);

        let (fil, nu) = compile_filter(ti, &rc.query.filters)?;
        rules.query.filter = FilterBlock {
            fil,
            needs_user: nu,
        };
        rules.query.limit = rc.query.limit;
        rules.query.cols = make_set(&rc.query.columns);
        rules.query.disable_funcs = rc.query.disable_functions;
        rules.query.block = rc.query.block;

        rules.insert.cols = make_set(&rc.insert.columns);
        rules.insert.presets = rc.insert.presets;
        rules.insert.block = rc.insert.block;

        let (fil, nu) = compile_filter(ti, &rc.update.filters)?;
        rules.update.filter = FilterBlock {
            fil,
            needs_user: nu,
        };
        rules.update.cols = make_set(&rc.update.columns);
        rules.update.presets = rc.update.presets;
        rules.update.block = rc.update.block;

        let (fil, nu) = compile_filter(ti, &rc.upsert.filters)?;
        rules.upsert.filter = FilterBlock {
            fil,
            needs_user: nu,
        };
        rules.upsert.cols = make_set(&rc.upsert.columns);
        rules.upsert.presets = rc.upsert.presets;
        rules.upsert.block = rc.upsert.block;

        let (fil, nu) = compile_filter(ti, &rc.delete.filters)?;
        rules.delete.filter = FilterBlock {
            fil,
            needs_user: nu,
        };
        rules.delete.cols = make_set(&rc.delete.columns);
        rules.delete.block = rc.delete.block;

        let singular = singularize(table);
        let plural = pluralize(table);
        self.rules
            .insert((role.to_string(), singular), rules.clone());
        self.rules.insert((role.to_string(), plural), rules);

        Ok(())
    }

    /// Resolve the rules for a role and output field.
    ///
    /// Misses for a non-default role yield an empty record carrying just
    /// the role; misses for the default role yield the configured default.
    pub fn rules(&self, role: &str, field: &str) -> AccessRules {
        if let Some(rules) = self.rules.get(&(role.to_string(), field.to_string())) {
            return rules.clone();
        }
        if role != self.config.default_role {
            return AccessRules::empty(role);
        }
        let mut rules = self.default_rules.clone();
        rules.role = role.to_string();
        rules
    }
}

/// Fold a role's rules into a selection before emission.
///
/// Blocked selections are marked [`SkipRender::UserNeeded`] so the output
/// envelope still compiles, and the domain error is returned for the caller
/// to surface. Selections whose forced filter references user variables are
/// marked the same way when no user is present, without an error.
pub fn apply_rules(
    sel: &mut Select,
    rules: &AccessRules,
    have_user: bool,
    default_limit: u32,
) -> Result<(), AccessError> {
    if let Err(err) = rules.check_blocked(OpKind::Query, &sel.field_name) {
        sel.skip_render = SkipRender::UserNeeded;
        return Err(err);
    }

    let (filter, needs_user) = rules.filter(OpKind::Query);
    if needs_user && !have_user {
        sel.skip_render = SkipRender::UserNeeded;
        return Ok(());
    }
    if let Some(filter) = filter {
        let filter = filter.clone();
        sel.where_ = Some(match sel.where_.take() {
            Some(user) => Exp::and(vec![filter, user]),
            None => filter,
        });
    }

    sel.cols
        .retain(|c| rules.column_allowed(OpKind::Query, &c.col.name));
    if rules.funcs_blocked() {
        sel.cols.retain(|c| c.func.is_none());
    }

    if let Some(cap) = rules.limit(OpKind::Query) {
        if sel.paging.limit == 0 || sel.paging.limit > cap {
            sel.paging.limit = cap;
        }
    }
    if sel.paging.limit == 0 && !sel.paging.no_limit {
        sel.paging.limit = default_limit;
    }

    Ok(())
}
