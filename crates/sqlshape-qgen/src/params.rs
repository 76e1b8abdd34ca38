//! Bind-parameter bookkeeping.

use indexmap::IndexMap;
use sqlshape_schema::Dialect;

/// One bind parameter, in first-appearance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    /// SQL type the value binds as.
    pub sql_type: String,
    /// True when the value is a JSON array unboxed server-side.
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParamDef {
    sql_type: String,
    is_array: bool,
}

/// Compile metadata returned alongside the SQL text.
///
/// Parameters are recorded in the order they first appear during emission;
/// later references to the same name reuse the existing position, so the
/// executor binds each value once no matter how often the SQL mentions it.
#[derive(Debug, Clone)]
pub struct Metadata {
    dialect: Dialect,
    poll: bool,
    params: IndexMap<String, ParamDef>,
}

impl Metadata {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            poll: false,
            params: IndexMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// True for subscriptions; tells the executor to poll the statement.
    pub fn poll(&self) -> bool {
        self.poll
    }

    pub(crate) fn set_poll(&mut self) {
        self.poll = true;
    }

    /// Ordered parameter list.
    pub fn params(&self) -> Vec<Param> {
        self.params
            .iter()
            .map(|(name, def)| Param {
                name: name.clone(),
                sql_type: def.sql_type.clone(),
                is_array: def.is_array,
            })
            .collect()
    }

    /// 1-based position of a parameter, matching its `$N` placeholder.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.get_index_of(name).map(|i| i + 1)
    }

    /// Record a parameter sighting and return its 1-based position.
    ///
    /// The first sighting fixes the type; a later sighting with a different
    /// type keeps the first record and logs a warning.
    pub(crate) fn register(&mut self, name: &str, sql_type: &str, is_array: bool) -> usize {
        if let Some((idx, _, def)) = self.params.get_full(name) {
            if def.sql_type != sql_type || def.is_array != is_array {
                tracing::warn!(
                    param = name,
                    first = %def.sql_type,
                    later = %sql_type,
                    "conflicting parameter types; keeping the first"
                );
            }
            return idx + 1;
        }
        self.params.insert(
            name.to_string(),
            ParamDef {
                sql_type: sql_type.to_string(),
                is_array,
            },
        );
        self.params.len()
    }
}
