//! Dialect-specific SQL fragments.
//!
//! One method per point where PostgreSQL and MySQL emission diverge: JSON
//! builders, the anchor row, parameter markers, casts, cursor decoding and
//! full-text matching. Everything else in the emitter is dialect-neutral.

use sqlshape_qcode::OrderBy;
use sqlshape_schema::{DbColumn, Dialect};

use crate::push_ident;

pub(crate) trait Sql: Sync {
    fn kind(&self) -> Dialect;

    /// Opens a JSON object constructor; closed with a plain `)`.
    fn json_object_open(&self, buf: &mut String);

    /// Opens the array-aggregation wrapper, up to and including the
    /// aggregate's opening paren.
    fn json_agg_open(&self, buf: &mut String);

    /// The single-row anchor, `(VALUES(true))` or the MySQL spelling.
    fn row_values(&self, buf: &mut String);

    /// Positional parameter marker for a 1-based index.
    fn param_marker(&self, buf: &mut String, index: usize);

    /// Type-cast suffix; MySQL omits casts.
    fn cast(&self, buf: &mut String, sql_type: &str);

    /// The `WITH __cur AS (...)` prefix decoding an opaque cursor into one
    /// typed column per order-by entry. `cursor_param` is the pre-rendered
    /// marker for the cursor's bind parameter.
    fn cursor_decode_cte(&self, buf: &mut String, order_by: &[OrderBy], cursor_param: &str);

    /// Full-text match of `col` against the query text bound at `param`.
    fn ts_query(&self, buf: &mut String, col: &DbColumn, version: u32, param: &str);
}

pub(crate) fn dialect_for(dialect: Dialect) -> &'static dyn Sql {
    match dialect {
        Dialect::Postgres => &Postgres,
        Dialect::Mysql => &Mysql,
    }
}

struct Postgres;

impl Sql for Postgres {
    fn kind(&self) -> Dialect {
        Dialect::Postgres
    }

    fn json_object_open(&self, buf: &mut String) {
        buf.push_str("jsonb_build_object(");
    }

    fn json_agg_open(&self, buf: &mut String) {
        buf.push_str("coalesce(jsonb_agg(");
    }

    fn row_values(&self, buf: &mut String) {
        buf.push_str("(VALUES(true))");
    }

    fn param_marker(&self, buf: &mut String, index: usize) {
        buf.push('$');
        buf.push_str(&index.to_string());
    }

    fn cast(&self, buf: &mut String, sql_type: &str) {
        buf.push_str(" :: ");
        buf.push_str(sql_type);
    }

    fn cursor_decode_cte(&self, buf: &mut String, order_by: &[OrderBy], cursor_param: &str) {
        buf.push_str("WITH __cur AS (SELECT ");
        for (i, ob) in order_by.iter().enumerate() {
            if i != 0 {
                buf.push_str(", ");
            }
            buf.push_str("a[");
            buf.push_str(&(i + 1).to_string());
            buf.push_str("] :: ");
            buf.push_str(&ob.col.sql_type);
            buf.push_str(" as ");
            push_ident(buf, &ob.col.name);
        }
        buf.push_str(" FROM string_to_array(");
        buf.push_str(cursor_param);
        buf.push_str(", ',') as a) ");
    }

    fn ts_query(&self, buf: &mut String, col: &DbColumn, version: u32, param: &str) {
        buf.push_str("((");
        push_ident(buf, &col.table);
        buf.push('.');
        push_ident(buf, &col.name);
        if version >= 110000 {
            buf.push_str(") @@ websearch_to_tsquery(");
        } else {
            buf.push_str(") @@ to_tsquery(");
        }
        buf.push_str(param);
        buf.push_str("))");
    }
}

struct Mysql;

impl Sql for Mysql {
    fn kind(&self) -> Dialect {
        Dialect::Mysql
    }

    fn json_object_open(&self, buf: &mut String) {
        buf.push_str("json_object(");
    }

    fn json_agg_open(&self, buf: &mut String) {
        buf.push_str("coalesce(json_arrayagg(");
    }

    fn row_values(&self, buf: &mut String) {
        buf.push_str("(VALUES ROW(true))");
    }

    fn param_marker(&self, buf: &mut String, _index: usize) {
        buf.push('?');
    }

    fn cast(&self, _buf: &mut String, _sql_type: &str) {}

    fn cursor_decode_cte(&self, buf: &mut String, order_by: &[OrderBy], cursor_param: &str) {
        buf.push_str("WITH __cur AS (SELECT ");
        for (i, ob) in order_by.iter().enumerate() {
            if i != 0 {
                buf.push_str(", ");
            }
            buf.push_str("SUBSTRING_INDEX(SUBSTRING_INDEX(a.column_0, ',', ");
            buf.push_str(&(i + 1).to_string());
            buf.push_str("), ',', -1) AS ");
            push_ident(buf, &ob.col.name);
        }
        buf.push_str(" FROM (VALUES ROW(");
        buf.push_str(cursor_param);
        buf.push_str(")) as a) ");
    }

    fn ts_query(&self, buf: &mut String, col: &DbColumn, _version: u32, param: &str) {
        buf.push_str("MATCH (");
        push_ident(buf, &col.table);
        buf.push('.');
        push_ident(buf, &col.name);
        buf.push_str(") AGAINST (");
        buf.push_str(param);
        buf.push_str(" IN BOOLEAN MODE)");
    }
}
