//! Predicate emission.
//!
//! Expressions are emitted with an explicit token stack so arbitrarily deep
//! AND/OR trees never grow the call stack. Tokens are a tagged variant:
//! parens, operator keywords, or expression nodes.

use std::collections::HashMap;

use sqlshape_qcode::{Exp, ExpOp, ExpVal, Rel, ValKind};
use sqlshape_schema::{DbColumn, Dialect, TableInfo};

use crate::query::Ctx;
use crate::{push_literal, CompileError};

enum Token<'e> {
    Open,
    Close,
    Op(ExpOp),
    Node(&'e Exp),
}

impl<'a> Ctx<'a> {
    pub(crate) fn render_exp(
        &mut self,
        ti: &TableInfo,
        root: &Exp,
        skip_nested: bool,
    ) -> Result<(), CompileError> {
        let mut stack = vec![Token::Node(root)];

        while let Some(token) = stack.pop() {
            match token {
                Token::Open => self.buf.push('('),
                Token::Close => self.buf.push(')'),
                Token::Op(op) => match op {
                    ExpOp::And => self.buf.push_str(" AND "),
                    ExpOp::Or => self.buf.push_str(" OR "),
                    ExpOp::Not => self.buf.push_str("NOT "),
                    _ => {}
                },
                Token::Node(ex) => match ex.op {
                    ExpOp::False => self.buf.push_str("false"),
                    ExpOp::And | ExpOp::Or => {
                        stack.push(Token::Close);
                        for (i, child) in ex.children.iter().enumerate().rev() {
                            stack.push(Token::Node(child));
                            if i > 0 {
                                stack.push(Token::Op(ex.op));
                            }
                        }
                        stack.push(Token::Open);
                    }
                    ExpOp::Not => {
                        let child = ex
                            .children
                            .first()
                            .ok_or(CompileError::MalformedExp("NOT without an operand"))?;
                        stack.push(Token::Node(child));
                        stack.push(Token::Op(ExpOp::Not));
                    }
                    _ => {
                        if !skip_nested && !ex.rels.is_empty() {
                            self.render_nested_where(ex)?;
                        } else {
                            self.render_op(ti, ex)?;
                        }
                    }
                },
            }
        }
        Ok(())
    }

    /// One EXISTS subquery per relationship hop, nested; the original
    /// expression is re-emitted at the deepest hop with nesting suppressed.
    fn render_nested_where(&mut self, ex: &Exp) -> Result<(), CompileError> {
        let qc = self.qc;
        let empty_args = HashMap::new();

        for (i, rel) in ex.rels.iter().enumerate() {
            if i != 0 {
                self.buf.push_str(" AND ");
            }

            let left = rel_left_col(rel).ok_or(CompileError::MalformedExp(
                "relationship hop without a linking column",
            ))?;

            self.buf.push_str("EXISTS (SELECT 1 FROM ");
            self.buf.push_str(&left.table);
            self.render_join_tables(rel);
            self.buf.push_str(" WHERE ");
            self.render_rel(rel, None, &empty_args);

            if i == ex.rels.len() - 1 {
                let inner_ti = qc.schema.table_info(&left.table, "")?;
                self.buf.push_str(" AND (");
                self.render_exp(inner_ti, ex, true)?;
                self.buf.push(')');
            }
        }

        for _ in &ex.rels {
            self.buf.push(')');
        }
        Ok(())
    }

    /// The predicate linking a selection to its parent row. `pid` aliases
    /// the parent side; `None` leaves it unaliased (nested EXISTS scope).
    pub(crate) fn render_rel(
        &mut self,
        rel: &Rel,
        pid: Option<usize>,
        args: &HashMap<String, String>,
    ) {
        if matches!(rel, Rel::None | Rel::Remote(_)) {
            return;
        }

        self.buf.push_str("((");

        match rel {
            Rel::OneToOne(cols) | Rel::OneToMany(cols) => {
                match (cols.left.array, cols.right.array) {
                    (false, true) => {
                        self.col_with_table(&cols.left.table, &cols.left.name);
                        self.buf.push_str(") = any (");
                        self.col_with_table_id(&cols.right.table, pid, &cols.right.name);
                    }
                    (true, false) => {
                        self.col_with_table_id(&cols.right.table, pid, &cols.right.name);
                        self.buf.push_str(") = any (");
                        self.col_with_table(&cols.left.table, &cols.left.name);
                    }
                    _ => {
                        self.col_with_table(&cols.left.table, &cols.left.name);
                        self.buf.push_str(") = (");
                        self.col_with_table_id(&cols.right.table, pid, &cols.right.name);
                    }
                }
            }

            Rel::OneToManyThrough(through) => {
                // the junction was joined in FROM; link its far column
                match (through.right.array, through.col_right.array) {
                    (false, true) => {
                        self.col_with_table(&through.right.table, &through.right.name);
                        self.buf.push_str(") = any (");
                        self.col_with_table(&through.col_right.table, &through.col_right.name);
                    }
                    (true, false) => {
                        self.col_with_table(&through.col_right.table, &through.col_right.name);
                        self.buf.push_str(") = any (");
                        self.col_with_table(&through.right.table, &through.right.name);
                    }
                    _ => {
                        self.col_with_table(&through.col_right.table, &through.col_right.name);
                        self.buf.push_str(") = (");
                        self.col_with_table(&through.right.table, &through.right.name);
                    }
                }
            }

            Rel::Embedded(cols) => {
                self.col_with_table(&cols.left.table, &cols.left.name);
                self.buf.push_str(") = (");
                self.col_with_table_id(&cols.left.table, pid, &cols.left.name);
            }

            Rel::Recursive(rel) => {
                let find = args.get("find").map(String::as_str).unwrap_or("children");
                match find {
                    "parents" | "parent" => {
                        // rows the found set points at
                        match (rel.right.array, rel.left.array) {
                            (false, true) => {
                                self.col_with_table(&rel.right.table, &rel.right.name);
                                self.buf.push_str(") = any (");
                                self.col_with_table(&rel.vtable, &rel.left.name);
                            }
                            (true, false) => {
                                self.col_with_table(&rel.vtable, &rel.left.name);
                                self.buf.push_str(") = any (");
                                self.col_with_table(&rel.right.table, &rel.right.name);
                            }
                            _ => {
                                self.col_with_table(&rel.right.table, &rel.right.name);
                                self.buf.push_str(") = (");
                                self.col_with_table(&rel.vtable, &rel.left.name);
                            }
                        }
                    }
                    _ => {
                        // rows pointing at the found set
                        match (rel.left.array, rel.right.array) {
                            (false, true) => {
                                self.col_with_table(&rel.left.table, &rel.left.name);
                                self.buf.push_str(") = any (");
                                self.col_with_table(&rel.vtable, &rel.right.name);
                            }
                            (true, false) => {
                                self.col_with_table(&rel.vtable, &rel.right.name);
                                self.buf.push_str(") = any (");
                                self.col_with_table(&rel.left.table, &rel.left.name);
                            }
                            _ => {
                                self.col_with_table(&rel.left.table, &rel.left.name);
                                self.buf.push_str(") = (");
                                self.col_with_table(&rel.vtable, &rel.right.name);
                            }
                        }
                    }
                }
            }

            Rel::None | Rel::Remote(_) => {}
        }

        self.buf.push_str("))");
    }

    fn render_op(&mut self, ti: &TableInfo, ex: &Exp) -> Result<(), CompileError> {
        if ex.op == ExpOp::Nop {
            return Ok(());
        }

        if let Some(col) = &ex.col {
            self.buf.push_str("((");
            if matches!(ex.val, ExpVal::Ref) && ex.op == ExpOp::IsNull {
                let table = ex.table.as_deref().unwrap_or(ti.name.as_str());
                self.col_with_table(table, &col.name);
            } else {
                self.col_with_table(&ti.name, &col.name);
            }
            self.buf.push_str(") ");
        }

        match ex.op {
            ExpOp::Equals => self.buf.push_str("="),
            ExpOp::NotEquals => self.buf.push_str("!="),
            ExpOp::NotDistinct => self.buf.push_str("IS NOT DISTINCT FROM"),
            ExpOp::Distinct => self.buf.push_str("IS DISTINCT FROM"),
            ExpOp::GreaterOrEquals => self.buf.push_str(">="),
            ExpOp::LesserOrEquals => self.buf.push_str("<="),
            ExpOp::GreaterThan => self.buf.push_str(">"),
            ExpOp::LesserThan => self.buf.push_str("<"),
            ExpOp::In => self.buf.push_str("= ANY"),
            ExpOp::NotIn => self.buf.push_str("!= ALL"),
            ExpOp::Like => self.buf.push_str("LIKE"),
            ExpOp::NotLike => self.buf.push_str("NOT LIKE"),
            ExpOp::ILike => self.buf.push_str("ILIKE"),
            ExpOp::NotILike => self.buf.push_str("NOT ILIKE"),
            ExpOp::Similar => self.buf.push_str("SIMILAR TO"),
            ExpOp::NotSimilar => self.buf.push_str("NOT SIMILAR TO"),
            ExpOp::Regex => self.buf.push_str("~"),
            ExpOp::NotRegex => self.buf.push_str("!~"),
            ExpOp::IRegex => self.buf.push_str("~*"),
            ExpOp::NotIRegex => self.buf.push_str("!~*"),
            ExpOp::Contains => self.buf.push_str("@>"),
            ExpOp::ContainedIn => self.buf.push_str("<@"),
            ExpOp::HasKey => self.buf.push_str("?"),
            ExpOp::HasKeyAny => self.buf.push_str("?|"),
            ExpOp::HasKeyAll => self.buf.push_str("?&"),

            ExpOp::EqualsTrue | ExpOp::NotEqualsTrue => {
                let name = val_name(ex)?;
                self.buf.push('(');
                self.sql.row_values(self.buf);
                if ex.op == ExpOp::EqualsTrue {
                    self.buf.push_str(" = ");
                } else {
                    self.buf.push_str(" != ");
                }
                self.render_param(name, "boolean", false);
                self.sql.cast(self.buf, "boolean");
                self.buf.push(')');
                return Ok(());
            }

            ExpOp::IsNull => {
                let truthy = matches!(&ex.val, ExpVal::Lit(v) if v.eq_ignore_ascii_case("true"));
                if truthy {
                    self.buf.push_str("IS NULL)");
                } else {
                    self.buf.push_str("IS NOT NULL)");
                }
                return Ok(());
            }

            ExpOp::TsQuery => {
                let tsv = ti
                    .tsv_col()
                    .ok_or_else(|| CompileError::MissingTsv {
                        table: ti.name.clone(),
                    })?
                    .clone();
                let name = val_name(ex)?;
                let idx = self.md.register(name, "text", false);
                let mut marker = String::new();
                self.sql.param_marker(&mut marker, idx);
                let version = self.qc.schema.version();
                self.sql.ts_query(self.buf, &tsv, version, &marker);
                return Ok(());
            }

            ExpOp::Nop | ExpOp::And | ExpOp::Or | ExpOp::Not | ExpOp::False => {
                return Err(CompileError::MalformedExp("connective used as a scalar operator"))
            }
        }

        match &ex.val {
            ExpVal::List(items, kind) => self.render_list(items, *kind),
            _ => self.render_val(ex),
        }

        self.buf.push(')');
        Ok(())
    }

    fn render_list(&mut self, items: &[String], kind: ValKind) {
        self.buf.push_str(" (ARRAY[");
        for (i, item) in items.iter().enumerate() {
            if i != 0 {
                self.buf.push_str(", ");
            }
            match kind {
                ValKind::Bool | ValKind::Num => self.buf.push_str(item),
                ValKind::Str => push_literal(self.buf, item),
            }
        }
        self.buf.push_str("])");
    }

    fn render_val(&mut self, ex: &Exp) {
        self.buf.push(' ');
        let col_type = ex.col.as_ref().map(|c| c.sql_type.clone());

        match &ex.val {
            ExpVal::Var(name) => match self.vars.get(name).cloned() {
                Some(v) if v.starts_with("sql:") => {
                    self.buf.push('(');
                    self.render_var(&v[4..]);
                    self.buf.push(')');
                    if ex.op == ExpOp::In || ex.op == ExpOp::NotIn {
                        return;
                    }
                }
                Some(v) => push_literal(self.buf, &v),
                None if ex.op == ExpOp::In || ex.op == ExpOp::NotIn => {
                    // unbox a JSON array parameter into a typed SQL array
                    let elem = col_type.as_deref().unwrap_or("text");
                    self.buf.push_str("(ARRAY(SELECT json_array_elements_text(");
                    self.render_param(name, elem, true);
                    self.buf.push_str("))");
                    if self.sql.kind() == Dialect::Postgres {
                        self.buf.push_str(" :: ");
                        self.buf.push_str(elem);
                        self.buf.push_str("[]");
                    }
                    self.buf.push(')');
                    return;
                }
                None => {
                    let sql_type = col_type.as_deref().unwrap_or("text");
                    self.render_param(name, sql_type, false);
                }
            },
            ExpVal::Ref => {
                let table = ex.table.as_deref().unwrap_or_default();
                if let Some(col) = &ex.col {
                    self.col_with_table(table, &col.name);
                }
                // column references carry their own type
                return;
            }
            ExpVal::Lit(v) => push_literal(self.buf, v),
            ExpVal::None | ExpVal::List(..) => {}
        }

        if let Some(sql_type) = &col_type {
            self.sql.cast(self.buf, sql_type);
        }
    }

    /// Inline a trusted SQL fragment, turning embedded `$name` references
    /// into bind parameters.
    fn render_var(&mut self, fragment: &str) {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b'$' {
                self.buf.push_str(&fragment[start..i]);
                let mut j = i + 1;
                while j < bytes.len()
                    && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_')
                {
                    j += 1;
                }
                if j > i + 1 {
                    let name = fragment[i + 1..j].to_string();
                    self.render_param(&name, "text", false);
                } else {
                    self.buf.push('$');
                }
                start = j;
                i = j;
            } else {
                i += 1;
            }
        }
        self.buf.push_str(&fragment[start..]);
    }
}

fn rel_left_col(rel: &Rel) -> Option<&DbColumn> {
    match rel {
        Rel::None => None,
        Rel::OneToOne(cols) | Rel::OneToMany(cols) | Rel::Embedded(cols) => Some(&cols.left),
        Rel::OneToManyThrough(through) => Some(&through.left),
        Rel::Recursive(rel) => Some(&rel.left),
        Rel::Remote(rel) => Some(&rel.col),
    }
}

fn val_name(ex: &Exp) -> Result<&str, CompileError> {
    match &ex.val {
        ExpVal::Var(name) | ExpVal::Lit(name) => Ok(name),
        _ => Err(CompileError::MalformedExp("operator requires a named value")),
    }
}
