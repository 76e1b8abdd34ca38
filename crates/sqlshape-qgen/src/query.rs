//! Selection-tree emission.
//!
//! The tree is walked iteratively: each renderable selection is visited
//! once to open its subquery block and once to close it, with children
//! emitted in between. Frames carry the visit explicitly instead of
//! encoding "close" into the selection id.

use std::collections::HashMap;

use sqlshape_qcode::{QCode, QType, Rel, Select, SelType, SkipRender};
use sqlshape_schema::Dialect;

use crate::dialect::Sql;
use crate::{push_ident, push_literal, CompileError, Metadata};

/// One step of the tree walk.
#[derive(Debug, Clone, Copy)]
enum Frame {
    Open(usize),
    Close(usize),
}

pub(crate) struct Ctx<'a> {
    pub buf: &'a mut String,
    pub md: &'a mut Metadata,
    pub qc: &'a QCode,
    pub vars: &'a HashMap<String, String>,
    pub sql: &'static dyn Sql,
}

impl<'a> Ctx<'a> {
    pub(crate) fn compile_query(&mut self) -> Result<(), CompileError> {
        if self.qc.qtype == QType::Subscription {
            self.md.set_poll();
        }

        let qc = self.qc;
        let mut stack: Vec<Frame> = Vec::new();

        self.buf.push_str("SELECT ");
        self.sql.json_object_open(self.buf);

        for (i, &id) in qc.roots.iter().enumerate() {
            if i != 0 {
                self.buf.push_str(", ");
            }
            let sel = &qc.selects[id];

            if sel.skip_render == SkipRender::UserNeeded {
                push_literal(self.buf, &sel.field_name);
                self.buf.push_str(", NULL");

                if sel.paging.cursor {
                    self.buf.push_str(", ");
                    push_literal(self.buf, &format!("{}_cursor", sel.field_name));
                    self.buf.push_str(", NULL");
                }
            } else {
                push_literal(self.buf, &sel.field_name);
                self.buf.push_str(", __sj_");
                self.buf.push_str(&sel.id.to_string());
                self.buf.push_str(".json");

                // the root's cursor rides along as a sibling key
                if sel.paging.cursor {
                    self.buf.push_str(", ");
                    push_literal(self.buf, &format!("{}_cursor", sel.field_name));
                    self.buf.push_str(", __sj_");
                    self.buf.push_str(&sel.id.to_string());
                    self.buf.push_str(".__cursor");
                }

                stack.push(Frame::Close(sel.id));
                stack.push(Frame::Open(sel.id));
            }
        }

        // The anchor guarantees one outer row even when every root yields
        // nothing, so the statement always returns a JSON object.
        self.buf.push_str(") AS __root FROM ");
        self.sql.row_values(self.buf);
        self.buf.push_str(" AS __root_x");

        self.render_query(stack)
    }

    fn render_query(&mut self, mut stack: Vec<Frame>) -> Result<(), CompileError> {
        let qc = self.qc;

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Open(id) => {
                    let sel = &qc.selects[id];

                    if sel.sel_type != SelType::Union {
                        self.render_lateral_join();
                        if let Rel::Recursive(rel) = &sel.rel {
                            self.render_recursive_cte(sel, &rel.vtable)?;
                        }
                        self.render_plural_select(sel);
                        self.render_select(sel)?;
                    }

                    // reversed so children emit in declaration order
                    for &cid in sel.children.iter().rev() {
                        let child = &qc.selects[cid];
                        if child.skip_render != SkipRender::None {
                            continue;
                        }
                        stack.push(Frame::Close(cid));
                        stack.push(Frame::Open(cid));
                    }
                }
                Frame::Close(id) => {
                    let sel = &qc.selects[id];
                    if sel.sel_type != SelType::Union {
                        self.render_select_close(sel);
                        self.render_lateral_join_close(sel);
                    }
                }
            }
        }
        Ok(())
    }

    fn render_lateral_join(&mut self) {
        self.buf.push_str(" LEFT OUTER JOIN LATERAL (");
    }

    fn render_lateral_join_close(&mut self, sel: &Select) {
        self.buf.push(')');
        self.alias_with_id("__sj", sel.id);
        self.buf.push_str(" ON true");
    }

    fn render_plural_select(&mut self, sel: &Select) {
        if sel.singular {
            return;
        }
        self.buf.push_str("SELECT ");
        self.sql.json_agg_open(self.buf);
        self.buf.push_str("__sj_");
        self.buf.push_str(&sel.id.to_string());
        self.buf.push_str(".json), '[]') as json");

        // cursor columns surface here, at aggregation scope
        if sel.paging.cursor {
            self.buf.push_str(", CONCAT_WS(','");
            for i in 0..sel.order_by.len() {
                self.buf.push_str(", max(__cur_");
                self.buf.push_str(&i.to_string());
                self.buf.push(')');
            }
            self.buf.push_str(") as __cursor");
        }

        self.buf.push_str(" FROM (");
    }

    fn render_select(&mut self, sel: &Select) -> Result<(), CompileError> {
        match self.sql.kind() {
            Dialect::Mysql => {
                self.buf.push_str("SELECT json_object(");
                self.render_json_fields(sel)?;
                self.buf.push_str(") ");
            }
            Dialect::Postgres => {
                self.buf.push_str("SELECT to_jsonb(__sr_");
                self.buf.push_str(&sel.id.to_string());
                self.buf.push_str(".*) ");

                // cursor values are subtracted from the row object; they
                // only exist to feed the aggregation layer above
                if sel.paging.cursor {
                    for i in 0..sel.order_by.len() {
                        self.buf.push_str("- '__cur_");
                        self.buf.push_str(&i.to_string());
                        self.buf.push_str("' ");
                    }
                }
            }
        }
        self.buf.push_str("AS json ");

        if sel.paging.cursor {
            for i in 0..sel.order_by.len() {
                self.buf.push_str(", __cur_");
                self.buf.push_str(&i.to_string());
                self.buf.push(' ');
            }
        }

        self.buf.push_str("FROM (SELECT ");
        self.render_columns(sel)?;

        if sel.paging.cursor {
            for (i, ob) in sel.order_by.iter().enumerate() {
                self.buf.push_str(", LAST_VALUE(");
                self.col_with_table_id(&sel.table, Some(sel.id), &ob.col.name);
                self.buf.push_str(") OVER() AS __cur_");
                self.buf.push_str(&i.to_string());
            }
        }

        self.buf.push_str(" FROM (");
        self.render_base_select(sel)?;
        self.buf.push(')');
        self.alias_with_id(&sel.table, sel.id);
        Ok(())
    }

    fn render_select_close(&mut self, sel: &Select) {
        self.buf.push(')');
        self.alias_with_id("__sr", sel.id);

        if !sel.singular {
            self.buf.push(')');
            self.alias_with_id("__sj", sel.id);
        }
    }

    /// Projection of the row-shaping select: own columns, then one column
    /// per child selection.
    fn render_columns(&mut self, sel: &Select) -> Result<(), CompileError> {
        let mut i = 0;
        for col in &sel.cols {
            if i != 0 {
                self.buf.push_str(", ");
            }
            // aggregate columns were aliased in the base select
            let name = if col.func.is_some() {
                &col.field_name
            } else {
                &col.col.name
            };
            self.col_with_table_id(&sel.table, Some(sel.id), name);
            self.alias(&col.field_name);
            i += 1;
        }
        self.render_join_columns(sel, i)
    }

    fn render_join_columns(&mut self, sel: &Select, mut i: usize) -> Result<(), CompileError> {
        let qc = self.qc;
        for &cid in &sel.children {
            let child = &qc.selects[cid];
            if i != 0 {
                self.buf.push_str(", ");
            }
            i += 1;

            match child.skip_render {
                SkipRender::UserNeeded => {
                    self.buf.push_str("NULL");
                    self.alias(&child.field_name);
                }
                SkipRender::Remote => {
                    let rel = match &child.rel {
                        Rel::Remote(rel) => rel,
                        _ => {
                            return Err(CompileError::MissingRel {
                                field: child.field_name.clone(),
                            })
                        }
                    };
                    self.col_with_table_id(&sel.table, Some(sel.id), &rel.col.name);
                    self.alias(&rel.id_field);
                }
                SkipRender::None if child.sel_type == SelType::Union => {
                    self.buf.push_str("coalesce(");
                    for (m, &mid) in child.children.iter().enumerate() {
                        if m != 0 {
                            self.buf.push_str(", ");
                        }
                        self.buf.push_str("\"__sj_");
                        self.buf.push_str(&mid.to_string());
                        self.buf.push_str("\".\"json\"");
                    }
                    self.buf.push(')');
                    self.alias(&child.field_name);
                }
                SkipRender::None => {
                    self.buf.push_str("\"__sj_");
                    self.buf.push_str(&child.id.to_string());
                    self.buf.push_str("\".\"json\"");
                    self.alias(&child.field_name);

                    if child.paging.cursor {
                        self.buf.push_str(", \"__sj_");
                        self.buf.push_str(&child.id.to_string());
                        self.buf.push_str("\".\"__cursor\"");
                        self.alias(&format!("{}_cursor", child.field_name));
                    }
                }
            }
        }
        Ok(())
    }

    /// MySQL row shaping: explicit key/value pairs over the `__sr_` alias,
    /// which also keeps the `__cur_` columns out of the object.
    fn render_json_fields(&mut self, sel: &Select) -> Result<(), CompileError> {
        let qc = self.qc;
        let sr = format!("__sr_{}", sel.id);
        let mut i = 0;

        for col in &sel.cols {
            if i != 0 {
                self.buf.push_str(", ");
            }
            push_literal(self.buf, &col.field_name);
            self.buf.push_str(", ");
            self.col_with_table(&sr, &col.field_name);
            i += 1;
        }

        for &cid in &sel.children {
            let child = &qc.selects[cid];
            if i != 0 {
                self.buf.push_str(", ");
            }
            i += 1;

            match child.skip_render {
                SkipRender::UserNeeded => {
                    push_literal(self.buf, &child.field_name);
                    self.buf.push_str(", NULL");
                }
                SkipRender::Remote => {
                    let rel = match &child.rel {
                        Rel::Remote(rel) => rel,
                        _ => {
                            return Err(CompileError::MissingRel {
                                field: child.field_name.clone(),
                            })
                        }
                    };
                    push_literal(self.buf, &rel.id_field);
                    self.buf.push_str(", ");
                    self.col_with_table(&sr, &rel.id_field);
                }
                SkipRender::None => {
                    push_literal(self.buf, &child.field_name);
                    self.buf.push_str(", ");
                    self.col_with_table(&sr, &child.field_name);
                }
            }
        }
        Ok(())
    }

    fn render_base_select(&mut self, sel: &Select) -> Result<(), CompileError> {
        self.render_cursor_cte(sel);
        self.buf.push_str("SELECT ");
        self.render_distinct_on(sel);
        self.render_base_columns(sel);
        self.render_from(sel);
        self.render_join_tables(&sel.rel);

        // the recursive step carries the relationship predicate itself
        if !matches!(sel.rel, Rel::Recursive(_)) {
            self.render_where(sel)?;
        }

        self.render_group_by(sel);
        self.render_order_by(sel);
        self.render_limit(sel);
        Ok(())
    }

    fn render_base_columns(&mut self, sel: &Select) {
        for (i, col) in sel.cols.iter().enumerate() {
            if i != 0 {
                self.buf.push_str(", ");
            }
            match &col.func {
                Some(func) => {
                    self.buf.push_str(func);
                    self.buf.push('(');
                    self.col_with_table(&sel.table, &col.col.name);
                    self.buf.push(')');
                    self.alias(&col.field_name);
                }
                None => self.col_with_table(&sel.table, &col.col.name),
            }
        }
    }

    fn render_from(&mut self, sel: &Select) {
        self.buf.push_str(" FROM ");

        match &sel.rel {
            Rel::Embedded(cols) => {
                // expose the parent's JSON column as a typed recordset
                self.buf.push('"');
                self.buf.push_str(&cols.left.table);
                self.buf.push_str("\", ");
                self.buf.push_str(sel.ti.json_type.as_str());
                self.buf.push_str("_to_recordset(");
                self.col_with_table(&cols.left.table, &cols.right.name);
                self.buf.push_str(") AS ");
                push_ident(self.buf, &sel.table);
                self.buf.push('(');
                for (i, col) in sel.ti.columns.iter().enumerate() {
                    if i != 0 {
                        self.buf.push_str(", ");
                    }
                    self.buf.push_str(&col.name);
                    self.buf.push(' ');
                    self.buf.push_str(&col.sql_type);
                }
                self.buf.push(')');
            }
            Rel::Recursive(rel) => {
                // skip the seed row, it belongs to the parent
                self.buf.push_str("(SELECT * FROM ");
                push_ident(self.buf, &rel.vtable);
                self.buf.push_str(" OFFSET 1) ");
                push_ident(self.buf, &sel.table);
            }
            _ => push_ident(self.buf, &sel.table),
        }

        if sel.paging.cursor {
            self.buf.push_str(", __cur");
        }
    }

    pub(crate) fn render_join_tables(&mut self, rel: &Rel) {
        if let Rel::OneToManyThrough(through) = rel {
            self.buf.push_str(" LEFT OUTER JOIN \"");
            self.buf.push_str(&through.col_left.table);
            self.buf.push_str("\" ON ((");
            match (through.left.array, through.col_left.array) {
                (false, true) => {
                    self.col_with_table(&through.left.table, &through.left.name);
                    self.buf.push_str(") = any (");
                    self.col_with_table(&through.col_left.table, &through.col_left.name);
                }
                (true, false) => {
                    self.col_with_table(&through.col_left.table, &through.col_left.name);
                    self.buf.push_str(") = any (");
                    self.col_with_table(&through.left.table, &through.left.name);
                }
                _ => {
                    self.col_with_table(&through.col_left.table, &through.col_left.name);
                    self.buf.push_str(") = (");
                    self.col_with_table(&through.left.table, &through.left.name);
                }
            }
            self.buf.push_str("))");
        }
    }

    fn render_cursor_cte(&mut self, sel: &Select) {
        if !sel.paging.cursor {
            return;
        }
        let idx = self.md.register("cursor", "text", false);
        let mut marker = String::new();
        self.sql.param_marker(&mut marker, idx);
        self.sql
            .cursor_decode_cte(self.buf, &sel.order_by, &marker);
    }

    fn render_recursive_cte(&mut self, sel: &Select, vtable: &str) -> Result<(), CompileError> {
        self.buf.push_str("WITH RECURSIVE ");
        push_ident(self.buf, vtable);
        self.buf.push_str(" AS (");
        self.render_recursive_base_select(sel, vtable)?;
        self.buf.push_str(") ");
        Ok(())
    }

    fn render_recursive_base_select(
        &mut self,
        sel: &Select,
        vtable: &str,
    ) -> Result<(), CompileError> {
        let qc = self.qc;
        let pid = sel.parent_id.ok_or_else(|| CompileError::MissingParent {
            field: sel.field_name.clone(),
        })?;
        let psel = &qc.selects[pid];
        let primary = sel
            .ti
            .primary_col()
            .ok_or_else(|| CompileError::MissingPrimary {
                table: sel.table.clone(),
            })?
            .clone();

        // seed: the parent's own row
        self.buf.push_str("(SELECT ");
        self.render_base_columns(sel);
        self.render_from(psel);
        self.buf.push_str(" WHERE (");
        self.col_with_table(&sel.table, &primary.name);
        self.buf.push_str(") = (");
        self.col_with_table_id(&psel.table, Some(psel.id), &primary.name);
        self.buf.push_str(") LIMIT 1) UNION ALL ");

        // step: rows related to anything found so far
        self.buf.push_str("SELECT ");
        self.render_base_columns(sel);
        self.render_from(psel);
        self.buf.push_str(", ");
        push_ident(self.buf, vtable);
        self.buf.push_str(" WHERE ");
        self.render_rel(&sel.rel, None, &sel.args);
        Ok(())
    }

    fn render_where(&mut self, sel: &Select) -> Result<(), CompileError> {
        if sel.rel.is_none() && sel.where_.is_none() {
            return Ok(());
        }

        self.buf.push_str(" WHERE (");

        let pid = if sel.sel_type == SelType::Member {
            sel.uparent_id
        } else {
            sel.parent_id
        };
        self.render_rel(&sel.rel, pid, &sel.args);

        if let Some(exp) = &sel.where_ {
            if !sel.rel.is_none() {
                self.buf.push_str(" AND ");
            }
            let ti = &sel.ti;
            self.render_exp(ti, exp, false)?;
        }

        self.buf.push(')');
        Ok(())
    }

    fn render_group_by(&mut self, sel: &Select) {
        if !sel.group_cols {
            return;
        }
        self.buf.push_str(" GROUP BY ");
        let mut i = 0;
        for col in sel.cols.iter().filter(|c| c.func.is_none()) {
            if i != 0 {
                self.buf.push_str(", ");
            }
            self.col_with_table(&sel.table, &col.col.name);
            i += 1;
        }
    }

    fn render_order_by(&mut self, sel: &Select) {
        if sel.order_by.is_empty() {
            return;
        }
        self.buf.push_str(" ORDER BY ");
        for (i, ob) in sel.order_by.iter().enumerate() {
            if i != 0 {
                self.buf.push_str(", ");
            }
            self.col_with_table(&sel.table, &ob.col.name);
            self.buf.push_str(match ob.order {
                sqlshape_qcode::Order::Asc => " ASC",
                sqlshape_qcode::Order::Desc => " DESC",
                sqlshape_qcode::Order::AscNullsFirst => " ASC NULLS FIRST",
                sqlshape_qcode::Order::DescNullsFirst => " DESC NULLS FIRST",
                sqlshape_qcode::Order::AscNullsLast => " ASC NULLS LAST",
                sqlshape_qcode::Order::DescNullsLast => " DESC NULLS LAST",
            });
        }
    }

    fn render_distinct_on(&mut self, sel: &Select) {
        if sel.distinct_on.is_empty() {
            return;
        }
        self.buf.push_str("DISTINCT ON (");
        for (i, col) in sel.distinct_on.iter().enumerate() {
            if i != 0 {
                self.buf.push_str(", ");
            }
            self.col_with_table(&sel.table, &col.name);
        }
        self.buf.push_str(") ");
    }

    fn render_limit(&mut self, sel: &Select) {
        if sel.paging.no_limit {
            // no clause at all
        } else if sel.singular {
            self.buf.push_str(" LIMIT 1");
        } else if let Some(var) = &sel.paging.limit_var {
            self.buf.push_str(" LIMIT LEAST(");
            self.render_param(var, "integer", false);
            self.buf.push_str(", ");
            self.buf.push_str(&sel.paging.limit.to_string());
            self.buf.push(')');
        } else {
            self.buf.push_str(" LIMIT ");
            self.buf.push_str(&sel.paging.limit.to_string());
        }

        if let Some(var) = &sel.paging.offset_var {
            self.buf.push_str(" OFFSET ");
            self.render_param(var, "integer", false);
        } else if sel.paging.offset != 0 {
            self.buf.push_str(" OFFSET ");
            self.buf.push_str(&sel.paging.offset.to_string());
        }
    }

    // ------------------------------------------------------------------
    // small emission helpers

    pub(crate) fn render_param(&mut self, name: &str, sql_type: &str, is_array: bool) {
        let idx = self.md.register(name, sql_type, is_array);
        self.sql.param_marker(self.buf, idx);
    }

    pub(crate) fn col_with_table(&mut self, table: &str, col: &str) {
        push_ident(self.buf, table);
        self.buf.push('.');
        push_ident(self.buf, col);
    }

    /// `"table_id"."col"`; without an id, plain `"table"."col"`.
    pub(crate) fn col_with_table_id(&mut self, table: &str, id: Option<usize>, col: &str) {
        match id {
            Some(id) => push_ident(self.buf, &format!("{table}_{id}")),
            None => push_ident(self.buf, table),
        }
        self.buf.push('.');
        push_ident(self.buf, col);
    }

    fn alias(&mut self, name: &str) {
        self.buf.push_str(" AS ");
        push_ident(self.buf, name);
    }

    fn alias_with_id(&mut self, name: &str, id: usize) {
        self.buf.push_str(" AS ");
        push_ident(self.buf, &format!("{name}_{id}"));
    }
}
