use crate::*;

use std::sync::Arc;

use sqlshape_qcode::{
    apply_rules, AccessConfig, AccessControl, DbColumn, DbSchema, Dialect, Exp, ExpOp, Filter,
    Order, QCode, QType, QueryConfig, RecursiveRel, Rel, RelCols, RemoteRel, RoleConfig, Select,
    SelectColumn, SelType, SkipRender, TableInfo, ThroughRel,
};

fn test_schema(dialect: Dialect) -> Arc<DbSchema> {
    test_schema_versioned(dialect, 110000)
}

fn test_schema_versioned(dialect: Dialect, version: u32) -> Arc<DbSchema> {
    let mut schema = DbSchema::new(dialect, version);
    schema.add_table(TableInfo::new(
        "users",
        vec![
            DbColumn::new("users", "id", "bigint").primary(),
            DbColumn::new("users", "email", "text"),
            DbColumn::new("users", "deleted_at", "timestamptz"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "posts",
        vec![
            DbColumn::new("posts", "id", "bigint").primary(),
            DbColumn::new("posts", "user_id", "bigint"),
            DbColumn::new("posts", "title", "text"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "tags",
        vec![
            DbColumn::new("tags", "id", "bigint").primary(),
            DbColumn::new("tags", "name", "text"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "user_tags",
        vec![
            DbColumn::new("user_tags", "user_id", "bigint"),
            DbColumn::new("user_tags", "tag_id", "bigint"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "comments",
        vec![
            DbColumn::new("comments", "id", "bigint").primary(),
            DbColumn::new("comments", "reply_to_id", "bigint"),
            DbColumn::new("comments", "body", "text"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "articles",
        vec![
            DbColumn::new("articles", "id", "bigint").primary(),
            DbColumn::new("articles", "title", "text"),
            DbColumn::new("articles", "tsv", "tsvector").full_text(),
        ],
    ));
    schema.add_table(TableInfo::new(
        "products",
        vec![
            DbColumn::new("products", "id", "bigint").primary(),
            DbColumn::new("products", "name", "text"),
            DbColumn::new("products", "price", "numeric"),
            DbColumn::new("products", "specs", "jsonb"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "customers",
        vec![
            DbColumn::new("customers", "id", "bigint").primary(),
            DbColumn::new("customers", "email", "text"),
        ],
    ));
    schema.add_table(TableInfo::new(
        "purchases",
        vec![
            DbColumn::new("purchases", "customer_id", "bigint"),
            DbColumn::new("purchases", "product_id", "bigint"),
        ],
    ));
    Arc::new(schema)
}

fn ti(schema: &DbSchema, table: &str) -> TableInfo {
    schema.table_info(table, "").unwrap().clone()
}

fn col(schema: &DbSchema, table: &str, name: &str) -> DbColumn {
    ti(schema, table).get_column(name).unwrap().clone()
}

fn posts_rel(schema: &DbSchema) -> Rel {
    Rel::OneToMany(RelCols {
        left: col(schema, "posts", "user_id"),
        right: col(schema, "users", "id"),
    })
}

fn compile(qc: &QCode) -> (Metadata, String) {
    Compiler::new(Config::default()).compile(qc).unwrap()
}

fn compile_with_vars(vars: &[(&str, &str)], qc: &QCode) -> (Metadata, String) {
    let vars = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Compiler::new(Config { vars }).compile(qc).unwrap()
}

/// Parens must balance outside of string literals.
fn assert_balanced(sql: &str) {
    let mut depth: i64 = 0;
    let mut in_literal = false;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => {
                depth -= 1;
                assert!(depth >= 0, "unbalanced parens in: {sql}");
            }
            _ => {}
        }
    }
    assert_eq!(depth, 0, "unbalanced parens in: {sql}");
}

// ----------------------------------------------------------------------
// end-to-end scenarios

#[test]
fn single_plain_query() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .col("email")
            .limit(20),
    );

    let (md, sql) = compile(&qc);
    assert_eq!(
        sql,
        "SELECT jsonb_build_object('users', __sj_0.json) AS __root \
         FROM (VALUES(true)) AS __root_x \
         LEFT OUTER JOIN LATERAL (\
         SELECT coalesce(jsonb_agg(__sj_0.json), '[]') as json FROM (\
         SELECT to_jsonb(__sr_0.*) AS json \
         FROM (SELECT \"users_0\".\"id\" AS \"id\", \"users_0\".\"email\" AS \"email\" \
         FROM (SELECT \"users\".\"id\", \"users\".\"email\" FROM \"users\" LIMIT 20) AS \"users_0\"\
         ) AS \"__sr_0\") AS \"__sj_0\") AS \"__sj_0\" ON true"
    );
    assert!(md.params().is_empty());
    assert!(!md.poll());
    assert_balanced(&sql);
}

#[test]
fn single_plain_query_mysql() {
    let schema = test_schema(Dialect::Mysql);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .col("email")
            .limit(20),
    );

    let (md, sql) = compile(&qc);
    assert_eq!(
        sql,
        "SELECT json_object('users', __sj_0.json) AS __root \
         FROM (VALUES ROW(true)) AS __root_x \
         LEFT OUTER JOIN LATERAL (\
         SELECT coalesce(json_arrayagg(__sj_0.json), '[]') as json FROM (\
         SELECT json_object('id', \"__sr_0\".\"id\", 'email', \"__sr_0\".\"email\") AS json \
         FROM (SELECT \"users_0\".\"id\" AS \"id\", \"users_0\".\"email\" AS \"email\" \
         FROM (SELECT \"users\".\"id\", \"users\".\"email\" FROM \"users\" LIMIT 20) AS \"users_0\"\
         ) AS \"__sr_0\") AS \"__sj_0\") AS \"__sj_0\" ON true"
    );
    assert_eq!(md.dialect(), Dialect::Mysql);
    assert_balanced(&sql);
}

#[test]
fn nested_one_to_many_with_filter_and_variable_limit() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());

    let mut users = Select::new(0, "users", ti(&schema, "users")).col("id").limit(20);
    users.paging.limit_var = Some("lim".to_string());
    qc.push(users);

    qc.push(
        Select::new(1, "posts", ti(&schema, "posts"))
            .col("id")
            .col("title")
            .rel(posts_rel(&schema), 0)
            .where_(Exp::op_col_var(
                ExpOp::Like,
                col(&schema, "posts", "title"),
                "q",
            ))
            .limit(20),
    );

    let (md, sql) = compile(&qc);

    assert_eq!(sql.matches(" LEFT OUTER JOIN LATERAL (").count(), 2);
    assert!(sql.contains(" LIMIT LEAST($1, 20)"));
    assert!(sql.contains("\"__sj_1\".\"json\" AS \"posts\""));
    assert!(sql.contains(
        " WHERE (((\"posts\".\"user_id\") = (\"users_0\".\"id\")) \
         AND ((\"posts\".\"title\") LIKE $2 :: text))"
    ));

    let params = md.params();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].name, "lim");
    assert_eq!(params[0].sql_type, "integer");
    assert!(!params[0].is_array);
    assert_eq!(params[1].name, "q");
    assert_eq!(params[1].sql_type, "text");
    assert_eq!(md.param_index("lim"), Some(1));
    assert_eq!(md.param_index("q"), Some(2));
    assert_balanced(&sql);
}

#[test]
fn cursored_list() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());

    let mut users = Select::new(0, "users", ti(&schema, "users"))
        .col("id")
        .order(col(&schema, "users", "id"), Order::Asc)
        .where_(Exp::op_col_ref(
            ExpOp::GreaterThan,
            col(&schema, "users", "id"),
            "__cur",
        ))
        .limit(10);
    users.paging.cursor = true;
    qc.push(users);

    let (md, sql) = compile(&qc);

    assert!(sql.contains("'users', __sj_0.json, 'users_cursor', __sj_0.__cursor"));
    assert!(sql.contains(
        "WITH __cur AS (SELECT a[1] :: bigint as \"id\" FROM string_to_array($1, ',') as a) "
    ));
    assert!(sql.contains(", LAST_VALUE(\"users_0\".\"id\") OVER() AS __cur_0"));
    assert!(sql.contains(", CONCAT_WS(',', max(__cur_0)) as __cursor"));
    assert!(sql.contains("SELECT to_jsonb(__sr_0.*) - '__cur_0' AS json"));
    assert!(sql.contains(" FROM \"users\", __cur"));
    assert!(sql.contains(" WHERE (((\"users\".\"id\") > \"__cur\".\"id\"))"));
    assert!(sql.contains(" ORDER BY \"users\".\"id\" ASC"));

    let params = md.params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "cursor");
    assert_eq!(params[0].sql_type, "text");
    assert_balanced(&sql);
}

#[test]
fn cursored_list_mysql() {
    let schema = test_schema(Dialect::Mysql);
    let mut qc = QCode::new(QType::Query, schema.clone());

    let mut users = Select::new(0, "users", ti(&schema, "users"))
        .col("id")
        .order(col(&schema, "users", "id"), Order::Asc)
        .limit(10);
    users.paging.cursor = true;
    qc.push(users);

    let (md, sql) = compile(&qc);

    assert!(sql.contains(
        "WITH __cur AS (SELECT \
         SUBSTRING_INDEX(SUBSTRING_INDEX(a.column_0, ',', 1), ',', -1) AS \"id\" \
         FROM (VALUES ROW(?)) as a) "
    ));
    // cursor columns stay out of the row object
    assert!(sql.contains("json_object('id', \"__sr_0\".\"id\") AS json , __cur_0 "));
    assert_eq!(md.params().len(), 1);
    assert_balanced(&sql);
}

#[test]
fn in_clause_with_json_array_variable() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::op_col_var(
                ExpOp::In,
                col(&schema, "users", "id"),
                "ids",
            ))
            .limit(20),
    );

    let (md, sql) = compile(&qc);
    assert!(sql.contains(
        "((\"users\".\"id\") = ANY (ARRAY(SELECT json_array_elements_text($1)) :: bigint[]))"
    ));
    // no trailing second cast after the array unboxing
    assert!(!sql.contains("bigint[]) :: bigint"));

    let params = md.params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "ids");
    assert_eq!(params[0].sql_type, "bigint");
    assert!(params[0].is_array);
    assert_balanced(&sql);
}

#[test]
fn many_to_many_through_junction() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));
    qc.push(
        Select::new(1, "tags", ti(&schema, "tags"))
            .col("id")
            .col("name")
            .rel(
                Rel::OneToManyThrough(ThroughRel {
                    left: col(&schema, "users", "id"),
                    right: col(&schema, "tags", "id"),
                    col_left: col(&schema, "user_tags", "user_id"),
                    col_right: col(&schema, "user_tags", "tag_id"),
                }),
                0,
            )
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        " LEFT OUTER JOIN \"user_tags\" \
         ON ((\"user_tags\".\"user_id\") = (\"users\".\"id\"))"
    ));
    assert!(sql.contains(" WHERE (((\"user_tags\".\"tag_id\") = (\"tags\".\"id\")))"));
    assert_balanced(&sql);
}

#[test]
fn through_junction_with_array_side() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let mut junction_col = col(&schema, "user_tags", "user_id");
    junction_col.array = true;
    qc.push(
        Select::new(1, "tags", ti(&schema, "tags"))
            .col("id")
            .rel(
                Rel::OneToManyThrough(ThroughRel {
                    left: col(&schema, "users", "id"),
                    right: col(&schema, "tags", "id"),
                    col_left: junction_col,
                    col_right: col(&schema, "user_tags", "tag_id"),
                }),
                0,
            )
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        " ON ((\"users\".\"id\") = any (\"user_tags\".\"user_id\"))"
    ));
    assert_balanced(&sql);
}

#[test]
fn recursive_descendants() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "comment", ti(&schema, "comments"))
            .col("id")
            .col("body")
            .where_(Exp::op_col_lit(
                ExpOp::Equals,
                col(&schema, "comments", "id"),
                "1",
            ))
            .singular(),
    );
    qc.push(
        Select::new(1, "replies", ti(&schema, "comments"))
            .col("id")
            .rel(
                Rel::Recursive(RecursiveRel {
                    left: col(&schema, "comments", "reply_to_id"),
                    right: col(&schema, "comments", "id"),
                    vtable: "replies".to_string(),
                }),
                0,
            )
            .arg("find", "children")
            .limit(20),
    );

    let (_, sql) = compile(&qc);

    assert!(sql.contains(
        "WITH RECURSIVE \"replies\" AS (\
         (SELECT \"comments\".\"id\" FROM \"comments\" \
         WHERE (\"comments\".\"id\") = (\"comments_0\".\"id\") LIMIT 1) \
         UNION ALL \
         SELECT \"comments\".\"id\" FROM \"comments\", \"replies\" \
         WHERE ((\"comments\".\"reply_to_id\") = (\"replies\".\"id\"))) "
    ));
    assert!(sql.contains(" FROM (SELECT * FROM \"replies\" OFFSET 1) \"comments\""));
    // the recursive base select takes no user predicate
    assert!(sql.contains("OFFSET 1) \"comments\" LIMIT 20"));
    assert_balanced(&sql);
}

#[test]
fn recursive_ancestors() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "comment", ti(&schema, "comments")).col("id").singular());
    qc.push(
        Select::new(1, "ancestors", ti(&schema, "comments"))
            .col("id")
            .rel(
                Rel::Recursive(RecursiveRel {
                    left: col(&schema, "comments", "reply_to_id"),
                    right: col(&schema, "comments", "id"),
                    vtable: "ancestors".to_string(),
                }),
                0,
            )
            .arg("find", "parents")
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        "WHERE ((\"comments\".\"id\") = (\"ancestors\".\"reply_to_id\"))) "
    ));
    assert_balanced(&sql);
}

// ----------------------------------------------------------------------
// envelope and shaping properties

#[test]
fn multi_root_order_and_user_needed_roots() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let mut hidden = Select::new(1, "secrets", ti(&schema, "products")).col("id");
    hidden.skip_render = SkipRender::UserNeeded;
    hidden.paging.cursor = true;
    qc.push(hidden);

    qc.push(Select::new(2, "products", ti(&schema, "products")).col("id").limit(20));

    let (_, sql) = compile(&qc);

    let users_at = sql.find("'users', __sj_0.json").unwrap();
    let secrets_at = sql.find("'secrets', NULL, 'secrets_cursor', NULL").unwrap();
    let products_at = sql.find("'products', __sj_2.json").unwrap();
    assert!(users_at < secrets_at && secrets_at < products_at);

    // no subselect for the skipped root
    assert_eq!(sql.matches(" LEFT OUTER JOIN LATERAL (").count(), 2);
    assert!(!sql.contains("__sj_1"));
    assert_balanced(&sql);
}

#[test]
fn singular_suppresses_aggregation() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "user", ti(&schema, "users"))
            .col("id")
            .singular(),
    );

    let (_, sql) = compile(&qc);
    assert!(!sql.contains("jsonb_agg"));
    assert!(sql.contains(" LIMIT 1"));
    // only the lateral-join alias mentions __sj_0; no aggregation wrapper
    assert_eq!(sql.matches("AS \"__sj_0\"").count(), 1);
    assert_eq!(sql.matches("AS \"__sr_0\"").count(), 1);
    assert_balanced(&sql);
}

#[test]
fn parameter_order_is_deterministic() {
    let schema = test_schema(Dialect::Postgres);
    let build = || {
        let mut qc = QCode::new(QType::Query, schema.clone());
        let mut users = Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::and(vec![
                Exp::op_col_var(ExpOp::Equals, col(&schema, "users", "email"), "email"),
                Exp::op_col_var(ExpOp::GreaterThan, col(&schema, "users", "id"), "min_id"),
            ]))
            .limit(20);
        users.paging.offset_var = Some("off".to_string());
        qc.push(users);
        qc
    };

    let (md1, sql1) = compile(&build());
    let (md2, sql2) = compile(&build());
    assert_eq!(sql1, sql2);
    assert_eq!(md1.params(), md2.params());

    let params = md1.params();
    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["email", "min_id", "off"]);
    for (i, p) in params.iter().enumerate() {
        assert_eq!(md1.param_index(&p.name), Some(i + 1));
    }
}

#[test]
fn parameter_reuse_binds_once() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::or(vec![
                Exp::op_col_var(ExpOp::Equals, col(&schema, "users", "email"), "needle"),
                Exp::op_col_var(ExpOp::Like, col(&schema, "users", "email"), "needle"),
            ]))
            .limit(20),
    );

    let (md, sql) = compile(&qc);
    assert_eq!(sql.matches("$1").count(), 2);
    assert!(!sql.contains("$2"));
    assert_eq!(md.params().len(), 1);
}

#[test]
fn parameter_conflict_keeps_first_type() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::and(vec![
                Exp::op_col_var(ExpOp::Equals, col(&schema, "users", "id"), "v"),
                Exp::op_col_var(ExpOp::Equals, col(&schema, "users", "email"), "v"),
            ]))
            .limit(20),
    );

    let (md, _) = compile(&qc);
    let params = md.params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].sql_type, "bigint");
}

#[test]
fn dialects_differ_only_in_enumerated_fragments() {
    let build = |dialect| {
        let schema = test_schema(dialect);
        let mut qc = QCode::new(QType::Query, schema.clone());
        qc.push(
            Select::new(0, "users", ti(&schema, "users"))
                .col("id")
                .where_(Exp::op_col_var(
                    ExpOp::Equals,
                    col(&schema, "users", "email"),
                    "email",
                ))
                .limit(20),
        );
        compile(&qc).1
    };

    let pg = build(Dialect::Postgres);
    let my = build(Dialect::Mysql);

    assert!(pg.contains("jsonb_build_object(") && my.contains("json_object("));
    assert!(pg.contains("(VALUES(true))") && my.contains("(VALUES ROW(true))"));
    assert!(pg.contains("jsonb_agg(") && my.contains("json_arrayagg("));
    assert!(pg.contains("$1") && !my.contains("$1") && my.contains("?"));
    assert!(pg.contains(" :: text") && !my.contains(" :: "));
    assert_balanced(&pg);
    assert_balanced(&my);
}

#[test]
fn user_needed_child_projects_null() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let mut posts = Select::new(1, "posts", ti(&schema, "posts"))
        .col("id")
        .rel(posts_rel(&schema), 0);
    posts.skip_render = SkipRender::UserNeeded;
    qc.push(posts);

    let (_, sql) = compile(&qc);
    assert!(sql.contains("NULL AS \"posts\""));
    assert!(!sql.contains("__sj_1"));
    assert_balanced(&sql);
}

#[test]
fn remote_child_projects_placeholder_id_field() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let mut payments = Select::new(1, "payments", ti(&schema, "users"));
    payments.parent_id = Some(0);
    payments.rel = Rel::Remote(RemoteRel {
        col: col(&schema, "users", "id"),
        id_field: "__payments_id".to_string(),
    });
    payments.skip_render = SkipRender::Remote;
    qc.push(payments);

    let (_, sql) = compile(&qc);
    assert!(sql.contains("\"users_0\".\"id\" AS \"__payments_id\""));
    assert!(!sql.contains("__sj_1"));
    assert_balanced(&sql);
}

#[test]
fn union_members_render_themselves() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let mut subject = Select::new(1, "subject", ti(&schema, "posts"));
    subject.sel_type = SelType::Union;
    subject.parent_id = Some(0);
    qc.push(subject);

    let mut member_posts = Select::new(2, "posts", ti(&schema, "posts"))
        .col("id")
        .rel(posts_rel(&schema), 1)
        .limit(20);
    member_posts.sel_type = SelType::Member;
    member_posts.uparent_id = Some(0);
    qc.push(member_posts);

    let mut member_products = Select::new(3, "products", ti(&schema, "products"))
        .col("id")
        .rel(
            Rel::OneToMany(RelCols {
                left: col(&schema, "products", "id"),
                right: col(&schema, "users", "id"),
            }),
            1,
        )
        .limit(20);
    member_products.sel_type = SelType::Member;
    member_products.uparent_id = Some(0);
    qc.push(member_products);

    let (_, sql) = compile(&qc);

    // the union node itself has no wrappers; the parent coalesces members
    assert!(!sql.contains("__sj_1"));
    assert!(sql.contains("coalesce(\"__sj_2\".\"json\", \"__sj_3\".\"json\") AS \"subject\""));
    // members link to the union's parent row
    assert!(sql.contains("((\"posts\".\"user_id\") = (\"users_0\".\"id\"))"));
    assert!(sql.contains("((\"products\".\"id\") = (\"users_0\".\"id\"))"));
    assert_balanced(&sql);
}

#[test]
fn embedded_json_recordset() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "products", ti(&schema, "products")).col("id").limit(20));

    let specs_ti = TableInfo::new(
        "specs",
        vec![
            DbColumn::new("specs", "name", "text"),
            DbColumn::new("specs", "value", "text"),
        ],
    );
    let json_col = col(&schema, "products", "specs");
    qc.push(
        Select::new(1, "specs", specs_ti)
            .col("name")
            .col("value")
            .rel(
                Rel::Embedded(RelCols {
                    left: json_col.clone(),
                    right: json_col,
                }),
                0,
            )
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        " FROM \"products\", jsonb_to_recordset(\"products\".\"specs\") \
         AS \"specs\"(name text, value text)"
    ));
    assert!(sql.contains(" WHERE (((\"products\".\"specs\") = (\"products_0\".\"specs\")))"));
    assert_balanced(&sql);
}

// ----------------------------------------------------------------------
// operators and values

#[test]
fn nested_relation_predicate_uses_exists() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());

    let through = Rel::OneToManyThrough(ThroughRel {
        left: col(&schema, "customers", "id"),
        right: col(&schema, "products", "id"),
        col_left: col(&schema, "purchases", "customer_id"),
        col_right: col(&schema, "purchases", "product_id"),
    });
    qc.push(
        Select::new(0, "products", ti(&schema, "products"))
            .col("id")
            .where_(
                Exp::op_col_var(ExpOp::Equals, col(&schema, "customers", "email"), "email")
                    .through(vec![through]),
            )
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        " WHERE (EXISTS (SELECT 1 FROM customers \
         LEFT OUTER JOIN \"purchases\" \
         ON ((\"purchases\".\"customer_id\") = (\"customers\".\"id\")) \
         WHERE ((\"purchases\".\"product_id\") = (\"products\".\"id\")) \
         AND (((\"customers\".\"email\") = $1 :: text))))"
    ));
    assert_balanced(&sql);
}

#[test]
fn boolean_connectives_and_false() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::and(vec![
                Exp::or(vec![
                    Exp::op_col_lit(ExpOp::Equals, col(&schema, "users", "email"), "a"),
                    Exp::op_col_lit(ExpOp::Equals, col(&schema, "users", "email"), "b"),
                ]),
                Exp::not(Exp::new(ExpOp::False)),
            ]))
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        " WHERE (((((\"users\".\"email\") = 'a' :: text) \
         OR ((\"users\".\"email\") = 'b' :: text)) \
         AND NOT false))"
    ));
    assert_balanced(&sql);
}

#[test]
fn is_null_and_distinct_operators() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::and(vec![
                Exp::op_col_lit(ExpOp::IsNull, col(&schema, "users", "deleted_at"), "true"),
                Exp::op_col_var(ExpOp::NotDistinct, col(&schema, "users", "email"), "email"),
            ]))
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains("((\"users\".\"deleted_at\") IS NULL)"));
    assert!(sql.contains("((\"users\".\"email\") IS NOT DISTINCT FROM $1 :: text)"));

    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::op_col_lit(
                ExpOp::IsNull,
                col(&schema, "users", "deleted_at"),
                "false",
            ))
            .limit(20),
    );
    let (_, sql) = compile(&qc);
    assert!(sql.contains("((\"users\".\"deleted_at\") IS NOT NULL)"));
}

#[test]
fn equals_true_binds_boolean_param() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    let mut exp = Exp::new(ExpOp::EqualsTrue);
    exp.val = sqlshape_qcode::ExpVal::Var("is_admin".to_string());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(exp)
            .limit(20),
    );

    let (md, sql) = compile(&qc);
    assert!(sql.contains("((VALUES(true)) = $1 :: boolean)"));
    let params = md.params();
    assert_eq!(params[0].name, "is_admin");
    assert_eq!(params[0].sql_type, "boolean");
    assert_balanced(&sql);
}

#[test]
fn literal_list_membership() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::op_col_list(
                ExpOp::In,
                col(&schema, "users", "id"),
                vec!["1".to_string(), "2".to_string(), "3".to_string()],
                sqlshape_qcode::ValKind::Num,
            ))
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains("((\"users\".\"id\") = ANY (ARRAY[1, 2, 3]))"));

    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::op_col_list(
                ExpOp::NotIn,
                col(&schema, "users", "email"),
                vec!["a".to_string(), "b".to_string()],
                sqlshape_qcode::ValKind::Str,
            ))
            .limit(20),
    );
    let (_, sql) = compile(&qc);
    assert!(sql.contains("((\"users\".\"email\") != ALL (ARRAY['a', 'b']))"));
}

#[test]
fn full_text_switches_on_server_version() {
    let build = |version| {
        let schema = test_schema_versioned(Dialect::Postgres, version);
        let mut qc = QCode::new(QType::Query, schema.clone());
        qc.push(
            Select::new(0, "articles", ti(&schema, "articles"))
                .col("id")
                .where_(Exp::ts_query("search"))
                .limit(20),
        );
        compile(&qc)
    };

    let (md, sql) = build(110000);
    assert!(sql.contains("((\"articles\".\"tsv\") @@ websearch_to_tsquery($1))"));
    assert_eq!(md.params()[0].sql_type, "text");

    let (_, sql) = build(90600);
    assert!(sql.contains("((\"articles\".\"tsv\") @@ to_tsquery($1))"));
}

#[test]
fn full_text_mysql_uses_match_against() {
    let schema = test_schema(Dialect::Mysql);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "articles", ti(&schema, "articles"))
            .col("id")
            .where_(Exp::ts_query("search"))
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains("MATCH (\"articles\".\"tsv\") AGAINST (? IN BOOLEAN MODE)"));
}

#[test]
fn full_text_without_tsv_column_errors() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::ts_query("search"))
            .limit(20),
    );

    let err = Compiler::default().compile(&qc).unwrap_err();
    assert_eq!(
        err.to_string(),
        "full-text search requires a tsvector column on table 'users'"
    );
}

#[test]
fn trusted_sql_fragment_with_embedded_variable() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::op_col_var(
                ExpOp::Equals,
                col(&schema, "users", "id"),
                "account_id",
            ))
            .limit(20),
    );

    let (md, sql) = compile_with_vars(
        &[(
            "account_id",
            "sql:select account_id from sessions where token = $token",
        )],
        &qc,
    );
    assert!(sql.contains(
        "((\"users\".\"id\") = \
         (select account_id from sessions where token = $1) :: bigint)"
    ));
    assert_eq!(md.params()[0].name, "token");
    assert_eq!(md.params()[0].sql_type, "text");
    assert_balanced(&sql);
}

#[test]
fn known_variable_inlines_as_literal() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .where_(Exp::op_col_var(
                ExpOp::Equals,
                col(&schema, "users", "email"),
                "support_email",
            ))
            .limit(20),
    );

    let (md, sql) = compile_with_vars(&[("support_email", "help@example.com")], &qc);
    assert!(sql.contains("((\"users\".\"email\") = 'help@example.com' :: text)"));
    assert!(md.params().is_empty());
}

// ----------------------------------------------------------------------
// ordering, grouping, paging

#[test]
fn order_by_variants() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(
        Select::new(0, "users", ti(&schema, "users"))
            .col("id")
            .order(col(&schema, "users", "email"), Order::DescNullsFirst)
            .order(col(&schema, "users", "id"), Order::AscNullsLast)
            .limit(20),
    );

    let (_, sql) = compile(&qc);
    assert!(sql.contains(
        " ORDER BY \"users\".\"email\" DESC NULLS FIRST, \"users\".\"id\" ASC NULLS LAST"
    ));
    assert!(!sql.contains("NULLLS"));
}

#[test]
fn group_by_plain_columns_only() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    let mut sel = Select::new(0, "products", ti(&schema, "products"))
        .col("name")
        .column(SelectColumn::func(
            col(&schema, "products", "price"),
            "max",
            "max_price",
        ))
        .limit(20);
    sel.group_cols = true;
    qc.push(sel);

    let (_, sql) = compile(&qc);
    assert!(sql.contains("max(\"products\".\"price\") AS \"max_price\""));
    assert!(sql.contains(" GROUP BY \"products\".\"name\""));
    assert!(!sql.contains("GROUP BY \"products\".\"name\", \"products\".\"price\""));
    assert!(sql.contains("\"products_0\".\"max_price\" AS \"max_price\""));
    assert_balanced(&sql);
}

#[test]
fn distinct_on() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    let mut sel = Select::new(0, "users", ti(&schema, "users")).col("id").limit(20);
    sel.distinct_on.push(col(&schema, "users", "email"));
    qc.push(sel);

    let (_, sql) = compile(&qc);
    assert!(sql.contains("SELECT DISTINCT ON (\"users\".\"email\") \"users\".\"id\" FROM"));
}

#[test]
fn paging_offset_and_no_limit() {
    let schema = test_schema(Dialect::Postgres);

    let mut qc = QCode::new(QType::Query, schema.clone());
    let mut sel = Select::new(0, "users", ti(&schema, "users")).col("id").limit(20);
    sel.paging.offset = 40;
    qc.push(sel);
    let (_, sql) = compile(&qc);
    assert!(sql.contains(" LIMIT 20 OFFSET 40"));

    let mut qc = QCode::new(QType::Query, schema.clone());
    let mut sel = Select::new(0, "users", ti(&schema, "users")).col("id");
    sel.paging.offset_var = Some("off".to_string());
    sel.paging.no_limit = true;
    qc.push(sel);
    let (md, sql) = compile(&qc);
    assert!(!sql.contains("LIMIT"));
    assert!(sql.contains(" OFFSET $1"));
    assert_eq!(md.params()[0].name, "off");
}

// ----------------------------------------------------------------------
// access rules feeding the emitter

#[test]
fn forced_filter_composes_with_user_predicate() {
    let schema = test_schema(Dialect::Postgres);
    let mut ac = AccessControl::new(AccessConfig::default());
    ac.add_role(
        &schema,
        "user",
        "posts",
        RoleConfig {
            query: QueryConfig {
                filters: vec![Filter::eq_var("user_id", "user_id")],
                ..QueryConfig::default()
            },
            ..RoleConfig::default()
        },
    )
    .unwrap();

    let mut sel = Select::new(0, "posts", ti(&schema, "posts"))
        .col("id")
        .where_(Exp::op_col_var(
            ExpOp::Like,
            col(&schema, "posts", "title"),
            "q",
        ));
    let rules = ac.rules("user", "posts");
    apply_rules(&mut sel, &rules, true, ac.default_limit()).unwrap();

    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(sel);
    let (md, sql) = compile(&qc);

    assert!(sql.contains(
        " WHERE ((((\"posts\".\"user_id\") = $1 :: bigint) \
         AND ((\"posts\".\"title\") LIKE $2 :: text)))"
    ));
    assert_eq!(md.params()[0].name, "user_id");
    assert!(sql.contains(" LIMIT 20"));
    assert_balanced(&sql);
}

#[test]
fn blocked_root_still_compiles_envelope() {
    let schema = test_schema(Dialect::Postgres);
    let mut ac = AccessControl::new(AccessConfig::default());
    ac.add_role(
        &schema,
        "anon",
        "users",
        RoleConfig {
            query: QueryConfig {
                block: true,
                ..QueryConfig::default()
            },
            ..RoleConfig::default()
        },
    )
    .unwrap();

    let mut sel = Select::new(0, "users", ti(&schema, "users")).col("id");
    let rules = ac.rules("anon", "users");
    let err = apply_rules(&mut sel, &rules, false, ac.default_limit()).unwrap_err();
    assert_eq!(err.to_string(), "query blocked: users (anon)");

    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(sel);
    let (_, sql) = compile(&qc);
    assert_eq!(
        sql,
        "SELECT jsonb_build_object('users', NULL) AS __root \
         FROM (VALUES(true)) AS __root_x"
    );
}

// ----------------------------------------------------------------------
// entry points

#[test]
fn subscription_sets_poll() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Subscription, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let (md, _) = compile(&qc);
    assert!(md.poll());
}

#[test]
fn mutations_are_not_supported_here() {
    let schema = test_schema(Dialect::Postgres);
    let qc = QCode::new(QType::Mutation, schema);
    let err = Compiler::default().compile(&qc).unwrap_err();
    assert_eq!(err.to_string(), "mutation compilation is not supported");
}

#[test]
fn compile_into_reuses_caller_buffer() {
    let schema = test_schema(Dialect::Postgres);
    let mut qc = QCode::new(QType::Query, schema.clone());
    qc.push(Select::new(0, "users", ti(&schema, "users")).col("id").limit(20));

    let mut buf = String::new();
    let compiler = Compiler::default();
    compiler.compile_into(&mut buf, &qc).unwrap();
    let first = buf.len();
    assert!(first > 0);

    buf.clear();
    compiler.compile_into(&mut buf, &qc).unwrap();
    assert_eq!(buf.len(), first);
    assert!(!buf.ends_with(';'));
}

#[test]
fn quoting_rules() {
    assert_eq!(quote_ident("user"), "\"user\"");
    assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    assert_eq!(quote_literal("it's"), "'it''s'");
}
