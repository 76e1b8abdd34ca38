use crate::*;

use std::sync::Arc;

fn users_ti() -> TableInfo {
    TableInfo::new(
        "users",
        vec![
            DbColumn::new("users", "id", "bigint").primary(),
            DbColumn::new("users", "email", "text"),
        ],
    )
}

#[test]
fn push_links_roots_and_children() {
    let schema = Arc::new(DbSchema::new(Dialect::Postgres, 110000));
    let mut qc = QCode::new(QType::Query, schema);

    qc.push(Select::new(0, "users", users_ti()).col("id"));
    qc.push(
        Select::new(1, "posts", users_ti()).rel(
            Rel::OneToMany(RelCols::default()),
            0,
        ),
    );
    qc.push(Select::new(2, "products", users_ti()));

    assert_eq!(qc.roots, [0, 2]);
    assert_eq!(qc.selects[0].children, [1]);
    assert!(qc.selects[1].children.is_empty());
}

#[test]
fn builders_fill_the_common_fields() {
    let sel = Select::new(0, "users", users_ti())
        .col("id")
        .col("email")
        .where_(Exp::op_col_lit(
            ExpOp::Equals,
            DbColumn::new("users", "id", "bigint"),
            "1",
        ))
        .order(DbColumn::new("users", "id", "bigint"), Order::Desc)
        .limit(10)
        .singular();

    assert_eq!(sel.table, "users");
    assert_eq!(sel.cols.len(), 2);
    assert_eq!(sel.cols[1].field_name, "email");
    assert!(sel.singular);
    assert_eq!(sel.paging.limit, 10);
    assert_eq!(sel.order_by[0].order, Order::Desc);
}

#[test]
fn and_where_composes() {
    let lit = |v: &str| {
        Exp::op_col_lit(
            ExpOp::Equals,
            DbColumn::new("users", "email", "text"),
            v,
        )
    };
    let sel = Select::new(0, "users", users_ti())
        .where_(lit("a"))
        .and_where(lit("b"));

    let where_ = sel.where_.unwrap();
    assert_eq!(where_.op, ExpOp::And);
    assert_eq!(where_.children.len(), 2);
}

#[test]
fn qtype_displays_lowercase() {
    assert_eq!(QType::Query.to_string(), "query");
    assert_eq!(QType::Subscription.to_string(), "subscription");
    assert_eq!(QType::Mutation.to_string(), "mutation");
}
