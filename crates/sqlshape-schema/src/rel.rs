//! Relationship descriptors.
//!
//! Each kind carries exactly the payload its join shape needs, so the
//! emitter can match on the kind instead of probing optional fields.

use crate::DbColumn;

/// How a child selection is joined to its parent.
#[derive(Debug, Clone, Default)]
pub enum Rel {
    /// Root selections and free-standing tables.
    #[default]
    None,
    OneToOne(RelCols),
    OneToMany(RelCols),
    /// Many-to-many via a junction table.
    OneToManyThrough(ThroughRel),
    /// Self-referential hierarchy walked with a recursive CTE.
    Recursive(RecursiveRel),
    /// A JSON column on the parent exposed as a recordset.
    Embedded(RelCols),
    /// Data spliced in post-query by a remote resolver; the SQL layer only
    /// emits a placeholder id column.
    Remote(RemoteRel),
}

/// The two sides of a direct relationship.
///
/// `left` lives on the child table (the selection being rendered), `right`
/// on the parent. For embedded relationships both sides name the JSON
/// column on the parent table.
#[derive(Debug, Clone, Default)]
pub struct RelCols {
    pub left: DbColumn,
    pub right: DbColumn,
}

#[derive(Debug, Clone, Default)]
pub struct ThroughRel {
    /// Parent-side column (e.g. users.id).
    pub left: DbColumn,
    /// Child-side column (e.g. tags.id).
    pub right: DbColumn,
    /// Junction column matching `left` (e.g. user_tags.user_id).
    pub col_left: DbColumn,
    /// Junction column matching `right` (e.g. user_tags.tag_id).
    pub col_right: DbColumn,
}

#[derive(Debug, Clone, Default)]
pub struct RecursiveRel {
    /// FK column pointing at the same table (e.g. comments.reply_to_id).
    pub left: DbColumn,
    /// The referenced column (e.g. comments.id).
    pub right: DbColumn,
    /// Name of the CTE this relationship is consumed through. Must be
    /// unique within one emitted statement.
    pub vtable: String,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteRel {
    /// Column whose value keys the remote lookup.
    pub col: DbColumn,
    /// Placeholder JSON field the executor replaces, `__<name>_<column>`.
    pub id_field: String,
}

impl Rel {
    pub fn is_none(&self) -> bool {
        matches!(self, Rel::None)
    }

    /// Short tag for error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Rel::None => "none",
            Rel::OneToOne(_) => "one_to_one",
            Rel::OneToMany(_) => "one_to_many",
            Rel::OneToManyThrough(_) => "one_to_many_through",
            Rel::Recursive(_) => "recursive",
            Rel::Embedded(_) => "embedded",
            Rel::Remote(_) => "remote",
        }
    }
}
